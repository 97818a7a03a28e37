//! Routes a parsed oplog to a worker index. The same document always routes
//! to the same worker (by namespace or by `_id`), which is the destination
//! ordering contract: a worker only ever sees writes to documents it alone
//! is responsible for, so its dispatch order is a valid apply order.

use crate::config::ShardKey;
use crate::oplog::ParsedOplog;
use bson::Bson;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher as _};

/// Hashing policy used to pick a worker index for a parsed oplog.
pub struct Hasher {
    policy: ShardKey,
}

impl Hasher {
    pub fn new(policy: ShardKey) -> Hasher {
        Hasher { policy }
    }

    /// Returns the worker index in `0..worker_count` this entry routes to.
    ///
    /// `worker_count` must be non-zero; callers own at least one worker by
    /// construction.
    pub fn worker_for(&self, oplog: &ParsedOplog, worker_count: usize) -> usize {
        debug_assert!(worker_count > 0);
        let key = match self.policy {
            ShardKey::ByNamespace => hash_str(&oplog.ns),
            ShardKey::ById => match oplog.effective_id() {
                Some(id) => hash_bson(id),
                // DDL and no-op entries have no effective id; namespace is
                // the next best routing key so they still land deterministically.
                None => hash_str(&oplog.ns),
            },
        };
        (key % worker_count as u64) as usize
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

fn hash_bson(value: &Bson) -> u64 {
    let mut hasher = DefaultHasher::new();
    // `Bson` doesn't implement `Hash`; its canonical string form is stable
    // across the handful of `_id` types (ObjectId, string, int) we route on.
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

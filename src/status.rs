//! The `GET /repl` status surface. The REST server itself is out of scope;
//! this is the plain, serializable document an embedding binary mounts
//! behind whatever HTTP layer it already uses.

use crate::timestamp::Timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Serialize, Clone, Debug)]
pub struct Status {
    pub collector_id: String,
    pub replset: String,
    /// The syncer's current LSN: the `ts` of the last entry dispatched.
    pub lsn: u64,
    /// This syncer's in-process `ackTs` estimate (see `calculateSyncerAckTs`).
    pub ack_ts: u64,
    /// The last durably persisted checkpoint `ackTs`.
    pub checkpoint_ack_ts: u64,
    pub logs_fetched: u64,
    pub logs_applied: u64,
    pub logs_succeeded: u64,
    pub tps: f64,
}

/// Shared counters a syncer updates as it runs; cheap to snapshot into a
/// [`Status`] document on demand.
#[derive(Default)]
pub struct Counters {
    pub lsn: AtomicU64,
    pub ack_ts: AtomicU64,
    pub checkpoint_ack_ts: AtomicU64,
    pub logs_fetched: AtomicU64,
    pub logs_applied: AtomicU64,
    pub logs_succeeded: AtomicU64,
}

impl Counters {
    pub fn new() -> Counters {
        Counters::default()
    }

    pub fn record_fetched(&self, count: u64) {
        self.logs_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_applied(&self, count: u64) {
        self.logs_applied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self, count: u64) {
        self.logs_succeeded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_lsn(&self, ts: Timestamp) {
        self.lsn.store(ts.into(), Ordering::Relaxed);
    }

    pub fn set_ack_ts(&self, ts: Timestamp) {
        self.ack_ts.store(ts.into(), Ordering::Relaxed);
    }

    pub fn set_checkpoint_ack_ts(&self, ts: Timestamp) {
        self.checkpoint_ack_ts.store(ts.into(), Ordering::Relaxed);
    }

    pub fn snapshot(&self, collector_id: &str, replset: &str, tps: f64) -> Status {
        Status {
            collector_id: collector_id.to_owned(),
            replset: replset.to_owned(),
            lsn: self.lsn.load(Ordering::Relaxed),
            ack_ts: self.ack_ts.load(Ordering::Relaxed),
            checkpoint_ack_ts: self.checkpoint_ack_ts.load(Ordering::Relaxed),
            logs_fetched: self.logs_fetched.load(Ordering::Relaxed),
            logs_applied: self.logs_applied.load(Ordering::Relaxed),
            logs_succeeded: self.logs_succeeded.load(Ordering::Relaxed),
            tps,
        }
    }
}

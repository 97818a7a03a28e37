//! Cross-syncer DDL barrier coordinator.
//!
//! Modeled as message passing to a single coordinator task holding a map
//! `(ns, ts) -> arrival-set`: syncers send `Arrive(replset, key)` and await
//! a `Proceed { executor }` reply. This avoids any cyclic ownership between
//! syncers and the manager.

use crate::timestamp::Timestamp;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    ns: String,
    ts: u64,
}

enum Command {
    Block {
        replset: String,
        ns: String,
        ts: Timestamp,
        reply: oneshot::Sender<bool>,
    },
    Unblock {
        ns: String,
        ts: Timestamp,
    },
}

struct Barrier {
    /// Replsets that have arrived but not yet been told whether they are
    /// the executor, paired with their reply channel.
    pending: Vec<(String, oneshot::Sender<bool>)>,
    /// Set once quorum is reached; later arrivals (there shouldn't be any,
    /// but a slow syncer may still be in flight) get an immediate reply.
    executor: Option<String>,
}

/// Handle to the coordinator task. Cheap to clone; every clone shares the
/// same underlying map.
#[derive(Clone)]
pub struct DdlManager {
    tx: mpsc::Sender<Command>,
}

impl DdlManager {
    /// Spawns the coordinator task. `total_syncers` is the number of
    /// replica-set syncers participating in DDL quorum; a majority of them
    /// must arrive at the same `(ns, ts)` before an executor is designated.
    pub fn spawn(total_syncers: usize) -> DdlManager {
        let (tx, mut rx) = mpsc::channel::<Command>(64);
        tokio::spawn(async move {
            let majority = total_syncers / 2 + 1;
            let mut barriers: HashMap<Key, Barrier> = HashMap::new();

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Block {
                        replset,
                        ns,
                        ts,
                        reply,
                    } => {
                        let key = Key {
                            ns,
                            ts: ts.into(),
                        };
                        let barrier = barriers.entry(key).or_insert_with(|| Barrier {
                            pending: Vec::new(),
                            executor: None,
                        });

                        if let Some(executor) = &barrier.executor {
                            let _ = reply.send(*executor == replset);
                            continue;
                        }

                        barrier.pending.push((replset, reply));
                        if barrier.pending.len() >= majority {
                            // Deterministic tiebreak: lexicographically
                            // smallest replset name among registrants.
                            let executor = barrier
                                .pending
                                .iter()
                                .map(|(name, _)| name.clone())
                                .min()
                                .expect("pending is non-empty");
                            for (name, reply) in barrier.pending.drain(..) {
                                let _ = reply.send(name == executor);
                            }
                            barrier.executor = Some(executor);
                        }
                    }
                    Command::Unblock { ns, ts } => {
                        let key = Key {
                            ns,
                            ts: ts.into(),
                        };
                        barriers.remove(&key);
                    }
                }
            }
        });

        DdlManager { tx }
    }

    /// Registers `replset`'s arrival at the DDL barrier `(ns, ts)`. Returns
    /// `true` on this syncer if and only if it is the quorum-designated
    /// executor; `false` means a peer already is, or will be, and this
    /// syncer should skip dispatch and simply proceed.
    pub async fn block_ddl(&self, replset: &str, ns: &str, ts: Timestamp) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Block {
                replset: replset.to_owned(),
                ns: ns.to_owned(),
                ts,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Releases the barrier at `(ns, ts)`, waking any peer still registered
    /// there (there should be none left once quorum resolved every
    /// registrant, but the entry is dropped unconditionally either way).
    pub async fn unblock_ddl(&self, ns: &str, ts: Timestamp) {
        let _ = self
            .tx
            .send(Command::Unblock {
                ns: ns.to_owned(),
                ts,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn majority_designates_lexicographically_smallest_executor() {
        let manager = DdlManager::spawn(2);
        let ts = Timestamp::new(300, 5);

        let m0 = manager.clone();
        let m1 = manager.clone();
        let (r0, r1) = tokio::join!(
            m0.block_ddl("rs1", "db.a", ts),
            m1.block_ddl("rs0", "db.a", ts),
        );

        assert!(!r0, "rs1 is not lexicographically smallest");
        assert!(r1, "rs0 is lexicographically smallest and becomes executor");
    }

    #[tokio::test]
    async fn unblock_clears_the_barrier_for_a_later_ts() {
        let manager = DdlManager::spawn(1);
        let ts = Timestamp::new(100, 0);

        assert!(manager.block_ddl("rs0", "db.a", ts).await);
        manager.unblock_ddl("db.a", ts).await;

        // A fresh barrier at the same key re-runs quorum from scratch.
        assert!(manager.block_ddl("rs0", "db.a", ts).await);
    }
}

//! The destination `Worker` contract: a push-based sender the batcher hands
//! per-namespace/per-id slices to. Workers are external collaborators (the
//! actual send-to-destination logic lives outside this crate); this module
//! defines the trait the batcher and checkpoint computation depend on, plus
//! an in-memory reference implementation used by the test suite.

use crate::oplog::GenericOplog;
use crate::timestamp::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A destination sender the batcher dispatches a partitioned slice of a
/// batch to.
///
/// `ack`/`unack` are the sole shared mutable state between the syncer and
/// the worker: `unack` is raised by the batcher on dispatch, `ack` is raised
/// by the worker itself once the destination has durably applied up to that
/// timestamp. Checkpoint computation always reads `ack` before `unack` to
/// avoid ever observing `ack > unack` from a torn read.
pub trait Worker: Send + Sync {
    /// Non-blocking enqueue of a dispatch slice; raises `unack` to the
    /// slice's maximum timestamp.
    fn push(&self, batch: Vec<GenericOplog>);

    fn ack(&self) -> Timestamp;
    fn unack(&self) -> Timestamp;

    fn is_all_acked(&self) -> bool;
    fn set_all_acked(&self, value: bool);

    /// Blocks until `ack == unack`.
    fn wait_all_ack(&self);

    /// Test/recovery hook: forces both clocks to `ts`, used when the idle
    /// catch-up path or checkpoint restore advances a worker that never saw
    /// a live dispatch.
    fn force_ack(&self, ts: Timestamp);
}

/// An in-memory worker used by tests and by embedding binaries that apply
/// synchronously rather than over a network. Immediately "acks" everything
/// it is pushed, since there is no asynchronous destination.
pub struct MemoryWorker {
    ack: AtomicU64,
    unack: AtomicU64,
    all_acked: AtomicBool,
    received: parking_lot::Mutex<Vec<GenericOplog>>,
}

impl MemoryWorker {
    pub fn new() -> Arc<MemoryWorker> {
        Arc::new(MemoryWorker {
            ack: AtomicU64::new(0),
            unack: AtomicU64::new(0),
            all_acked: AtomicBool::new(true),
            received: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Like `new`, but acks are held back so tests can exercise the partial
    /// ack paths in `calculateSyncerAckTs` before calling
    /// [`MemoryWorker::ack_up_to`].
    pub fn new_manual() -> Arc<MemoryWorker> {
        Arc::new(MemoryWorker {
            ack: AtomicU64::new(0),
            unack: AtomicU64::new(0),
            all_acked: AtomicBool::new(false),
            received: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn ack_up_to(&self, ts: Timestamp) {
        self.ack.store(ts.into(), Ordering::SeqCst);
    }

    /// Test-only hook to set `unack` independently of a real `push`, used to
    /// exercise `calculateSyncerAckTs`'s boundary cases directly.
    pub fn set_unack_for_test(&self, ts: Timestamp) {
        self.unack.store(ts.into(), Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<GenericOplog> {
        self.received.lock().clone()
    }
}

impl Worker for MemoryWorker {
    fn push(&self, batch: Vec<GenericOplog>) {
        if let Some(max_ts) = batch.iter().map(|g| g.ts()).max() {
            self.unack.store(max_ts.into(), Ordering::SeqCst);
        }
        let mut received = self.received.lock();
        received.extend(batch.clone());
        drop(received);
        // The in-memory worker applies synchronously, so it acks immediately;
        // a networked worker acks asynchronously once the destination confirms.
        if let Some(max_ts) = batch.iter().map(|g| g.ts()).max() {
            self.ack.store(max_ts.into(), Ordering::SeqCst);
        }
    }

    fn ack(&self) -> Timestamp {
        Timestamp::from(self.ack.load(Ordering::SeqCst))
    }

    fn unack(&self) -> Timestamp {
        Timestamp::from(self.unack.load(Ordering::SeqCst))
    }

    fn is_all_acked(&self) -> bool {
        self.all_acked.load(Ordering::SeqCst)
    }

    fn set_all_acked(&self, value: bool) {
        self.all_acked.store(value, Ordering::SeqCst);
    }

    fn wait_all_ack(&self) {
        while self.ack() != self.unack() {
            std::thread::yield_now();
        }
    }

    fn force_ack(&self, ts: Timestamp) {
        self.ack.store(ts.into(), Ordering::SeqCst);
        self.unack.store(ts.into(), Ordering::SeqCst);
    }
}

/// Blocks the calling task until every worker in the slice reports
/// `ack == unack`. Used by the DDL dispatch path before unblocking peers and
/// by the idle catch-up path before advancing the checkpoint.
pub async fn wait_all_ack<W: Worker + ?Sized>(workers: &[Arc<W>]) {
    for worker in workers {
        while worker.ack() != worker.unack() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::{Op, ParsedOplog};
    use bson::doc;

    fn entry(ts: Timestamp) -> GenericOplog {
        GenericOplog {
            raw: doc! {},
            parsed: ParsedOplog {
                ts,
                op: Op::Insert,
                ns: "db.a".into(),
                o: doc! { "_id": 1 },
                o2: None,
                gid: None,
            },
        }
    }

    #[test]
    fn push_raises_unack_to_batch_max() {
        let worker = MemoryWorker::new();
        worker.push(vec![entry(Timestamp::new(1, 0)), entry(Timestamp::new(1, 5))]);
        assert_eq!(worker.unack(), Timestamp::new(1, 5));
    }

    #[test]
    fn ack_never_exceeds_unack_invariant_holds() {
        let worker = MemoryWorker::new();
        worker.push(vec![entry(Timestamp::new(2, 0))]);
        assert!(worker.ack() <= worker.unack());
    }
}

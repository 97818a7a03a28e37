//! Checkpoint computation (`calculateSyncerAckTs`), the persisted record
//! shape, and the `FlushByDoc`/`LoadByDoc` restore protocol.
//!
//! The checkpoint lock itself — a single multi-reader/one-writer lease the
//! batcher holds while composing and dispatching a batch, and the flusher
//! takes exclusively to snapshot — lives alongside the computation since
//! both exist to uphold the same invariant: the persisted `ackTs` never
//! exceeds the in-flight minimum `ack`, nor `syncTs`.

use crate::diskqueue::DiskQueue;
use crate::reader::FetchState;
use crate::timestamp::{SharedTimestamp, Timestamp};
use crate::worker::Worker;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// The persisted checkpoint record: one logical document per replica set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub name: String,
    pub ack_ts: u64,
    pub sync_ts: u64,
    pub dq_name: Option<String>,
}

/// The storage side of the checkpoint: persisted/retrieved by an external
/// collaborator. This crate only defines the contract.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, record: CheckpointRecord) -> Result<()>;
    async fn load(&self, replset: &str) -> Result<Option<CheckpointRecord>>;
}

/// An in-memory `CheckpointStore` used by tests and by embedders that don't
/// need cross-process durability.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    record: parking_lot::Mutex<Option<CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> MemoryCheckpointStore {
        MemoryCheckpointStore::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        *self.record.lock() = Some(record);
        Ok(())
    }

    async fn load(&self, _replset: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self.record.lock().clone())
    }
}

/// The multi-reader/one-writer lease guarding a checkpoint snapshot: the
/// batcher takes the read side while composing and dispatching a batch (so
/// the flusher can't snapshot mid-dispatch); the flusher takes the write
/// side to snapshot. The read lease is released around the flush-trigger
/// signal and re-acquired afterwards, to avoid self-deadlock when a DDL
/// barrier needs a synchronous flush from inside a held read lease.
#[derive(Default)]
pub struct CheckpointLock(RwLock<()>);

impl CheckpointLock {
    pub fn new() -> CheckpointLock {
        CheckpointLock::default()
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.0.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.0.write().await
    }
}

/// Classifies one worker's contribution to `calculateSyncerAckTs`. Kept as
/// an explicit enum rather than an accidental fallthrough case.
enum Contribution {
    Idle,
    AllAcked(Timestamp),
    Partial(Timestamp),
    /// `unack < ack && unack == 0`: the receiver was restarted and lost its
    /// in-memory `unack`. Treated as transient and non-contributing.
    JustRestarted,
}

fn classify<W: Worker + ?Sized>(index: usize, worker: &W) -> Result<Contribution> {
    // `ack` is read before `unack`, so a torn read can only ever look like
    // "ack is behind" rather than fabricate `ack > unack`.
    let ack = worker.ack();
    let unack = worker.unack();

    if ack.is_zero() && unack.is_zero() {
        return Ok(Contribution::Idle);
    }
    if ack == unack || worker.is_all_acked() {
        worker.set_all_acked(true);
        return Ok(Contribution::AllAcked(ack));
    }
    if unack > ack {
        return Ok(Contribution::Partial(ack));
    }
    // unack < ack from here on.
    if unack.is_zero() {
        return Ok(Contribution::JustRestarted);
    }
    Err(Error::CheckpointInvariantViolation {
        worker: index,
        ack: ack.into(),
        unack: unack.into(),
    })
}

/// Computes the syncer-wide `ackTs` candidate from every worker's `ack`/
/// `unack` pair.
pub fn calculate_syncer_ack_ts<W: Worker + ?Sized>(workers: &[Arc<W>]) -> Result<Timestamp> {
    let mut all_acked_values = Vec::new();
    let mut candidates = Vec::new();
    let mut all_non_idle_are_all_acked = true;

    for (index, worker) in workers.iter().enumerate() {
        match classify(index, worker.as_ref())? {
            Contribution::Idle => {}
            Contribution::AllAcked(ts) => {
                all_acked_values.push(ts);
            }
            Contribution::Partial(ts) => {
                all_non_idle_are_all_acked = false;
                candidates.push(ts);
            }
            Contribution::JustRestarted => {
                all_non_idle_are_all_acked = false;
            }
        }
    }

    if all_non_idle_are_all_acked && !all_acked_values.is_empty() {
        return Ok(*all_acked_values.iter().max().expect("non-empty"));
    }

    if let Some(min) = candidates.iter().min() {
        if !min.is_zero() {
            return Ok(*min);
        }
    }

    Err(Error::NoCheckpointProgress)
}

/// Builds the checkpoint document for `replset`. Asserts `sync_ts ==
/// unsync_ts` under the checkpoint lock.
pub fn flush_by_doc(
    replset: &str,
    ack_ts: Timestamp,
    sync_ts: Timestamp,
    unsync_ts: Timestamp,
    dq_name: Option<String>,
) -> CheckpointRecord {
    debug_assert_eq!(
        sync_ts, unsync_ts,
        "flush_by_doc called with syncTs != unsyncTs"
    );
    CheckpointRecord {
        name: replset.to_owned(),
        ack_ts: ack_ts.into(),
        sync_ts: sync_ts.into(),
        dq_name,
    }
}

/// The batcher's two clocks, shared so a periodic flusher task can read
/// them without taking `&Batcher`. `unsync_ts` is advanced on every entry
/// the batcher observes (filtered or not); `sync_ts` is advanced to
/// `unsync_ts` at the moment the checkpoint path is taken (barrier
/// carry-over), maintaining `sync_ts <= unsync_ts`.
#[derive(Clone)]
pub struct SyncClocks {
    pub sync_ts: SharedTimestamp,
    pub unsync_ts: SharedTimestamp,
}

impl SyncClocks {
    pub fn new(initial: Timestamp) -> SyncClocks {
        SyncClocks {
            sync_ts: SharedTimestamp::new(initial),
            unsync_ts: SharedTimestamp::new(initial),
        }
    }
}

/// Spawns a task that, every `interval`, takes the checkpoint lock's write
/// side and persists a fresh checkpoint. Skips a tick rather than blocking
/// indefinitely if `sync_ts != unsync_ts` (a batch is mid-flight) or if no
/// worker currently offers a usable `ackTs` candidate.
pub fn spawn_periodic_flusher<W: Worker + 'static>(
    replset: String,
    interval: Duration,
    lock: Arc<CheckpointLock>,
    store: Arc<dyn CheckpointStore>,
    workers: Vec<Arc<W>>,
    clocks: SyncClocks,
    disk_queue_name: Option<String>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let sync_ts = clocks.sync_ts.get();
            let unsync_ts = clocks.unsync_ts.get();
            if sync_ts != unsync_ts {
                log::debug!("skipping periodic checkpoint tick for {}: batch in flight", replset);
                continue;
            }
            let ack_ts = match calculate_syncer_ack_ts(&workers) {
                Ok(ts) => ts,
                Err(e) => {
                    log::debug!("skipping periodic checkpoint tick for {}: {}", replset, e);
                    continue;
                }
            };
            let _write_guard = lock.write().await;
            let record = flush_by_doc(&replset, ack_ts, sync_ts, unsync_ts, disk_queue_name.clone());
            if let Err(e) = store.save(record).await {
                log::warn!("periodic checkpoint flush for {} failed: {}", replset, e);
            }
        }
    });
}

/// The restored in-process state produced by `LoadByDoc`.
pub struct RestoredState {
    pub ack_ts: Timestamp,
    pub sync_ts: Timestamp,
    pub unsync_ts: Timestamp,
    pub fetch_state: FetchState,
    pub query_ts: Timestamp,
    pub disk_queue_name: Option<String>,
}

/// Restores syncer state from a persisted checkpoint (or a fresh start if
/// `doc` is `None`), verifying the source still retains `ack_ts` and
/// selecting the reader's resume state accordingly.
///
/// `oldest_source_ts` is the oldest timestamp still retained by the source
/// oplog; `doc_end_ts` is the timestamp at which the (external) document
/// copy phase ended, `0` meaning "no document phase recorded yet".
/// `disk_queue_dir`/`wallclock_secs` let this create a fresh disk queue name
/// when the table's first row applies.
pub fn load_by_doc(
    replset: &str,
    doc: Option<CheckpointRecord>,
    oldest_source_ts: Timestamp,
    doc_end_ts: Timestamp,
    disk_queue_dir: &Path,
    wallclock_secs: u64,
) -> Result<RestoredState> {
    let ack_ts = doc.as_ref().map_or(Timestamp::ZERO, |d| Timestamp::from(d.ack_ts));

    let (ack_ts, sync_ts) = if ack_ts.is_zero() {
        (Timestamp::EPOCH, Timestamp::EPOCH)
    } else {
        if oldest_source_ts > ack_ts {
            return Err(Error::OplogWindowLost {
                ack_ts: ack_ts.into(),
                oldest_ts: oldest_source_ts.into(),
            });
        }
        (ack_ts, Timestamp::from(doc.as_ref().unwrap().sync_ts))
    };

    let (fetch_state, query_ts, disk_queue_name) = if doc_end_ts.is_zero() {
        let name = DiskQueue::conventional_name(replset, wallclock_secs);
        (FetchState::StoreDiskNoApply, ack_ts, Some(name))
    } else {
        let existing_name = doc.as_ref().and_then(|d| d.dq_name.clone());
        match existing_name.filter(|name| DiskQueue::exists(disk_queue_dir, name)) {
            Some(name) => {
                let query_ts = DiskQueue::query_ts(disk_queue_dir, &name).unwrap_or(ack_ts);
                (FetchState::StoreDiskApply, query_ts, Some(name))
            }
            None => (FetchState::StoreMemoryApply, ack_ts, None),
        }
    };

    Ok(RestoredState {
        ack_ts,
        sync_ts,
        unsync_ts: sync_ts,
        fetch_state,
        query_ts,
        disk_queue_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::MemoryWorker;

    #[test]
    fn partial_ack_boundary() {
        let w0 = MemoryWorker::new_manual();
        w0.force_ack(Timestamp::new(100, 50));
        w0.set_unack_for_test(Timestamp::new(100, 80));

        let w1 = MemoryWorker::new_manual();
        w1.force_ack(Timestamp::new(100, 60));

        let w2 = MemoryWorker::new_manual();

        let workers: Vec<Arc<MemoryWorker>> = vec![w0, w1, w2];
        let result = calculate_syncer_ack_ts(&workers).unwrap();
        assert_eq!(result, Timestamp::new(100, 50));
    }

    #[test]
    fn all_workers_all_acked_returns_max() {
        let w0 = MemoryWorker::new_manual();
        w0.force_ack(Timestamp::new(100, 10));
        let w1 = MemoryWorker::new_manual();
        w1.force_ack(Timestamp::new(100, 20));
        let workers: Vec<Arc<MemoryWorker>> = vec![w0, w1];
        assert_eq!(
            calculate_syncer_ack_ts(&workers).unwrap(),
            Timestamp::new(100, 20)
        );
    }

    #[test]
    fn invariant_violation_is_retryable_error() {
        let w0 = MemoryWorker::new_manual();
        w0.force_ack(Timestamp::new(100, 10));
        w0.set_unack_for_test(Timestamp::new(100, 5));
        let workers: Vec<Arc<MemoryWorker>> = vec![w0];
        assert!(matches!(
            calculate_syncer_ack_ts(&workers),
            Err(Error::CheckpointInvariantViolation { .. })
        ));
    }

    #[test]
    fn oplog_window_lost_is_fatal() {
        let doc = CheckpointRecord {
            name: "rs0".into(),
            ack_ts: Timestamp::new(400, 0).into(),
            sync_ts: Timestamp::new(400, 0).into(),
            dq_name: None,
        };
        let result = load_by_doc(
            "rs0",
            Some(doc),
            Timestamp::new(450, 0),
            Timestamp::ZERO,
            Path::new("."),
            0,
        );
        assert!(matches!(result, Err(Error::OplogWindowLost { .. })));
    }

    #[test]
    fn first_run_seeds_epoch() {
        let result = load_by_doc("rs0", None, Timestamp::ZERO, Timestamp::ZERO, Path::new("."), 0)
            .unwrap();
        assert_eq!(result.ack_ts, Timestamp::EPOCH);
        assert_eq!(result.sync_ts, Timestamp::EPOCH);
    }

    #[test]
    fn crash_resume_drains_existing_disk_queue() {
        let dir = std::env::temp_dir().join(format!("oplog-syncer-test-ckpt-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let name = "diskqueue-rs0-resume";

        let queue = DiskQueue::open(&dir, name).unwrap();
        queue.save_query_ts(Timestamp::new(510, 3)).unwrap();
        drop(queue);

        let doc = CheckpointRecord {
            name: "rs0".into(),
            ack_ts: Timestamp::new(505, 0).into(),
            sync_ts: Timestamp::new(505, 0).into(),
            dq_name: Some(name.to_owned()),
        };

        let result = load_by_doc(
            "rs0",
            Some(doc),
            Timestamp::new(100, 0),
            Timestamp::new(500, 0),
            &dir,
            0,
        )
        .unwrap();

        assert!(matches!(result.fetch_state, FetchState::StoreDiskApply));
        assert_eq!(result.query_ts, Timestamp::new(510, 3));
        assert_eq!(result.ack_ts, Timestamp::new(505, 0));
        assert_eq!(result.sync_ts, Timestamp::new(505, 0));
        assert_eq!(result.disk_queue_name.as_deref(), Some(name));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn document_phase_running_spills_without_applying() {
        let result = load_by_doc(
            "rs0",
            None,
            Timestamp::ZERO,
            Timestamp::ZERO,
            Path::new("."),
            1700000000,
        )
        .unwrap();
        assert!(matches!(result.fetch_state, FetchState::StoreDiskNoApply));
        assert_eq!(
            result.disk_queue_name.as_deref(),
            Some("diskqueue-rs0-1700000000")
        );
    }
}

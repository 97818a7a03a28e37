//! The batcher: the core of the core. Reassembles parsed
//! entries from the parallel `logsQueue[]` round-robin, applies the filter
//! chain and move-chunk gating, detects DDL/checkpoint barriers, dispatches
//! to workers by hash, and advances the syncer's `syncTs`/`unsyncTs`
//! clocks.

use crate::checkpoint::{self, CheckpointLock, CheckpointStore, SyncClocks};
use crate::ddl::DdlManager;
use crate::filter::FilterChain;
use crate::hash::Hasher;
use crate::movechunk::MoveChunkManager;
use crate::oplog::GenericOplog;
use crate::status::Counters;
use crate::timestamp::{SharedTimestamp, Timestamp};
use crate::worker::{self, Worker};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Splits `entries` at the first DDL (barrier) entry: the barrier is kept
/// as the last element of the returned head, and everything after it is
/// returned as the residual to stash in `remainLog`. Returns `None` when
/// there is no barrier in `entries` at all.
fn split_at_barrier(mut entries: Vec<GenericOplog>) -> (Vec<GenericOplog>, Vec<GenericOplog>, bool) {
    match entries.iter().position(|e| e.parsed.is_barrier()) {
        Some(pos) => {
            let rest = entries.split_off(pos + 1);
            (entries, rest, true)
        }
        None => (entries, Vec::new(), false),
    }
}

/// Reassembles parsed entries from the parallel logs queues in round-robin
/// order, one working batch per `next_raw` call, honoring the `remainLog`
/// stash across calls.
struct QueueCursor {
    logs_rx: Vec<mpsc::Receiver<Vec<GenericOplog>>>,
    next_queue: usize,
    remain: Option<Vec<GenericOplog>>,
    max_batch_size: usize,
}

impl QueueCursor {
    fn new(logs_rx: Vec<mpsc::Receiver<Vec<GenericOplog>>>, max_batch_size: usize) -> QueueCursor {
        QueueCursor {
            logs_rx,
            next_queue: 0,
            remain: None,
            max_batch_size,
        }
    }

    /// Returns the next working batch, or `None` if every queue has been
    /// closed (the deserializer pool has shut down) with nothing left to
    /// drain.
    async fn next_raw(&mut self) -> Option<Vec<GenericOplog>> {
        let mut batch = Vec::new();

        if let Some(remaining) = self.remain.take() {
            batch.extend(remaining);
        } else {
            // Block on exactly one queue to guarantee progress when the
            // pipeline is otherwise idle; every queue closed means the
            // deserializer pool has shut down and there's nothing left.
            let mut closed = 0;
            loop {
                let queue_idx = self.next_queue;
                self.next_queue = (self.next_queue + 1) % self.logs_rx.len();
                match self.logs_rx[queue_idx].recv().await {
                    Some(entries) => {
                        let (head, rest, hit_barrier) = split_at_barrier(entries);
                        batch.extend(head);
                        if hit_barrier {
                            if !rest.is_empty() {
                                self.remain = Some(rest);
                            }
                            return Some(batch);
                        }
                        break;
                    }
                    None => {
                        closed += 1;
                        if closed >= self.logs_rx.len() {
                            return None;
                        }
                    }
                }
            }
        }

        let mut empty_streak = 0;
        while batch.len() < self.max_batch_size && empty_streak < self.logs_rx.len() {
            if let Some(last) = batch.last() {
                if last.parsed.is_barrier() {
                    break;
                }
            }
            let queue_idx = self.next_queue;
            self.next_queue = (self.next_queue + 1) % self.logs_rx.len();
            match self.logs_rx[queue_idx].try_recv() {
                Ok(entries) => {
                    empty_streak = 0;
                    let (head, rest, hit_barrier) = split_at_barrier(entries);
                    batch.extend(head);
                    if hit_barrier {
                        if !rest.is_empty() {
                            self.remain = Some(rest);
                        }
                        break;
                    }
                }
                Err(_) => empty_streak += 1,
            }
        }

        Some(batch)
    }
}

/// The result of running a raw batch through the filter chain and
/// move-chunk gating.
struct Filtered {
    batch: Vec<GenericOplog>,
    last: Option<GenericOplog>,
    next_barrier: bool,
    flush_checkpoint: bool,
}

pub struct Batcher<W: Worker + 'static> {
    cursor: QueueCursor,
    filters: FilterChain,
    hasher: Hasher,
    move_chunk: Arc<dyn MoveChunkManager>,
    ddl: DdlManager,
    workers: Vec<Arc<W>>,
    replset: String,
    is_shard_cluster: bool,
    query_ts: SharedTimestamp,
    checkpoint_lock: Arc<CheckpointLock>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    clocks: SyncClocks,
    counters: Arc<Counters>,
    disk_queue_name: Option<String>,
    filter_checkpoint_gap_secs: u32,
    /// Entries held back by move-chunk gating, to be retried on a later
    /// `tick()` rather than permanently dropped.
    move_chunk_retry: Vec<GenericOplog>,
    /// Entries dispatched since the last persisted checkpoint; folded into
    /// `Counters::record_succeeded` and reset whenever `flush_checkpoint`
    /// durably covers them.
    pending_since_checkpoint: u64,
}

impl<W: Worker + 'static> Batcher<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logs_rx: Vec<mpsc::Receiver<Vec<GenericOplog>>>,
        max_batch_size: usize,
        filters: FilterChain,
        hasher: Hasher,
        move_chunk: Arc<dyn MoveChunkManager>,
        ddl: DdlManager,
        workers: Vec<Arc<W>>,
        replset: String,
        is_shard_cluster: bool,
        query_ts: SharedTimestamp,
        checkpoint_lock: Arc<CheckpointLock>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        clocks: SyncClocks,
        counters: Arc<Counters>,
        disk_queue_name: Option<String>,
        filter_checkpoint_gap_secs: u32,
    ) -> Batcher<W> {
        Batcher {
            cursor: QueueCursor::new(logs_rx, max_batch_size),
            filters,
            hasher,
            move_chunk,
            ddl,
            workers,
            replset,
            is_shard_cluster,
            query_ts,
            checkpoint_lock,
            checkpoint_store,
            clocks,
            counters,
            disk_queue_name,
            filter_checkpoint_gap_secs,
            move_chunk_retry: Vec::new(),
            pending_since_checkpoint: 0,
        }
    }

    /// Runs one iteration of the batcher loop: pull a working batch, filter
    /// it, dispatch (or gate on a DDL barrier / idle catch-up), and carry
    /// `syncTs` forward. Returns `Ok(false)` once the logs queues have all
    /// closed, signalling a clean pipeline shutdown.
    ///
    /// Entries held back by move-chunk gating on a previous tick are
    /// retried first, after a brief wait for the migration to clear,
    /// rather than pulling fresh entries off the logs queues.
    pub async fn tick(&mut self) -> Result<bool> {
        let raw_batch = if !self.move_chunk_retry.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            std::mem::take(&mut self.move_chunk_retry)
        } else {
            match self.cursor.next_raw().await {
                Some(batch) => batch,
                None => return Ok(false),
            }
        };

        if let Some(last) = raw_batch.last() {
            self.clocks.unsync_ts.set(last.ts());
            self.counters.set_lsn(last.ts());
        }
        self.counters.record_fetched(raw_batch.len() as u64);

        let filtered = self.filter_and_block_move_chunk(raw_batch);

        if filtered.next_barrier {
            // `handle_ddl` manages the checkpoint lease itself: it must
            // release its read lease before flushing, so the lease can't be
            // held across both here.
            self.handle_ddl(filtered).await?;
        } else if let Some(last) = &filtered.last {
            let last_ts = last.ts();
            // Hold the checkpoint read lease while composing and
            // dispatching, so the flusher can't snapshot mid-dispatch;
            // release it before any flush below.
            let read_guard = self.checkpoint_lock.read().await;
            self.dispatch_batch(filtered.batch).await;
            self.query_ts.set(last_ts);
            drop(read_guard);
            if filtered.flush_checkpoint {
                self.flush_checkpoint().await?;
            }
        } else {
            // Everything in this working batch was filtered out. Still
            // check whether a long filtered tail should pull the
            // checkpoint forward.
            self.idle_catch_up().await?;
        }

        // Barrier carry-over: `syncTs := unsyncTs`.
        self.clocks.sync_ts.set(self.clocks.unsync_ts.get());

        Ok(true)
    }

    /// Runs the filter chain, then consults the move-chunk manager for each
    /// surviving entry. An entry referencing a chunk mid-migration is not
    /// permanently discarded: it (and everything still unread after it in
    /// this working batch, to preserve per-namespace dispatch order) is
    /// stashed in `move_chunk_retry` and retried, after a short wait, on a
    /// later `tick()`.
    fn filter_and_block_move_chunk(&mut self, batch: Vec<GenericOplog>) -> Filtered {
        let mut surviving = Vec::with_capacity(batch.len());
        let mut entries = batch.into_iter();
        while let Some(entry) = entries.next() {
            if !self.filters.keep(&entry.parsed) {
                continue;
            }
            if self.move_chunk.is_chunk_migrating(&entry.parsed) {
                log::debug!(
                    "holding back oplog ts={} ns={}: chunk mid-migration, will retry",
                    entry.ts(),
                    entry.parsed.ns
                );
                self.move_chunk_retry.push(entry);
                self.move_chunk_retry.extend(entries);
                break;
            }
            surviving.push(entry);
        }

        let last = surviving.last().cloned();
        // Only a DDL command gates on cross-syncer quorum; a barrier noop
        // just forces the checkpoint flush below without the DDL dance.
        let next_barrier = last.as_ref().map_or(false, |e| e.parsed.is_ddl());
        let flush_checkpoint = last.as_ref().map_or(false, |e| e.parsed.is_barrier());

        Filtered {
            batch: surviving,
            last,
            next_barrier,
            flush_checkpoint,
        }
    }

    /// The DDL dispatch path: gate on cross-syncer quorum, let
    /// only the designated executor transform and dispatch the trailing DDL
    /// entry, then flush the checkpoint and release peers.
    ///
    /// `filtered.batch` is the whole surviving working batch, which may
    /// carry ordinary DML entries ahead of the trailing barrier (`Next()`
    /// only guarantees the barrier is last, not alone) — only the DDL entry
    /// itself is ever transformed; preceding DML dispatches through the
    /// normal untransformed path regardless of executor status, since it
    /// belongs to this replset's own stream and isn't gated by DDL quorum.
    async fn handle_ddl(&mut self, filtered: Filtered) -> Result<()> {
        let mut batch = filtered.batch;
        let ddl = batch
            .pop()
            .expect("next_barrier implies a trailing DDL entry");
        let preceding = batch;

        let ns = ddl.parsed.ns.clone();
        let ts = ddl.ts();

        let is_executor = if self.is_shard_cluster {
            self.ddl.block_ddl(&self.replset, &ns, ts).await
        } else {
            // A non-sharded destination has no cross-syncer peers to race
            // with; this syncer always executes its own DDL.
            true
        };

        let read_guard = self.checkpoint_lock.read().await;
        if !preceding.is_empty() {
            self.dispatch_batch(preceding).await;
        }
        if is_executor {
            let transformed = self.transform_ddl(&ddl);
            self.dispatch_batch(transformed).await;
        } else {
            log::debug!("skipping DDL dispatch for {} at {}: not the executor", ns, ts);
        }
        worker::wait_all_ack(&self.workers).await;
        drop(read_guard);

        self.query_ts.set(ts);
        self.flush_checkpoint().await?;

        if self.is_shard_cluster {
            self.ddl.unblock_ddl(&ns, ts).await;
        }

        Ok(())
    }

    /// Transforms the trailing DDL entry into the form appropriate for the
    /// destination. A sharded destination wraps a collection-level command
    /// with `shardCollection`; otherwise the command replays unchanged.
    /// Never touches any other entry in the working batch.
    fn transform_ddl(&self, ddl: &GenericOplog) -> Vec<GenericOplog> {
        if !self.is_shard_cluster {
            return vec![ddl.clone()];
        }
        let mut shard_collection = ddl.clone();
        // A real implementation rewrites `o` into a `shardCollection` admin
        // command keyed on the target namespace; the oplog entry itself is
        // forwarded alongside it unchanged so both reach the destination.
        shard_collection.parsed.o = bson::doc! {
            "shardCollection": ddl.parsed.ns.clone(),
        };
        vec![shard_collection, ddl.clone()]
    }

    /// Partitions the batch per-worker by
    /// hash, pushes each slice, and raises that worker's `unack` to the
    /// slice's maximum timestamp (done inside `Worker::push`).
    async fn dispatch_batch(&mut self, batch: Vec<GenericOplog>) {
        if batch.is_empty() {
            return;
        }
        self.pending_since_checkpoint += batch.len() as u64;
        let worker_count = self.workers.len();
        let mut slices: Vec<Vec<GenericOplog>> = (0..worker_count).map(|_| Vec::new()).collect();
        for entry in batch {
            let idx = self.hasher.worker_for(&entry.parsed, worker_count);
            slices[idx].push(entry);
        }
        for (idx, slice) in slices.into_iter().enumerate() {
            if !slice.is_empty() {
                self.counters.record_applied(slice.len() as u64);
                self.workers[idx].push(slice);
            }
        }
    }

    /// Idle catch-up: when nothing survived filtering but the gap between
    /// the last observed timestamp and the reader's resume point has grown
    /// past `FilterCheckpointGap` seconds, wait for every worker to drain,
    /// then pull `queryTs` and every worker's `ack` forward to `unsyncTs`
    /// so a long filtered tail doesn't get replayed unbounded after a
    /// restart. The advanced checkpoint is persisted immediately rather
    /// than waiting for the next periodic flush.
    async fn idle_catch_up(&mut self) -> Result<()> {
        let unsync_ts = self.clocks.unsync_ts.get();
        let gap_secs = unsync_ts.seconds().saturating_sub(self.query_ts.get().seconds());
        if gap_secs < self.filter_checkpoint_gap_secs {
            return Ok(());
        }

        worker::wait_all_ack(&self.workers).await;
        self.query_ts.set(unsync_ts);
        for worker in &self.workers {
            worker.force_ack(unsync_ts);
        }
        log::debug!(
            "idle catch-up for {}: advanced queryTs/ack to {}",
            self.replset,
            unsync_ts
        );
        self.flush_checkpoint().await
    }

    /// Releases the read lease, takes the write lease, computes and
    /// persists a checkpoint, then the caller is expected to re-acquire
    /// the read lease before continuing. Must never be called while the
    /// read lease is still held, or the write lease acquire deadlocks.
    async fn flush_checkpoint(&mut self) -> Result<()> {
        let write_guard = self.checkpoint_lock.write().await;
        let sync_ts = self.clocks.unsync_ts.get();
        self.clocks.sync_ts.set(sync_ts);

        let ack_ts = checkpoint::calculate_syncer_ack_ts(&self.workers)?;
        let record = checkpoint::flush_by_doc(
            &self.replset,
            ack_ts,
            sync_ts,
            sync_ts,
            self.disk_queue_name.clone(),
        );
        self.checkpoint_store.save(record).await?;
        self.counters.set_ack_ts(ack_ts);
        self.counters.set_checkpoint_ack_ts(ack_ts);
        if self.pending_since_checkpoint > 0 {
            self.counters.record_succeeded(self.pending_since_checkpoint);
            self.pending_since_checkpoint = 0;
        }
        drop(write_guard);
        Ok(())
    }

    /// Runs the batcher loop to completion (until the logs queues close).
    pub async fn run(mut self) -> Result<()> {
        while self.tick().await? {}
        Ok(())
    }
}

/// Adaptive maximum batch size the `Next()` algorithm stops at; fixed here
/// rather than truly adaptive, since the adaptive sizing policy (scaling
/// with destination throughput) is owned by the coordinator this crate
/// doesn't implement.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::ShardKey;
    use crate::deserializer;
    use crate::movechunk::NoopMoveChunkManager;
    use crate::oplog::{Op, ParsedOplog};
    use crate::worker::MemoryWorker;
    use bson::doc;

    /// `logsQueue[i]` channels carry parsed `GenericOplog` batches, unlike
    /// `deserializer::channel_pair`'s `pendingQueue[i]` (raw `Document`)
    /// channels — tests build these directly rather than reusing that
    /// helper at the wrong type.
    fn logs_channel_pair(
        parallelism: usize,
    ) -> (
        Vec<mpsc::Sender<Vec<GenericOplog>>>,
        Vec<mpsc::Receiver<Vec<GenericOplog>>>,
    ) {
        let mut senders = Vec::with_capacity(parallelism);
        let mut receivers = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let (tx, rx) = mpsc::channel(deserializer::QUEUE_CAPACITY);
            senders.push(tx);
            receivers.push(rx);
        }
        (senders, receivers)
    }

    fn entry(seconds: u32, ordinal: u32, ns: &str, id: i32, op: Op) -> GenericOplog {
        GenericOplog {
            raw: doc! {},
            parsed: ParsedOplog {
                ts: Timestamp::new(seconds, ordinal),
                op,
                ns: ns.into(),
                o: doc! { "_id": id },
                o2: None,
                gid: None,
            },
        }
    }

    fn make_batcher(
        logs_rx: Vec<mpsc::Receiver<Vec<GenericOplog>>>,
        workers: Vec<Arc<MemoryWorker>>,
    ) -> Batcher<MemoryWorker> {
        Batcher::new(
            logs_rx,
            DEFAULT_MAX_BATCH_SIZE,
            FilterChain::new(),
            Hasher::new(ShardKey::ById),
            Arc::new(NoopMoveChunkManager),
            DdlManager::spawn(1),
            workers,
            "rs0".into(),
            false,
            SharedTimestamp::new(Timestamp::ZERO),
            Arc::new(CheckpointLock::new()),
            Arc::new(MemoryCheckpointStore::new()),
            SyncClocks::new(Timestamp::ZERO),
            Arc::new(Counters::new()),
            None,
            10,
        )
    }

    #[tokio::test]
    async fn steady_stream_dispatches_everything() {
        let (senders, receivers) = logs_channel_pair(1);
        let workers = vec![MemoryWorker::new(), MemoryWorker::new()];
        let mut batcher = make_batcher(receivers, workers.clone());

        let batch: Vec<GenericOplog> = (1..=1000)
            .map(|i| entry(100, i, "db.a", i as i32, Op::Insert))
            .collect();
        senders[0].send(batch).await.unwrap();
        drop(senders);

        // Drain until the pipeline closes; a 1000-entry batch may take more
        // than one `tick()` since the adaptive max is also 1000.
        while batcher.tick().await.unwrap() {}

        let total_received: usize = workers.iter().map(|w| w.received().len()).sum();
        assert_eq!(total_received, 1000);
        for worker in &workers {
            if worker.unack().is_zero() {
                continue;
            }
            assert_eq!(worker.ack(), worker.unack());
        }
    }

    #[tokio::test]
    async fn filtered_tail_eventually_advances_checkpoint() {
        let (senders, receivers) = logs_channel_pair(1);
        let workers = vec![MemoryWorker::new()];

        let mut batcher = Batcher::new(
            receivers,
            DEFAULT_MAX_BATCH_SIZE,
            {
                let mut chain = FilterChain::new();
                chain.push(Box::new(crate::filter::Namespace {
                    allow: vec![],
                    deny: vec!["db.excluded".into()],
                }));
                chain
            },
            Hasher::new(ShardKey::ById),
            Arc::new(NoopMoveChunkManager),
            DdlManager::spawn(1),
            workers.clone(),
            "rs0".into(),
            false,
            SharedTimestamp::new(Timestamp::ZERO),
            Arc::new(CheckpointLock::new()),
            Arc::new(MemoryCheckpointStore::new()),
            SyncClocks::new(Timestamp::ZERO),
            Arc::new(Counters::new()),
            None,
            5,
        );

        let batch: Vec<GenericOplog> = (1..=10)
            .map(|i| entry(200, i, "db.excluded", i as i32, Op::Insert))
            .collect();
        senders[0].send(batch).await.unwrap();
        drop(senders);

        batcher.tick().await.unwrap();

        assert_eq!(batcher.query_ts.get(), Timestamp::new(200, 10));
        assert_eq!(workers[0].ack(), Timestamp::new(200, 10));
    }

    #[tokio::test]
    async fn non_sharded_destination_always_self_executes_ddl() {
        let (senders, receivers) = logs_channel_pair(1);
        let workers = vec![MemoryWorker::new()];
        let mut batcher = make_batcher(receivers, workers.clone());

        let ddl = entry(300, 5, "db.a", 0, Op::Command);
        senders[0].send(vec![ddl]).await.unwrap();
        drop(senders);

        batcher.tick().await.unwrap();
        assert_eq!(workers[0].unack(), Timestamp::new(300, 5));
    }

    #[tokio::test]
    async fn sharded_executor_ddl_does_not_corrupt_preceding_dml() {
        let (senders, receivers) = logs_channel_pair(1);
        let workers = vec![MemoryWorker::new()];
        let mut batcher = Batcher::new(
            receivers,
            DEFAULT_MAX_BATCH_SIZE,
            FilterChain::new(),
            Hasher::new(ShardKey::ById),
            Arc::new(NoopMoveChunkManager),
            DdlManager::spawn(1),
            workers.clone(),
            "rs0".into(),
            true,
            SharedTimestamp::new(Timestamp::ZERO),
            Arc::new(CheckpointLock::new()),
            Arc::new(MemoryCheckpointStore::new()),
            SyncClocks::new(Timestamp::ZERO),
            Arc::new(Counters::new()),
            None,
            10,
        );

        let insert = entry(300, 1, "db.a", 1, Op::Insert);
        let ddl = entry(300, 5, "db.a", 0, Op::Command);
        senders[0].send(vec![insert.clone(), ddl]).await.unwrap();
        drop(senders);

        batcher.tick().await.unwrap();

        let received = workers[0].received();
        assert_eq!(received.len(), 3, "insert, shardCollection wrapper, original DDL");
        assert_eq!(
            received[0].parsed.o, insert.parsed.o,
            "preceding DML payload must dispatch untouched, not overwritten by transform_ddl"
        );
        assert_eq!(
            received[1].parsed.o,
            bson::doc! { "shardCollection": "db.a" }
        );
        assert_eq!(received[2].parsed.ts, Timestamp::new(300, 5));
    }

    #[tokio::test]
    async fn noop_barrier_forces_flush_without_ddl_gating() {
        let (senders, receivers) = logs_channel_pair(1);
        let workers = vec![MemoryWorker::new()];
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut batcher = Batcher::new(
            receivers,
            DEFAULT_MAX_BATCH_SIZE,
            FilterChain::new(),
            Hasher::new(ShardKey::ById),
            Arc::new(NoopMoveChunkManager),
            DdlManager::spawn(1),
            workers.clone(),
            "rs0".into(),
            false,
            SharedTimestamp::new(Timestamp::ZERO),
            Arc::new(CheckpointLock::new()),
            store.clone(),
            SyncClocks::new(Timestamp::ZERO),
            Arc::new(Counters::new()),
            None,
            10,
        );

        let insert = entry(400, 1, "db.a", 1, Op::Insert);
        let noop = entry(400, 2, "", 0, Op::Noop);
        senders[0].send(vec![insert, noop]).await.unwrap();
        drop(senders);

        batcher.tick().await.unwrap();

        assert_eq!(
            workers[0].received().len(),
            2,
            "a barrier noop dispatches through the normal path instead of being dropped"
        );
        let record = store
            .load("rs0")
            .await
            .unwrap()
            .expect("a noop barrier must force a checkpoint flush");
        assert_eq!(record.ack_ts, Timestamp::new(400, 2).into());
    }

    /// Reports the chunk as migrating exactly once, then clears — enough to
    /// exercise the retry path without looping forever.
    struct OnceMigratingThenClear {
        migrating: std::sync::atomic::AtomicBool,
    }

    impl crate::movechunk::MoveChunkManager for OnceMigratingThenClear {
        fn is_chunk_migrating(&self, _oplog: &ParsedOplog) -> bool {
            self.migrating.swap(false, std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn move_chunk_gated_entry_is_retried_not_dropped() {
        let (senders, receivers) = logs_channel_pair(1);
        let workers = vec![MemoryWorker::new()];
        let move_chunk = Arc::new(OnceMigratingThenClear {
            migrating: std::sync::atomic::AtomicBool::new(true),
        });
        let mut batcher = Batcher::new(
            receivers,
            DEFAULT_MAX_BATCH_SIZE,
            FilterChain::new(),
            Hasher::new(ShardKey::ById),
            move_chunk,
            DdlManager::spawn(1),
            workers.clone(),
            "rs0".into(),
            false,
            SharedTimestamp::new(Timestamp::ZERO),
            Arc::new(CheckpointLock::new()),
            Arc::new(MemoryCheckpointStore::new()),
            SyncClocks::new(Timestamp::ZERO),
            Arc::new(Counters::new()),
            None,
            10,
        );

        let write = entry(500, 1, "db.a", 1, Op::Insert);
        senders[0].send(vec![write]).await.unwrap();
        drop(senders);

        // First tick: gated by the (fake) in-flight migration, nothing
        // dispatched, the entry stashed for retry rather than dropped.
        batcher.tick().await.unwrap();
        assert!(workers[0].received().is_empty());

        // Second tick: drains the retry queue (the logs channel is already
        // closed, so this only succeeds if the retry path doesn't fall
        // through to `cursor.next_raw()`) and dispatches now that the
        // migration has cleared.
        batcher.tick().await.unwrap();
        assert_eq!(workers[0].received().len(), 1);
    }
}

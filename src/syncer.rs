//! `OplogSyncer`: the per-replica-set orchestrator wiring the reader,
//! deserializer pool, batcher and checkpoint machinery into one runnable
//! pipeline. Everything upstream of this module is a collaborator with a
//! well-defined contract; this is where they're bound together.

use crate::batcher::{Batcher, DEFAULT_MAX_BATCH_SIZE};
use crate::checkpoint::{self, CheckpointLock, CheckpointStore, SyncClocks};
use crate::config::Config;
use crate::ddl::DdlManager;
use crate::deserializer;
use crate::document::DocumentSyncer;
use crate::filter::FilterChain;
use crate::hash::Hasher;
use crate::movechunk::MoveChunkManager;
use crate::oplog::GenericOplog;
use crate::ratelimit::RateLimiter;
use crate::reader::{FetchState, Fetched, MongoReader, Reader};
use crate::status::{Counters, Status};
use crate::timestamp::{SharedTimestamp, Timestamp};
use crate::worker::Worker;
use crate::Result;
use bson::Document;
use futures::stream::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::Client;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Everything an `OplogSyncer` needs from its embedder beyond `Config`:
/// the destination workers it dispatches to and the collaborators the
/// replication core treats as external.
pub struct OplogSyncer<W: Worker + 'static> {
    config: Config,
    replset: String,
    client: Client,
    workers: Vec<Arc<W>>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    move_chunk: Arc<dyn MoveChunkManager>,
    document_syncer: Arc<dyn DocumentSyncer>,
    ddl: DdlManager,
    rate_limiter: Arc<RateLimiter>,
    counters: Arc<Counters>,
}

impl<W: Worker + 'static> OplogSyncer<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        replset: String,
        client: Client,
        workers: Vec<Arc<W>>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        move_chunk: Arc<dyn MoveChunkManager>,
        document_syncer: Arc<dyn DocumentSyncer>,
        ddl: DdlManager,
        rate_limiter: Arc<RateLimiter>,
    ) -> OplogSyncer<W> {
        OplogSyncer {
            config,
            replset,
            client,
            workers,
            checkpoint_store,
            move_chunk,
            document_syncer,
            ddl,
            rate_limiter,
            counters: Arc::new(Counters::new()),
        }
    }

    /// A snapshot of this syncer's `GET /repl` status document; mounting it
    /// behind an actual HTTP server is left to the embedder.
    pub fn status(&self, tps: f64) -> Status {
        self.counters
            .snapshot(&self.config.collector_id, &self.replset, tps)
    }

    /// The oldest timestamp still retained by the source oplog, consulted
    /// by `load_by_doc` to detect an unrecoverable window loss.
    async fn oldest_retained_ts(client: &Client) -> Result<Timestamp> {
        let coll = client.database("local").collection::<Document>("oplog.rs");
        let opts = FindOptions::builder()
            .sort(bson::doc! { "$natural": 1 })
            .limit(1)
            .build();
        let mut cursor = coll.find(bson::doc! {}, opts).await?;
        match cursor.try_next().await? {
            Some(doc) => Ok(Timestamp::from(doc.get_timestamp("ts").map_err(
                bson::document::ValueAccessError::from,
            )?)),
            None => Ok(Timestamp::ZERO),
        }
    }

    /// Runs this syncer to completion (until the source stream ends or a
    /// fatal error is hit). Metrics/REST registration is the embedder's
    /// responsibility; this only builds and drives the pipeline itself.
    pub async fn start(self) -> Result<()> {
        log::info!("starting oplog syncer for replica set {}", self.replset);

        let checkpoint_record = self.checkpoint_store.load(&self.replset).await?;
        let oldest_source_ts = Self::oldest_retained_ts(&self.client).await?;
        // `doc_end_ts` is only ever consulted by `load_by_doc` via
        // `is_zero()`: a prior run recording a disk-queue name in its
        // checkpoint means a document-copy phase was already underway or
        // finished, so any non-zero sentinel reproduces the right branch
        // without this crate owning a separate persisted `doc_end_ts`.
        let doc_end_ts_hint = match &checkpoint_record {
            Some(record) if record.dq_name.is_some() => Timestamp::EPOCH,
            _ => Timestamp::ZERO,
        };
        let wallclock_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let restored = checkpoint::load_by_doc(
            &self.replset,
            checkpoint_record,
            oldest_source_ts,
            doc_end_ts_hint,
            &self.config.log_directory,
            wallclock_secs,
        )?;
        log::info!(
            "{} restored: ackTs={} syncTs={} fetch_state={:?} queryTs={}",
            self.replset,
            restored.ack_ts,
            restored.sync_ts,
            restored.fetch_state,
            restored.query_ts
        );

        let mut reader = MongoReader::new(
            self.client.clone(),
            SharedTimestamp::new(restored.query_ts),
            self.config.log_directory.clone(),
        );
        reader.update_fetch_status(restored.fetch_state);
        if let Some(name) = &restored.disk_queue_name {
            reader.init_disk_queue(name)?;
        }
        let query_ts = reader.shared_query_ts();

        let parallelism = self.config.parallelism();
        let (pending_tx, pending_rx) = deserializer::channel_pair(parallelism);
        let mut logs_tx = Vec::with_capacity(parallelism);
        let mut logs_rx = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let (tx, rx) = mpsc::channel::<Vec<GenericOplog>>(deserializer::QUEUE_CAPACITY);
            logs_tx.push(tx);
            logs_rx.push(rx);
        }

        let mut pipeline = JoinSet::new();
        for (id, (prx, ltx)) in pending_rx.into_iter().zip(logs_tx.into_iter()).enumerate() {
            pipeline.spawn(async move { deserializer::run(id, prx, ltx).await });
        }

        let clocks = SyncClocks::new(restored.sync_ts);
        let checkpoint_lock = Arc::new(CheckpointLock::new());
        checkpoint::spawn_periodic_flusher(
            self.replset.clone(),
            self.config.checkpoint_interval,
            checkpoint_lock.clone(),
            self.checkpoint_store.clone(),
            self.workers.clone(),
            clocks.clone(),
            restored.disk_queue_name.clone(),
        );

        let batcher = Batcher::new(
            logs_rx,
            DEFAULT_MAX_BATCH_SIZE,
            FilterChain::from_config(&self.config),
            Hasher::new(self.config.shard_key),
            self.move_chunk.clone(),
            self.ddl.clone(),
            self.workers.clone(),
            self.replset.clone(),
            self.config.is_shard_cluster,
            query_ts,
            checkpoint_lock,
            self.checkpoint_store.clone(),
            clocks,
            self.counters.clone(),
            restored.disk_queue_name.clone(),
            self.config.filter_checkpoint_gap as u32,
        );

        let document_syncer = self.document_syncer.clone();
        let fetcher_buffer_capacity = self.config.fetcher_buffer_capacity;
        let rate_limiter = self.rate_limiter.clone();
        pipeline.spawn(async move {
            Self::run_fetcher(reader, document_syncer, pending_tx, fetcher_buffer_capacity, rate_limiter).await
        });

        let batcher_result = batcher.run().await;

        pipeline.abort_all();
        while let Some(joined) = pipeline.join_next().await {
            if let Ok(Err(e)) = joined {
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        batcher_result
    }

    /// The poll loop: drives `reader.next()`, spilling to disk while
    /// `StoreDiskNoApply`, buffering and handing batches to `transfer`
    /// otherwise, and running the document-copy phase concurrently the
    /// first time the syncer starts a disk-queue phase.
    async fn run_fetcher(
        mut reader: MongoReader,
        document_syncer: Arc<dyn DocumentSyncer>,
        pending_tx: Vec<mpsc::Sender<Vec<Document>>>,
        fetcher_buffer_capacity: usize,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<()> {
        reader.start_fetcher();

        if reader.fetch_status() == FetchState::StoreDiskNoApply {
            let mut copy_task = Box::pin(document_syncer.run());
            let mut buffer = Vec::with_capacity(fetcher_buffer_capacity);
            let mut next_queue = 0usize;
            loop {
                tokio::select! {
                    biased;
                    outcome = &mut copy_task => {
                        let outcome = outcome?;
                        let replay_name = outcome
                            .disk_queue_name
                            .or_else(|| reader.disk_queue_name().map(str::to_owned));
                        reader.update_fetch_status(FetchState::StoreDiskApply);
                        if let Some(name) = &replay_name {
                            reader.init_disk_queue(name)?;
                        }
                        log::info!("document copy finished at {}, draining spilled oplogs", outcome.doc_end_ts);
                        break;
                    }
                    fetched = reader.next() => {
                        rate_limiter.acquire().await;
                        match fetched? {
                            Fetched::Frame(raw) => {
                                reader.spill(&raw)?;
                            }
                            Fetched::Timeout => {}
                        }
                    }
                }
            }
            Self::drain_loop(&mut reader, &pending_tx, fetcher_buffer_capacity, &rate_limiter, &mut buffer, &mut next_queue).await?;
        } else {
            let mut buffer = Vec::with_capacity(fetcher_buffer_capacity);
            let mut next_queue = 0usize;
            Self::drain_loop(&mut reader, &pending_tx, fetcher_buffer_capacity, &rate_limiter, &mut buffer, &mut next_queue).await?;
        }

        Ok(())
    }

    /// The steady-state fetch loop once no document-copy phase is pending.
    /// Buffers frames until the
    /// configured capacity is reached or the source goes idle (a
    /// `Fetched::Timeout`), then transfers the buffered slice downstream.
    async fn drain_loop(
        reader: &mut MongoReader,
        pending_tx: &[mpsc::Sender<Vec<Document>>],
        fetcher_buffer_capacity: usize,
        rate_limiter: &Arc<RateLimiter>,
        buffer: &mut Vec<Document>,
        next_queue: &mut usize,
    ) -> Result<()> {
        loop {
            rate_limiter.acquire().await;

            if reader.fetch_status() == FetchState::StoreDiskApply && reader.replay_pending() == 0 {
                reader.update_fetch_status(FetchState::StoreMemoryApply);
                log::info!("disk-queue replay drained, resuming live tail");
            }

            match reader.next().await? {
                Fetched::Frame(raw) => {
                    buffer.push(raw);
                    if buffer.len() >= fetcher_buffer_capacity {
                        Self::transfer(pending_tx, next_queue, buffer).await?;
                    }
                }
                Fetched::Timeout => {
                    if !buffer.is_empty() {
                        Self::transfer(pending_tx, next_queue, buffer).await?;
                    }
                }
            }
        }
    }

    /// Pushes the buffered slice to `pendingQueue[nextQueuePosition % P]`,
    /// round-robining across the deserializer pool.
    async fn transfer(
        pending_tx: &[mpsc::Sender<Vec<Document>>],
        next_queue: &mut usize,
        buffer: &mut Vec<Document>,
    ) -> Result<()> {
        let batch = std::mem::take(buffer);
        let idx = *next_queue % pending_tx.len();
        *next_queue = (*next_queue + 1) % pending_tx.len();
        // The deserializer pool having shut down is a clean-shutdown
        // signal, not a fetch error; the caller's next `reader.next()` will
        // observe the same via its own channel closure upstream.
        let _ = pending_tx[idx].send(batch).await;
        Ok(())
    }
}


//! The oplog source driver contract and a concrete tailable-cursor
//! implementation: a `next()` method that yields raw BSON frames or a
//! timeout sentinel (see `Fetched` below), plus the disk-queue spill/replay
//! plumbing the document-copy handoff needs.

use crate::diskqueue::DiskQueue;
use crate::timestamp::{SharedTimestamp, Timestamp};
use crate::Result;
use bson::{doc, Document};
use futures::stream::StreamExt;
use mongodb::options::{CursorType, FindOptions};
use mongodb::{Client, Cursor};
use std::path::PathBuf;
use std::time::Duration;

/// The fetch state machine. Transitions are driven solely by the hosting
/// syncer, never by the reader itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    /// Live tail; no disk spill.
    StoreMemoryApply,
    /// Document phase running: frames are spilled to disk but not fed
    /// downstream.
    StoreDiskNoApply,
    /// Document phase done: frames are drained from disk first, then live
    /// tail resumes.
    StoreDiskApply,
}

/// `Next()` either yields a raw frame, or signals that no data is
/// available right now. A timeout is not an error: it is the benign "no
/// data yet" signal the fetcher uses to decide when to flush its buffer.
pub enum Fetched {
    Frame(Document),
    Timeout,
}

/// The oplog source driver contract consumed by the syncer.
#[async_trait::async_trait]
pub trait Reader: Send + Sync {
    async fn next(&mut self) -> Result<Fetched>;

    fn start_fetcher(&mut self);

    fn update_query_timestamp(&mut self, ts: Timestamp);
    fn query_timestamp(&self) -> Timestamp;

    fn update_fetch_status(&mut self, state: FetchState);
    fn fetch_status(&self) -> FetchState;

    fn init_disk_queue(&mut self, name: &str) -> Result<()>;
    fn query_ts_from_disk_queue(&self) -> Option<Timestamp>;
    fn disk_queue_name(&self) -> Option<&str>;

    /// Frames still queued from a disk-queue replay that haven't been
    /// returned by `next()` yet. The syncer polls this to recognize the
    /// moment a `StoreDiskApply` resume has caught up to the live tail and
    /// can fall back to `StoreMemoryApply`.
    fn replay_pending(&self) -> usize;
}

/// A `Reader` backed by a tailable cursor over `local.oplog.rs`, spilling to
/// and replaying from a [`DiskQueue`] according to `fetch_status`.
pub struct MongoReader {
    client: Client,
    query_ts: SharedTimestamp,
    status: FetchState,
    cursor: Option<Cursor<Document>>,
    disk_queue: Option<DiskQueue>,
    disk_queue_name: Option<String>,
    disk_queue_dir: PathBuf,
    replay_buffer: std::collections::VecDeque<Document>,
    started: bool,
}

impl MongoReader {
    pub fn new(client: Client, query_ts: SharedTimestamp, disk_queue_dir: PathBuf) -> MongoReader {
        MongoReader {
            client,
            query_ts,
            status: FetchState::StoreMemoryApply,
            cursor: None,
            disk_queue: None,
            disk_queue_name: None,
            disk_queue_dir,
            replay_buffer: std::collections::VecDeque::new(),
            started: false,
        }
    }

    /// A handle sharing this reader's `queryTs` cell, cloned out before the
    /// reader is moved into the fetcher task so the batcher can advance it
    /// directly on dispatch and on the idle catch-up path.
    pub fn shared_query_ts(&self) -> SharedTimestamp {
        self.query_ts.clone()
    }

    async fn open_cursor(&mut self) -> Result<()> {
        let coll = self.client.database("local").collection("oplog.rs");
        let filter = doc! { "ts": { "$gt": bson::Timestamp::from(self.query_ts.get()) } };
        let opts = FindOptions::builder()
            .no_cursor_timeout(true)
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(Duration::from_millis(500))
            .build();
        let cursor = coll.find(filter, opts).await?;
        self.cursor = Some(cursor);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reader for MongoReader {
    async fn next(&mut self) -> Result<Fetched> {
        // Drain a replay buffer populated from the disk queue before
        // touching the live cursor, so `StoreDiskApply` resumes spilled
        // frames in order ahead of the live tail.
        if let Some(frame) = self.replay_buffer.pop_front() {
            return Ok(Fetched::Frame(frame));
        }

        if self.cursor.is_none() {
            self.open_cursor().await?;
        }

        let cursor = self.cursor.as_mut().expect("cursor opened above");
        match tokio::time::timeout(Duration::from_millis(500), cursor.next()).await {
            Ok(Some(Ok(doc))) => Ok(Fetched::Frame(doc)),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(None) => Ok(Fetched::Timeout),
            Err(_) => Ok(Fetched::Timeout),
        }
    }

    fn start_fetcher(&mut self) {
        // Idempotent: a fresh cursor is lazily opened by the first `next()`
        // call, so repeated calls are no-ops once `started` is set.
        self.started = true;
    }

    fn update_query_timestamp(&mut self, ts: Timestamp) {
        self.query_ts.set(ts);
    }

    fn query_timestamp(&self) -> Timestamp {
        self.query_ts.get()
    }

    fn update_fetch_status(&mut self, state: FetchState) {
        self.status = state;
    }

    fn fetch_status(&self) -> FetchState {
        self.status
    }

    fn init_disk_queue(&mut self, name: &str) -> Result<()> {
        let queue = DiskQueue::open(&self.disk_queue_dir, name)?;
        self.disk_queue_name = Some(name.to_owned());
        if self.status == FetchState::StoreDiskApply {
            let frames = DiskQueue::replay(&self.disk_queue_dir, name)?;
            self.replay_buffer.extend(frames);
        }
        self.disk_queue = Some(queue);
        Ok(())
    }

    fn query_ts_from_disk_queue(&self) -> Option<Timestamp> {
        let name = self.disk_queue_name.as_ref()?;
        DiskQueue::query_ts(&self.disk_queue_dir, name)
    }

    fn disk_queue_name(&self) -> Option<&str> {
        self.disk_queue_name.as_deref()
    }

    fn replay_pending(&self) -> usize {
        self.replay_buffer.len()
    }
}

impl MongoReader {
    /// Spills a raw frame to the active disk queue, used by the syncer's
    /// `next()` loop while `fetch_status() == StoreDiskNoApply`.
    pub fn spill(&mut self, raw: &Document) -> Result<()> {
        if let Some(queue) = self.disk_queue.as_mut() {
            queue.spill(raw)?;
            queue.save_query_ts(self.query_ts.get())?;
        }
        Ok(())
    }
}

#![warn(missing_docs)]

//! A per-replica-set oplog replication pipeline: tail a MongoDB replica
//! set's oplog, parse and filter its entries, batch and dispatch them to a
//! set of destination [`Worker`]s by hash, and maintain a durable
//! checkpoint across restarts.
//!
//! The pipeline is built from independently testable stages (see
//! [`reader`], [`deserializer`], [`batcher`]) wired together by
//! [`syncer::OplogSyncer`], the top-level orchestrator most embedders
//! construct directly:
//!
//! ```rust,no_run
//! use oplog_syncer::checkpoint::MemoryCheckpointStore;
//! use oplog_syncer::config::Config;
//! use oplog_syncer::ddl::DdlManager;
//! use oplog_syncer::document::NoopDocumentSyncer;
//! use oplog_syncer::movechunk::NoopMoveChunkManager;
//! use oplog_syncer::ratelimit::RateLimiter;
//! use oplog_syncer::syncer::OplogSyncer;
//! use oplog_syncer::worker::MemoryWorker;
//! use std::sync::Arc;
//!
//! # async fn run() -> oplog_syncer::Result<()> {
//! let client = mongodb::Client::with_uri_str("mongodb://localhost").await?;
//! let workers = vec![MemoryWorker::new()];
//!
//! let syncer = OplogSyncer::new(
//!     Config::default(),
//!     "rs0".into(),
//!     client,
//!     workers,
//!     Arc::new(MemoryCheckpointStore::new()),
//!     Arc::new(NoopMoveChunkManager),
//!     Arc::new(NoopDocumentSyncer),
//!     DdlManager::spawn(1),
//!     Arc::new(RateLimiter::unlimited()),
//! );
//!
//! syncer.start().await
//! # }
//! ```

pub use mongodb;
pub use mongodb::bson;

pub mod batcher;
pub mod checkpoint;
pub mod config;
pub mod ddl;
pub mod deserializer;
pub mod diskqueue;
pub mod document;
mod error;
pub mod filter;
pub mod hash;
pub mod movechunk;
pub mod oplog;
pub mod ratelimit;
pub mod reader;
pub mod status;
pub mod syncer;
pub mod timestamp;
pub mod worker;

pub use error::{Error, Result};

use mongodb::Client;
use oplog_syncer::checkpoint::MemoryCheckpointStore;
use oplog_syncer::config::Config;
use oplog_syncer::ddl::DdlManager;
use oplog_syncer::document::NoopDocumentSyncer;
use oplog_syncer::movechunk::NoopMoveChunkManager;
use oplog_syncer::ratelimit::RateLimiter;
use oplog_syncer::syncer::OplogSyncer;
use oplog_syncer::worker::MemoryWorker;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("{:?}", e);
        process::exit(1);
    }
}

async fn run() -> oplog_syncer::Result<()> {
    let client = Client::with_uri_str("mongodb://localhost").await?;
    let workers = vec![MemoryWorker::new()];

    let syncer = OplogSyncer::new(
        Config::default(),
        "rs0".into(),
        client,
        workers,
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(NoopMoveChunkManager),
        Arc::new(NoopDocumentSyncer),
        DdlManager::spawn(1),
        Arc::new(RateLimiter::unlimited()),
    );

    syncer.start().await
}

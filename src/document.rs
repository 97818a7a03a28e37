//! The full-document copy subsystem is an external collaborator: this
//! module defines only the handoff surface the `OplogSyncer` depends
//! on — a `docEndTs` timestamp marking when bulk copy finished, and the
//! disk-queue name it spilled concurrent oplogs to while copying, if any.
//!
//! A real implementation copies every collection in parallel
//! (`ReplayerCollectionParallel`), optionally truncating the destination
//! first (`ReplayerCollectionDrop`), and creates indexes last; none of that
//! belongs to the replication core, so only the interface and a no-op stub
//! used by tests live here.

use crate::timestamp::Timestamp;
use crate::Result;

/// The result of a completed (external) document copy phase.
pub struct DocumentCopyOutcome {
    /// The timestamp at which bulk copy ended; oplogs at or after this
    /// point must still be applied from the live tail.
    pub doc_end_ts: Timestamp,
    /// The disk queue oplogs were spilled to while the copy ran, if the
    /// syncer chose to run copy and tail fetch in parallel.
    pub disk_queue_name: Option<String>,
}

/// The contract an `OplogSyncer` depends on to learn when document copy
/// finished. Implemented elsewhere (outside this crate's scope); this
/// crate only consumes the outcome in `OplogSyncer::run_fetcher`'s
/// `StoreDiskNoApply` branch, to flip the reader into `StoreDiskApply`.
#[async_trait::async_trait]
pub trait DocumentSyncer: Send + Sync {
    async fn run(&self) -> Result<DocumentCopyOutcome>;
}

/// A stand-in used by tests and by embedders that skip document copy
/// entirely (e.g. a destination seeded out of band): completes immediately
/// with `doc_end_ts = 0`, which `LoadByDoc` interprets as "parallel
/// full+incr, no document phase recorded yet".
pub struct NoopDocumentSyncer;

#[async_trait::async_trait]
impl DocumentSyncer for NoopDocumentSyncer {
    async fn run(&self) -> Result<DocumentCopyOutcome> {
        Ok(DocumentCopyOutcome {
            doc_end_ts: Timestamp::ZERO,
            disk_queue_name: None,
        })
    }
}

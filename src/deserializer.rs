//! A pool of `P` independent tasks, each strictly owning one
//! `pendingQueue[i]` (consumer) and `logsQueue[i]` (producer): receive a
//! batch of raw frames, parse every frame into a `GenericOplog`, emit a
//! single batch downstream. No cross-queue access, ever — ordering across
//! the pool is reconstructed later by the batcher's round-robin read.

use crate::oplog::GenericOplog;
use crate::Error;
use bson::Document;
use tokio::sync::mpsc;

/// Bounded queue capacity shared by `pendingQueue[i]` and `logsQueue[i]`.
pub const QUEUE_CAPACITY: usize = 64;

pub fn channel_pair(
    parallelism: usize,
) -> (
    Vec<mpsc::Sender<Vec<Document>>>,
    Vec<mpsc::Receiver<Vec<Document>>>,
) {
    let mut senders = Vec::with_capacity(parallelism);
    let mut receivers = Vec::with_capacity(parallelism);
    for _ in 0..parallelism {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        senders.push(tx);
        receivers.push(rx);
    }
    (senders, receivers)
}

/// Runs deserializer `id` to completion: loops receiving raw-frame batches
/// from `pending_rx`, parsing each frame, and forwarding the parsed batch to
/// `logs_tx`. Returns on a parse error — fatal, since a well-formed MongoDB
/// oplog never produces a document that fails to decode — or once
/// `pending_rx` is closed (the fetcher has shut down).
pub async fn run(
    id: usize,
    mut pending_rx: mpsc::Receiver<Vec<Document>>,
    logs_tx: mpsc::Sender<Vec<GenericOplog>>,
) -> Result<(), Error> {
    while let Some(raw_batch) = pending_rx.recv().await {
        let mut parsed_batch = Vec::with_capacity(raw_batch.len());
        for raw in raw_batch {
            match GenericOplog::parse(raw) {
                Ok(entry) => parsed_batch.push(entry),
                Err(e) => {
                    log::error!("deserializer {} hit a fatal parse error: {}", id, e);
                    return Err(e);
                }
            }
        }
        if logs_tx.send(parsed_batch).await.is_err() {
            // The batcher has shut down; nothing left to do.
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ts_doc(seconds: u32, ordinal: u32) -> bson::Bson {
        bson::Bson::Timestamp(bson::Timestamp {
            time: seconds,
            increment: ordinal,
        })
    }

    #[tokio::test]
    async fn parses_a_batch_in_order() {
        let (pending_tx, pending_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (logs_tx, mut logs_rx) = mpsc::channel(QUEUE_CAPACITY);

        let handle = tokio::spawn(run(0, pending_rx, logs_tx));

        let batch = vec![
            doc! { "ts": ts_doc(1, 1), "op": "i", "ns": "db.a", "o": { "_id": 1 } },
            doc! { "ts": ts_doc(1, 2), "op": "i", "ns": "db.a", "o": { "_id": 2 } },
        ];
        pending_tx.send(batch).await.unwrap();
        drop(pending_tx);

        let parsed = logs_rx.recv().await.unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].parsed.ts, crate::timestamp::Timestamp::new(1, 1));
        assert_eq!(parsed[1].parsed.ts, crate::timestamp::Timestamp::new(1, 2));

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn a_parse_error_is_fatal() {
        let (pending_tx, pending_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (logs_tx, _logs_rx) = mpsc::channel(QUEUE_CAPACITY);

        let handle = tokio::spawn(run(0, pending_rx, logs_tx));

        let batch = vec![doc! { "ts": ts_doc(1, 1), "op": "x", "ns": "db.a", "o": {} }];
        pending_tx.send(batch).await.unwrap();
        drop(pending_tx);

        let result = handle.await.unwrap();
        assert!(result.is_err());
    }
}

//! A named persistent spill buffer for raw oplog frames, used while a
//! document copy is in progress (`StoreDiskNoApply`) and drained on resume
//! (`StoreDiskApply`). Backed by a file pair: `<name>.dat` holds the
//! appended frames, `<name>.meta.dat` holds the resume `queryTs`.

use crate::timestamp::Timestamp;
use crate::Result;
use bson::Document;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A named disk queue, identified by `"diskqueue-<replset>-<timestamp>"`.
pub struct DiskQueue {
    name: String,
    data_path: PathBuf,
    meta_path: PathBuf,
    writer: BufWriter<File>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct Metadata {
    query_ts: u64,
}

impl DiskQueue {
    /// Builds the conventional name for a disk queue created for `replset`
    /// at `wallclock_secs` (used by `LoadByDoc`'s "no existing queue" row to
    /// create a fresh one named with the current wallclock).
    pub fn conventional_name(replset: &str, wallclock_secs: u64) -> String {
        format!("diskqueue-{}-{}", replset, wallclock_secs)
    }

    fn paths(directory: &Path, name: &str) -> (PathBuf, PathBuf) {
        (
            directory.join(format!("{}.dat", name)),
            directory.join(format!("{}.meta.dat", name)),
        )
    }

    /// Opens (creating if absent) the disk queue `name` under `directory`.
    pub fn open(directory: &Path, name: &str) -> Result<DiskQueue> {
        let (data_path, meta_path) = Self::paths(directory, name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data_path)?;
        Ok(DiskQueue {
            name: name.to_owned(),
            data_path,
            meta_path,
            writer: BufWriter::new(file),
        })
    }

    /// Whether `name`'s backing file already exists under `directory`,
    /// consulted by `LoadByDoc` to distinguish "resume draining" from
    /// "start fresh".
    pub fn exists(directory: &Path, name: &str) -> bool {
        Self::paths(directory, name).0.is_file()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a raw frame to the tail of the queue.
    pub fn spill(&mut self, raw: &Document) -> Result<()> {
        let bytes = bson::to_vec(raw).map_err(|e| crate::Error::Config(e.to_string()))?;
        self.writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Persists the resume `queryTs` to the metadata file.
    pub fn save_query_ts(&self, ts: Timestamp) -> Result<()> {
        let meta = Metadata {
            query_ts: ts.into(),
        };
        let file = File::create(&self.meta_path)?;
        serde_json::to_writer(file, &meta)?;
        Ok(())
    }

    /// Reads back the resume `queryTs` from the metadata file, if present.
    pub fn query_ts(directory: &Path, name: &str) -> Option<Timestamp> {
        let (_, meta_path) = Self::paths(directory, name);
        let file = File::open(meta_path).ok()?;
        let meta: Metadata = serde_json::from_reader(file).ok()?;
        Some(Timestamp::from(meta.query_ts))
    }

    /// Replays every spilled frame in append order. Intended to be drained
    /// once on `StoreDiskApply` entry, then the queue is abandoned.
    pub fn replay(directory: &Path, name: &str) -> Result<Vec<Document>> {
        let (data_path, _) = Self::paths(directory, name);
        let file = match File::open(&data_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let mut frames = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            let doc = bson::from_slice(&buf).map_err(|e| crate::Error::Config(e.to_string()))?;
            frames.push(doc);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_name_matches_spec_pattern() {
        assert_eq!(
            DiskQueue::conventional_name("rs0", 1700000000),
            "diskqueue-rs0-1700000000"
        );
    }

    #[test]
    fn spill_then_replay_round_trips_in_order() {
        let dir = std::env::temp_dir().join(format!("oplog-syncer-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let name = "diskqueue-rs0-test";

        let mut queue = DiskQueue::open(&dir, name).unwrap();
        queue
            .spill(&bson::doc! { "ts": 1, "op": "i" })
            .unwrap();
        queue
            .spill(&bson::doc! { "ts": 2, "op": "i" })
            .unwrap();
        queue.save_query_ts(Timestamp::new(100, 2)).unwrap();
        drop(queue);

        let frames = DiskQueue::replay(&dir, name).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get_i32("ts").unwrap(), 1);
        assert_eq!(frames[1].get_i32("ts").unwrap(), 2);

        assert_eq!(
            DiskQueue::query_ts(&dir, name),
            Some(Timestamp::new(100, 2))
        );
        assert!(DiskQueue::exists(&dir, name));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn replay_of_missing_queue_is_empty() {
        let dir = std::env::temp_dir();
        let frames = DiskQueue::replay(&dir, "diskqueue-does-not-exist").unwrap();
        assert!(frames.is_empty());
    }
}

//! Configuration recognized by a syncer. Loading this from a CLI or a wider
//! application config is left to the embedder; this is the plain,
//! `serde`-deserializable shape the rest of the crate consumes.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which field a [`crate::hash::Hasher`] hashes on to pick a worker.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShardKey {
    ByNamespace,
    ById,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hasher policy used to route parsed oplogs to workers.
    pub shard_key: ShardKey,

    /// When true, the `DDL` filter drops command oplogs outright instead of
    /// letting them reach the barrier.
    pub replayer_dml_only: bool,

    /// Namespaces allow-listed for replication; empty means "all".
    pub filter_namespace_white: Vec<String>,

    /// Namespaces denied; evaluated after the allow-list.
    pub filter_namespace_black: Vec<String>,

    /// Number of raw frames the fetcher accumulates before handing a batch
    /// to `transfer`.
    pub fetcher_buffer_capacity: usize,

    /// Periodic checkpoint tick interval.
    pub checkpoint_interval: Duration,

    /// Origin tags accepted by the `Gid` filter; empty means "accept all
    /// gids except our own" is handled solely by the `Autologous` filter.
    pub oplog_gids: Vec<String>,

    /// Whether the destination is a sharded cluster. Forces `P = 1` pending
    /// queues and enables sharded DDL gating (`shardCollection` wrapping,
    /// cross-syncer quorum).
    pub is_shard_cluster: bool,

    /// Parallelism used only by the document-copy phase.
    pub replayer_collection_parallel: usize,

    /// Whether the document-copy phase truncates destination collections
    /// before copying.
    pub replayer_collection_drop: bool,

    /// Directory holding disk-queue spill files.
    pub log_directory: PathBuf,

    /// Identity of this replicator instance, surfaced in the status
    /// endpoint.
    pub collector_id: String,

    /// Idle interval (seconds, compared against `unsyncTs - reader.queryTs`)
    /// after which a fully-filtered tail still advances the checkpoint.
    pub filter_checkpoint_gap: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            shard_key: ShardKey::ById,
            replayer_dml_only: false,
            filter_namespace_white: Vec::new(),
            filter_namespace_black: Vec::new(),
            fetcher_buffer_capacity: 256,
            checkpoint_interval: Duration::from_millis(1000),
            oplog_gids: Vec::new(),
            is_shard_cluster: false,
            replayer_collection_parallel: 4,
            replayer_collection_drop: false,
            log_directory: PathBuf::from("."),
            collector_id: "default".into(),
            filter_checkpoint_gap: 10,
        }
    }
}

impl Config {
    /// Number of parallel pending/logs queues: 1 for sharded sources (to
    /// preserve inter-shard causal ordering within a single syncer's
    /// stream), 4 otherwise.
    pub fn parallelism(&self) -> usize {
        if self.is_shard_cluster {
            1
        } else {
            4
        }
    }

    pub fn from_toml(text: &str) -> crate::Result<Config> {
        toml::from_str(text).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharded_sources_use_a_single_queue() {
        let mut config = Config::default();
        config.is_shard_cluster = true;
        assert_eq!(config.parallelism(), 1);
    }

    #[test]
    fn non_sharded_sources_use_four_queues() {
        let config = Config::default();
        assert_eq!(config.parallelism(), 4);
    }
}

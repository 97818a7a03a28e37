//! An ordered, short-circuiting chain of predicates over parsed oplog
//! entries. The first predicate that says "drop" wins; order between
//! filters is not semantically significant since each predicate only
//! inspects the entry (they're commutative), but namespace filtering is
//! comparatively expensive and is conventionally placed last.

use crate::config::Config;
use crate::oplog::ParsedOplog;

/// A single predicate in the chain. Returns `true` to keep the entry,
/// `false` to drop it.
pub trait Filter: Send + Sync {
    fn keep(&self, oplog: &ParsedOplog) -> bool;

    /// Human-readable name, used in debug logging when an entry is dropped.
    fn name(&self) -> &'static str;
}

/// Drops entries that originated from this replicator itself, recognized by
/// a `gid` matching our own collector id — without this, a replicated write
/// echoed back into the source would be re-replicated forever.
pub struct Autologous {
    pub collector_id: String,
}

impl Filter for Autologous {
    fn keep(&self, oplog: &ParsedOplog) -> bool {
        oplog.gid.as_deref() != Some(self.collector_id.as_str())
    }

    fn name(&self) -> &'static str {
        "autologous"
    }
}

/// Drops entries whose `gid` is not in the configured allow-list. An empty
/// allow-list keeps everything (it only restricts when configured).
pub struct Gid {
    pub allowed: Vec<String>,
}

impl Filter for Gid {
    fn keep(&self, oplog: &ParsedOplog) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        match &oplog.gid {
            Some(gid) => self.allowed.iter().any(|g| g == gid),
            None => true,
        }
    }

    fn name(&self) -> &'static str {
        "gid"
    }
}

/// Drops command (DDL) entries outright when the syncer is configured for
/// DML-only replay.
pub struct Ddl;

impl Filter for Ddl {
    fn keep(&self, oplog: &ParsedOplog) -> bool {
        !oplog.is_ddl()
    }

    fn name(&self) -> &'static str {
        "ddl"
    }
}

/// Namespace allow/deny filtering. The allow-list is checked first (empty
/// means "all namespaces allowed"), then the deny-list.
pub struct Namespace {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Filter for Namespace {
    fn keep(&self, oplog: &ParsedOplog) -> bool {
        if !self.allow.is_empty() && !self.allow.iter().any(|ns| ns == &oplog.ns) {
            return false;
        }
        !self.deny.iter().any(|ns| ns == &oplog.ns)
    }

    fn name(&self) -> &'static str {
        "namespace"
    }
}

/// The ordered predicate chain a batcher runs every surviving entry
/// through.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    pub fn new() -> FilterChain {
        FilterChain {
            filters: Vec::new(),
        }
    }

    pub fn push(&mut self, filter: Box<dyn Filter>) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Builds the chain implied by a [`Config`]: autologous + gid always
    /// run, DDL only when DML-only mode is requested, and namespace last
    /// since it is the heaviest check.
    pub fn from_config(config: &Config) -> FilterChain {
        let mut chain = FilterChain::new();
        chain.push(Box::new(Autologous {
            collector_id: config.collector_id.clone(),
        }));
        chain.push(Box::new(Gid {
            allowed: config.oplog_gids.clone(),
        }));
        if config.replayer_dml_only {
            chain.push(Box::new(Ddl));
        }
        if !config.filter_namespace_white.is_empty() || !config.filter_namespace_black.is_empty() {
            chain.push(Box::new(Namespace {
                allow: config.filter_namespace_white.clone(),
                deny: config.filter_namespace_black.clone(),
            }));
        }
        chain
    }

    /// Runs the entry through every predicate in order, short-circuiting at
    /// the first one that drops it.
    pub fn keep(&self, oplog: &ParsedOplog) -> bool {
        for filter in &self.filters {
            if !filter.keep(oplog) {
                log::debug!(
                    "dropping oplog ts={} ns={} via filter {}",
                    oplog.ts,
                    oplog.ns,
                    filter.name()
                );
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::Op;
    use crate::timestamp::Timestamp;
    use bson::doc;

    fn sample(ns: &str, op: Op, gid: Option<&str>) -> ParsedOplog {
        ParsedOplog {
            ts: Timestamp::new(1, 0),
            op,
            ns: ns.into(),
            o: doc! {},
            o2: None,
            gid: gid.map(str::to_owned),
        }
    }

    #[test]
    fn autologous_drops_own_gid() {
        let filter = Autologous {
            collector_id: "me".into(),
        };
        assert!(!filter.keep(&sample("db.a", Op::Insert, Some("me"))));
        assert!(filter.keep(&sample("db.a", Op::Insert, Some("other"))));
        assert!(filter.keep(&sample("db.a", Op::Insert, None)));
    }

    #[test]
    fn namespace_deny_wins_over_allow_overlap() {
        let filter = Namespace {
            allow: vec!["db.a".into()],
            deny: vec!["db.a".into()],
        };
        assert!(!filter.keep(&sample("db.a", Op::Insert, None)));
    }

    #[test]
    fn chain_short_circuits_on_first_drop() {
        let mut chain = FilterChain::new();
        chain.push(Box::new(Ddl));
        chain.push(Box::new(Namespace {
            allow: vec![],
            deny: vec!["db.a".into()],
        }));
        assert!(!chain.keep(&sample("db.a", Op::Command, None)));
        assert!(chain.keep(&sample("db.b", Op::Insert, None)));
    }
}

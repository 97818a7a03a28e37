//! Parsing of raw oplog frames into the [`ParsedOplog`] view the rest of the
//! pipeline routes, filters and hashes on, paired with the original frame in
//! a [`GenericOplog`] so the bytes can still be forwarded verbatim.

use crate::timestamp::Timestamp;
use crate::{Error, Result};
use bson::{Bson, Document};

/// The kind of operation recorded by an oplog entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

impl Op {
    fn from_code(code: &str) -> Result<Op> {
        match code {
            "i" => Ok(Op::Insert),
            "u" => Ok(Op::Update),
            "d" => Ok(Op::Delete),
            "c" => Ok(Op::Command),
            "n" => Ok(Op::Noop),
            other => Err(Error::UnknownOperation(other.into())),
        }
    }
}

/// A parsed oplog entry, as consumed by the filter chain, hasher and batcher.
///
/// Unlike `oplog::Operation` in the tailing layer below it, this keeps the
/// payload documents untyped (`o`/`o2`) rather than splitting into one
/// variant per operation kind, because the batcher and hasher only ever need
/// `ts`, `op`, `ns` and the effective `_id` — never the full typed shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedOplog {
    pub ts: Timestamp,
    pub op: Op,
    pub ns: String,
    /// The operation's own document: the inserted document, the update
    /// modifier, or the command body.
    pub o: Document,
    /// The query/selector document for updates and deletes (`None` for
    /// inserts, commands and no-ops).
    pub o2: Option<Document>,
    /// Origin tag used by the `Gid` filter to recognize oplogs replicated in
    /// from another cluster.
    pub gid: Option<String>,
}

impl ParsedOplog {
    /// Parses a single raw oplog document.
    ///
    /// Parse failures are treated as fatal by callers (see
    /// [`Error::is_fatal`]): a well-formed MongoDB oplog never produces a
    /// document this can't decode.
    pub fn parse(document: &Document) -> Result<ParsedOplog> {
        let ts = document
            .get_timestamp("ts")
            .map(Timestamp::from)
            .map_err(bson::document::ValueAccessError::from)?;
        let op = Op::from_code(document.get_str("op")?)?;
        let ns = document.get_str("ns")?.to_owned();
        let o = document.get_document("o")?.clone();
        let o2 = document.get_document("o2").ok().cloned();
        let gid = document.get_str("gid").ok().map(str::to_owned);

        Ok(ParsedOplog {
            ts,
            op,
            ns,
            o,
            o2,
            gid,
        })
    }

    /// The namespace's database portion, used by namespace-scoped DDL replay.
    pub fn database(&self) -> &str {
        self.ns.split('.').next().unwrap_or("")
    }

    /// Whether this entry is a schema-changing command that must pass
    /// through the DDL barrier rather than a plain worker dispatch.
    pub fn is_ddl(&self) -> bool {
        self.op == Op::Command
    }

    /// Whether this entry is a barrier the batcher's `Next()` must stop a
    /// working batch on: a DDL command, or a no-op (MongoDB writes these
    /// periodically to keep an otherwise-idle oplog advancing) that must
    /// force a checkpoint flush rather than being dispatched like ordinary
    /// DML.
    pub fn is_barrier(&self) -> bool {
        self.is_ddl() || self.op == Op::Noop
    }

    /// The effective `_id` used for `ById` hashing: `o2._id` for updates and
    /// deletes (the query selector identifies the target document), `o._id`
    /// for inserts. Commands and no-ops have no effective id.
    pub fn effective_id(&self) -> Option<&Bson> {
        match self.op {
            Op::Update | Op::Delete => self.o2.as_ref().and_then(|o2| o2.get("_id")),
            Op::Insert => self.o.get("_id"),
            Op::Command | Op::Noop => None,
        }
    }
}

/// A raw frame paired with its parsed view.
///
/// The raw document is retained so the original bytes can be forwarded to
/// the destination untouched (user DML is never transformed, per the
/// pipeline's non-goals); the parsed view is used for routing, filtering and
/// barrier detection.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericOplog {
    pub raw: Document,
    pub parsed: ParsedOplog,
}

impl GenericOplog {
    pub fn parse(raw: Document) -> Result<GenericOplog> {
        let parsed = ParsedOplog::parse(&raw)?;
        Ok(GenericOplog { raw, parsed })
    }

    pub fn ts(&self) -> Timestamp {
        self.parsed.ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ts_doc(seconds: u32, ordinal: u32) -> Bson {
        Bson::Timestamp(bson::Timestamp {
            time: seconds,
            increment: ordinal,
        })
    }

    #[test]
    fn parses_insert() {
        let doc = doc! {
            "ts": ts_doc(100, 1),
            "op": "i",
            "ns": "db.a",
            "o": { "_id": 1, "x": "y" },
        };
        let parsed = ParsedOplog::parse(&doc).unwrap();
        assert_eq!(parsed.op, Op::Insert);
        assert_eq!(parsed.ns, "db.a");
        assert_eq!(parsed.ts, Timestamp::new(100, 1));
        assert_eq!(parsed.effective_id(), Some(&Bson::Int32(1)));
    }

    #[test]
    fn parses_update_effective_id_from_o2() {
        let doc = doc! {
            "ts": ts_doc(100, 2),
            "op": "u",
            "ns": "db.a",
            "o": { "$set": { "x": 1 } },
            "o2": { "_id": 7 },
        };
        let parsed = ParsedOplog::parse(&doc).unwrap();
        assert_eq!(parsed.effective_id(), Some(&Bson::Int32(7)));
    }

    #[test]
    fn command_is_ddl() {
        let doc = doc! {
            "ts": ts_doc(300, 5),
            "op": "c",
            "ns": "db.$cmd",
            "o": { "create": "a" },
        };
        let parsed = ParsedOplog::parse(&doc).unwrap();
        assert!(parsed.is_ddl());
        assert_eq!(parsed.database(), "db");
    }

    #[test]
    fn noop_is_a_barrier_but_not_ddl() {
        let doc = doc! {
            "ts": ts_doc(400, 0),
            "op": "n",
            "ns": "",
            "o": { "msg": "periodic noop" },
        };
        let parsed = ParsedOplog::parse(&doc).unwrap();
        assert!(!parsed.is_ddl());
        assert!(parsed.is_barrier());
    }

    #[test]
    fn rejects_unknown_op() {
        let doc = doc! {
            "ts": ts_doc(1, 0),
            "op": "x",
            "ns": "db.a",
            "o": {},
        };
        assert!(matches!(
            ParsedOplog::parse(&doc),
            Err(Error::UnknownOperation(_))
        ));
    }
}

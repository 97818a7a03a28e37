//! The 64-bit ordered timestamp used throughout the pipeline: MongoDB packs a
//! timestamp into `seconds << 32 | ordinal`, which both the source driver and
//! our own checkpoint bookkeeping treat as a single comparable `u64`.

use bson::Timestamp as BsonTimestamp;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A MongoDB oplog timestamp: `(seconds << 32) | ordinal`.
///
/// Comparisons (`Ord`, `PartialOrd`) and arithmetic follow directly from the
/// packed representation, so a `Timestamp` sorts the same way the underlying
/// `u64` does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The zero timestamp, used as a sentinel for "unset".
    pub const ZERO: Timestamp = Timestamp(0);

    /// Epoch timestamp used to seed `ack`/`sync` clocks on a first run
    /// (`seconds = 1`, `ordinal = 0`).
    pub const EPOCH: Timestamp = Timestamp(1 << 32);

    pub fn new(seconds: u32, ordinal: u32) -> Timestamp {
        Timestamp(((seconds as u64) << 32) | ordinal as u64)
    }

    pub fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn ordinal(self) -> u32 {
        self.0 as u32
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<BsonTimestamp> for Timestamp {
    fn from(ts: BsonTimestamp) -> Timestamp {
        Timestamp::new(ts.time, ts.increment)
    }
}

impl From<Timestamp> for BsonTimestamp {
    fn from(ts: Timestamp) -> BsonTimestamp {
        BsonTimestamp {
            time: ts.seconds(),
            increment: ts.ordinal(),
        }
    }
}

impl From<u64> for Timestamp {
    fn from(raw: u64) -> Timestamp {
        Timestamp(raw)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> u64 {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.seconds(), self.ordinal())
    }
}

/// A `Timestamp` shared between the fetcher (which owns the `Reader`) and
/// the batcher, which must advance `reader.queryTs` on every dispatch and
/// on the idle catch-up path without taking `&mut Reader` across a task
/// boundary. Plain atomic load/store, same as the worker `ack`/`unack`
/// clocks.
#[derive(Clone)]
pub struct SharedTimestamp(Arc<AtomicU64>);

impl SharedTimestamp {
    pub fn new(initial: Timestamp) -> SharedTimestamp {
        SharedTimestamp(Arc::new(AtomicU64::new(initial.into())))
    }

    pub fn get(&self) -> Timestamp {
        Timestamp::from(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, ts: Timestamp) {
        self.0.store(ts.into(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_seconds_then_ordinal() {
        assert!(Timestamp::new(100, 1) < Timestamp::new(100, 2));
        assert!(Timestamp::new(100, 999) < Timestamp::new(101, 0));
    }

    #[test]
    fn round_trips_through_bson() {
        let ts = Timestamp::new(300, 5);
        let bson: BsonTimestamp = ts.into();
        assert_eq!(Timestamp::from(bson), ts);
    }

    #[test]
    fn epoch_has_ordinal_zero() {
        assert_eq!(Timestamp::EPOCH, Timestamp::new(1, 0));
    }
}

use mongodb::bson;
use std::fmt;
use std::io;

/// A type alias for convenience so we can fix the error to our own `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error enumerates the list of possible error conditions raised anywhere in the
/// fetch/parse/batch/dispatch/checkpoint pipeline.
///
/// Variants are grouped by the recovery policy described in the design: transient
/// errors are logged and retried by the caller, fatal errors should terminate the
/// process (see [`Error::is_fatal`]).
#[derive(Debug)]
pub enum Error {
    /// A database connectivity error raised by the MongoDB driver. Transient: the
    /// reader's poll loop logs and retries after its fetch delay.
    Database(mongodb::error::Error),
    /// An error when converting a BSON document to a parsed oplog entry and it has
    /// a missing field or unexpected type. Fatal: MongoDB oplog corruption is not
    /// expected.
    MissingField(bson::document::ValueAccessError),
    /// An error when converting a BSON document and it has an unsupported
    /// operation type. Fatal.
    UnknownOperation(String),
    /// An error when converting an applyOps command with invalid documents. Fatal.
    InvalidOperation,
    /// The source's oldest retained oplog entry is newer than the persisted
    /// checkpoint's `ackTs`; the destination's oplog window has been exceeded and
    /// data between the checkpoint and the oldest retained entry is unrecoverable.
    /// Fatal: requires operator intervention (re-seed from a full copy).
    OplogWindowLost { ack_ts: u64, oldest_ts: u64 },
    /// `calculateSyncerAckTs` observed `unack < ack && unack != 0` for a worker,
    /// violating the `ack <= unack` invariant. Retryable: the caller should retry
    /// on the next checkpoint tick, since this can reflect a torn read between the
    /// two atomic loads.
    CheckpointInvariantViolation { worker: usize, ack: u64, unack: u64 },
    /// `calculateSyncerAckTs` has no usable contribution: every worker is idle, or
    /// the minimum candidate was zero. Retryable.
    NoCheckpointProgress,
    /// A majority of syncers never arrived at the same DDL barrier. Surfaced as a
    /// persistent warning; no automatic recovery is attempted.
    DdlQuorumStuck { namespace: String, ts: u64 },
    /// Disk queue I/O failure (spill or replay).
    DiskQueue(io::Error),
    /// Failure (de)serializing a checkpoint or status document.
    Serialization(serde_json::Error),
    /// Failure parsing a TOML configuration document.
    Config(String),
}

impl Error {
    /// Whether this error indicates a condition that could compromise invariants
    /// I2-I5 and should therefore terminate the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingField(_)
                | Error::UnknownOperation(_)
                | Error::InvalidOperation
                | Error::OplogWindowLost { .. }
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(e) => Some(e),
            Error::MissingField(e) => Some(e),
            Error::DiskQueue(e) => Some(e),
            Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Database(ref err) => err.fmt(f),
            Error::MissingField(ref err) => err.fmt(f),
            Error::UnknownOperation(ref op) => write!(f, "Unknown operation type found: {}", op),
            Error::InvalidOperation => write!(f, "Invalid operation"),
            Error::OplogWindowLost { ack_ts, oldest_ts } => write!(
                f,
                "oplog window lost: checkpoint ackTs {} is older than the oldest retained oplog entry {}",
                ack_ts, oldest_ts
            ),
            Error::CheckpointInvariantViolation { worker, ack, unack } => write!(
                f,
                "worker {} reported unack {} < ack {} with unack != 0",
                worker, unack, ack
            ),
            Error::NoCheckpointProgress => {
                write!(f, "no worker contributed a usable checkpoint candidate")
            }
            Error::DdlQuorumStuck { namespace, ts } => write!(
                f,
                "DDL barrier for {} at {} never reached quorum",
                namespace, ts
            ),
            Error::DiskQueue(ref err) => write!(f, "disk queue error: {}", err),
            Error::Serialization(ref err) => write!(f, "serialization error: {}", err),
            Error::Config(ref msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl From<bson::document::ValueAccessError> for Error {
    fn from(original: bson::document::ValueAccessError) -> Error {
        Error::MissingField(original)
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(original: mongodb::error::Error) -> Error {
        Error::Database(original)
    }
}

impl From<io::Error> for Error {
    fn from(original: io::Error) -> Error {
        Error::DiskQueue(original)
    }
}

impl From<serde_json::Error> for Error {
    fn from(original: serde_json::Error) -> Error {
        Error::Serialization(original)
    }
}

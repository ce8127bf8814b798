//! Engine-level sync errors.
//!
//! Item-level failures never surface here; they are recorded in the run
//! result and the pass keeps going. These are the pair- and run-scoped
//! failures.

use crate::clients::{ClientError, ListSide};

#[derive(Debug)]
pub enum SyncError {
    /// A whole-list fetch failed. The pair is skipped for this run.
    Fetch {
        side: ListSide,
        list: String,
        source: ClientError,
    },
    /// A list pair is misconfigured. The pair is skipped.
    InvalidPair { pair: String, reason: String },
    /// A service failed the preflight connectivity check. The run cannot start.
    Connection { side: ListSide, source: ClientError },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Fetch { side, list, source } => {
                write!(f, "failed to fetch {side} list '{list}': {source}")
            }
            SyncError::InvalidPair { pair, reason } => {
                write!(f, "invalid list pair {pair}: {reason}")
            }
            SyncError::Connection { side, source } => {
                write!(f, "cannot reach {side}: {source}")
            }
        }
    }
}

impl std::error::Error for SyncError {}

//! Error taxonomy for the benchmark harness.
//!
//! Two layers:
//! - [`StoreError`] is what a [`crate::client::GraphClient`] reports for a single
//!   round-trip. The loader and executor classify it to decide between retrying,
//!   counting, and aborting.
//! - [`BenchError`] is what a run as a whole can fail with. Every variant maps to
//!   a distinct non-zero exit status.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single store round-trip.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Connection(String),

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Errors worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Transient(_) | StoreError::Timeout(_) | StoreError::Connection(_)
        )
    }

    pub fn is_connection_loss(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Fatal (or run-level) benchmark failure.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid dataset configuration: {0}")]
    Generation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("load aborted: {what} failed after {attempts} attempt(s): {source}")]
    Load {
        what: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("operation failed: {0}")]
    Operation(#[source] StoreError),

    #[error("connection to the store was lost: {0}")]
    ConnectionLost(#[source] StoreError),

    #[error("run interrupted")]
    Interrupted,

    #[error("failed to write report to {}: {source}", path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BenchError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Operation(_) => 1,
            BenchError::Generation(_) | BenchError::Config(_) => 2,
            BenchError::Load { .. } => 3,
            BenchError::ConnectionLost(_) => 4,
            BenchError::Report { .. } => 5,
            BenchError::Interrupted => 130,
        }
    }

    /// Whether the store may hold a partially imported dataset after this error.
    pub fn leaves_partial_data(&self) -> bool {
        matches!(self, BenchError::Load { .. } | BenchError::ConnectionLost(_))
    }
}

//! Batch-level storage errors

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a whole bulk write (as opposed to one operation inside it,
/// see [`WriteFailure`](crate::WriteFailure)).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid namespace {0:?}")]
    InvalidNamespace(String),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt document at {}:{line}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Fatal extraction errors

use thiserror::Error;

use feedline_store::StoreError;

use crate::http::TransportError;
use crate::pagination::PageError;

/// Error that aborts an extraction run.
///
/// Transient statuses (429, 5xx) never surface here unless a bounded
/// [`RetryPolicy`](crate::RetryPolicy) runs out.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("bad status: {status} | {body}")]
    Status { status: u16, body: String },
    #[error("invalid response from {url}: {source}")]
    Page {
        url: String,
        #[source]
        source: PageError,
    },
    #[error("giving up after {attempts} retries (last status {status})")]
    RetriesExhausted { status: u16, attempts: u32 },
    #[error("page limit of {0} reached while the source still reports more pages")]
    PageLimitExceeded(usize),
    /// Rejected before the first request; nothing could ever be loaded.
    #[error("unusable namespace: {0}")]
    Namespace(#[source] StoreError),
}

impl ExtractError {
    /// HTTP status involved, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::RetriesExhausted { status, .. } => Some(*status),
            _ => None,
        }
    }
}

//! Feedline Core - paginated API extraction into a document store
//!
//! The pipeline is three pull-based stages: an [`Extractor`] streams raw
//! records page by page under a [`RateLimiter`], a [`Transformer`] stamps
//! them with identity and lineage, and a [`BatchLoader`] writes them in bulk
//! to a [`DocumentStore`](feedline_store::DocumentStore).

pub mod clock;
pub mod error;
pub mod extract;
pub mod http;
pub mod loader;
pub mod logging;
pub mod pagination;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod runner;
pub mod shutdown;
pub mod source;
pub mod transform;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, format_iso8601, system_clock};
pub use error::ExtractError;
pub use extract::Extractor;
pub use http::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, ResponseMeta, SHARED_RUNTIME,
    TransportError, http_client,
};
pub use loader::{BatchLoader, DEFAULT_BATCH_SIZE, LoadSummary};
pub use logging::{IndicatifLogger, init_logging};
pub use pagination::{Page, PageError, PaginationParams, PaginationState, parse_page};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use rate_limit::{MAX_RESET_WAIT, RateLimitHint, RateLimiter};
pub use retry::{Backoff, DEFAULT_SERVER_ERROR_BACKOFF, RetryPolicy};
pub use runner::{DEFAULT_PREVIEW, Pipeline, RunOptions, Summary};
pub use shutdown::{StopHandle, shutdown_flag};
pub use source::{Auth, DEFAULT_TIMEOUT, EndpointConfig, SourceConfig, truncate_body};
pub use transform::{Transform, TransformError, Transformer};

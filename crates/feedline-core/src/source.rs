//! Explicit source and endpoint configuration passed into the pipeline

use std::time::Duration;

use crate::http::HttpRequest;
use crate::pagination::{PaginationParams, PaginationState};
use crate::retry::RetryPolicy;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body bytes kept in fatal status errors
pub const ERROR_BODY_LIMIT: usize = 500;

/// How requests authenticate.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// Arbitrary API-key header, e.g. `x-api-key: <key>`
    Header { name: String, value: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Header { name, .. } => write!(f, "Header({name}: ***)"),
        }
    }
}

impl Auth {
    fn header(&self) -> Option<(String, String)> {
        match self {
            Self::None => None,
            Self::Bearer(token) => Some(("Authorization".to_string(), format!("Bearer {token}"))),
            Self::Header { name, value } => Some((name.clone(), value.clone())),
        }
    }
}

/// Everything shared by all endpoints of one source API.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub base_url: String,
    /// Pipeline instance identifier, stamped as `_connector`
    pub connector: String,
    pub auth: Auth,
    pub timeout: Duration,
    /// Minimum spacing between requests
    pub min_interval: Duration,
    pub retry: RetryPolicy,
    pub pagination: PaginationParams,
    /// Abort with an error after this many pages (off by default)
    pub max_pages: Option<usize>,
}

impl SourceConfig {
    pub fn new(base_url: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connector: connector.into(),
            auth: Auth::None,
            timeout: DEFAULT_TIMEOUT,
            min_interval: Duration::ZERO,
            retry: RetryPolicy::default(),
            pagination: PaginationParams::default(),
            max_pages: None,
        }
    }

    /// `<base>/<path>` with exactly one slash between them.
    pub fn endpoint_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }

    /// Build the GET for one page: static endpoint query first, pagination
    /// state after it (pagination wins on a shared key).
    pub fn request(&self, endpoint: &EndpointConfig, state: &PaginationState) -> HttpRequest {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        headers.extend(self.auth.header());

        let mut query: Vec<(String, String)> = endpoint
            .query
            .iter()
            .filter(|(k, _)| state.get(k).is_none())
            .cloned()
            .collect();
        query.extend(state.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        HttpRequest {
            url: self.endpoint_url(&endpoint.path),
            headers,
            query,
            timeout: self.timeout,
        }
    }
}

/// One endpoint of a source and where its documents go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Short name used in logs and the default namespace
    pub name: Option<String>,
    pub path: String,
    /// Field the natural key is derived from
    pub id_field: Option<String>,
    /// Stamped as `_source` and used to prefix ids
    pub source_tag: Option<String>,
    /// Destination namespace override
    pub namespace: Option<String>,
    /// Static query parameters sent with every page
    pub query: Vec<(String, String)>,
}

impl EndpointConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Destination namespace: explicit override, else `<connector>_<name>_raw`,
    /// else `<connector>_raw`.
    pub fn namespace(&self, connector: &str) -> String {
        if let Some(ns) = &self.namespace {
            return ns.clone();
        }
        match &self.name {
            Some(name) => format!("{connector}_{name}_raw"),
            None => format!("{connector}_raw"),
        }
    }

    /// Name for logs and summaries
    pub fn label(&self) -> &str {
        match (&self.name, self.path.as_str()) {
            (Some(name), _) => name,
            (None, "") => "/",
            (None, path) => path,
        }
    }
}

/// Truncate a response body for diagnostics, on a char boundary.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

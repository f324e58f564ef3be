//! Configuration loading from TOML files and the environment

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use feedline_core::{
    Auth, Backoff, EndpointConfig, PaginationParams, RetryPolicy, SourceConfig,
};

/// Global configuration for feedline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceSection,
    pub retry: RetrySection,
    pub load: LoadSection,
    pub endpoints: Vec<EndpointSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub base_url: Option<String>,
    pub connector: String,
    /// Bearer token, or the value of `auth_header` when that is set
    #[serde(deserialize_with = "deserialize_env_var")]
    pub token: Option<String>,
    /// Send the token in this header instead of `Authorization: Bearer`
    pub auth_header: Option<String>,
    pub timeout_secs: u64,
    pub min_interval_ms: u64,
    pub cursor_param: String,
    pub page_param: String,
    pub since_param: String,
    pub max_pages: Option<usize>,
}

impl Default for SourceSection {
    fn default() -> Self {
        let params = PaginationParams::default();
        Self {
            base_url: std::env::var("API_BASE_URL").ok().filter(|s| !s.is_empty()),
            connector: std::env::var("CONNECTOR_NAME").unwrap_or_else(|_| "connector".to_string()),
            token: std::env::var("API_TOKEN").ok().filter(|s| !s.is_empty()),
            auth_header: None,
            timeout_secs: feedline_core::DEFAULT_TIMEOUT.as_secs(),
            min_interval_ms: 0,
            cursor_param: params.cursor_param,
            page_param: params.page_param,
            since_param: params.since_param,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Unset retries transient failures forever
    pub max_attempts: Option<u32>,
    pub backoff: BackoffKind,
    pub delay_secs: u64,
    /// Cap for exponential backoff
    pub max_delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: BackoffKind::Fixed,
            delay_secs: feedline_core::DEFAULT_SERVER_ERROR_BACKOFF.as_secs(),
            max_delay_secs: 300,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.delay_secs);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                base: delay,
                max: Duration::from_secs(self.max_delay_secs).max(delay),
            },
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadSection {
    pub batch_size: usize,
    pub upsert: bool,
    pub store_dir: PathBuf,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            batch_size: feedline_core::DEFAULT_BATCH_SIZE,
            upsert: true,
            store_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointSection {
    pub name: Option<String>,
    pub path: String,
    pub id_field: Option<String>,
    pub source_tag: Option<String>,
    pub namespace: Option<String>,
    pub query: BTreeMap<String, String>,
}

impl From<&EndpointSection> for EndpointConfig {
    fn from(e: &EndpointSection) -> Self {
        Self {
            name: e.name.clone(),
            path: e.path.clone(),
            id_field: e.id_field.clone(),
            source_tag: e.source_tag.clone(),
            namespace: e.namespace.clone(),
            query: e.query.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./feedline.toml (current directory)
    /// 2. ~/.config/feedline/config.toml
    ///
    /// If no config file found, returns defaults (environment only).
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("feedline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "feedline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using environment and defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Explicit source settings for the pipeline.
    pub fn source_config(&self) -> Result<SourceConfig> {
        let Some(base_url) = self.source.base_url.as_deref().filter(|s| !s.is_empty()) else {
            bail!("no base URL configured: set [source] base_url or API_BASE_URL");
        };

        let mut source = SourceConfig::new(base_url, self.source.connector.clone());
        source.auth = match (&self.source.token, &self.source.auth_header) {
            (None, _) => Auth::None,
            (Some(token), None) => Auth::Bearer(token.clone()),
            (Some(token), Some(name)) => Auth::Header {
                name: name.clone(),
                value: token.clone(),
            },
        };
        source.timeout = Duration::from_secs(self.source.timeout_secs);
        source.min_interval = Duration::from_millis(self.source.min_interval_ms);
        source.retry = self.retry.policy();
        source.pagination = PaginationParams {
            cursor_param: self.source.cursor_param.clone(),
            page_param: self.source.page_param.clone(),
            since_param: self.source.since_param.clone(),
        };
        source.max_pages = self.source.max_pages;
        Ok(source)
    }

    /// Endpoints to run, optionally restricted to one by name or path.
    ///
    /// Without any `[[endpoints]]` the base URL itself is the only endpoint.
    pub fn endpoints(&self, only: Option<&str>) -> Result<Vec<EndpointConfig>> {
        let all: Vec<EndpointConfig> = if self.endpoints.is_empty() {
            vec![EndpointConfig::new("")]
        } else {
            self.endpoints.iter().map(EndpointConfig::from).collect()
        };

        match only {
            None => Ok(all),
            Some(wanted) => {
                let picked: Vec<_> = all
                    .into_iter()
                    .filter(|e| e.name.as_deref() == Some(wanted) || e.path == wanted)
                    .collect();
                if picked.is_empty() {
                    bail!("no endpoint named {wanted:?} in configuration");
                }
                Ok(picked)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[source]
base_url = "https://api.example.com/v1"
connector = "otx"
token = "literal-token"
auth_header = "X-OTX-API-KEY"
min_interval_ms = 250
max_pages = 1000

[retry]
max_attempts = 4
backoff = "exponential"
delay_secs = 2
max_delay_secs = 30

[load]
batch_size = 100
upsert = false
store_dir = "/tmp/feedline"

[[endpoints]]
name = "pulses"
path = "/pulses/subscribed"
id_field = "id"
source_tag = "pulses"

[[endpoints]]
name = "indicators"
path = "/indicators"
query = { limit = "50" }
"#;

    #[test]
    fn parse_config_toml() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.source.connector, "otx");
        assert_eq!(config.load.batch_size, 100);
        assert!(!config.load.upsert);
        assert_eq!(config.load.store_dir, PathBuf::from("/tmp/feedline"));
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].query.get("limit").map(String::as_str), Some("50"));
    }

    #[test]
    fn source_config_from_file() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let source = config.source_config().unwrap();
        assert_eq!(source.base_url, "https://api.example.com/v1");
        assert_eq!(source.min_interval, Duration::from_millis(250));
        assert_eq!(source.max_pages, Some(1000));
        assert_eq!(
            source.auth,
            Auth::Header {
                name: "X-OTX-API-KEY".into(),
                value: "literal-token".into()
            }
        );
        assert_eq!(source.retry.max_attempts, Some(4));
        assert_eq!(
            source.retry.backoff,
            Backoff::Exponential {
                base: Duration::from_secs(2),
                max: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn endpoint_selection() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.endpoints(None).unwrap().len(), 2);
        let picked = config.endpoints(Some("indicators")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].query, vec![("limit".to_string(), "50".to_string())]);
        assert_eq!(picked[0].namespace("otx"), "otx_indicators_raw");
        assert!(config.endpoints(Some("missing")).is_err());
    }

    #[test]
    fn no_endpoints_means_base_url() {
        let mut config = Config::default();
        config.endpoints.clear();
        let eps = config.endpoints(None).unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].path, "");
    }

    #[test]
    fn missing_base_url_is_an_error() {
        let mut config = Config::default();
        config.source.base_url = None;
        assert!(config.source_config().is_err());
    }

    #[test]
    fn default_retry_is_unbounded_fixed() {
        let policy = RetrySection::default().policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("FEEDLINE_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${FEEDLINE_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("FEEDLINE_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }
}

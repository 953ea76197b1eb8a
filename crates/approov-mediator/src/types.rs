//! Gateway configuration and the per-request value the mediator rewrites.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

use crate::result::{Failure, MediationResult};

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upper bound on a single SDK fetch, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries for fetches that end in a network status.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retries, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Where the dynamic configuration update is persisted between launches.
    #[serde(default)]
    pub update_config_path: Option<PathBuf>,

    /// User property reported to the SDK at initialization.
    #[serde(default = "default_user_property")]
    pub user_property: String,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_user_property() -> String {
    "approov-mediator".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            update_config_path: None,
            user_property: default_user_property(),
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `APPROOV_FETCH_TIMEOUT_MS` | Per-fetch timeout |
    /// | `APPROOV_MAX_RETRIES` | Retries on network statuses |
    /// | `APPROOV_RETRY_BACKOFF_MS` | Base retry backoff |
    /// | `APPROOV_UPDATE_CONFIG_PATH` | Persisted dynamic configuration |
    pub fn from_env() -> Self {
        Self {
            timeout_ms: std::env::var("APPROOV_FETCH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout_ms),
            max_retries: std::env::var("APPROOV_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_retries),
            retry_backoff_ms: std::env::var("APPROOV_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retry_backoff_ms),
            update_config_path: std::env::var("APPROOV_UPDATE_CONFIG_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            user_property: default_user_property(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_update_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.update_config_path = Some(path.into());
        self
    }
}

/// An outbound request awaiting mediation.
///
/// Owned by a single request flow; the mediator consumes it and hands back
/// the finalized version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl PendingRequest {
    pub fn new(method: Method, url: &str) -> MediationResult<Self> {
        let url = Url::parse(url).map_err(|e| Failure::general(format!("invalid URL: {}", e)))?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    pub fn get(url: &str) -> MediationResult<Self> {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Header value as text; `None` if absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace a header. Values are never echoed in the error.
    pub fn set_header(&mut self, name: &str, value: &str) -> MediationResult<()> {
        let (name, value) = header_pair(name, value, false)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Replace a header with a value that must stay out of debug output,
    /// such as a token or a secure string. Every existing value goes.
    pub fn set_sensitive_header(&mut self, name: &str, value: &str) -> MediationResult<()> {
        let (name, value) = header_pair(name, value, true)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Replace only the first value of a header with a sensitive value,
    /// keeping any further values and their order.
    pub fn replace_first_header_value(&mut self, name: &str, value: &str) -> MediationResult<()> {
        let (name, value) = header_pair(name, value, true)?;
        let mut values: Vec<HeaderValue> = self.headers.get_all(&name).iter().cloned().collect();
        match values.first_mut() {
            Some(first) => *first = value,
            None => values.push(value),
        }

        self.headers.remove(&name);
        for value in values {
            self.headers.append(name.clone(), value);
        }
        Ok(())
    }

    /// Decoded value of the first occurrence of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Replace the value of the first occurrence of a query parameter.
    ///
    /// Only that value is rewritten; every other byte of the query stays
    /// as it was. A parameter without `=` gets one. No-op if absent.
    pub fn replace_query_param(&mut self, name: &str, value: &str) {
        let Some(query) = self.url.query() else {
            return;
        };

        let mut start = 0;
        let mut spliced = None;
        for segment in query.split('&') {
            let end = start + segment.len();
            let matches = form_urlencoded::parse(segment.as_bytes())
                .next()
                .is_some_and(|(key, _)| key == name);

            if matches {
                let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
                let (value_start, separator) = match segment.find('=') {
                    Some(eq) => (start + eq + 1, ""),
                    None => (end, "="),
                };
                spliced = Some(format!(
                    "{}{}{}{}",
                    &query[..value_start],
                    separator,
                    encoded,
                    &query[end..]
                ));
                break;
            }
            start = end + 1;
        }

        if let Some(spliced) = spliced {
            self.url.set_query(Some(&spliced));
        }
    }
}

/// Validate a header pair. Values are never echoed in the error.
fn header_pair(name: &str, value: &str, sensitive: bool) -> MediationResult<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Failure::general(format!("invalid header name: {}", name)))?;
    let mut header_value = HeaderValue::from_str(value)
        .map_err(|_| Failure::general(format!("invalid value for header {}", name)))?;
    header_value.set_sensitive(sensitive);
    Ok((header_name, header_value))
}

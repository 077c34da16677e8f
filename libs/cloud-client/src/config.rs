use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use http::header::HeaderName;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::handler::ResponseHandler;
use crate::response::HttpResponse;
use crate::token::TokenRetriever;
use crate::translate::StatusTranslator;
use crate::transport::Transport;

/// Root domain used when neither a host nor an override host is configured
pub const DEFAULT_ROOT_DOMAIN: &str = "scp.splunk.com";

/// Default URL scheme
pub const DEFAULT_SCHEME: &str = "https";

/// Per-attempt timeout (5 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Tokens expiring within this window are refreshed before use (60 seconds)
pub const DEFAULT_TOKEN_EXPIRE_WINDOW: Duration = Duration::from_secs(60);

/// Maximum response body size (10 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Transport buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Maximum bytes drained from a response body before a retry (64 KiB)
pub const DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT: usize = 64 * 1024;

/// Header carrying the client identification string (`Splunk-Client`)
pub const CLIENT_ID_HEADER: HeaderName = HeaderName::from_static("splunk-client");

/// Agent name and SDK version sent in [`CLIENT_ID_HEADER`]
pub const CLIENT_AGENT: &str = concat!("client-sdk-rust/", env!("CARGO_PKG_VERSION"));

/// Environment prefix read by [`ClientSettings::figment`]
pub const ENV_PREFIX: &str = "CLOUD_CLIENT_";

/// Predicate deciding whether an attempt outcome should be retried
pub type RetryPredicate = Arc<dyn Fn(&Result<HttpResponse, ClientError>) -> bool + Send + Sync>;

/// Exponential backoff configuration for retries
///
/// Computes delay as: `min(initial * multiplier^retry, max)` with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Initial backoff duration (default: 100ms)
    pub initial: Duration,

    /// Maximum backoff duration (default: 10s)
    pub max: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,

    /// Add a random 0-25% to each delay (default: true)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    /// Create backoff with custom initial and max durations
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Wait schedule between retries
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// Growing delay
    Exponential(ExponentialBackoff),
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed(DefaultRetryConfig::DEFAULT_INTERVAL)
    }
}

/// Fixed retry on rate limiting (HTTP 429)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    pub max_retries: u32,

    /// Wait before each retry (default: 500ms)
    pub interval: Duration,

    /// Maximum bytes to drain from a 429 body before retrying
    pub drain_limit: usize,
}

impl DefaultRetryConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
}

impl Default for DefaultRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            interval: Self::DEFAULT_INTERVAL,
            drain_limit: DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
        }
    }
}

/// Caller-tuned retry: custom budget, schedule and retry condition
#[derive(Clone)]
pub struct ConfigurableRetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Wait schedule
    pub backoff: Backoff,

    /// Decides whether an attempt outcome is retried
    pub retryable: RetryPredicate,

    /// Maximum bytes to drain from a retried response body
    pub drain_limit: usize,
}

impl ConfigurableRetryConfig {
    /// Retry whenever `retryable` returns true, at most `max_retries` times.
    pub fn new<F>(max_retries: u32, backoff: Backoff, retryable: F) -> Self
    where
        F: Fn(&Result<HttpResponse, ClientError>) -> bool + Send + Sync + 'static,
    {
        Self {
            max_retries,
            backoff,
            retryable: Arc::new(retryable),
            drain_limit: DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT,
        }
    }

    /// Retry the given status codes only.
    #[must_use]
    pub fn on_statuses(max_retries: u32, backoff: Backoff, statuses: &[u16]) -> Self {
        let statuses = statuses.to_vec();
        Self::new(max_retries, backoff, move |outcome| {
            matches!(outcome, Ok(resp) if statuses.contains(&resp.status().as_u16()))
        })
    }
}

impl Default for ConfigurableRetryConfig {
    /// 429, 502, 503, 504 and transport failures; exponential backoff.
    fn default() -> Self {
        Self::new(
            DefaultRetryConfig::DEFAULT_MAX_RETRIES,
            Backoff::Exponential(ExponentialBackoff::default()),
            default_retryable,
        )
    }
}

impl fmt::Debug for ConfigurableRetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurableRetryConfig")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("drain_limit", &self.drain_limit)
            .finish_non_exhaustive()
    }
}

/// Retry condition of [`ConfigurableRetryConfig::default`].
#[must_use]
pub fn default_retryable(outcome: &Result<HttpResponse, ClientError>) -> bool {
    match outcome {
        Ok(resp) => matches!(resp.status().as_u16(), 429 | 502 | 503 | 504),
        Err(e) => e.is_transport(),
    }
}

/// Which retry handler `retry_requests` installs
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RetryStrategyConfig {
    Default(DefaultRetryConfig),
    Configurable(ConfigurableRetryConfig),
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self::Default(DefaultRetryConfig::default())
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Everything [`BaseClient::new`](crate::BaseClient::new) needs.
///
/// Exactly one of `token` and `token_retriever` must be set.
#[derive(Clone)]
pub struct ClientConfig {
    /// Default tenant; may be empty for system-only clients
    pub tenant: String,

    /// Root domain hosts are synthesized from (`scp.splunk.com` when unset)
    pub host: Option<String>,

    /// Host used verbatim for every request; excludes `host`
    pub override_host: Option<String>,

    /// URL scheme (default: `https`)
    pub scheme: String,

    /// Static access token
    pub token: Option<String>,

    /// Source of refreshable tokens
    pub token_retriever: Option<Arc<dyn TokenRetriever>>,

    /// Caller handlers, tried in order after every attempt
    pub response_handlers: Vec<Arc<dyn ResponseHandler>>,

    /// Install a retry handler ahead of `response_handlers`
    pub retry_requests: bool,

    /// Retry handler installed when `retry_requests` is set
    pub retry_config: RetryStrategyConfig,

    /// Appended to the client identification header
    pub client_version: Option<String>,

    /// Per-attempt timeout (default: 5 seconds)
    pub timeout: Duration,

    /// Refresh tokens this long before they expire (default: 60 seconds)
    pub token_expire_window: Duration,

    /// Hosts carry a tenant or region prefix
    pub tenant_scoped: bool,

    /// Region used for system-namespace hosts
    pub region: String,

    /// Maximum response body size in bytes (default: 10 MiB)
    pub max_body_size: usize,

    /// Queue depth of the shared transport (default: 1024)
    pub buffer_capacity: usize,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Replaces the built-in hyper transport; still wrapped with the timeout
    pub transport: Option<Transport>,

    /// Replaces [`StatusErrorTranslator`](crate::StatusErrorTranslator)
    pub status_translator: Option<Arc<dyn StatusTranslator>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tenant: String::new(),
            host: None,
            override_host: None,
            scheme: DEFAULT_SCHEME.to_owned(),
            token: None,
            token_retriever: None,
            response_handlers: Vec::new(),
            retry_requests: false,
            retry_config: RetryStrategyConfig::default(),
            client_version: None,
            timeout: DEFAULT_TIMEOUT,
            token_expire_window: DEFAULT_TOKEN_EXPIRE_WINDOW,
            tenant_scoped: false,
            region: String::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            tls_roots: TlsRootConfig::default(),
            transport: None,
            status_translator: None,
        }
    }
}

impl ClientConfig {
    /// Check option combinations that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] describing the first conflict found.
    pub fn validate(&self) -> Result<(), ClientError> {
        let token = self.token.as_deref().filter(|t| !t.is_empty());
        match (token, &self.token_retriever) {
            (Some(_), Some(_)) => {
                return Err(ClientError::Config(
                    "either a token or a token retriever can be provided, not both".to_owned(),
                ));
            }
            (None, None) => {
                return Err(ClientError::Config(
                    "either a token or a token retriever must be provided".to_owned(),
                ));
            }
            _ => {}
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(ClientError::Config(format!(
                "unsupported scheme '{}'",
                self.scheme
            )));
        }
        if non_empty(self.host.as_deref()).is_some()
            && non_empty(self.override_host.as_deref()).is_some()
        {
            return Err(ClientError::Config(
                "either a host or an override host may be set, not both".to_owned(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ClientError::Config(
                "buffer capacity must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Configured root domain, or [`DEFAULT_ROOT_DOMAIN`].
    #[must_use]
    pub fn root_domain(&self) -> &str {
        non_empty(self.host.as_deref()).unwrap_or(DEFAULT_ROOT_DOMAIN)
    }

    /// Value of the client identification header.
    #[must_use]
    pub fn client_id(&self) -> String {
        match self.client_version.as_deref().filter(|v| !v.is_empty()) {
            Some(version) => format!("{CLIENT_AGENT},{version}"),
            None => CLIENT_AGENT.to_owned(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("tenant", &self.tenant)
            .field("host", &self.host)
            .field("override_host", &self.override_host)
            .field("scheme", &self.scheme)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("token_retriever", &self.token_retriever.is_some())
            .field("response_handlers", &self.response_handlers.len())
            .field("retry_requests", &self.retry_requests)
            .field("retry_config", &self.retry_config)
            .field("client_version", &self.client_version)
            .field("timeout", &self.timeout)
            .field("token_expire_window", &self.token_expire_window)
            .field("tenant_scoped", &self.tenant_scoped)
            .field("region", &self.region)
            .field("max_body_size", &self.max_body_size)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("tls_roots", &self.tls_roots)
            .field("transport", &self.transport.is_some())
            .field("status_translator", &self.status_translator.is_some())
            .finish()
    }
}

/// File/env-loadable part of [`ClientConfig`].
///
/// Credentials are never read from configuration; attach them in code via
/// [`BaseClientBuilder`](crate::BaseClientBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    pub tenant: String,
    pub host: Option<String>,
    pub override_host: Option<String>,
    pub scheme: String,
    pub timeout_ms: u64,
    pub token_expire_window_secs: u64,
    pub client_version: Option<String>,
    pub tenant_scoped: bool,
    pub region: String,
    pub retry_requests: bool,
    pub tls_roots: TlsRootConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            tenant: String::new(),
            host: None,
            override_host: None,
            scheme: DEFAULT_SCHEME.to_owned(),
            timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            token_expire_window_secs: DEFAULT_TOKEN_EXPIRE_WINDOW.as_secs(),
            client_version: None,
            tenant_scoped: false,
            region: String::new(),
            retry_requests: false,
            tls_roots: TlsRootConfig::default(),
        }
    }
}

impl ClientSettings {
    /// Defaults, then the optional YAML file, then `CLOUD_CLIENT_*` variables.
    #[must_use]
    pub fn figment(yaml: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = yaml {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extract settings from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the merged sources do not describe valid settings.
    pub fn from_figment(figment: &Figment) -> Result<Self, ClientError> {
        figment
            .extract()
            .map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Copy these settings over the defaults of [`ClientConfig`].
    #[must_use]
    pub fn into_config(self) -> ClientConfig {
        ClientConfig {
            tenant: self.tenant,
            host: self.host.filter(|h| !h.is_empty()),
            override_host: self.override_host.filter(|h| !h.is_empty()),
            scheme: self.scheme,
            timeout: Duration::from_millis(self.timeout_ms),
            token_expire_window: Duration::from_secs(self.token_expire_window_secs),
            client_version: self.client_version,
            tenant_scoped: self.tenant_scoped,
            region: self.region,
            retry_requests: self.retry_requests,
            tls_roots: self.tls_roots,
            ..ClientConfig::default()
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

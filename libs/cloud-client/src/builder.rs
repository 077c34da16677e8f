use std::sync::Arc;
use std::time::Duration;

use crate::client::BaseClient;
use crate::config::{
    ClientConfig, ClientSettings, ConfigurableRetryConfig, DefaultRetryConfig,
    RetryStrategyConfig, TlsRootConfig,
};
use crate::error::ClientError;
use crate::handler::ResponseHandler;
use crate::token::TokenRetriever;
use crate::translate::StatusTranslator;
use crate::transport::Transport;

/// Fluent construction of a [`BaseClient`].
#[derive(Debug, Default)]
pub struct BaseClientBuilder {
    config: ClientConfig,
}

impl BaseClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Start from loaded settings; credentials still have to be attached.
    #[must_use]
    pub fn from_settings(settings: ClientSettings) -> Self {
        Self::with_config(settings.into_config())
    }

    #[must_use]
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.config.tenant = tenant.into();
        self
    }

    /// Set the root domain hosts are built from; conflicts with `override_host`
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = Some(host.into());
        self
    }

    /// Send every request to this host (e.g. `localhost:8080`)
    #[must_use]
    pub fn override_host(mut self, host: impl Into<String>) -> Self {
        self.config.override_host = Some(host.into());
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.config.scheme = scheme.into();
        self
    }

    /// Use a fixed access token
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Use a refreshable token source
    #[must_use]
    pub fn token_retriever(mut self, retriever: Arc<dyn TokenRetriever>) -> Self {
        self.config.token_retriever = Some(retriever);
        self
    }

    /// Append a handler to the response chain
    #[must_use]
    pub fn response_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.config.response_handlers.push(handler);
        self
    }

    /// Install the retry handler ahead of caller handlers
    #[must_use]
    pub fn retry_requests(mut self, enabled: bool) -> Self {
        self.config.retry_requests = enabled;
        self
    }

    /// Set which retry handler `retry_requests` installs
    #[must_use]
    pub fn retry_config(mut self, retry: RetryStrategyConfig) -> Self {
        self.config.retry_config = retry;
        self
    }

    /// Enable fixed rate-limit retry with the given settings
    #[must_use]
    pub fn default_retry(self, retry: DefaultRetryConfig) -> Self {
        self.retry_requests(true)
            .retry_config(RetryStrategyConfig::Default(retry))
    }

    /// Enable configurable retry with the given settings
    #[must_use]
    pub fn configurable_retry(self, retry: ConfigurableRetryConfig) -> Self {
        self.retry_requests(true)
            .retry_config(RetryStrategyConfig::Configurable(retry))
    }

    /// Appended to the client identification header
    #[must_use]
    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.config.client_version = Some(version.into());
        self
    }

    /// Set the per-attempt timeout
    ///
    /// Every retry attempt gets its own timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    #[must_use]
    pub fn token_expire_window(mut self, window: Duration) -> Self {
        self.config.token_expire_window = window;
        self
    }

    #[must_use]
    pub fn tenant_scoped(mut self, scoped: bool) -> Self {
        self.config.tenant_scoped = scoped;
        self
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Replace the built-in hyper transport
    #[must_use]
    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.transport = Some(transport);
        self
    }

    /// Replace the default 4xx/5xx translator
    #[must_use]
    pub fn status_translator(mut self, translator: Arc<dyn StatusTranslator>) -> Self {
        self.config.status_translator = Some(translator);
        self
    }

    /// Build the client, fetching the initial token.
    ///
    /// # Errors
    ///
    /// See [`BaseClient::new`].
    pub async fn build(self) -> Result<BaseClient, ClientError> {
        BaseClient::new(self.config).await
    }
}

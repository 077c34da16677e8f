use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use url::Url;

use crate::builder::BaseClientBuilder;
use crate::config::{CLIENT_ID_HEADER, ClientConfig, RetryStrategyConfig};
use crate::error::ClientError;
use crate::handler::ResponseHandler;
use crate::multipart;
use crate::request::{Request, RequestParams, bearer};
use crate::response::HttpResponse;
use crate::retry::{ConfigurableRetryResponseHandler, DefaultRetryResponseHandler};
use crate::token::{StaticTokenRetriever, TokenManager, TokenRetriever, TokenSnapshot};
use crate::translate::{StatusErrorTranslator, StatusTranslator};
use crate::transport::{self, BufferedTransport};
use crate::url_builder::{QueryValues, UrlBuilder};

/// Tenant-aware API client shared by every endpoint caller.
///
/// `BaseClient` is `Send + Sync`; share it behind an `Arc`. Token reads are
/// lock-free and only a refresh takes the token lock.
///
/// # Example
///
/// ```ignore
/// let client = BaseClient::builder()
///     .tenant("acme")
///     .token_retriever(Arc::new(my_retriever))
///     .retry_requests(true)
///     .build()
///     .await?;
///
/// let url = client.build_url(None, "catalog", &["catalog", "v2", "datasets"])?;
/// let datasets: Vec<Dataset> = client
///     .get(RequestParams::new(Method::GET, url))
///     .await?
///     .json()
///     .await?;
/// ```
pub struct BaseClient {
    urls: UrlBuilder,
    token: TokenManager,
    handlers: Vec<Arc<dyn ResponseHandler>>,
    translator: Arc<dyn StatusTranslator>,
    transport: BufferedTransport,
    client_id: HeaderValue,
    max_body_size: usize,
}

impl BaseClient {
    /// Create a client, fetching the initial token.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for conflicting options,
    /// [`ClientError::TokenRetrieval`] if the initial token cannot be fetched and
    /// [`ClientError::Tls`] if the TLS roots cannot be loaded.
    pub async fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let client_id = HeaderValue::try_from(config.client_id())?;
        let root_domain = config.root_domain().to_owned();

        let retriever: Arc<dyn TokenRetriever> = match (config.token_retriever, config.token) {
            (Some(retriever), _) => retriever,
            (None, Some(token)) => Arc::new(StaticTokenRetriever::new(token)),
            (None, None) => {
                return Err(ClientError::Config(
                    "either a token or a token retriever must be provided".to_owned(),
                ));
            }
        };
        let token = TokenManager::start(retriever, config.token_expire_window).await?;

        let mut handlers: Vec<Arc<dyn ResponseHandler>> = Vec::new();
        if config.retry_requests {
            handlers.push(match config.retry_config {
                RetryStrategyConfig::Default(retry) => {
                    Arc::new(DefaultRetryResponseHandler::new(retry))
                }
                RetryStrategyConfig::Configurable(retry) => {
                    Arc::new(ConfigurableRetryResponseHandler::new(retry))
                }
            });
        }
        handlers.extend(config.response_handlers);

        let inner = match config.transport {
            Some(custom) => custom,
            None => transport::hyper_transport(config.tls_roots)?,
        };
        let transport = transport::buffered(inner, config.timeout, config.buffer_capacity);

        let mut urls = UrlBuilder::new(config.scheme, root_domain)
            .default_tenant(config.tenant)
            .tenant_scoped(config.tenant_scoped)
            .region(config.region);
        if let Some(host) = config.override_host {
            urls = urls.override_host(host);
        }

        tracing::debug!(
            host = %urls.root_domain,
            override_host = ?urls.override_host,
            tenant_scoped = urls.tenant_scoped,
            handlers = handlers.len(),
            "cloud client created"
        );

        Ok(Self {
            urls,
            token,
            handlers,
            translator: config
                .status_translator
                .unwrap_or_else(|| Arc::new(StatusErrorTranslator)),
            transport,
            client_id,
            max_body_size: config.max_body_size,
        })
    }

    /// Create a builder for configuring the client
    #[must_use]
    pub fn builder() -> BaseClientBuilder {
        BaseClientBuilder::new()
    }

    #[must_use]
    pub fn default_tenant(&self) -> &str {
        &self.urls.default_tenant
    }

    pub fn set_default_tenant(&mut self, tenant: impl Into<String>) {
        self.urls.default_tenant = tenant.into();
    }

    /// Send every request to `host`, ignoring root domain and service cluster.
    ///
    /// An empty string clears the override.
    pub fn set_override_host(&mut self, host: impl Into<String>) {
        self.urls.override_host = Some(host.into()).filter(|h| !h.is_empty());
    }

    #[must_use]
    pub fn tenant_scoped(&self) -> bool {
        self.urls.tenant_scoped
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.urls.region
    }

    /// Current token without a freshness check.
    #[must_use]
    pub fn token_snapshot(&self) -> Arc<TokenSnapshot> {
        self.token.current()
    }

    /// Install a token obtained out of band.
    pub fn update_token_snapshot(&self, snapshot: TokenSnapshot) {
        self.token.replace(snapshot);
    }

    /// Host for `service_cluster` with an optional prefix label.
    #[must_use]
    pub fn build_host(&self, service_cluster: &str, host_prefix: &str) -> String {
        self.urls.build_host(service_cluster, host_prefix)
    }

    /// `{scheme}://{host}`, tenant-prefixed on tenant-scoped clients.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if scheme and host do not form a URL.
    pub fn get_url(&self, service_cluster: &str) -> Result<Url, ClientError> {
        self.urls.base_url(service_cluster)
    }

    /// Tenant-based URL for the default tenant.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyTenant`] if the client has no default tenant.
    pub fn build_url<S: AsRef<str>>(
        &self,
        query: Option<&QueryValues>,
        service_cluster: &str,
        path_parts: &[S],
    ) -> Result<Url, ClientError> {
        self.urls.build_url(query, service_cluster, path_parts)
    }

    /// Tenant-based URL for an explicit tenant.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyTenant`] if `tenant` is empty.
    pub fn build_url_with_tenant<S: AsRef<str>>(
        &self,
        tenant: &str,
        query: Option<&QueryValues>,
        service_cluster: &str,
        path_parts: &[S],
    ) -> Result<Url, ClientError> {
        self.urls.build_url_with_tenant(
            tenant,
            self.urls.tenant_scoped,
            &self.urls.region,
            query,
            service_cluster,
            path_parts,
        )
    }

    /// URL from a path template such as `/catalog/v2/datasets/{{id}}`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::PathTemplate`] on render failure and
    /// [`ClientError::RegionRequired`] for system paths without a region.
    pub fn build_url_from_path_params<P: Serialize>(
        &self,
        query: Option<&QueryValues>,
        service_cluster: &str,
        template: &str,
        params: &P,
    ) -> Result<Url, ClientError> {
        self.urls
            .build_url_from_path_params(query, service_cluster, template, params)
    }

    /// Build a request carrying the current token and default headers.
    ///
    /// Defaults are `Authorization` (when a token exists), the client
    /// identification header and `Content-Type: application/json`; any key in
    /// `headers` replaces the default for that key.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidHeaderValue`] if the token is not a valid header value.
    pub fn new_request(
        &self,
        method: Method,
        url: Url,
        body: Bytes,
        headers: &HeaderMap,
    ) -> Result<Request, ClientError> {
        let mut merged = HeaderMap::new();

        let token = self.token.current();
        if !token.access_token().is_empty() {
            merged.insert(AUTHORIZATION, bearer(token.access_token())?);
        }
        merged.insert(CLIENT_ID_HEADER, self.client_id.clone());
        merged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for name in headers.keys() {
            merged.remove(name);
            for value in headers.get_all(name) {
                merged.append(name.clone(), value.clone());
            }
        }

        Ok(Request::new(method, url, merged, body))
    }

    /// Run the request and the response-handler chain.
    ///
    /// Without registered handlers the raw attempt result is returned. With
    /// handlers, a failed attempt is offered to error-capable handlers until
    /// one recovers; a response passes through every handler in order until
    /// one returns an error.
    ///
    /// # Errors
    ///
    /// Returns the transport error no handler recovered from, or the first
    /// error a handler produced.
    pub async fn execute(&self, request: &mut Request) -> Result<HttpResponse, ClientError> {
        if self.handlers.is_empty() {
            return self.transmit(request).await;
        }

        let mut outcome = self.execute_attempt(request).await;
        for handler in &self.handlers {
            outcome = match outcome {
                Err(err) => match handler.error_handler() {
                    Some(error_handler) => {
                        let recovered = error_handler
                            .handle_request_error(self, request, err)
                            .await;
                        if recovered.is_ok() {
                            return recovered;
                        }
                        recovered
                    }
                    None => Err(err),
                },
                Ok(response) => {
                    let handled = handler.handle_response(self, request, response).await;
                    if handled.is_err() {
                        return handled;
                    }
                    handled
                }
            };
        }
        outcome
    }

    /// One attempt: count it, send it, and record an error status.
    ///
    /// Retry handlers resubmit through this so counters keep accumulating.
    ///
    /// # Errors
    ///
    /// Returns transport-level failures; HTTP statuses are not errors here.
    pub async fn execute_attempt(
        &self,
        request: &mut Request,
    ) -> Result<HttpResponse, ClientError> {
        let outcome = self.transmit(request).await;
        if let Ok(response) = &outcome
            && response.status().as_u16() >= 400
        {
            request.increment_errors_by_type(response.status().as_str());
        }
        outcome
    }

    async fn transmit(&self, request: &mut Request) -> Result<HttpResponse, ClientError> {
        request.increment_attempts();
        tracing::trace!(
            method = %request.method(),
            url = %request.url(),
            attempt = request.num_attempts(),
            "sending request"
        );
        let response = transport::send(&self.transport, request.to_http()?).await?;
        Ok(HttpResponse::new(response, self.max_body_size))
    }

    /// Refresh the token if needed, encode the body, execute, and translate the status.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenRetrieval`] if the token refresh fails, body
    /// encoding errors, any error from [`execute`](Self::execute), and the
    /// status translator's error for 4xx/5xx responses.
    pub async fn do_request(&self, params: RequestParams) -> Result<HttpResponse, ClientError> {
        self.token.ensure_fresh().await?;

        let multipart = params.is_multipart();
        let RequestParams {
            method,
            url,
            body,
            mut headers,
        } = params;

        let body = if multipart {
            let encoded = multipart::encode(body).await?;
            headers.insert(CONTENT_TYPE, HeaderValue::try_from(encoded.content_type)?);
            encoded.body
        } else {
            body.encode(&method)?
        };

        let mut request = self.new_request(method, url, body, &headers)?;
        let response = self.execute(&mut request).await?;
        self.translator.translate(response).await
    }

    /// [`do_request`](Self::do_request) with the method forced to `GET`.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn get(&self, params: RequestParams) -> Result<HttpResponse, ClientError> {
        self.do_request(RequestParams {
            method: Method::GET,
            ..params
        })
        .await
    }

    /// [`do_request`](Self::do_request) with the method forced to `POST`.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn post(&self, params: RequestParams) -> Result<HttpResponse, ClientError> {
        self.do_request(RequestParams {
            method: Method::POST,
            ..params
        })
        .await
    }

    /// [`do_request`](Self::do_request) with the method forced to `PUT`.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn put(&self, params: RequestParams) -> Result<HttpResponse, ClientError> {
        self.do_request(RequestParams {
            method: Method::PUT,
            ..params
        })
        .await
    }

    /// [`do_request`](Self::do_request) with the method forced to `DELETE`.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn delete(&self, params: RequestParams) -> Result<HttpResponse, ClientError> {
        self.do_request(RequestParams {
            method: Method::DELETE,
            ..params
        })
        .await
    }

    /// [`do_request`](Self::do_request) with the method forced to `PATCH`.
    ///
    /// # Errors
    ///
    /// See [`do_request`](Self::do_request).
    pub async fn patch(&self, params: RequestParams) -> Result<HttpResponse, ClientError> {
        self.do_request(RequestParams {
            method: Method::PATCH,
            ..params
        })
        .await
    }
}

impl fmt::Debug for BaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseClient")
            .field("urls", &self.urls)
            .field("token", &self.token.current())
            .field("handlers", &self.handlers.len())
            .field("client_id", &self.client_id)
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod mock_server_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::BaseClient;
    use crate::config::{CLIENT_AGENT, DefaultRetryConfig};
    use crate::error::{ClientError, TokenError};
    use crate::request::{FormData, RequestBody, RequestParams};
    use crate::token::{TokenRetriever, TokenSnapshot};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    }

    async fn test_client(server: &MockServer) -> BaseClient {
        BaseClient::builder()
            .tenant("acme")
            .token("secret-token")
            .scheme("http")
            .override_host(server.address().to_string())
            .build()
            .await
            .unwrap()
    }

    fn gzip_compress(data: &[u8]) -> Vec<u8> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_get_sends_default_headers() {
        init_tracing();
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/catalog/v2/datasets")
                .header("authorization", "Bearer secret-token")
                .header("splunk-client", CLIENT_AGENT)
                .header("content-type", "application/json");
            then.status(200).json_body(json!([{"name": "ds1"}]));
        });

        let client = test_client(&server).await;
        let url = client
            .build_url(None, "catalog", &["catalog", "v2", "datasets"])
            .unwrap();
        let datasets: serde_json::Value = client
            .get(RequestParams::new(http::Method::GET, url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(datasets, json!([{"name": "ds1"}]));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_post_json_from_path_template() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/catalog/v2/datasets/ds1/fields")
                .json_body(json!({"name": "owner"}));
            then.status(201).json_body(json!({"id": "f1"}));
        });

        let client = test_client(&server).await;
        let url = client
            .build_url_from_path_params(
                None,
                "catalog",
                "/catalog/v2/datasets/{{id}}/fields",
                &json!({"id": "ds1"}),
            )
            .unwrap();
        let params = RequestParams::new(http::Method::POST, url)
            .body(RequestBody::json(&json!({"name": "owner"})).unwrap());
        let resp = client.post(params).await.unwrap();

        assert_eq!(resp.status(), 201);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/acme/ingest/v1/files")
                .header_exists("content-type")
                .body_includes("name=\"upfile\"; filename=\"report.csv\"")
                .body_includes("a,b,c");
            then.status(201);
        });

        let client = test_client(&server).await;
        let url = client
            .build_url(None, "ingest", &["ingest", "v1", "files"])
            .unwrap();
        let params = RequestParams::new(http::Method::POST, url)
            .header(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("multipart/form-data"),
            )
            .body(FormData::new("upfile", "report.csv", &b"a,b,c"[..]));
        let resp = client.post(params).await.unwrap();

        assert_eq!(resp.status(), 201);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_error_status_translated() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/acme/missing");
            then.status(404)
                .header("content-type", "application/json")
                .json_body(json!({"code": "not_found"}));
        });

        let client = test_client(&server).await;
        let url = client.build_url(None, "", &["missing"]).unwrap();
        let err = client
            .get(RequestParams::new(http::Method::GET, url))
            .await
            .unwrap_err();

        match err {
            ClientError::HttpStatus {
                status,
                body_preview,
                content_type,
            } => {
                assert_eq!(status, 404);
                assert!(body_preview.contains("not_found"));
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_retries_until_budget_spent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/acme/busy");
            then.status(429).body("slow down");
        });

        let client = BaseClient::builder()
            .tenant("acme")
            .token("t")
            .scheme("http")
            .override_host(server.address().to_string())
            .default_retry(DefaultRetryConfig {
                max_retries: 2,
                interval: Duration::from_millis(10),
                ..Default::default()
            })
            .build()
            .await
            .unwrap();
        let url = client.build_url(None, "", &["busy"]).unwrap();
        let err = client
            .get(RequestParams::new(http::Method::GET, url))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(http::StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(mock.calls(), 3, "one attempt plus two retries");
    }

    #[tokio::test]
    async fn test_gzip_response_decompressed() {
        let server = MockServer::start();
        let original = br#"{"compressed":true}"#;
        let _m = server.mock(|when, then| {
            when.method(GET).path("/acme/gzip");
            then.status(200)
                .header("content-encoding", "gzip")
                .body(gzip_compress(original));
        });

        let client = test_client(&server).await;
        let url = client.build_url(None, "", &["gzip"]).unwrap();
        let body = client
            .get(RequestParams::new(http::Method::GET, url))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();

        assert_eq!(body.as_ref(), original);
    }

    #[tokio::test]
    async fn test_body_size_limit() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/acme/large");
            then.status(200).body("x".repeat(4096));
        });

        let client = BaseClient::builder()
            .tenant("acme")
            .token("t")
            .scheme("http")
            .override_host(server.address().to_string())
            .max_body_size(1024)
            .build()
            .await
            .unwrap();
        let url = client.build_url(None, "", &["large"]).unwrap();
        let result = client
            .get(RequestParams::new(http::Method::GET, url))
            .await
            .unwrap()
            .bytes()
            .await;

        assert!(matches!(result, Err(ClientError::BodyTooLarge { .. })));
    }

    /// Hands out `tok-1`, `tok-2`, ... each already inside the expiry window.
    struct ShortLived(AtomicUsize);

    #[async_trait]
    impl TokenRetriever for ShortLived {
        async fn fetch(&self) -> Result<TokenSnapshot, TokenError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenSnapshot::issued_now(format!("tok-{n}"), 30))
        }
    }

    #[tokio::test]
    async fn test_stale_token_refreshed_before_send() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/acme/whoami")
                .header("authorization", "Bearer tok-2");
            then.status(200);
        });

        let client = BaseClient::builder()
            .tenant("acme")
            .token_retriever(std::sync::Arc::new(ShortLived(AtomicUsize::new(0))))
            .scheme("http")
            .override_host(server.address().to_string())
            .build()
            .await
            .unwrap();
        assert_eq!(client.token_snapshot().access_token(), "tok-1");

        let url = client.build_url(None, "", &["whoami"]).unwrap();
        client
            .get(RequestParams::new(http::Method::GET, url))
            .await
            .unwrap();

        assert_eq!(mock.calls(), 1);
        assert_eq!(client.token_snapshot().access_token(), "tok-2");
    }
}

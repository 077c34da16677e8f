#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Transport core for tenant-aware cloud API clients
//!
//! This crate provides the shared machinery generated endpoint callers sit on:
//! - Access-token lifecycle: lock-free reads, serialized refresh before expiry
//! - Host and URL construction for tenant-scoped, region-scoped and system paths
//! - Request construction with bearer auth, client identification and body encoding
//!   (raw, JSON, per-method marshaling, single-file multipart)
//! - An ordered response-handler chain with fixed and configurable retry policies
//! - Status translation of 4xx/5xx responses into typed errors
//!
//! Requests go through a tower stack (per-attempt timeout, transparent
//! decompression, pooled hyper client with rustls) that callers may replace
//! with their own [`Transport`].
//!
//! # Example
//!
//! ```ignore
//! use cloud_client::{BaseClient, RequestParams};
//! use http::Method;
//!
//! let client = BaseClient::builder()
//!     .tenant("acme")
//!     .token(access_token)
//!     .retry_requests(true)
//!     .build()
//!     .await?;
//!
//! let url = client.build_url_from_path_params(
//!     None,
//!     "catalog",
//!     "/catalog/v2/datasets/{{id}}",
//!     &serde_json::json!({ "id": "ds1" }),
//! )?;
//! let dataset: Dataset = client
//!     .get(RequestParams::new(Method::GET, url))
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod error;
mod handler;
mod multipart;
mod request;
mod response;
mod retry;
pub mod tls;
mod token;
mod translate;
mod transport;
pub mod url_builder;

pub use builder::BaseClientBuilder;
pub use client::BaseClient;
pub use config::{
    Backoff, CLIENT_AGENT, CLIENT_ID_HEADER, ClientConfig, ClientSettings,
    ConfigurableRetryConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_RETRY_RESPONSE_DRAIN_LIMIT, DEFAULT_ROOT_DOMAIN, DEFAULT_SCHEME, DEFAULT_TIMEOUT,
    DEFAULT_TOKEN_EXPIRE_WINDOW, DefaultRetryConfig, ENV_PREFIX, ExponentialBackoff,
    RetryPredicate, RetryStrategyConfig, TlsRootConfig, default_retryable,
};
pub use error::{BoxError, ClientError, TokenError};
pub use handler::{PassThroughHandler, RequestErrorHandler, ResponseHandler};
pub use request::{FormData, MethodMarshaler, Request, RequestBody, RequestParams};
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody, body_from_bytes};
pub use retry::{
    ConfigurableRetryResponseHandler, DefaultRetryResponseHandler, calculate_backoff,
};
pub use token::{StaticTokenRetriever, TokenRetriever, TokenSnapshot};
pub use translate::{StatusErrorTranslator, StatusTranslator};
pub use transport::{Transport, transport_fn};
pub use url_builder::QueryValues;

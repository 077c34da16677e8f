//! Tower service stack every attempt goes through.
//!
//! Request flow (outer to inner):
//!   Buffer -> ErrorMapping -> Timeout -> [Decompression -> hyper client | custom transport]

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

use crate::config::TlsRootConfig;
use crate::error::ClientError;
use crate::response::ResponseBody;
use crate::tls;

/// Idle pooled connections are closed after this long
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Type-erased HTTP round trip.
///
/// The built-in transport is a pooled hyper client; callers may supply their
/// own (see [`transport_fn`]) and it still receives the per-attempt timeout.
pub type Transport =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, ClientError>;

/// Type alias for the future type of the inner service
pub(crate) type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, ClientError>> + Send>>;

/// Shared, `Send + Sync` handle onto the transport worker
pub(crate) type BufferedTransport = Buffer<http::Request<Full<Bytes>>, ServiceFuture>;

/// Wrap an async function as a [`Transport`].
pub fn transport_fn<F, Fut>(f: F) -> Transport
where
    F: FnMut(http::Request<Full<Bytes>>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Response<ResponseBody>, ClientError>> + Send + 'static,
{
    BoxCloneService::new(tower::service_fn(f))
}

/// Pooled HTTP/1.1 + HTTP/2 client with transparent decompression.
///
/// # Errors
///
/// Returns [`ClientError::Tls`] if the root store cannot be set up.
pub(crate) fn hyper_transport(tls_roots: TlsRootConfig) -> Result<Transport, ClientError> {
    let https = build_https_connector(tls_roots)?;

    let mut client_builder = Client::builder(TokioExecutor::new());
    client_builder
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .http2_only(false);
    let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

    let service = ServiceBuilder::new()
        .layer(DecompressionLayer::new())
        .service(hyper_client)
        .map_response(map_decompression_response)
        .map_err(|e| ClientError::Transport(Box::new(e)));

    Ok(service.boxed_clone())
}

/// Apply the per-attempt timeout and move the stack behind a buffer worker.
///
/// Must run inside a tokio runtime.
pub(crate) fn buffered(
    inner: Transport,
    timeout: Duration,
    buffer_capacity: usize,
) -> BufferedTransport {
    let service = ServiceBuilder::new()
        .layer(TimeoutLayer::new(timeout))
        .service(inner)
        .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

    Buffer::new(service.boxed_clone(), buffer_capacity.max(1))
}

/// Run one attempt through the shared stack, waiting for buffer capacity.
pub(crate) async fn send(
    transport: &BufferedTransport,
    request: http::Request<Full<Bytes>>,
) -> Result<Response<ResponseBody>, ClientError> {
    let mut service = transport.clone();
    std::future::poll_fn(|cx| service.poll_ready(cx))
        .await
        .map_err(map_buffer_error)?;
    service.call(request).await.map_err(map_buffer_error)
}

/// Map tower errors to `ClientError` with actual timeout duration
///
/// Typed errors boxed by inner services are recovered before falling back to
/// `Transport`.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> ClientError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return ClientError::Timeout(timeout);
    }

    match err.downcast::<ClientError>() {
        Ok(client_err) => *client_err,
        Err(other) => ClientError::Transport(other),
    }
}

fn map_buffer_error(err: tower::BoxError) -> ClientError {
    match err.downcast::<ClientError>() {
        Ok(client_err) => *client_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            ClientError::ServiceClosed
        }
    }
}

/// Convert `Response<DecompressionBody<Incoming>>` to `Response<ResponseBody>`.
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// HTTPS connector advertising h2 and http/1.1 via ALPN.
///
/// Plain `http` URLs are allowed since the scheme is chosen by configuration.
fn build_https_connector(
    tls_roots: TlsRootConfig,
) -> Result<HttpsConnector<HttpConnector>, ClientError> {
    match tls_roots {
        TlsRootConfig::WebPki => {
            let builder = hyper_rustls::HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(tls::crypto_provider())
                .map_err(|e| ClientError::Tls(Box::new(e)))?;
            Ok(builder.https_or_http().enable_all_versions().build())
        }
        TlsRootConfig::Native => {
            let client_config = tls::native_roots_client_config()?;
            Ok(hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(client_config)
                .https_or_http()
                .enable_all_versions()
                .build())
        }
    }
}

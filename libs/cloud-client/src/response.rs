use crate::error::ClientError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;

/// Maximum bytes of an error body kept in [`ClientError::HttpStatus`] (8 KiB)
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body that supports decompression.
///
/// Holds either a raw body or a decompressed one (gzip/br/deflate).
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Box an in-memory payload as a [`ResponseBody`].
///
/// Custom transports use this to hand canned bodies to the pipeline.
#[must_use]
pub fn body_from_bytes(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed()
}

/// Response produced by one attempt, with size-limited body readers.
///
/// Status is not checked here; 4xx/5xx are turned into errors by the
/// [`StatusTranslator`](crate::StatusTranslator) at the end of
/// [`BaseClient::do_request`](crate::BaseClient::do_request).
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    /// Wrap a transport response.
    #[must_use]
    pub fn new(inner: Response<ResponseBody>, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// `Content-Type` header, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.inner
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Returns the configured max body size for this response.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Consume the wrapper and return the inner response with boxed body.
    ///
    /// The body has already been through the decompression layer.
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Raw body stream, without the size limit.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.inner.into_body()
    }

    /// Read the whole body.
    ///
    /// # Errors
    /// Returns `ClientError::BodyTooLarge` if body exceeds `max_body_size`.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Parse the body as JSON.
    ///
    /// # Errors
    /// Returns `ClientError::BodyTooLarge` if body exceeds limit.
    /// Returns `ClientError::Json` if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let body_bytes = read_body_limited(self.inner, self.max_body_size).await?;
        Ok(serde_json::from_slice(&body_bytes)?)
    }

    /// Read the body as text, replacing invalid UTF-8.
    ///
    /// # Errors
    /// Returns `ClientError::BodyTooLarge` if body exceeds limit.
    pub async fn text(self) -> Result<String, ClientError> {
        let body_bytes = read_body_limited(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Read and discard up to `limit` bytes so the connection can go back to the pool.
    ///
    /// Bodies announcing a larger `Content-Length` are dropped unread.
    pub(crate) async fn drain(self, limit: usize) {
        let announced = self
            .inner
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        if announced.is_some_and(|len| len > limit as u64) {
            tracing::trace!(limit, "skipping drain: Content-Length exceeds limit");
            return;
        }

        let mut body = std::pin::pin!(self.inner.into_body());
        let mut drained = 0usize;
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Some(chunk) = frame.data_ref() {
                        drained += chunk.len();
                        if drained >= limit {
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "failed to drain response body before retry");
                    break;
                }
            }
        }
    }
}

/// Read at most `limit` bytes of an error body for display.
///
/// A body over the limit yields a placeholder instead of hiding the status.
pub(crate) async fn error_preview(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<String, ClientError> {
    match read_body_limited(response, limit).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(ClientError::BodyTooLarge { .. }) => Ok("<body too large for preview>".to_owned()),
        Err(e) => Err(e),
    }
}

/// Collect the body, enforcing the byte limit on decompressed data.
pub(crate) async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, ClientError> {
    let (_parts, body) = response.into_parts();

    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ClientError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(ClientError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> HttpResponse {
        let inner = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body_from_bytes(body))
            .unwrap();
        HttpResponse::new(inner, 64)
    }

    #[tokio::test]
    async fn test_json_parses_body() {
        #[derive(serde::Deserialize)]
        struct Dataset {
            id: String,
        }

        let resp = response(200, r#"{"id":"ds1"}"#);
        assert_eq!(resp.content_type(), Some("application/json"));
        let parsed: Dataset = resp.json().await.unwrap();
        assert_eq!(parsed.id, "ds1");
    }

    #[tokio::test]
    async fn test_body_limit_enforced() {
        let inner = Response::builder()
            .body(body_from_bytes(vec![b'x'; 100]))
            .unwrap();
        let err = HttpResponse::new(inner, 10).bytes().await.unwrap_err();
        assert!(matches!(err, ClientError::BodyTooLarge { limit: 10, actual: 100 }));
    }

    #[tokio::test]
    async fn test_text_is_lossy() {
        let inner = Response::builder()
            .body(body_from_bytes(vec![b'o', b'k', 0xff]))
            .unwrap();
        let text = HttpResponse::new(inner, 64).text().await.unwrap();
        assert!(text.starts_with("ok"));
    }

    #[tokio::test]
    async fn test_error_preview_placeholder_when_too_large() {
        let inner = Response::builder()
            .body(body_from_bytes(vec![b'e'; 32]))
            .unwrap();
        let preview = error_preview(inner, 8).await.unwrap();
        assert_eq!(preview, "<body too large for preview>");
    }

    #[tokio::test]
    async fn test_drain_consumes_small_body() {
        // Completes without error for both drained and skipped bodies.
        response(429, "slow down").drain(1024).await;

        let big = Response::builder()
            .header(http::header::CONTENT_LENGTH, "4096")
            .body(body_from_bytes(vec![b'x'; 4096]))
            .unwrap();
        HttpResponse::new(big, 8192).drain(16).await;
    }
}

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use http_body_util::Full;
use serde::Serialize;
use tokio::io::AsyncRead;
use url::Url;

use crate::error::{BoxError, ClientError};

/// Body that encodes itself differently per HTTP method.
pub trait MethodMarshaler: Send + Sync {
    /// Serialize the body for a request with `method`.
    ///
    /// # Errors
    ///
    /// Any error is surfaced as [`ClientError::Marshal`].
    fn marshal_for(&self, method: &Method) -> Result<Bytes, BoxError>;
}

/// A single file upload: form field key, filename and content stream.
pub struct FormData {
    pub key: String,
    pub filename: String,
    pub stream: Pin<Box<dyn AsyncRead + Send>>,
}

impl FormData {
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        filename: impl Into<String>,
        stream: impl AsyncRead + Send + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            filename: filename.into(),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for FormData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormData")
            .field("key", &self.key)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Request body, encoded by [`BaseClient::do_request`](crate::BaseClient::do_request).
///
/// A `multipart/form-data` content type takes precedence over the variant;
/// such a request must carry [`RequestBody::Form`].
#[derive(Default)]
#[non_exhaustive]
pub enum RequestBody {
    #[default]
    Empty,
    /// Sent verbatim
    Raw(Bytes),
    /// Encoded through [`MethodMarshaler::marshal_for`]
    Marshaled(Box<dyn MethodMarshaler>),
    /// Serialized as JSON
    Json(serde_json::Value),
    /// Sent as a single-part multipart upload
    Form(FormData),
}

impl RequestBody {
    /// JSON body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Json`] if `value` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ClientError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    #[must_use]
    pub fn marshaled(body: impl MethodMarshaler + 'static) -> Self {
        Self::Marshaled(Box::new(body))
    }

    /// Encode everything but form data, which is handled by the multipart path.
    pub(crate) fn encode(self, method: &Method) -> Result<Bytes, ClientError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Raw(bytes) => Ok(bytes),
            Self::Marshaled(marshaler) => marshaler
                .marshal_for(method)
                .map_err(ClientError::Marshal),
            Self::Json(value) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
            Self::Form(form) => Err(ClientError::FormData(format!(
                "form data for field '{}' requires a multipart/form-data content type",
                form.key
            ))),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Raw(bytes) => f.debug_tuple("Raw").field(&bytes.len()).finish(),
            Self::Marshaled(_) => f.write_str("Marshaled(..)"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Form(form) => f.debug_tuple("Form").field(form).finish(),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(Bytes::from(bytes))
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<FormData> for RequestBody {
    fn from(form: FormData) -> Self {
        Self::Form(form)
    }
}

/// What an endpoint caller hands to [`BaseClient::do_request`](crate::BaseClient::do_request).
#[derive(Debug)]
pub struct RequestParams {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
    /// Override the client's default headers key by key
    pub headers: HeaderMap,
}

impl RequestParams {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: RequestBody::Empty,
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the caller declared a `multipart/form-data` body.
    pub(crate) fn is_multipart(&self) -> bool {
        is_multipart(&self.headers)
    }
}

pub(crate) fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA)
}

/// One logical call, reused across every retry attempt.
///
/// The body is kept as bytes so each attempt sends an identical copy, and
/// the counters accumulate over the whole call.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    num_attempts: u32,
    num_errors_by_type: HashMap<String, u32>,
}

impl Request {
    /// Request with zeroed counters.
    #[must_use]
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            url,
            headers,
            body,
            num_attempts: 0,
            num_errors_by_type: HashMap::new(),
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Attempts made so far, including retries.
    #[must_use]
    pub fn num_attempts(&self) -> u32 {
        self.num_attempts
    }

    /// Error counts keyed by error kind (the HTTP status code as text).
    #[must_use]
    pub fn num_errors_by_type(&self) -> &HashMap<String, u32> {
        &self.num_errors_by_type
    }

    #[must_use]
    pub fn num_errors_by_response_code(&self, code: u16) -> u32 {
        self.num_errors_by_type
            .get(&code.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn increment_errors_by_type(&mut self, kind: impl Into<String>) {
        *self.num_errors_by_type.entry(kind.into()).or_insert(0) += 1;
    }

    pub(crate) fn increment_attempts(&mut self) {
        self.num_attempts += 1;
    }

    /// Replace the bearer token for subsequent attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidHeaderValue`] if the token is not a valid header value.
    pub fn update_token(&mut self, token: &str) -> Result<(), ClientError> {
        self.headers.insert(AUTHORIZATION, bearer(token)?);
        Ok(())
    }

    /// Fresh `http::Request` for one attempt.
    pub(crate) fn to_http(&self) -> Result<http::Request<Full<Bytes>>, ClientError> {
        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }
        Ok(builder.body(Full::new(self.body.clone()))?)
    }
}

/// `Bearer {token}` marked sensitive.
pub(crate) fn bearer(token: &str) -> Result<HeaderValue, ClientError> {
    let mut value = HeaderValue::try_from(format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    struct UpperOnPut;

    impl MethodMarshaler for UpperOnPut {
        fn marshal_for(&self, method: &Method) -> Result<Bytes, BoxError> {
            if *method == Method::PUT {
                Ok(Bytes::from_static(b"PUT-BODY"))
            } else {
                Err("unsupported method".into())
            }
        }
    }

    fn url() -> Url {
        Url::parse("https://api.example.com/acme/x").unwrap()
    }

    #[test]
    fn test_counters_start_at_zero_and_accumulate() {
        let mut req = Request::new(Method::GET, url(), HeaderMap::new(), Bytes::new());
        assert_eq!(req.num_attempts(), 0);
        assert!(req.num_errors_by_type().is_empty());

        req.increment_attempts();
        req.increment_attempts();
        req.increment_errors_by_type("429");
        req.increment_errors_by_type("429");
        req.increment_errors_by_type("503");

        assert_eq!(req.num_attempts(), 2);
        assert_eq!(req.num_errors_by_response_code(429), 2);
        assert_eq!(req.num_errors_by_response_code(503), 1);
        assert_eq!(req.num_errors_by_response_code(500), 0);
    }

    #[test]
    fn test_update_token_is_sensitive() {
        let mut req = Request::new(Method::GET, url(), HeaderMap::new(), Bytes::new());
        req.update_token("abc").unwrap();

        let value = req.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(value, "Bearer abc");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_to_http_is_repeatable() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let req = Request::new(Method::POST, url(), headers, Bytes::from_static(b"{}"));

        let first = req.to_http().unwrap();
        let second = req.to_http().unwrap();

        assert_eq!(first.method(), Method::POST);
        assert_eq!(first.uri(), "https://api.example.com/acme/x");
        assert_eq!(second.headers().get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_body_encoding() {
        assert!(RequestBody::Empty.encode(&Method::GET).unwrap().is_empty());
        assert_eq!(
            RequestBody::from(b"raw".to_vec()).encode(&Method::POST).unwrap(),
            Bytes::from_static(b"raw")
        );
        assert_eq!(
            RequestBody::json(&serde_json::json!({"a": 1}))
                .unwrap()
                .encode(&Method::POST)
                .unwrap(),
            Bytes::from_static(br#"{"a":1}"#)
        );
        assert_eq!(
            RequestBody::marshaled(UpperOnPut).encode(&Method::PUT).unwrap(),
            Bytes::from_static(b"PUT-BODY")
        );
        assert!(matches!(
            RequestBody::marshaled(UpperOnPut).encode(&Method::POST),
            Err(ClientError::Marshal(_))
        ));
    }

    #[test]
    fn test_form_without_multipart_header_is_rejected() {
        let form = FormData::new("file", "a.txt", tokio::io::empty());
        let err = RequestBody::from(form).encode(&Method::POST).unwrap_err();
        assert!(err.to_string().starts_with("bad request of form data"));
    }

    #[test]
    fn test_multipart_detection() {
        let params = RequestParams::new(Method::POST, url()).header(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data"),
        );
        assert!(params.is_multipart());

        let json = RequestParams::new(Method::POST, url())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!json.is_multipart());
        assert!(!RequestParams::new(Method::GET, url()).is_multipart());
    }
}

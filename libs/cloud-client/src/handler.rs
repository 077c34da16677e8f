//! Hooks run by [`BaseClient::execute`] after every completed attempt.
//!
//! Handlers are tried in registration order. A handler may resubmit the
//! request through [`BaseClient::execute_attempt`]; the same [`Request`] is
//! passed along so attempt and error counters keep accumulating.

use async_trait::async_trait;

use crate::client::BaseClient;
use crate::error::ClientError;
use crate::request::Request;
use crate::response::HttpResponse;

/// Inspects or replaces the response of an attempt.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Return the response to pass on, or an error to stop the chain.
    ///
    /// # Errors
    ///
    /// Any error short-circuits the remaining handlers and reaches the caller.
    async fn handle_response(
        &self,
        client: &BaseClient,
        request: &mut Request,
        response: HttpResponse,
    ) -> Result<HttpResponse, ClientError>;

    /// Transport-error capability; handlers without one are skipped for failed attempts.
    fn error_handler(&self) -> Option<&dyn RequestErrorHandler> {
        None
    }
}

/// Reacts to attempts that failed before a response arrived.
#[async_trait]
pub trait RequestErrorHandler: Send + Sync {
    /// Recover from `error`, typically by retrying.
    ///
    /// # Errors
    ///
    /// Returning an error hands it to the next error-capable handler.
    async fn handle_request_error(
        &self,
        client: &BaseClient,
        request: &mut Request,
        error: ClientError,
    ) -> Result<HttpResponse, ClientError>;
}

/// Returns every response unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughHandler;

#[async_trait]
impl ResponseHandler for PassThroughHandler {
    async fn handle_response(
        &self,
        _client: &BaseClient,
        _request: &mut Request,
        response: HttpResponse,
    ) -> Result<HttpResponse, ClientError> {
        Ok(response)
    }
}

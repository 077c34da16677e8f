use async_trait::async_trait;

use crate::error::ClientError;
use crate::response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, error_preview};

/// Turns the final response of a call into a typed error where appropriate.
///
/// Invoked once per [`BaseClient::do_request`](crate::BaseClient::do_request),
/// after the handler chain has finished.
#[async_trait]
pub trait StatusTranslator: Send + Sync {
    /// # Errors
    ///
    /// Returns the error the response stands for.
    async fn translate(&self, response: HttpResponse) -> Result<HttpResponse, ClientError>;
}

/// Maps 4xx and 5xx responses to [`ClientError::HttpStatus`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusErrorTranslator;

#[async_trait]
impl StatusTranslator for StatusErrorTranslator {
    async fn translate(&self, response: HttpResponse) -> Result<HttpResponse, ClientError> {
        let status = response.status();
        if !(status.is_client_error() || status.is_server_error()) {
            return Ok(response);
        }

        let content_type = response.content_type().map(String::from);
        let preview_limit = response.max_body_size().min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = error_preview(response.into_inner(), preview_limit).await?;

        Err(ClientError::HttpStatus {
            status,
            body_preview,
            content_type,
        })
    }
}

//! Retry handlers for the response chain.
//!
//! Each handler keeps its own retry budget, separate from
//! [`Request::num_attempts`], and resubmits through
//! [`BaseClient::execute_attempt`] until the outcome is no longer retryable
//! or the budget is spent.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use rand::Rng;

use crate::client::BaseClient;
use crate::config::{Backoff, ConfigurableRetryConfig, DefaultRetryConfig, ExponentialBackoff};
use crate::error::ClientError;
use crate::handler::{RequestErrorHandler, ResponseHandler};
use crate::request::Request;
use crate::response::HttpResponse;

/// Retries rate-limited (429) responses at a fixed interval.
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryResponseHandler {
    config: DefaultRetryConfig,
}

impl DefaultRetryResponseHandler {
    #[must_use]
    pub fn new(config: DefaultRetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ResponseHandler for DefaultRetryResponseHandler {
    async fn handle_response(
        &self,
        client: &BaseClient,
        request: &mut Request,
        response: HttpResponse,
    ) -> Result<HttpResponse, ClientError> {
        let interval = self.config.interval;
        retry_loop(
            client,
            request,
            Ok(response),
            RetryPolicy {
                max_retries: self.config.max_retries,
                drain_limit: self.config.drain_limit,
                delay: &|_| interval,
                retryable: &|outcome| {
                    matches!(outcome, Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS)
                },
            },
        )
        .await
    }
}

/// Retries whatever the configured predicate accepts, on the configured schedule.
///
/// Handles both responses and transport errors.
#[derive(Debug, Clone)]
pub struct ConfigurableRetryResponseHandler {
    config: ConfigurableRetryConfig,
}

impl ConfigurableRetryResponseHandler {
    #[must_use]
    pub fn new(config: ConfigurableRetryConfig) -> Self {
        Self { config }
    }

    async fn run(
        &self,
        client: &BaseClient,
        request: &mut Request,
        outcome: Result<HttpResponse, ClientError>,
    ) -> Result<HttpResponse, ClientError> {
        let backoff = &self.config.backoff;
        retry_loop(
            client,
            request,
            outcome,
            RetryPolicy {
                max_retries: self.config.max_retries,
                drain_limit: self.config.drain_limit,
                delay: &|retry| backoff_delay(backoff, retry),
                retryable: &*self.config.retryable,
            },
        )
        .await
    }
}

#[async_trait]
impl ResponseHandler for ConfigurableRetryResponseHandler {
    async fn handle_response(
        &self,
        client: &BaseClient,
        request: &mut Request,
        response: HttpResponse,
    ) -> Result<HttpResponse, ClientError> {
        self.run(client, request, Ok(response)).await
    }

    fn error_handler(&self) -> Option<&dyn RequestErrorHandler> {
        Some(self)
    }
}

#[async_trait]
impl RequestErrorHandler for ConfigurableRetryResponseHandler {
    async fn handle_request_error(
        &self,
        client: &BaseClient,
        request: &mut Request,
        error: ClientError,
    ) -> Result<HttpResponse, ClientError> {
        self.run(client, request, Err(error)).await
    }
}

struct RetryPolicy<'a> {
    max_retries: u32,
    drain_limit: usize,
    delay: &'a (dyn Fn(u32) -> Duration + Send + Sync),
    retryable: &'a (dyn Fn(&Result<HttpResponse, ClientError>) -> bool + Send + Sync),
}

async fn retry_loop(
    client: &BaseClient,
    request: &mut Request,
    mut outcome: Result<HttpResponse, ClientError>,
    policy: RetryPolicy<'_>,
) -> Result<HttpResponse, ClientError> {
    let mut retries = 0u32;
    while (policy.retryable)(&outcome) {
        let reason = match &outcome {
            Ok(resp) => resp.status().as_str().to_owned(),
            Err(e) => e.to_string(),
        };
        if retries >= policy.max_retries {
            tracing::warn!(
                max_retries = policy.max_retries,
                attempts = request.num_attempts(),
                reason = %reason,
                "retry budget exhausted"
            );
            break;
        }

        let delay = (policy.delay)(retries);
        retries += 1;
        tracing::debug!(
            retry = retries,
            max_retries = policy.max_retries,
            reason = %reason,
            backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retrying request"
        );

        if let Ok(resp) = outcome {
            resp.drain(policy.drain_limit).await;
        }
        tokio::time::sleep(delay).await;
        outcome = client.execute_attempt(request).await;
    }
    outcome
}

fn backoff_delay(backoff: &Backoff, retry: u32) -> Duration {
    match backoff {
        Backoff::Fixed(delay) => *delay,
        Backoff::Exponential(exp) => calculate_backoff(exp, retry as usize),
    }
}

/// `min(initial * multiplier^retry, max)`, plus up to 25% jitter when enabled.
///
/// Non-finite or negative inputs are sanitized instead of panicking.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, retry: usize) -> Duration {
    // One day; anything beyond is not a meaningful retry delay
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let retry_i32 = i32::try_from(retry).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };

    let initial_secs = backoff.initial.as_secs_f64();
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base = initial_secs * multiplier.powi(retry_i32);
    let clamped = if base.is_finite() {
        base.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let jitter_factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(jitter_factor)
    } else {
        duration
    };

    duration.min(Duration::from_secs_f64(max_secs))
}

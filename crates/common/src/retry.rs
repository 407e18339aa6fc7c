//! Bounded retry for upstream calls
//!
//! Only `AppError::UpstreamUnavailable` is retried; every other error is
//! returned on the first attempt.

use crate::errors::{AppError, Result};
use backoff::{future::retry, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for a single upstream dependency
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff interval in milliseconds
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Upper bound for a single backoff interval
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Give up once this much time has elapsed
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_interval() -> u64 { 100 }
fn default_max_interval() -> u64 { 2_000 }
fn default_max_elapsed() -> u64 { 10_000 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            ..Self::default()
        }
    }
}

/// Run `operation` with exponential backoff on retryable errors
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(policy.initial_interval_ms))
        .with_max_interval(Duration::from_millis(policy.max_interval_ms))
        .with_max_elapsed_time(Some(Duration::from_millis(policy.max_elapsed_ms)))
        .build();

    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0u32;

    retry(backoff, || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && current < max_attempts => {
                    warn!(
                        operation = operation_name,
                        attempt = current,
                        max_attempts,
                        error = %e,
                        "Upstream call failed, retrying"
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

/// Convert a transport-level reqwest failure into the right error class
pub fn classify_http_error(service: &str, err: reqwest::Error) -> AppError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        AppError::upstream(service, err.to_string())
    } else {
        AppError::HttpClient(err)
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Every network call (upstream lookup, document fetch, archive listing,
//! archive upload) goes through [`retry`]. A response status decides
//! whether another attempt is made:
//!
//! - `404` is never retried. It comes back as [`RetryOutcome::NotFound`]
//!   so callers can treat it as an authoritative absence.
//! - Statuses in [`RetryConfig::retryable_statuses`] are retried, honoring
//!   any `Retry-After` hint (delta-seconds or HTTP-date).
//! - Everything else is returned to the caller as-is.
//!
//! # Example
//!
//! ```
//! use djen_backup::RetryConfig;
//!
//! // Proxy lookups also retry the proxy's transient 400s
//! let lookup = RetryConfig::query().also_retry(400);
//! assert!(lookup.is_retryable(400));
//! assert!(lookup.is_retryable(503));
//!
//! // 400 stays terminal by default
//! assert!(!RetryConfig::query().is_retryable(400));
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Status codes retried unless the caller says otherwise.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

const NOT_FOUND: u16 = 404;

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::query()`] - reads against the proxy or archive metadata
/// - [`RetryConfig::upload()`] - archive uploads (longer ceiling)
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Ceiling applied to server-provided `Retry-After` hints
    pub max_retry_after: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Four attempts, waiting 1s, 2s, 4s between them.
    #[must_use]
    pub fn query() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            factor: 2.0,
            max_attempts: 4,
            max_retry_after: Duration::from_secs(300),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    /// Uploads tolerate a longer backoff; the archive's S3 endpoint sheds
    /// load with 503 + Retry-After.
    #[must_use]
    pub fn upload() -> Self {
        Self {
            max_delay: Duration::from_secs(60),
            ..Self::query()
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            max_attempts: 3,
            max_retry_after: Duration::from_secs(300),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }

    /// Opt a normally-terminal status into the retryable set.
    ///
    /// `404` is an authoritative answer and cannot be opted in.
    #[must_use]
    pub fn also_retry(mut self, status: u16) -> Self {
        if status != NOT_FOUND && !self.retryable_statuses.contains(&status) {
            self.retryable_statuses.push(status);
        }
        self
    }

    #[must_use]
    pub fn is_retryable(&self, status: u16) -> bool {
        status != NOT_FOUND && self.retryable_statuses.contains(&status)
    }

    /// Computed backoff before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// A response the retry loop can inspect.
pub trait RetryableResponse {
    fn status_code(&self) -> u16;
    fn retry_after(&self) -> Option<String>;
}

/// A transport error the retry loop can classify.
pub trait RetryableError: std::fmt::Display {
    /// Connection resets, timeouts and similar network-level hiccups
    fn is_transient(&self) -> bool;
}

/// Terminal response from [`retry`].
#[derive(Debug)]
pub enum RetryOutcome<R> {
    /// Any non-retryable, non-404 response (including other 4xx)
    Completed(R),
    /// The server said the resource does not exist
    NotFound(R),
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt got a retryable status
    #[error("gave up after {attempts} attempts, last status {status}")]
    Exhausted { attempts: u32, status: u16 },

    /// Every attempt failed at the transport level
    #[error("gave up after {attempts} attempts: {last}")]
    TransportExhausted { attempts: u32, last: E },

    /// A transport error that retrying cannot fix
    #[error("request failed: {0}")]
    Fatal(E),
}

/// Parse a `Retry-After` header value.
///
/// Accepts delta-seconds (`"120"`, `"1.5"`) and HTTP-dates
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && (0.0..1e9).contains(&secs) {
            return Some(Duration::from_secs_f64(secs));
        }
        return None;
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Run `operation` until it produces a terminal response or attempts run out.
pub async fn retry<F, Fut, R, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<RetryOutcome<R>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: RetryableResponse,
    E: RetryableError,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(response) => {
                let status = response.status_code();
                if status == NOT_FOUND {
                    return Ok(RetryOutcome::NotFound(response));
                }
                if !config.is_retryable(status) {
                    if attempts > 1 {
                        info!(operation = operation_name, attempts, status, "Operation completed after retries");
                    }
                    return Ok(RetryOutcome::Completed(response));
                }
                if attempts >= max_attempts {
                    warn!(operation = operation_name, attempts, status, "Retries exhausted");
                    return Err(RetryError::Exhausted { attempts, status });
                }

                let hinted = response
                    .retry_after()
                    .and_then(|v| parse_retry_after(&v, Utc::now()))
                    .map(|d| d.min(config.max_retry_after));
                let wait = hinted.unwrap_or_else(|| config.delay_for(attempts - 1));

                crate::metrics::record_retry(operation_name, "status");
                warn!(
                    operation = operation_name,
                    status,
                    attempt = attempts,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    retry_after = hinted.is_some(),
                    "Retryable status, backing off"
                );
                sleep(wait).await;
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(RetryError::Fatal(err));
                }
                if attempts >= max_attempts {
                    warn!(operation = operation_name, attempts, error = %err, "Retries exhausted");
                    return Err(RetryError::TransportExhausted { attempts, last: err });
                }

                let wait = config.delay_for(attempts - 1);
                crate::metrics::record_retry(operation_name, "transport");
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts,
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "Transport error, backing off"
                );
                sleep(wait).await;
            }
        }
    }
}

impl RetryableResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn retry_after(&self) -> Option<String> {
        self.headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl RetryableError for reqwest::Error {
    fn is_transient(&self) -> bool {
        !self.is_builder() && (self.is_timeout() || self.is_connect() || self.is_request() || self.is_body())
    }
}

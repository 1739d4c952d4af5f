// src/error.rs
//! Error taxonomy shared by providers, the retry engine and the fetcher.
//!
//! Providers classify every failure as retryable or fatal at the call boundary;
//! cancellation is its own variant and never counts as a failure.

use std::time::Duration;

use crate::cancel::Cancelled;

/// Failure of a single provider call, already classified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Fatal(_))
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 429 is a rate-limit signal, 408/425 and 5xx are transient, every other
    /// status (auth failures, malformed requests, missing resources) is fatal.
    pub fn from_status(status: u16, retry_after: Option<Duration>, detail: &str) -> Self {
        match status {
            429 => ProviderError::RateLimited { retry_after },
            408 | 425 | 500..=599 => ProviderError::Transient(format!("HTTP {status}")),
            _ if detail.is_empty() => ProviderError::Fatal(format!("HTTP {status}")),
            _ => ProviderError::Fatal(format!("HTTP {status}: {detail}")),
        }
    }

    /// Classify a transport-level reqwest error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_builder() || err.is_redirect() {
            ProviderError::Fatal(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), None, "")
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}

/// Parse a `Retry-After` header value given in (possibly fractional) seconds.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Outcome of one acquisition task that did not produce a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("cancelled")]
    Cancelled,
    #[error("{provider} failed after {attempts} attempt(s): {last}")]
    External {
        provider: String,
        attempts: u32,
        /// `false` when the last error was fatal and retries were never tried.
        retryable: bool,
        #[source]
        last: ProviderError,
    },
    #[error("no provider registered for '{0}'")]
    UnknownProvider(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Number of provider calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::External { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            FetchError::External { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        FetchError::Cancelled
    }
}

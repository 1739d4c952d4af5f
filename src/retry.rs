// src/retry.rs
//! Retry/backoff engine around a single provider call.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{FetchError, ProviderError};
use crate::throttle::Throttle;

/// Per-task retry bookkeeping. Ephemeral: one per acquisition task execution.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay, in `[0.0, 1.0]`.
    pub jitter: f64,
    /// Timeout applied to each individual call.
    pub call_timeout: Duration,
    slept: Vec<Duration>,
}

impl RetryContext {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: 0.25,
            call_timeout: Duration::from_secs(15),
            slept: Vec::new(),
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Backoff delays actually slept so far, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.slept
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay before the next attempt: exponential in the attempt number, at
    /// least the provider's throttle delay and any server hint, plus jitter,
    /// clamped to `max_delay` and never shorter than the previous delay.
    fn next_delay(&mut self, throttle_delay: Duration, hint: Option<Duration>) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << self.attempt.saturating_sub(1).min(16));
        let mut d = exp.max(throttle_delay).max(hint.unwrap_or(Duration::ZERO));
        if self.jitter > 0.0 && !d.is_zero() {
            let extra = rand::rng().random_range(0.0..=self.jitter);
            d += d.mul_f64(extra);
        }
        d = d.min(self.max_delay);
        if let Some(prev) = self.slept.last() {
            d = d.max(*prev);
        }
        self.slept.push(d);
        d
    }
}

/// Run `call` until it succeeds, fails fatally, runs out of attempts, or the
/// token fires.
///
/// Before every attempt the token is checked and the provider's pacing gate
/// is awaited. Retryable failures feed the throttle and back off; fatal ones
/// return immediately after a single attempt.
pub async fn run_with_retry<T, F, Fut>(
    provider: &str,
    ctx: &mut RetryContext,
    throttle: &Throttle,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    loop {
        cancel.check()?;
        throttle.pace(provider, cancel).await?;

        ctx.attempt += 1;
        counter!("fetch_provider_attempts_total", "provider" => provider.to_string()).increment(1);

        // An in-flight call is abandoned as soon as the token fires.
        let outcome = tokio::select! {
            res = tokio::time::timeout(ctx.call_timeout, call()) => match res {
                Ok(res) => res,
                Err(_) => Err(ProviderError::Timeout),
            },
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let err = match outcome {
            Ok(value) => {
                throttle.record_success(provider);
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(target: "retry", provider, attempt = ctx.attempt, error = %err, "fatal provider error");
            return Err(FetchError::External {
                provider: provider.to_string(),
                attempts: ctx.attempt,
                retryable: false,
                last: err,
            });
        }

        throttle.record_failure(provider, err.retry_after());
        if ctx.exhausted() {
            warn!(target: "retry", provider, attempts = ctx.attempt, error = %err, "retries exhausted");
            return Err(FetchError::External {
                provider: provider.to_string(),
                attempts: ctx.attempt,
                retryable: true,
                last: err,
            });
        }

        let delay = ctx.next_delay(throttle.current_delay(provider), err.retry_after());
        debug!(
            target: "retry",
            provider,
            attempt = ctx.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after backoff"
        );
        cancel.sleep(delay).await?;
    }
}

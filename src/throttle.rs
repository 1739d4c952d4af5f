// src/throttle.rs
//! Per-provider adaptive throttle.
//!
//! Each provider gets its own slot: a counter block (delay, consecutive
//! failures, last success) behind a `std::sync::Mutex`, and a pacing gate behind
//! a `tokio::sync::Mutex` that spaces request issue times. Locks are never held
//! across a provider call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::cancel::{CancellationToken, Cancelled};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottlePolicy {
    /// Minimum spacing between two requests to the provider.
    pub base_delay: Duration,
    /// Smallest delay after a failure, used when `base_delay` is zero.
    pub backoff_floor: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::ZERO,
            backoff_floor: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl ThrottlePolicy {
    fn sanitized(mut self) -> Self {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 2.0;
        }
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleSnapshot {
    pub delay: Duration,
    pub consecutive_failures: u32,
    pub last_success: Option<Instant>,
}

#[derive(Debug)]
struct ProviderSlot {
    policy: ThrottlePolicy,
    counters: Mutex<ThrottleSnapshot>,
    last_issue: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl ProviderSlot {
    fn new(policy: ThrottlePolicy) -> Self {
        let policy = policy.sanitized();
        Self {
            policy,
            counters: Mutex::new(ThrottleSnapshot {
                delay: policy.base_delay,
                consecutive_failures: 0,
                last_success: None,
            }),
            last_issue: tokio::sync::Mutex::new(None),
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, ThrottleSnapshot> {
        match self.counters.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

/// Process-lifetime throttle registry, shared by reference (`Arc<Throttle>`).
#[derive(Debug, Default)]
pub struct Throttle {
    default_policy: ThrottlePolicy,
    slots: RwLock<HashMap<String, Arc<ProviderSlot>>>,
}

impl Throttle {
    pub fn new(default_policy: ThrottlePolicy) -> Self {
        Self {
            default_policy,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Install (or replace) the policy for a provider; resets its counters.
    pub fn configure(&self, provider: &str, policy: ThrottlePolicy) {
        let mut slots = match self.slots.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        slots.insert(provider.to_string(), Arc::new(ProviderSlot::new(policy)));
    }

    fn slot(&self, provider: &str) -> Arc<ProviderSlot> {
        {
            let slots = match self.slots.read() {
                Ok(g) => g,
                Err(poison) => poison.into_inner(),
            };
            if let Some(s) = slots.get(provider) {
                return s.clone();
            }
        }
        let mut slots = match self.slots.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        slots
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(ProviderSlot::new(self.default_policy)))
            .clone()
    }

    pub fn policy(&self, provider: &str) -> ThrottlePolicy {
        self.slot(provider).policy
    }

    /// Reset the failure streak and let the delay decay back toward the base.
    pub fn record_success(&self, provider: &str) {
        let slot = self.slot(provider);
        let p = slot.policy;
        let mut c = slot.counters();
        c.consecutive_failures = 0;
        c.delay = c.delay.div_f64(p.multiplier).max(p.base_delay);
        c.last_success = Some(Instant::now());
    }

    /// Grow the delay multiplicatively (never below `hint`), clamped to the
    /// policy maximum. Returns the new delay.
    pub fn record_failure(&self, provider: &str, hint: Option<Duration>) -> Duration {
        let slot = self.slot(provider);
        let p = slot.policy;
        let mut c = slot.counters();
        c.consecutive_failures = c.consecutive_failures.saturating_add(1);
        let grown = c
            .delay
            .mul_f64(p.multiplier)
            .max(p.backoff_floor)
            .max(hint.unwrap_or(Duration::ZERO));
        c.delay = grown.min(p.max_delay);
        tracing::debug!(
            target: "throttle",
            provider,
            failures = c.consecutive_failures,
            delay_ms = c.delay.as_millis() as u64,
            "provider delay raised"
        );
        c.delay
    }

    pub fn current_delay(&self, provider: &str) -> Duration {
        self.slot(provider).counters().delay
    }

    pub fn snapshot(&self, provider: &str) -> ThrottleSnapshot {
        self.slot(provider).counters().clone()
    }

    /// Wait until `current_delay` has elapsed since the previous request issue
    /// to this provider. Callers queue on the gate, so spacing holds in issue order.
    pub async fn pace(&self, provider: &str, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let slot = self.slot(provider);
        let mut last = slot.last_issue.lock().await;
        cancel.check()?;
        let gap = slot.counters().delay;
        if let Some(prev) = *last {
            let ready_at = prev + gap;
            let now = tokio::time::Instant::now();
            if ready_at > now {
                cancel.sleep(ready_at - now).await?;
            }
        }
        *last = Some(tokio::time::Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ThrottlePolicy {
        ThrottlePolicy {
            base_delay: Duration::from_millis(200),
            backoff_floor: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        }
    }

    #[test]
    fn failure_grows_and_clamps() {
        let t = Throttle::new(policy());
        assert_eq!(t.current_delay("brave"), Duration::from_millis(200));
        assert_eq!(t.record_failure("brave", None), Duration::from_secs(1));
        assert_eq!(t.record_failure("brave", None), Duration::from_secs(2));
        assert_eq!(t.record_failure("brave", None), Duration::from_secs(4));
        assert_eq!(t.record_failure("brave", None), Duration::from_secs(4));
        assert_eq!(t.snapshot("brave").consecutive_failures, 4);
    }

    #[test]
    fn retry_after_hint_raises_delay() {
        let t = Throttle::new(policy());
        let d = t.record_failure("brave", Some(Duration::from_secs(2)));
        assert!(d >= Duration::from_secs(2));
        let d = t.record_failure("semantic", Some(Duration::from_secs(30)));
        assert_eq!(d, Duration::from_secs(4));
    }

    #[test]
    fn success_resets_failures_and_decays() {
        let t = Throttle::new(policy());
        t.record_failure("brave", None);
        t.record_failure("brave", None);
        t.record_success("brave");
        let s = t.snapshot("brave");
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.delay, Duration::from_secs(1));
        assert!(s.last_success.is_some());
        t.record_success("brave");
        t.record_success("brave");
        t.record_success("brave");
        assert_eq!(t.current_delay("brave"), Duration::from_millis(200));
    }

    #[test]
    fn providers_are_independent() {
        let t = Throttle::new(policy());
        t.record_failure("brave", None);
        assert_eq!(t.snapshot("semantic_scholar").consecutive_failures, 0);
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let t = Arc::new(Throttle::new(policy()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.record_failure("brave", None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.snapshot("brave").consecutive_failures, 800);
    }

    #[tokio::test(start_paused = true)]
    async fn pace_spaces_requests() {
        let t = Throttle::new(policy());
        let cancel = CancellationToken::never();
        let t0 = tokio::time::Instant::now();
        t.pace("brave", &cancel).await.unwrap();
        t.pace("brave", &cancel).await.unwrap();
        t.pace("brave", &cancel).await.unwrap();
        assert!(t0.elapsed() >= Duration::from_millis(400));
    }
}

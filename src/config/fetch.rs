// src/config/fetch.rs
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CachePolicy;
use crate::retry::RetryContext;
use crate::throttle::ThrottlePolicy;

/// Knobs for one provider family (search, academic metadata, page fetch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Minimum spacing between two requests to the provider.
    pub query_delay_ms: u64,
    /// First backoff step; doubles per retry.
    pub base_backoff_ms: u64,
    pub max_delay_ms: u64,
    /// Per-call timeout (classified retryable).
    pub timeout_ms: u64,
    /// Jitter as a fraction of the backoff delay.
    pub jitter: f64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::web()
    }
}

impl ProviderSettings {
    pub fn brave() -> Self {
        Self {
            max_retries: 3,
            query_delay_ms: 200,
            base_backoff_ms: 1_000,
            max_delay_ms: 4_000,
            timeout_ms: 15_000,
            jitter: 0.5,
        }
    }

    pub fn semantic_scholar() -> Self {
        Self {
            max_retries: 5,
            query_delay_ms: 400,
            base_backoff_ms: 2_000,
            max_delay_ms: 8_000,
            timeout_ms: 20_000,
            jitter: 0.375,
        }
    }

    pub fn web() -> Self {
        Self {
            max_retries: 2,
            query_delay_ms: 0,
            base_backoff_ms: 1_000,
            max_delay_ms: 4_000,
            timeout_ms: 15_000,
            jitter: 0.25,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.query_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            base_delay: self.query_delay(),
            backoff_floor: Duration::from_millis(self.base_backoff_ms),
            max_delay: self.max_delay(),
            multiplier: 2.0,
        }
    }

    pub fn retry_context(&self) -> RetryContext {
        RetryContext::new(
            self.max_attempts(),
            Duration::from_millis(self.base_backoff_ms),
            self.max_delay(),
        )
        .with_jitter(self.jitter)
        .with_call_timeout(self.timeout())
    }

    pub(crate) fn sanitize(&mut self) {
        self.max_retries = self.max_retries.min(10);
        if self.max_delay_ms < self.query_delay_ms {
            self.max_delay_ms = self.query_delay_ms;
        }
        if self.max_delay_ms < self.base_backoff_ms {
            self.max_delay_ms = self.base_backoff_ms;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = 15_000;
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            self.jitter = 0.25;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub ttl_secs: u64,
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("cache/fetch"),
            ttl_secs: 24 * 3600,
            max_bytes: 200 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy::new(Duration::from_secs(self.ttl_secs), self.max_bytes)
    }
}

/// Everything the acquisition pipeline needs, one knob set per provider family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub cache: CacheConfig,
    /// Global ceiling on in-flight fetch executions.
    pub concurrency: usize,
    /// How often long sleeps re-check cancellation.
    pub cancel_poll_ms: u64,
    pub user_agent: String,
    /// Academic papers below this citation count are dropped.
    pub min_citation_count: u64,
    pub max_results_per_query: usize,
    /// Byte budget of one sanitized excerpt.
    pub max_record_bytes: usize,
    /// Optional TOML file with extra directive patterns.
    pub directive_rules_path: Option<PathBuf>,
    pub brave: ProviderSettings,
    pub semantic_scholar: ProviderSettings,
    pub web: ProviderSettings,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            concurrency: 5,
            cancel_poll_ms: 25,
            user_agent: "Mozilla/5.0 (compatible; DeepResearchBot/1.0)".to_string(),
            min_citation_count: 3,
            max_results_per_query: 10,
            max_record_bytes: 8_000,
            directive_rules_path: None,
            brave: ProviderSettings::brave(),
            semantic_scholar: ProviderSettings::semantic_scholar(),
            web: ProviderSettings::web(),
        }
    }
}

impl FetchConfig {
    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    /// Clamp values into workable ranges instead of failing the run.
    pub fn sanitize(&mut self) {
        self.concurrency = self.concurrency.clamp(1, 64);
        self.cancel_poll_ms = self.cancel_poll_ms.clamp(1, 1_000);
        self.max_results_per_query = self.max_results_per_query.clamp(1, 100);
        if self.max_record_bytes < 256 {
            self.max_record_bytes = 256;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = FetchConfig::default().user_agent;
        }
        self.brave.sanitize();
        self.semantic_scholar.sanitize();
        self.web.sanitize();
    }
}

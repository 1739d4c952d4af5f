// src/fetch/mod.rs
//! Bounded fetcher: runs acquisition tasks through cache → retry engine →
//! sanitizer with at most N executions in flight.
//!
//! The window slides: a new task starts as soon as any running one finishes,
//! so one slow provider does not hold a whole batch hostage. All executions
//! are driven from the calling task (`FuturesUnordered`), never spawned.

pub mod providers;
pub mod types;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::cancel::CancellationToken;
use crate::config::ProviderSettings;
use crate::error::FetchError;
use crate::metrics::ensure_metrics_described;
use crate::retry::run_with_retry;
use crate::sanitize::{SanitizedRecord, Sanitizer};
use crate::throttle::Throttle;

pub use types::{AcquisitionTask, Payload, Provider};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// A task that could not be completed, with its classified cause.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task: AcquisitionTask,
    pub error: FetchError,
}

impl TaskFailure {
    pub fn attempts(&self) -> u32 {
        self.error.attempts()
    }
}

/// Raw payload delivered for one task.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub task: AcquisitionTask,
    pub payload: Payload,
    pub from_cache: bool,
}

/// What a fetch round produced. Items are in arrival order, not request
/// order; correlate them by task identifier.
#[derive(Debug, Clone)]
pub struct FetchReport<T> {
    pub items: Vec<T>,
    pub failures: Vec<TaskFailure>,
    /// The token fired before the round finished.
    pub cancelled: bool,
    pub cache_hits: usize,
    /// Delivered but dropped by the mapping step (unsupported or empty content).
    pub filtered: usize,
    /// Tasks never started or abandoned in flight because of cancellation.
    pub not_started: usize,
}

impl<T> Default for FetchReport<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
            cache_hits: 0,
            filtered: 0,
            not_started: 0,
        }
    }
}

impl<T> FetchReport<T> {
    pub fn failed_providers(&self) -> BTreeSet<&str> {
        self.failures.iter().map(|f| f.task.provider.as_str()).collect()
    }

    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

struct Registered {
    provider: Arc<dyn Provider>,
    settings: ProviderSettings,
}

pub struct Fetcher {
    providers: HashMap<String, Registered>,
    cache: Option<Arc<dyn CacheStore>>,
    throttle: Arc<Throttle>,
    sanitizer: Arc<Sanitizer>,
    concurrency: usize,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("cache", &self.cache.is_some())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Fetcher {
    pub fn new(throttle: Arc<Throttle>, sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            providers: HashMap::new(),
            cache: None,
            throttle,
            sanitizer,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_concurrency(mut self, ceiling: usize) -> Self {
        self.concurrency = ceiling.max(1);
        self
    }

    /// Register a provider under its `name()` and install its throttle policy.
    pub fn register(mut self, provider: Arc<dyn Provider>, settings: ProviderSettings) -> Self {
        let name = provider.name().to_string();
        self.throttle.configure(&name, settings.throttle_policy());
        self.providers
            .insert(name, Registered { provider, settings });
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Fetch raw payloads (cache first, then provider with retries).
    pub async fn acquire(
        &self,
        tasks: Vec<AcquisitionTask>,
        cancel: &CancellationToken,
    ) -> FetchReport<Acquired> {
        self.run_window(tasks, cancel, Some).await
    }

    /// Fetch and sanitize: one record per successful, non-empty source.
    pub async fn fetch(
        &self,
        tasks: Vec<AcquisitionTask>,
        cancel: &CancellationToken,
    ) -> FetchReport<SanitizedRecord> {
        let sanitizer = self.sanitizer.clone();
        self.run_window(tasks, cancel, move |a: Acquired| {
            sanitizer.record(&a.task, &a.payload, a.from_cache)
        })
        .await
    }

    async fn run_window<T, M>(
        &self,
        tasks: Vec<AcquisitionTask>,
        cancel: &CancellationToken,
        map: M,
    ) -> FetchReport<T>
    where
        M: Fn(Acquired) -> Option<T>,
    {
        ensure_metrics_described();
        let mut report = FetchReport::default();
        let mut pending = tasks.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.concurrency && !cancel.is_cancelled() {
                match pending.next() {
                    Some(task) => in_flight.push(self.execute(task, cancel)),
                    None => break,
                }
            }

            let Some((task, outcome)) = in_flight.next().await else {
                break;
            };
            // Anything completing after the signal is discarded.
            if cancel.is_cancelled() {
                report.not_started += 1;
                break;
            }

            match outcome {
                Ok((payload, from_cache)) => {
                    if from_cache {
                        report.cache_hits += 1;
                    }
                    match map(Acquired {
                        task,
                        payload,
                        from_cache,
                    }) {
                        Some(item) => report.items.push(item),
                        None => report.filtered += 1,
                    }
                }
                Err(FetchError::Cancelled) => {
                    report.not_started += 1;
                    break;
                }
                Err(error) => {
                    counter!("fetch_task_failures_total", "provider" => task.provider.clone())
                        .increment(1);
                    warn!(
                        target: "fetch",
                        provider = %task.provider,
                        identifier = %task.identifier,
                        attempts = error.attempts(),
                        error = %error,
                        "task failed"
                    );
                    report.failures.push(TaskFailure { task, error });
                }
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            report.not_started += in_flight.len() + pending.len();
            counter!("fetch_cancelled_total").increment(1);
            info!(
                target: "fetch",
                delivered = report.items.len(),
                not_started = report.not_started,
                "fetch round cancelled; returning partial results"
            );
        }
        report
    }

    /// One task: cancellation check, cache lookup, retried provider call, cache store.
    async fn execute(
        &self,
        task: AcquisitionTask,
        cancel: &CancellationToken,
    ) -> (AcquisitionTask, Result<(Payload, bool), FetchError>) {
        let started = Instant::now();
        let outcome = self.execute_inner(&task, cancel).await;
        histogram!("fetch_task_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("fetch_tasks_total").increment(1);
        (task, outcome)
    }

    async fn execute_inner(
        &self,
        task: &AcquisitionTask,
        cancel: &CancellationToken,
    ) -> Result<(Payload, bool), FetchError> {
        cancel.check()?;
        let registered = self
            .providers
            .get(&task.provider)
            .ok_or_else(|| FetchError::UnknownProvider(task.provider.clone()))?;

        let key = task.cache_key();
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&key) {
                counter!("fetch_cache_hits_total").increment(1);
                debug!(target: "fetch", identifier = %task.identifier, "cache hit");
                return Ok((Payload::new(entry.payload, entry.content_type), true));
            }
        }
        cancel.check()?;

        let mut ctx = registered.settings.retry_context();
        let provider = registered.provider.as_ref();
        let payload = run_with_retry(&task.provider, &mut ctx, &self.throttle, cancel, || {
            provider.fetch(task)
        })
        .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, &payload.content_type, &payload.bytes) {
                warn!(target: "cache", identifier = %task.identifier, error = %e, "cache write failed; continuing");
            }
        }
        Ok((payload, false))
    }
}

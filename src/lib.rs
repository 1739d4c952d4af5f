// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod atomic;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod sanitize;
pub mod throttle;

// ---- Re-exports for stable public API ----
pub use crate::cache::{CacheEntry, CacheKey, CachePolicy, CacheStore};
pub use crate::cancel::{CancellationToken, Cancelled};
pub use crate::error::{FetchError, ProviderError};
pub use crate::fetch::{AcquisitionTask, FetchReport, Fetcher, Payload, Provider, TaskFailure};
pub use crate::pipeline::{Pipeline, PipelineResult, ResearchRequest, RunStatus};
pub use crate::sanitize::{SanitizedRecord, Sanitizer};
pub use crate::throttle::{Throttle, ThrottlePolicy};

// src/cache/mod.rs
//! Response cache: content-addressed entries with TTL expiry and a total-size
//! budget enforced by oldest-first eviction.
//!
//! The cache only ever saves latency and provider load. Every fault degrades
//! to a miss, and purging it never changes pipeline results.

pub mod disk;
mod index;
pub mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 (hex) of a normalized request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_identifier(identifier: &str) -> Self {
        let digest = Sha256::digest(identifier.as_bytes());
        let mut hex = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut hex, "{:02x}", b);
        }
        CacheKey(hex)
    }

    /// Accepts only what [`CacheKey::for_identifier`] produces (64 lowercase hex chars).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let ok = hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        ok.then(|| CacheKey(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub stored_at_ms: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_bytes: u64,
}

impl CachePolicy {
    pub fn new(ttl: Duration, max_bytes: u64) -> Self {
        Self { ttl, max_bytes }
    }

    /// Age strictly greater than the TTL means expired.
    pub fn is_expired(&self, stored_at_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(stored_at_ms) > self.ttl.as_millis() as u64
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
    pub remaining_entries: usize,
    pub remaining_bytes: u64,
}

/// Key-value store contract shared by the disk cache and the in-memory fake.
pub trait CacheStore: Send + Sync {
    /// Fresh entry for `key`, or `None` on miss, expiry or any read fault.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    /// Store `payload`, then evict oldest entries while over the byte budget.
    fn put(&self, key: &CacheKey, content_type: &str, payload: &[u8]) -> io::Result<()>;
    /// Drop every entry. Returns how many were removed.
    fn purge(&self) -> io::Result<usize>;
    /// Drop expired entries and enforce the byte budget; fresh entries stay.
    fn cleanup(&self) -> io::Result<CleanupReport>;
    fn total_bytes(&self) -> u64;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wall-clock source in unix milliseconds; swappable for tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Hand-driven clock for deterministic TTL tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_hex() {
        let a = CacheKey::for_identifier("web:https://example.com/a");
        let b = CacheKey::for_identifier("web:https://example.com/a");
        let c = CacheKey::for_identifier("web:https://example.com/b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(CacheKey::from_hex(a.as_str()), Some(a));
        assert_eq!(CacheKey::from_hex("../etc/passwd"), None);
    }

    #[test]
    fn ttl_boundary() {
        let p = CachePolicy::new(Duration::from_secs(60), 1024);
        assert!(!p.is_expired(0, 60_000));
        assert!(p.is_expired(0, 61_000));
    }
}

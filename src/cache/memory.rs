// src/cache/memory.rs
//! In-memory store with the same TTL and eviction policy as [`super::DiskCache`].
//! Used in tests and when the disk cache directory is unavailable.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::index::{CacheIndex, IndexEntry};
use super::{CacheEntry, CacheKey, CachePolicy, CacheStore, CleanupReport, Clock, SystemClock};

#[derive(Default)]
struct Inner {
    index: CacheIndex,
    data: HashMap<CacheKey, CacheEntry>,
}

pub struct MemoryCache {
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: CachePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let mut g = self.inner();
        let meta = g.index.get(key)?;
        if self.policy.is_expired(meta.stored_at_ms, now) {
            g.index.remove(key);
            g.data.remove(key);
            return None;
        }
        g.data.get(key).cloned()
    }

    fn put(&self, key: &CacheKey, content_type: &str, payload: &[u8]) -> io::Result<()> {
        let stored_at_ms = self.clock.now_ms();
        let entry = CacheEntry {
            key: key.clone(),
            payload: payload.to_vec(),
            content_type: content_type.to_string(),
            stored_at_ms,
            size: payload.len() as u64,
        };
        let mut g = self.inner();
        g.index.insert(
            key.clone(),
            IndexEntry {
                stored_at_ms,
                size: entry.size,
            },
        );
        g.data.insert(key.clone(), entry);
        let victims = g.index.take_over_budget(self.policy.max_bytes, Some(key));
        for v in &victims {
            g.data.remove(v);
        }
        Ok(())
    }

    fn purge(&self) -> io::Result<usize> {
        let mut g = self.inner();
        g.data.clear();
        Ok(g.index.clear())
    }

    fn cleanup(&self) -> io::Result<CleanupReport> {
        let now = self.clock.now_ms();
        let mut g = self.inner();
        let expired = g.index.take_expired(&self.policy, now);
        let evicted = g.index.take_over_budget(self.policy.max_bytes, None);
        for k in expired.iter().chain(evicted.iter()) {
            g.data.remove(k);
        }
        Ok(CleanupReport {
            expired: expired.len(),
            evicted: evicted.len(),
            remaining_entries: g.index.len(),
            remaining_bytes: g.index.total(),
        })
    }

    fn total_bytes(&self) -> u64 {
        self.inner().index.total()
    }

    fn len(&self) -> usize {
        self.inner().index.len()
    }
}

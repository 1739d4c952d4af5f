// src/cache/index.rs
// Bookkeeping shared by both cache stores: sizes, ages, eviction order.

use std::collections::HashMap;

use super::{CacheKey, CachePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub stored_at_ms: u64,
    pub size: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CacheIndex {
    entries: HashMap<CacheKey, IndexEntry>,
    total: u64,
}

impl CacheIndex {
    pub fn get(&self, key: &CacheKey) -> Option<IndexEntry> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: CacheKey, entry: IndexEntry) {
        if let Some(old) = self.entries.insert(key, entry) {
            self.total = self.total.saturating_sub(old.size);
        }
        self.total = self.total.saturating_add(entry.size);
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let old = self.entries.remove(key)?;
        self.total = self.total.saturating_sub(old.size);
        Some(old)
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.total = 0;
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Remove and return every entry older than the TTL.
    pub fn take_expired(&mut self, policy: &CachePolicy, now_ms: u64) -> Vec<CacheKey> {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| policy.is_expired(e.stored_at_ms, now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.remove(k);
        }
        expired
    }

    /// Remove oldest entries until the total fits the budget. `keep` is never
    /// chosen, so a single oversized entry may exceed the budget on its own.
    pub fn take_over_budget(&mut self, max_bytes: u64, keep: Option<&CacheKey>) -> Vec<CacheKey> {
        if self.total <= max_bytes {
            return Vec::new();
        }
        let mut by_age: Vec<(u64, CacheKey)> = self
            .entries
            .iter()
            .filter(|(k, _)| Some(*k) != keep)
            .map(|(k, e)| (e.stored_at_ms, k.clone()))
            .collect();
        by_age.sort();

        let mut victims = Vec::new();
        for (_, key) in by_age {
            if self.total <= max_bytes {
                break;
            }
            self.remove(&key);
            victims.push(key);
        }
        victims
    }
}

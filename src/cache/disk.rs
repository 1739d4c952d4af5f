// src/cache/disk.rs
//! On-disk cache. One file per entry: a JSON header line followed by the raw
//! payload bytes. Files are written through the atomic writer, so a concurrent
//! reader sees a whole entry or none at all.

use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::index::{CacheIndex, IndexEntry};
use super::{CacheEntry, CacheKey, CachePolicy, CacheStore, CleanupReport, Clock, SystemClock};
use crate::atomic::write_atomic;

const ENTRY_EXT: &str = "entry";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    v: u32,
    key: String,
    content_type: String,
    stored_at_ms: u64,
    size: u64,
}

pub struct DiskCache {
    dir: PathBuf,
    policy: CachePolicy,
    clock: Arc<dyn Clock>,
    index: Mutex<CacheIndex>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("policy", &self.policy)
            .finish()
    }
}

impl DiskCache {
    pub fn open(dir: impl Into<PathBuf>, policy: CachePolicy) -> io::Result<Self> {
        Self::with_clock(dir, policy, Arc::new(SystemClock))
    }

    /// Open (creating if needed) and index whatever valid entries are on disk.
    /// Unreadable files and leftover temp files are removed.
    pub fn with_clock(
        dir: impl Into<PathBuf>,
        policy: CachePolicy,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut index = CacheIndex::default();
        for item in fs::read_dir(&dir)? {
            let path = item?.path();
            if is_temp_file(&path) {
                let _ = fs::remove_file(&path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match read_header(&path) {
                Ok((key, header)) => index.insert(
                    key,
                    IndexEntry {
                        stored_at_ms: header.stored_at_ms,
                        size: header.size,
                    },
                ),
                Err(e) => {
                    warn!(target: "cache", path = %path.display(), error = %e, "dropping unreadable cache entry");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        debug!(target: "cache", dir = %dir.display(), entries = index.len(), bytes = index.total(), "disk cache opened");
        Ok(Self {
            dir,
            policy,
            clock,
            index: Mutex::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXT}", key.as_str()))
    }

    fn index(&self) -> MutexGuard<'_, CacheIndex> {
        match self.index.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn remove_files(&self, keys: &[CacheKey]) {
        for k in keys {
            if let Err(e) = fs::remove_file(self.entry_path(k)) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(target: "cache", key = k.as_str(), error = %e, "failed to remove cache file");
                }
            }
        }
    }

    fn read_entry(&self, key: &CacheKey) -> io::Result<CacheEntry> {
        let mut reader = BufReader::new(fs::File::open(self.entry_path(key))?);
        let (file_key, header) = parse_header(&mut reader)?;
        if &file_key != key {
            return Err(invalid("key mismatch"));
        }
        let mut payload = Vec::with_capacity(header.size as usize);
        reader.read_to_end(&mut payload)?;
        if payload.len() as u64 != header.size {
            return Err(invalid("payload size mismatch"));
        }
        Ok(CacheEntry {
            key: file_key,
            payload,
            content_type: header.content_type,
            stored_at_ms: header.stored_at_ms,
            size: header.size,
        })
    }
}

impl CacheStore for DiskCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        {
            let mut idx = self.index();
            let meta = idx.get(key)?;
            if self.policy.is_expired(meta.stored_at_ms, now) {
                idx.remove(key);
                drop(idx);
                self.remove_files(std::slice::from_ref(key));
                debug!(target: "cache", key = key.as_str(), "expired on read");
                return None;
            }
        }
        match self.read_entry(key) {
            // The file may have been replaced since the index check; trust the header.
            Ok(entry) if !self.policy.is_expired(entry.stored_at_ms, now) => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(target: "cache", key = key.as_str(), error = %e, "cache read failed; treating as miss");
                let mut idx = self.index();
                idx.remove(key);
                drop(idx);
                self.remove_files(std::slice::from_ref(key));
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, content_type: &str, payload: &[u8]) -> io::Result<()> {
        let stored_at_ms = self.clock.now_ms();
        let header = EntryHeader {
            v: FORMAT_VERSION,
            key: key.as_str().to_string(),
            content_type: content_type.to_string(),
            stored_at_ms,
            size: payload.len() as u64,
        };
        let mut bytes = serde_json::to_vec(&header).map_err(|e| invalid(&e.to_string()))?;
        bytes.push(b'\n');
        bytes.extend_from_slice(payload);

        write_atomic(&self.entry_path(key), &bytes).map_err(|e| io::Error::other(e.to_string()))?;

        let mut idx = self.index();
        idx.insert(
            key.clone(),
            IndexEntry {
                stored_at_ms,
                size: payload.len() as u64,
            },
        );
        let victims = idx.take_over_budget(self.policy.max_bytes, Some(key));
        self.remove_files(&victims);
        drop(idx);

        if !victims.is_empty() {
            counter!("cache_evictions_total").increment(victims.len() as u64);
            debug!(target: "cache", evicted = victims.len(), "evicted to fit byte budget");
        }
        Ok(())
    }

    fn purge(&self) -> io::Result<usize> {
        let mut idx = self.index();
        idx.clear();
        let mut removed = 0usize;
        for item in fs::read_dir(&self.dir)? {
            let path = item?.path();
            let is_entry = path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT);
            if is_entry || is_temp_file(&path) {
                fs::remove_file(&path)?;
                if is_entry {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn cleanup(&self) -> io::Result<CleanupReport> {
        let now = self.clock.now_ms();
        let mut idx = self.index();
        let expired = idx.take_expired(&self.policy, now);
        let evicted = idx.take_over_budget(self.policy.max_bytes, None);
        self.remove_files(&expired);
        self.remove_files(&evicted);
        counter!("cache_evictions_total").increment((expired.len() + evicted.len()) as u64);
        Ok(CleanupReport {
            expired: expired.len(),
            evicted: evicted.len(),
            remaining_entries: idx.len(),
            remaining_bytes: idx.total(),
        })
    }

    fn total_bytes(&self) -> u64 {
        self.index().total()
    }

    fn len(&self) -> usize {
        self.index().len()
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("tmp")
}

fn read_header(path: &Path) -> io::Result<(CacheKey, EntryHeader)> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    parse_header(&mut reader)
}

fn parse_header(reader: &mut impl BufRead) -> io::Result<(CacheKey, EntryHeader)> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    if line.last() != Some(&b'\n') {
        return Err(invalid("missing header terminator"));
    }
    let header: EntryHeader =
        serde_json::from_slice(&line[..line.len() - 1]).map_err(|e| invalid(&e.to_string()))?;
    if header.v != FORMAT_VERSION {
        return Err(invalid("unsupported entry version"));
    }
    let key = CacheKey::from_hex(&header.key).ok_or_else(|| invalid("bad key"))?;
    Ok((key, header))
}

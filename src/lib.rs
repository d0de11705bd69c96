pub mod analyzer;
pub mod backend;
pub mod error;
pub mod filter;
pub mod index;
pub mod kv;
pub mod lifecycle;
pub mod manager;
pub mod model;
pub mod ops;
pub mod parser;
pub mod remote;
pub mod repository;
pub mod server;
pub mod stats;
pub mod storage;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use tracing::{debug, info};

use crate::error::BackendError;
use crate::filter::KeyFilter;
use crate::storage::{Entry, Segment};

pub use crate::error::{Result, StoreError};
pub use crate::model::{NewRecord, Record, RecordStatus};

/// Largest value a single write may carry.
pub const MAX_VALUE_BYTES: usize = 64 * 1024;

const FILTER_CAPACITY: usize = 1_000_000;
const FILTER_FP_RATE: f64 = 0.01;

/// File-backed key-value engine: an append-only segment, a map from key to
/// the offset of its latest write, and a key filter for fast misses.
pub struct Ledger {
    active_segment: Mutex<Segment>,
    index: RwLock<HashMap<String, u64>>,
    key_filter: RwLock<KeyFilter>,
    next_seq: AtomicU64,
    strict_durability: bool,
    read_only: bool,
}

impl fmt::Debug for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ledger")
            .field("key_count", &self.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub live: usize,
    pub dropped: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

fn poisoned<T>(_: T) -> BackendError {
    BackendError::Unavailable("poisoned lock".to_string())
}

impl Ledger {
    pub fn open(path: &Path, strict_durability: bool, read_only: bool) -> std::io::Result<Self> {
        let mut segment = Segment::new(path, strict_durability)?;
        let entries = segment.recover()?;

        let mut index = HashMap::new();
        let mut key_filter = KeyFilter::new(FILTER_CAPACITY, FILTER_FP_RATE);
        let mut max_seq = 0;
        for (offset, entry) in &entries {
            key_filter.insert(&entry.key);
            index.insert(entry.key.clone(), *offset);
            max_seq = max_seq.max(entry.seq);
        }

        info!(
            "ledger {:?} opened: {} writes replayed, {} live keys",
            path,
            entries.len(),
            index.len()
        );

        Ok(Self {
            active_segment: Mutex::new(segment),
            index: RwLock::new(index),
            key_filter: RwLock::new(key_filter),
            next_seq: AtomicU64::new(max_seq + 1),
            strict_durability,
            read_only,
        })
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.active_segment.lock().ok().map(|s| s.file_path.clone())
    }

    /// Stores `value` under `key`, returning the write's sequence number.
    pub fn put(&self, key: &str, value: &[u8]) -> std::result::Result<u64, BackendError> {
        if self.read_only {
            return Err(BackendError::Rejected("ledger is read-only".to_string()));
        }
        if value.len() > MAX_VALUE_BYTES {
            return Err(BackendError::Rejected(format!(
                "value for '{}' is {} bytes (max {})",
                key,
                value.len(),
                MAX_VALUE_BYTES
            )));
        }

        // Lock order is index, then segment, as in `compact`. The offset must
        // land in the same index generation as the file it was appended to.
        let mut idx = self.index.write().map_err(poisoned)?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = Entry { seq, key: key.to_string(), value: value.to_vec() };

        let offset = {
            let mut segment = self.active_segment.lock().map_err(poisoned)?;
            segment.append(&entry)?
        };

        {
            let mut kf = self.key_filter.write().map_err(poisoned)?;
            kf.insert(key);
        }
        idx.insert(entry.key, offset);

        debug!("put '{}' seq={} offset={}", key, seq, offset);
        Ok(seq)
    }

    /// Latest value under `key`, or `None` if the key was never written.
    pub fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, BackendError> {
        {
            let kf = self.key_filter.read().map_err(poisoned)?;
            if !kf.may_contain(key) {
                return Ok(None);
            }
        }

        // Held across the read so compaction cannot swap files under the offset.
        let idx = self.index.read().map_err(poisoned)?;
        let offset = match idx.get(key) {
            Some(offset) => *offset,
            None => return Ok(None),
        };

        let segment = self.active_segment.lock().map_err(poisoned)?;
        let entry = segment.read(offset)?;
        Ok(Some(entry.value))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .index
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Rewrites the segment keeping only the latest write of every key.
    pub fn compact(&self) -> std::result::Result<CompactionStats, BackendError> {
        // Stop-the-world: writers and readers wait for the swap.
        let mut index_lock = self.index.write().map_err(poisoned)?;
        let mut segment_lock = self.active_segment.lock().map_err(poisoned)?;

        let old_path = segment_lock.file_path.clone();
        let new_path = old_path.with_extension("compacted");
        if new_path.exists() {
            fs::remove_file(&new_path)?;
        }

        let bytes_before = segment_lock.len();
        let total_writes = segment_lock.recover()?.len();

        let mut new_segment = Segment::new(&new_path, true)?;
        let mut live: Vec<(String, u64)> = index_lock.iter().map(|(k, o)| (k.clone(), *o)).collect();
        // Preserve write order so replay after compaction sees the same history shape.
        live.sort_by_key(|(_, offset)| *offset);

        let mut new_index = HashMap::with_capacity(live.len());
        for (key, old_offset) in live {
            let entry = segment_lock.read(old_offset)?;
            let new_offset = new_segment.append(&entry)?;
            new_index.insert(key, new_offset);
        }
        let bytes_after = new_segment.len();
        drop(new_segment);

        fs::rename(&new_path, &old_path)?;
        *segment_lock = Segment::new(&old_path, self.strict_durability)?;
        let live_count = new_index.len();
        *index_lock = new_index;

        let stats = CompactionStats {
            live: live_count,
            dropped: total_writes.saturating_sub(live_count),
            bytes_before,
            bytes_after,
        };

        if stats.dropped > 0 {
            info!(
                "compaction: kept {} live keys, dropped {} stale writes ({} -> {} bytes)",
                stats.live, stats.dropped, stats.bytes_before, stats.bytes_after
            );
        } else {
            debug!("compaction: nothing to drop");
        }
        Ok(stats)
    }
}

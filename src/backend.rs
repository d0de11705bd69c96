use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::Ledger;

/// The storage collaborator: a flat key-value store that may be slow,
/// unavailable, or refuse writes.
///
/// `get_data` on a key that was never written returns an empty vector, not
/// an error. Errors from `get_data` mean the backend could not be reached.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn get_data(&self, key: &str) -> Result<Vec<u8>, BackendError>;

    async fn set_data(&self, key: &str, value: Vec<u8>) -> Result<(), BackendError>;
}

/// How a faulted key answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    Reject,
    Decline,
}

/// In-process backend. Also the test double: availability, per-key write
/// faults, raw byte overwrites, and artificial latency are all switchable.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, Vec<u8>>>,
    faults: RwLock<HashMap<String, WriteFault>>,
    unavailable: AtomicBool,
    write_delay: RwLock<Option<Duration>>,
    writes: AtomicUsize,
    probes: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Makes writes to every key starting with `prefix` fail.
    pub fn fail_writes(&self, prefix: &str, fault: WriteFault) {
        if let Ok(mut faults) = self.faults.write() {
            faults.insert(prefix.to_string(), fault);
        }
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.write_delay.write() {
            *d = delay;
        }
    }

    /// Overwrites a key without going through `set_data` (no faults, no counters).
    pub fn put_raw(&self, key: &str, value: &[u8]) {
        if let Ok(mut data) = self.data.write() {
            data.insert(key.to_string(), value.to_vec());
        }
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().ok().and_then(|d| d.get(key).cloned())
    }

    pub fn keys(&self) -> HashSet<String> {
        self.data
            .read()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("memory backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn is_available(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn get_data(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.check_reachable()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.raw(key).unwrap_or_default())
    }

    async fn set_data(&self, key: &str, value: Vec<u8>) -> Result<(), BackendError> {
        self.check_reachable()?;

        let delay = self.write_delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = self.faults.read().ok().and_then(|f| {
            f.iter()
                .find(|(prefix, _)| key.starts_with(prefix.as_str()))
                .map(|(_, fault)| *fault)
        });
        match fault {
            Some(WriteFault::Reject) => {
                return Err(BackendError::Rejected(format!("write to '{}' refused", key)))
            }
            Some(WriteFault::Decline) => {
                return Err(BackendError::Declined("user rejected transaction".to_string()))
            }
            None => {}
        }

        self.put_raw(key, &value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Serves a local [`Ledger`] through the async [`Backend`] interface.
/// Disk I/O runs on the blocking pool.
#[derive(Clone, Debug)]
pub struct LedgerBackend {
    ledger: Arc<Ledger>,
}

impl LedgerBackend {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

fn join_failed(e: tokio::task::JoinError) -> BackendError {
    BackendError::Io(format!("ledger task failed: {}", e))
}

#[async_trait]
impl Backend for LedgerBackend {
    async fn is_available(&self) -> bool {
        self.ledger.path().is_some()
    }

    async fn get_data(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let ledger = self.ledger.clone();
        let key = key.to_string();
        let value = tokio::task::spawn_blocking(move || ledger.get(&key))
            .await
            .map_err(join_failed)??;
        Ok(value.unwrap_or_default())
    }

    async fn set_data(&self, key: &str, value: Vec<u8>) -> Result<(), BackendError> {
        let ledger = self.ledger.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || ledger.put(&key, &value))
            .await
            .map_err(join_failed)??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_treats_missing_as_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.get_data("nope").await.unwrap().is_empty());
        backend.set_data("k", b"v".to_vec()).await.unwrap();
        assert_eq!(backend.get_data("k").await.unwrap(), b"v".to_vec());
        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test]
    async fn memory_backend_faults() {
        let backend = MemoryBackend::new();
        backend.fail_writes("a", WriteFault::Reject);
        backend.fail_writes("b", WriteFault::Decline);

        assert!(matches!(backend.set_data("a", vec![1]).await, Err(BackendError::Rejected(_))));
        assert!(matches!(backend.set_data("b", vec![1]).await, Err(BackendError::Declined(_))));
        assert!(backend.raw("a").is_none());

        backend.set_available(false);
        assert!(!backend.is_available().await);
        assert!(matches!(backend.get_data("c").await, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn ledger_backend_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(Ledger::open(&dir.path().join("l.dat"), false, false).unwrap());
        let backend = LedgerBackend::new(ledger);

        assert!(backend.is_available().await);
        assert!(backend.get_data("record_keys").await.unwrap().is_empty());
        backend.set_data("record_keys", b"[\"a\"]".to_vec()).await.unwrap();
        assert_eq!(backend.get_data("record_keys").await.unwrap(), b"[\"a\"]".to_vec());
    }
}

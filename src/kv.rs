use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{Result, StoreError};

/// Session over a backend. Construction runs the availability probe once;
/// a failed probe means no session, so nothing downstream can mistake an
/// unreachable backend for missing keys.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}

impl KvStore {
    pub async fn connect(backend: Arc<dyn Backend>) -> Result<Self> {
        if !backend.is_available().await {
            warn!("backend failed its availability probe");
            return Err(StoreError::BackendUnavailable("availability probe failed".to_string()));
        }
        Ok(Self { backend })
    }

    /// `None` when the key holds no bytes.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bytes = self.backend.get_data(key).await.map_err(|e| StoreError::read_failed(key, e))?;
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bytes))
        }
    }

    pub async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<()> {
        debug!("set '{}' ({} bytes)", key, value.len());
        self.backend
            .set_data(key, value)
            .await
            .map_err(|e| StoreError::write_failed(key, e))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_bytes(key).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| StoreError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Decode {
            key: key.to_string(),
            reason: format!("encode: {}", e),
        })?;
        self.set_bytes(key, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, WriteFault};

    #[tokio::test]
    async fn failed_probe_refuses_the_session() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_available(false);
        let err = KvStore::connect(backend.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
        assert_eq!(backend.read_count(), 0);
    }

    #[tokio::test]
    async fn empty_bytes_read_as_missing() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_raw("blank", b"");
        let kv = KvStore::connect(backend).await.unwrap();
        assert_eq!(kv.get_bytes("blank").await.unwrap(), None);
        assert_eq!(kv.get_bytes("never").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_report_decode_and_write_failures() {
        let backend = Arc::new(MemoryBackend::new());
        let kv = KvStore::connect(backend.clone()).await.unwrap();

        kv.set_json("list", &vec!["a", "b"]).await.unwrap();
        let list: Option<Vec<String>> = kv.get_json("list").await.unwrap();
        assert_eq!(list, Some(vec!["a".to_string(), "b".to_string()]));

        backend.put_raw("list", b"{not json");
        let err = kv.get_json::<Vec<String>>("list").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));

        backend.fail_writes("list", WriteFault::Decline);
        let err = kv.set_json("list", &vec!["c"]).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected { declined: true, .. }));
    }

    #[tokio::test]
    async fn probe_runs_once_per_session_and_later_reads_report_read_step() {
        let backend = Arc::new(MemoryBackend::new());
        let kv = KvStore::connect(backend.clone()).await.unwrap();
        kv.get_bytes("a").await.unwrap();
        kv.get_bytes("b").await.unwrap();
        assert_eq!(backend.probe_count(), 1);

        backend.set_available(false);
        let err = kv.get_bytes("a").await.unwrap_err();
        assert!(matches!(err, StoreError::ReadFailed { ref key, .. } if key == "a"));
        assert_eq!(err.step(), "read");
        assert_eq!(backend.probe_count(), 1);
    }
}

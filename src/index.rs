use tracing::warn;

use crate::error::{Result, StoreError};
use crate::kv::KvStore;
use crate::model::INDEX_KEY;

/// Ids read from the index key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    /// Unique ids in stored order.
    pub ids: Vec<String>,
    /// The stored payload was unreadable and treated as empty.
    pub corrupt: bool,
}

/// The set of live record ids, kept as one JSON array under `record_keys`.
///
/// `append` is a read-then-write on a store without compare-and-swap. Two
/// concurrent appends can both read the same list and the later write drops
/// the other's id. Callers that need every id indexed must serialize appends.
#[derive(Debug, Clone)]
pub struct RecordIndex {
    kv: KvStore,
}

impl RecordIndex {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub async fn load(&self) -> Result<IndexSnapshot> {
        match self.kv.get_json::<Vec<String>>(INDEX_KEY).await {
            Ok(None) => Ok(IndexSnapshot::default()),
            Ok(Some(stored)) => Ok(IndexSnapshot { ids: dedup(stored), corrupt: false }),
            Err(StoreError::Decode { reason, .. }) => {
                warn!("index at '{}' is malformed, reading as empty: {}", INDEX_KEY, reason);
                Ok(IndexSnapshot { ids: Vec::new(), corrupt: true })
            }
            Err(e) => Err(e),
        }
    }

    /// Adds `id` unless already present. Returns whether a write happened.
    pub async fn append(&self, id: &str) -> Result<bool> {
        let mut snapshot = self.load().await?;
        if snapshot.ids.iter().any(|existing| existing == id) {
            return Ok(false);
        }
        if snapshot.corrupt {
            warn!("rewriting malformed index with fresh contents");
        }
        snapshot.ids.push(id.to_string());
        self.kv.set_json(INDEX_KEY, &snapshot.ids).await?;
        Ok(true)
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    async fn index_over(backend: Arc<MemoryBackend>) -> RecordIndex {
        RecordIndex::new(KvStore::connect(backend).await.unwrap())
    }

    #[tokio::test]
    async fn empty_store_has_empty_index() {
        let index = index_over(Arc::new(MemoryBackend::new())).await;
        assert_eq!(index.load().await.unwrap(), IndexSnapshot::default());
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let index = index_over(backend.clone()).await;

        assert!(index.append("a").await.unwrap());
        assert!(!index.append("a").await.unwrap());
        assert!(index.append("b").await.unwrap());

        assert_eq!(index.load().await.unwrap().ids, vec!["a", "b"]);
        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test]
    async fn stored_duplicates_are_collapsed_on_load() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_raw(INDEX_KEY, br#"["a","b","a"]"#);
        let index = index_over(backend).await;
        assert_eq!(index.load().await.unwrap().ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn malformed_index_reads_as_empty_with_warning() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put_raw(INDEX_KEY, b"not-json");
        let index = index_over(backend.clone()).await;

        let snapshot = index.load().await.unwrap();
        assert!(snapshot.corrupt);
        assert!(snapshot.ids.is_empty());

        index.append("fresh").await.unwrap();
        assert_eq!(backend.raw(INDEX_KEY).unwrap(), br#"["fresh"]"#.to_vec());
    }

    #[tokio::test]
    async fn concurrent_appends_can_lose_an_id() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_write_delay(Some(std::time::Duration::from_millis(20)));
        let index = index_over(backend).await;

        let (a, b) = tokio::join!(index.append("a"), index.append("b"));
        assert!(a.unwrap() && b.unwrap());

        // Both read the empty list before either write landed.
        let ids = index.load().await.unwrap().ids;
        assert_eq!(ids.len(), 1);
    }
}

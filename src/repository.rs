use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::index::RecordIndex;
use crate::kv::KvStore;
use crate::model::{self, NewRecord, Record};

/// An index entry `list` could not turn into a record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub id: String,
    pub reason: String,
}

/// Result of `list`: the readable records plus what was dropped on the way.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOutcome {
    pub records: Vec<Record>,
    pub skipped: Vec<SkippedRecord>,
    pub index_corrupt: bool,
}

impl ListOutcome {
    /// Some entries were dropped or the index itself was unreadable.
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty() || self.index_corrupt
    }
}

/// CRUD over `record_<id>` keys. Holds no cache; every call reads the store.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    kv: KvStore,
    index: RecordIndex,
}

impl RecordRepository {
    pub fn new(kv: KvStore) -> Self {
        let index = RecordIndex::new(kv.clone());
        Self { kv, index }
    }

    pub fn index(&self) -> &RecordIndex {
        &self.index
    }

    /// Writes a fresh pending record, then indexes it. A failed index write
    /// leaves the record stored but unlisted and is reported as
    /// [`StoreError::OrphanedRecord`].
    pub async fn create(&self, input: NewRecord) -> Result<Record> {
        let id = model::new_record_id();
        if let Some(hint) = &input.meal_time_hint {
            debug!("record {} meal time hint: {}", id, hint);
        }
        let record = Record::pending(id, input, model::now_secs());

        self.write(&record).await?;

        if let Err(e) = self.index.append(&record.id).await {
            warn!("record {} stored but not indexed: {}", record.id, e);
            return Err(StoreError::OrphanedRecord {
                id: record.id,
                reason: e.to_string(),
            });
        }

        info!("created record {} for {}", record.id, record.owner);
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Record> {
        let key = model::record_key(id);
        let bytes = self
            .kv
            .get_bytes(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        model::decode_record(id, &bytes).map_err(|e| StoreError::Decode {
            key,
            reason: e.to_string(),
        })
    }

    /// Every indexed record, newest first. Unreadable entries are skipped
    /// and reported in the outcome; backend failures still abort.
    pub async fn list(&self) -> Result<ListOutcome> {
        let snapshot = self.index.load().await?;

        let mut outcome = ListOutcome {
            index_corrupt: snapshot.corrupt,
            ..Default::default()
        };

        for id in snapshot.ids {
            match self.get(&id).await {
                Ok(record) => outcome.records.push(record),
                Err(e @ StoreError::Decode { .. }) | Err(e @ StoreError::NotFound { .. }) => {
                    warn!("skipping record {}: {}", id, e);
                    outcome.skipped.push(SkippedRecord { id, reason: e.to_string() });
                }
                Err(e) => return Err(e),
            }
        }

        sort_newest_first(&mut outcome.records);
        Ok(outcome)
    }

    /// Read-modify-write of one record. No conflict detection: a concurrent
    /// update between the read and the write is overwritten.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Record>
    where
        F: FnOnce(Record) -> Record + Send,
    {
        let current = self.get(id).await?;
        let mut updated = mutate(current);
        // The key owns the id.
        updated.id = id.to_string();
        self.write(&updated).await?;
        Ok(updated)
    }

    async fn write(&self, record: &Record) -> Result<()> {
        let key = model::record_key(&record.id);
        let bytes = model::encode_record(record).map_err(|e| StoreError::Decode {
            key: key.clone(),
            reason: format!("encode: {}", e),
        })?;
        self.kv.set_bytes(&key, bytes).await
    }
}

/// Timestamp descending, then id ascending.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| match b.timestamp.cmp(&a.timestamp) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}

//! In-memory reference implementation of the record-store port.
//!
//! Threads live in a concurrent map; within a thread, records sit in a
//! BTreeMap so prefix queries come back in sort order for free. An optional
//! per-item byte cap models the 400 KB limit of the reference backend.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use cairn_core::record::StoredRecord;

use crate::store::{RecordStore, StoreError};

/// Thread-keyed map of sorted record maps.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    threads: Arc<DashMap<String, BTreeMap<String, StoredRecord>>>,
    item_limit: Option<usize>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects items whose serialized size exceeds `limit`
    /// bytes, like the reference KV backend does at 400 000.
    pub fn with_item_limit(limit: usize) -> Self {
        Self {
            threads: Arc::new(DashMap::new()),
            item_limit: Some(limit),
        }
    }

    /// Total records across all threads. Test observability.
    pub fn record_count(&self) -> usize {
        self.threads.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(
        &self,
        thread_id: &str,
        record_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self
            .threads
            .get(thread_id)
            .and_then(|records| records.get(record_id).cloned()))
    }

    async fn create(&self, record: StoredRecord) -> Result<(), StoreError> {
        if let Some(limit) = self.item_limit {
            let size = serde_json::to_string(&record)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .len();
            if size > limit {
                return Err(StoreError::ItemTooLarge { size, limit });
            }
        }
        self.threads
            .entry(record.thread_id.clone())
            .or_default()
            .insert(record.record_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, thread_id: &str, record_id: &str) -> Result<(), StoreError> {
        if let Some(mut records) = self.threads.get_mut(thread_id) {
            records.remove(record_id);
        }
        Ok(())
    }

    async fn query_by_thread(
        &self,
        thread_id: &str,
        key_prefix: Option<&str>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let Some(records) = self.threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        Ok(records
            .values()
            .filter(|record| {
                key_prefix.map_or(true, |prefix| record.record_id.starts_with(prefix))
            })
            .cloned()
            .collect())
    }
}

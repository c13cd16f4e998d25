//! The record-store port — everything the engine asks of a KV backend.
//!
//! Intentionally minimal. Four operations with plain key/value semantics;
//! DynamoDB, an RDBMS table, an embedded KV, or an in-memory map all
//! qualify. Transactions, conditional writes, and secondary indexes are
//! deliberately absent from the contract.

use async_trait::async_trait;

use cairn_core::record::StoredRecord;

/// Failure surfaced by a [`RecordStore`] implementation.
///
/// At the write path this feeds the retry loop; at the read path it
/// surfaces directly.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected the item for exceeding its per-item cap.
    /// Retrying the same item cannot succeed.
    #[error("record of {size} bytes exceeds the store's per-item limit of {limit} bytes")]
    ItemTooLarge { size: usize, limit: usize },
    /// Anything else the backend reports.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Abstract KV store keyed by `(thread_id, record_id)`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Strong read of the most recently stored record at the key, if any.
    async fn get(
        &self,
        thread_id: &str,
        record_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Unconditional upsert at `(record.thread_id, record.record_id)`.
    async fn create(&self, record: StoredRecord) -> Result<(), StoreError>;

    /// Idempotent delete; a missing record is not an error.
    async fn delete(&self, thread_id: &str, record_id: &str) -> Result<(), StoreError>;

    /// Every record in the thread whose `record_id` starts with the
    /// optional prefix, in `record_id` sort order.
    async fn query_by_thread(
        &self,
        thread_id: &str,
        key_prefix: Option<&str>,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}

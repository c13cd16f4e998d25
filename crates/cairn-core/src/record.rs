//! Stored-record format — the shape of every item in the record store.
//!
//! These types ARE the stored format. Field names serialize in camelCase
//! because that is what lives in the KV items; changing a name or a key
//! layout here breaks every record already persisted. `is_split` defaults
//! to false on deserialization so items written before splitting existed
//! stay readable indefinitely.

use serde::{Deserialize, Serialize};

/// Sort-key prefix of every logical checkpoint record.
pub const CHECKPOINT_KEY_PREFIX: &str = "checkpoint#";

/// Sharding strategy recorded in each part's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SplitStrategy {
    /// Semantic sharding: message sequences are moved into auxiliary parts,
    /// the primary keeps the stripped checkpoint. Primary is part 0.
    MessageLevel,
    /// Opaque sharding: the whole serialized record is Base64-chunked.
    /// The chunk at the logical key is part 1; there is no part 0.
    ContentLevel,
}

/// Sharding descriptor, present on every record of a shard set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitMetadata {
    /// The logical record's own sort key.
    pub original_record_id: String,
    /// Total parts in the set, primary included.
    pub total_parts: u32,
    /// 0 for a message-level primary; 1..N otherwise.
    pub part_number: u32,
    pub strategy: SplitStrategy,
    /// ISO-8601 creation time of the split.
    pub split_timestamp: String,
    /// Serialized byte size of the record before splitting.
    pub original_size: u64,
    /// Byte size of this part's payload.
    pub part_size: u64,
    /// Short hash over this part's payload, verified on reassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Payload of a message-level auxiliary part: one chunk of one channel's
/// message sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSplitData {
    pub channel_name: String,
    /// Index of the first message in this chunk, in the original sequence.
    pub start_message_index: usize,
    /// Index of the last message in this chunk, inclusive.
    pub end_message_index: usize,
    /// Canonically serialized array of the chunk's messages.
    pub messages_data: String,
    pub checkpoint_metadata: MessageChunkContext,
}

/// Context recorded with each message chunk for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageChunkContext {
    /// Length of the channel's full message sequence at split time.
    pub total_messages: usize,
    /// The channel's version marker at split time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_version: Option<serde_json::Value>,
}

/// Payload of a content-level part: one substring of the Base64-encoded
/// serialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSplitData {
    pub chunk_data: String,
    /// Always `"base64"`.
    pub encoding: String,
}

/// One item in the record store: an unsharded logical record, or one part
/// of a sharded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Partition key — groups records of one conversation thread.
    pub thread_id: String,
    /// Sort key. Logical for unsharded records and primaries, derived
    /// (`{prefix}#{original}#part#{NNNN}`) for auxiliaries.
    pub record_id: String,
    /// Serialized checkpoint. Present on unsharded records and on the
    /// primary of a message-level set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Serialized metadata. Same presence rules as `checkpoint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// True for any record belonging to a shard set. Absent on legacy
    /// items, which deserializes to false.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_split: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_metadata: Option<SplitMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_split_data: Option<MessageSplitData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_split_data: Option<ContentSplitData>,
}

impl StoredRecord {
    /// A plain unsharded record.
    pub fn unsplit(
        thread_id: impl Into<String>,
        record_id: impl Into<String>,
        checkpoint: String,
        metadata: String,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            record_id: record_id.into(),
            checkpoint: Some(checkpoint),
            metadata: Some(metadata),
            is_split: false,
            split_metadata: None,
            message_split_data: None,
            content_split_data: None,
        }
    }
}

// ── Key construction ──────────────────────────────────────────────────────────

/// Sort key of a logical checkpoint record: `checkpoint#{ns}#{id}`.
pub fn checkpoint_record_id(namespace: &str, checkpoint_id: &str) -> String {
    format!("{CHECKPOINT_KEY_PREFIX}{namespace}#{checkpoint_id}")
}

/// Sort-key prefix matching every checkpoint in one namespace.
pub fn checkpoint_namespace_prefix(namespace: &str) -> String {
    format!("{CHECKPOINT_KEY_PREFIX}{namespace}#")
}

/// Sort key of an auxiliary part: `{prefix}#{original}#part#{NNNN}`.
///
/// Part numbers are zero-padded to 4 digits so parts sort numerically.
/// Callers must never see these keys.
pub fn split_part_record_id(prefix: &str, original_record_id: &str, part_number: u32) -> String {
    format!("{prefix}#{original_record_id}#part#{part_number:04}")
}

/// Sort-key prefix matching every auxiliary part in a thread.
pub fn split_key_prefix(prefix: &str) -> String {
    format!("{prefix}#")
}

/// Sort-key prefix matching the auxiliary parts of one logical record.
pub fn split_parts_prefix(prefix: &str, original_record_id: &str) -> String {
    format!("{prefix}#{original_record_id}#part#")
}

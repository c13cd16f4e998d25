//! Write path — sharding oversized checkpoints into part sets.
//!
//! The splitter consults the sizer, picks the configured strategy, produces
//! an ordered sequence of stored records (one primary plus auxiliaries, or
//! numbered content chunks), and drives the retry/rollback write loop.
//! Either every part of a set lands in the store or none survives.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::time::{sleep, Instant};

use cairn_core::checkpoint::{Checkpoint, CheckpointMetadata};
use cairn_core::config::SplitConfig;
use cairn_core::record::{
    split_part_record_id, ContentSplitData, MessageChunkContext, MessageSplitData, SplitMetadata,
    SplitStrategy, StoredRecord,
};
use cairn_core::serial::{self, SerializationError};
use cairn_core::sizer::CheckpointSizer;

use crate::store::{RecordStore, StoreError};

/// What `split_if_needed` did with the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub was_split: bool,
    /// Every record id written (or, for `was_split = false`, the single id
    /// the caller should write directly).
    pub record_ids: Vec<String>,
}

impl SplitOutcome {
    fn direct(record_id: &str) -> Self {
        Self {
            was_split: false,
            record_ids: vec![record_id.to_string()],
        }
    }
}

/// Write-path failure. A rollback of already-stored parts has been
/// attempted before any of these surface.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("failed to store part {record_id} after {attempts} attempts: {source}")]
    RetriesExhausted {
        record_id: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("write deadline of {timeout_ms} ms expired while storing {record_id}")]
    DeadlineExpired { record_id: String, timeout_ms: u64 },
}

/// The combined `{checkpoint, metadata}` payload content-level splitting
/// chunks as opaque bytes.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct CombinedPayload {
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
}

/// Orchestrates the sharding protocol on the write side.
pub struct CheckpointSplitter {
    config: SplitConfig,
    sizer: CheckpointSizer,
}

impl CheckpointSplitter {
    pub fn new(config: SplitConfig) -> Self {
        let sizer = CheckpointSizer::new(config.clone());
        Self { config, sizer }
    }

    /// Decide whether `(checkpoint, metadata)` needs sharding and, if so,
    /// produce and store the part set.
    ///
    /// Returns `was_split = false` when splitting is disabled, the record
    /// fits under the threshold, or the configured strategy cannot handle
    /// this checkpoint — in the last case the caller's direct write may
    /// still fail at the store, which is intentional: the engine never
    /// silently truncates a payload.
    pub async fn split_if_needed(
        &self,
        thread_id: &str,
        record_id: &str,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
        store: &dyn RecordStore,
    ) -> Result<SplitOutcome, SplitError> {
        if !self.config.enabled {
            return Ok(SplitOutcome::direct(record_id));
        }

        let analysis = self.sizer.analyze(checkpoint, metadata)?;
        if self.config.enable_size_monitoring {
            tracing::debug!(
                record_id,
                total_size = analysis.total_size,
                threshold = self.config.max_size_threshold,
                exceeds = analysis.exceeds_threshold,
                estimated_parts = analysis.estimated_parts,
                "checkpoint size analysis"
            );
        }
        if !analysis.exceeds_threshold {
            return Ok(SplitOutcome::direct(record_id));
        }

        let verdict = self.sizer.can_split(checkpoint, self.config.strategy);
        if !verdict.ok {
            tracing::warn!(
                record_id,
                reason = verdict.reason.as_deref().unwrap_or(""),
                "oversized checkpoint cannot be split; falling back to direct write"
            );
            return Ok(SplitOutcome::direct(record_id));
        }

        let parts = match self.config.strategy {
            SplitStrategy::MessageLevel => {
                self.split_by_messages(thread_id, record_id, checkpoint, metadata)?
            }
            SplitStrategy::ContentLevel => {
                self.split_by_content(thread_id, record_id, checkpoint, metadata)?
            }
        };

        if self.config.enable_size_monitoring {
            tracing::info!(
                record_id,
                parts = parts.len(),
                strategy = ?self.config.strategy,
                original_size = analysis.total_size,
                "splitting oversized checkpoint"
            );
        }

        let record_ids = self.store_parts(parts, store).await?;
        Ok(SplitOutcome {
            was_split: true,
            record_ids,
        })
    }

    // ── Message-level splitting ──────────────────────────────────────────────

    /// Move every non-empty message sequence into size-bounded auxiliary
    /// parts, then emit a primary holding a stripped copy of the checkpoint.
    /// Parts are returned primary first so a failed write rolls back the
    /// primary last-in-first-out with its auxiliaries.
    fn split_by_messages(
        &self,
        thread_id: &str,
        record_id: &str,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<Vec<StoredRecord>, SerializationError> {
        let split_timestamp = now_iso8601();
        let mut auxiliaries = Vec::new();
        let mut part_number = 0u32;

        for (channel_name, messages) in checkpoint.message_channels() {
            if messages.is_empty() {
                continue;
            }
            let channel_version = checkpoint.channel_versions.get(channel_name).cloned();
            for chunk in chunk_messages(messages, self.config.max_chunk_size)? {
                part_number += 1;
                let part_size = chunk.payload.len() as u64;
                let checksum = CheckpointSizer::checksum(chunk.payload.as_bytes());
                auxiliaries.push(StoredRecord {
                    thread_id: thread_id.to_string(),
                    record_id: split_part_record_id(
                        &self.config.split_record_prefix,
                        record_id,
                        part_number,
                    ),
                    checkpoint: None,
                    metadata: None,
                    is_split: true,
                    split_metadata: Some(SplitMetadata {
                        original_record_id: record_id.to_string(),
                        total_parts: 0, // backfilled below
                        part_number,
                        strategy: SplitStrategy::MessageLevel,
                        split_timestamp: split_timestamp.clone(),
                        original_size: 0, // backfilled below
                        part_size,
                        checksum: Some(checksum),
                    }),
                    message_split_data: Some(MessageSplitData {
                        channel_name: channel_name.to_string(),
                        start_message_index: chunk.start,
                        end_message_index: chunk.end,
                        messages_data: chunk.payload,
                        checkpoint_metadata: MessageChunkContext {
                            total_messages: messages.len(),
                            channel_version: channel_version.clone(),
                        },
                    }),
                    content_split_data: None,
                });
            }
        }

        // The primary stores the checkpoint with its message sequences
        // emptied; the caller's checkpoint is never touched.
        let stripped = checkpoint.with_stripped_messages();
        let stripped_json = serial::to_canonical(&stripped, "checkpoint")?;
        let metadata_json = serial::to_canonical(metadata, "checkpoint metadata")?;
        let primary_payload = format!("{stripped_json}{metadata_json}");

        let original_checkpoint_json = serial::to_canonical(checkpoint, "checkpoint")?;
        let original_size = (original_checkpoint_json.len() + metadata_json.len()) as u64;

        let total_parts = auxiliaries.len() as u32 + 1;
        let primary = StoredRecord {
            thread_id: thread_id.to_string(),
            record_id: record_id.to_string(),
            checkpoint: Some(stripped_json),
            metadata: Some(metadata_json),
            is_split: true,
            split_metadata: Some(SplitMetadata {
                original_record_id: record_id.to_string(),
                total_parts,
                part_number: 0,
                strategy: SplitStrategy::MessageLevel,
                split_timestamp,
                original_size,
                part_size: primary_payload.len() as u64,
                checksum: Some(CheckpointSizer::checksum(primary_payload.as_bytes())),
            }),
            message_split_data: None,
            content_split_data: None,
        };

        let mut parts = Vec::with_capacity(auxiliaries.len() + 1);
        parts.push(primary);
        parts.extend(auxiliaries);
        for part in &mut parts {
            if let Some(sm) = part.split_metadata.as_mut() {
                sm.total_parts = total_parts;
                sm.original_size = original_size;
            }
        }
        Ok(parts)
    }

    // ── Content-level splitting ──────────────────────────────────────────────

    /// Serialize the whole record, Base64-encode it, and cut the encoding
    /// into `max_chunk_size`-character substrings. Chunk 1 lives at the
    /// logical record id; there is no separate stripped primary.
    fn split_by_content(
        &self,
        thread_id: &str,
        record_id: &str,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<Vec<StoredRecord>, SerializationError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let combined = CombinedPayload {
            checkpoint: checkpoint.clone(),
            metadata: metadata.clone(),
        };
        let combined_json = serial::to_canonical(&combined, "combined record")?;
        let original_size = combined_json.len() as u64;
        let encoded = STANDARD.encode(combined_json.as_bytes());

        let split_timestamp = now_iso8601();
        let chunk_len = self.config.max_chunk_size as usize;
        let total_parts = encoded.len().div_ceil(chunk_len).max(1) as u32;

        let mut parts = Vec::with_capacity(total_parts as usize);
        let mut offset = 0usize;
        let mut part_number = 0u32;
        while offset < encoded.len() || part_number == 0 {
            part_number += 1;
            // Base64 output is ASCII, so byte offsets are char boundaries.
            let end = (offset + chunk_len).min(encoded.len());
            let chunk_data = encoded[offset..end].to_string();
            offset = end;

            let part_record_id = if part_number == 1 {
                record_id.to_string()
            } else {
                split_part_record_id(&self.config.split_record_prefix, record_id, part_number)
            };
            parts.push(StoredRecord {
                thread_id: thread_id.to_string(),
                record_id: part_record_id,
                checkpoint: None,
                metadata: None,
                is_split: true,
                split_metadata: Some(SplitMetadata {
                    original_record_id: record_id.to_string(),
                    total_parts,
                    part_number,
                    strategy: SplitStrategy::ContentLevel,
                    split_timestamp: split_timestamp.clone(),
                    original_size,
                    part_size: chunk_data.len() as u64,
                    checksum: Some(CheckpointSizer::checksum(chunk_data.as_bytes())),
                }),
                message_split_data: None,
                content_split_data: Some(ContentSplitData {
                    chunk_data,
                    encoding: "base64".to_string(),
                }),
            });
        }
        Ok(parts)
    }

    // ── Storing with retry + rollback ────────────────────────────────────────

    /// Store parts in order. Each part gets `max_retries` attempts with
    /// exponential backoff; if one part cannot be stored, every part stored
    /// so far is deleted (best effort) and the whole write fails.
    async fn store_parts(
        &self,
        parts: Vec<StoredRecord>,
        store: &dyn RecordStore,
    ) -> Result<Vec<String>, SplitError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.operation_timeout_ms);
        let mut stored: Vec<(String, String)> = Vec::with_capacity(parts.len());

        for part in parts {
            match self.store_one(&part, store, deadline).await {
                Ok(()) => stored.push((part.thread_id, part.record_id)),
                Err(error) => {
                    self.roll_back(store, &stored).await;
                    return Err(error);
                }
            }
        }
        Ok(stored.into_iter().map(|(_, record_id)| record_id).collect())
    }

    async fn store_one(
        &self,
        part: &StoredRecord,
        store: &dyn RecordStore,
        deadline: Instant,
    ) -> Result<(), SplitError> {
        let mut attempt = 0u32;
        loop {
            if Instant::now() >= deadline {
                return Err(SplitError::DeadlineExpired {
                    record_id: part.record_id.clone(),
                    timeout_ms: self.config.operation_timeout_ms,
                });
            }
            match store.create(part.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    attempt += 1;
                    tracing::warn!(
                        record_id = %part.record_id,
                        attempt,
                        error = %error,
                        "part write failed"
                    );
                    if attempt >= self.config.max_retries {
                        return Err(SplitError::RetriesExhausted {
                            record_id: part.record_id.clone(),
                            attempts: attempt,
                            source: error,
                        });
                    }
                    // 2^n × 100 ms after the nth failure, capped at the
                    // operation deadline.
                    let backoff = Duration::from_millis(100u64 << (attempt - 1));
                    sleep(backoff.min(deadline.saturating_duration_since(Instant::now()))).await;
                }
            }
        }
    }

    /// Delete every part stored so far. Failures are logged and swallowed —
    /// a rollback error must not mask the write error that triggered it, and
    /// an orphaned part is invisible to listings and reclaimed by the next
    /// thread deletion.
    async fn roll_back(&self, store: &dyn RecordStore, stored: &[(String, String)]) {
        if stored.is_empty() {
            return;
        }
        tracing::warn!(parts = stored.len(), "rolling back partially stored part set");
        for (thread_id, record_id) in stored {
            if let Err(error) = store.delete(thread_id, record_id).await {
                tracing::warn!(
                    record_id = %record_id,
                    error = %error,
                    "rollback delete failed; orphan part remains"
                );
            }
        }
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Message chunking ──────────────────────────────────────────────────────────

struct MessageChunk {
    /// Index of the chunk's first message in the original sequence.
    start: usize,
    /// Index of the chunk's last message, inclusive.
    end: usize,
    /// Canonically serialized array of the chunk's messages.
    payload: String,
}

/// Greedy size-bounded partitioning. Order is preserved; a chunk is sealed
/// when the next message would push it past `max_chunk_size`, so a single
/// message larger than the bound occupies a chunk of its own.
fn chunk_messages(
    messages: &[serde_json::Value],
    max_chunk_size: u64,
) -> Result<Vec<MessageChunk>, SerializationError> {
    fn seal(
        current: &mut Vec<&serde_json::Value>,
        start: usize,
        end: usize,
    ) -> Result<MessageChunk, SerializationError> {
        let payload = serial::to_canonical(current, "message chunk")?;
        current.clear();
        Ok(MessageChunk { start, end, payload })
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&serde_json::Value> = Vec::new();
    let mut current_bytes = 0u64;
    let mut start = 0usize;

    for (index, message) in messages.iter().enumerate() {
        let message_bytes = serial::to_canonical(message, "message")?.len() as u64;
        if current_bytes + message_bytes > max_chunk_size && !current.is_empty() {
            chunks.push(seal(&mut current, start, index - 1)?);
            current_bytes = 0;
            start = index;
        }
        current.push(message);
        current_bytes += message_bytes;
    }
    if !current.is_empty() {
        chunks.push(seal(&mut current, start, messages.len() - 1)?);
    }
    Ok(chunks)
}

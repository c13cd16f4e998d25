//! Read path — reconstructing a logical record from its stored parts.
//!
//! Reassembly never throws: every failure comes back as a structured
//! result with warnings, and the facade decides how to present it (a
//! degraded `get_tuple` reads as "not found", a degraded `list` entry is
//! skipped). The gather loop is bounded by a wall-clock deadline checked
//! around every store read.

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::time::Instant;

use cairn_core::checkpoint::{Checkpoint, CheckpointMetadata};
use cairn_core::config::SplitConfig;
use cairn_core::record::{split_part_record_id, SplitMetadata, SplitStrategy, StoredRecord};
use cairn_core::serial::{self, SerializationError};
use cairn_core::sizer::CheckpointSizer;

use crate::splitter::CombinedPayload;
use crate::store::RecordStore;

/// Knobs for one reassembly pass.
#[derive(Debug, Clone)]
pub struct ReassemblyOptions {
    /// Recompute and compare each part's checksum before trusting it.
    pub validate_checksums: bool,
    /// Wall-clock budget for the whole pass, gather included.
    pub timeout_ms: u64,
    /// Emit per-pass tracing.
    pub enable_logging: bool,
}

impl Default for ReassemblyOptions {
    fn default() -> Self {
        Self {
            validate_checksums: true,
            timeout_ms: 30_000,
            enable_logging: false,
        }
    }
}

/// Outcome of a reassembly pass. `success = false` carries the reasons in
/// `warnings`; nothing in here is an exception.
#[derive(Debug)]
pub struct ReassemblyResult {
    pub success: bool,
    pub checkpoint: Option<Checkpoint>,
    pub metadata: Option<CheckpointMetadata>,
    pub warnings: Vec<String>,
    pub reassembly_time_ms: u64,
    pub parts_reassembled: usize,
    pub total_expected_parts: u32,
}

impl ReassemblyResult {
    fn failed(
        warnings: Vec<String>,
        started: std::time::Instant,
        parts_reassembled: usize,
        total_expected_parts: u32,
    ) -> Self {
        Self {
            success: false,
            checkpoint: None,
            metadata: None,
            warnings,
            reassembly_time_ms: started.elapsed().as_millis() as u64,
            parts_reassembled,
            total_expected_parts,
        }
    }
}

/// Rebuild failures, folded into `ReassemblyResult::warnings`.
#[derive(Debug, thiserror::Error)]
enum RebuildError {
    #[error("Reassembly failed: primary part missing")]
    MissingPrimary,
    #[error("Checksum mismatch on part {part_number}")]
    ChecksumMismatch { part_number: u32 },
    #[error("Reassembly failed: found {found}/{expected} parts")]
    IncompleteSet { found: usize, expected: u32 },
    #[error("Reassembly failed: part {part_number} carries no payload")]
    MissingPayload { part_number: u32 },
    #[error("Reassembly failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("Reassembly failed: invalid base64 content: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Reassembly failed: decoded content is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Orchestrates the sharding protocol on the read side.
pub struct CheckpointReassembler {
    config: SplitConfig,
}

impl CheckpointReassembler {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// Fetch the primary at `record_id`, gather its auxiliaries under the
    /// deadline, verify, and reconstruct the original `(checkpoint,
    /// metadata)` pair.
    pub async fn reassemble(
        &self,
        thread_id: &str,
        record_id: &str,
        store: &dyn RecordStore,
        options: &ReassemblyOptions,
    ) -> ReassemblyResult {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);

        let primary = match store.get(thread_id, record_id).await {
            Ok(primary) => primary,
            Err(error) => {
                return ReassemblyResult::failed(
                    vec![format!("Store read failed: {error}")],
                    started,
                    0,
                    0,
                );
            }
        };
        let Some(primary) = primary else {
            return ReassemblyResult::failed(vec!["Record not found".to_string()], started, 0, 0);
        };
        if !primary.is_split {
            // Pass-through records are decoded by the facade, not here.
            return ReassemblyResult::failed(vec!["Record is not split".to_string()], started, 0, 0);
        }
        let Some(descriptor) = primary.split_metadata.clone() else {
            return ReassemblyResult::failed(
                vec!["Reassembly failed: invalid split metadata".to_string()],
                started,
                0,
                0,
            );
        };

        let total_parts = descriptor.total_parts;
        let mut warnings = Vec::new();
        let mut parts = vec![primary];

        match self
            .gather_auxiliaries(
                thread_id,
                record_id,
                &descriptor,
                store,
                deadline,
                options.timeout_ms,
                &mut parts,
                &mut warnings,
            )
            .await
        {
            Ok(()) => {}
            Err(timeout_warning) => {
                warnings.push(timeout_warning);
                return ReassemblyResult::failed(warnings, started, parts.len(), total_parts);
            }
        }

        if (parts.len() as u32) < total_parts {
            warnings.push(format!("Found {}/{} parts", parts.len(), total_parts));
        }
        parts.sort_by_key(|part| {
            part.split_metadata
                .as_ref()
                .map_or(u32::MAX, |sm| sm.part_number)
        });

        let rebuilt = match descriptor.strategy {
            SplitStrategy::MessageLevel => rebuild_from_messages(&parts, options),
            SplitStrategy::ContentLevel => rebuild_from_content(&parts, &descriptor, options),
        };

        match rebuilt {
            Ok((checkpoint, metadata)) => {
                if options.enable_logging {
                    tracing::debug!(
                        record_id,
                        parts = parts.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "checkpoint reassembled"
                    );
                }
                ReassemblyResult {
                    success: true,
                    checkpoint: Some(checkpoint),
                    metadata: Some(metadata),
                    warnings,
                    reassembly_time_ms: started.elapsed().as_millis() as u64,
                    parts_reassembled: parts.len(),
                    total_expected_parts: total_parts,
                }
            }
            Err(error) => {
                if options.enable_logging {
                    tracing::warn!(record_id, error = %error, "checkpoint reassembly degraded");
                }
                warnings.push(error.to_string());
                ReassemblyResult::failed(warnings, started, parts.len(), total_parts)
            }
        }
    }

    /// Fetch every auxiliary of the set, tolerating missing parts. Returns
    /// Err with a warning string when the deadline expires mid-gather.
    #[allow(clippy::too_many_arguments)]
    async fn gather_auxiliaries(
        &self,
        thread_id: &str,
        record_id: &str,
        descriptor: &SplitMetadata,
        store: &dyn RecordStore,
        deadline: Instant,
        timeout_ms: u64,
        parts: &mut Vec<StoredRecord>,
        warnings: &mut Vec<String>,
    ) -> Result<(), String> {
        // The part at the logical key is already in hand: part 0 for
        // message-level sets, part 1 for content-level ones.
        let auxiliary_numbers: Vec<u32> = match descriptor.strategy {
            SplitStrategy::MessageLevel => (1..descriptor.total_parts).collect(),
            SplitStrategy::ContentLevel => (2..=descriptor.total_parts).collect(),
        };

        for part_number in auxiliary_numbers {
            if Instant::now() >= deadline {
                return Err(format!(
                    "Reassembly timed out after {timeout_ms} ms while gathering part {part_number}"
                ));
            }
            let key = split_part_record_id(
                &self.config.split_record_prefix,
                record_id,
                part_number,
            );
            match store.get(thread_id, &key).await {
                Ok(Some(part)) => parts.push(part),
                Ok(None) => {
                    // Recorded via the "Found k/N parts" warning afterwards.
                }
                Err(error) => {
                    warnings.push(format!("Failed to fetch part {part_number}: {error}"));
                }
            }
        }
        Ok(())
    }
}

// ── Per-strategy rebuilds ─────────────────────────────────────────────────────

/// Message-level: parse the stripped primary, then append each auxiliary
/// chunk's messages to its channel, in part order.
fn rebuild_from_messages(
    parts: &[StoredRecord],
    options: &ReassemblyOptions,
) -> Result<(Checkpoint, CheckpointMetadata), RebuildError> {
    let primary = parts
        .iter()
        .find(|part| {
            part.split_metadata
                .as_ref()
                .is_some_and(|sm| sm.part_number == 0)
        })
        .ok_or(RebuildError::MissingPrimary)?;
    let checkpoint_json = primary
        .checkpoint
        .as_deref()
        .ok_or(RebuildError::MissingPayload { part_number: 0 })?;
    let metadata_json = primary
        .metadata
        .as_deref()
        .ok_or(RebuildError::MissingPayload { part_number: 0 })?;
    let mut checkpoint: Checkpoint = serial::from_canonical(checkpoint_json, "checkpoint")?;
    let metadata: CheckpointMetadata =
        serial::from_canonical(metadata_json, "checkpoint metadata")?;

    let mut channels: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    for part in parts {
        let Some(descriptor) = part.split_metadata.as_ref() else {
            continue;
        };
        if descriptor.part_number == 0 {
            continue;
        }
        let data = part
            .message_split_data
            .as_ref()
            .ok_or(RebuildError::MissingPayload {
                part_number: descriptor.part_number,
            })?;
        if options.validate_checksums {
            if let Some(expected) = descriptor.checksum.as_deref() {
                let actual = CheckpointSizer::checksum(data.messages_data.as_bytes());
                if actual != expected {
                    return Err(RebuildError::ChecksumMismatch {
                        part_number: descriptor.part_number,
                    });
                }
            }
        }
        let messages: Vec<serde_json::Value> =
            serial::from_canonical(&data.messages_data, "message chunk")?;
        channels
            .entry(data.channel_name.clone())
            .or_default()
            .extend(messages);
    }

    for (channel_name, messages) in channels {
        match checkpoint.channel_values.get_mut(&channel_name) {
            Some(value) => {
                if let Some(object) = value.as_object_mut() {
                    object.insert("messages".to_string(), serde_json::Value::Array(messages));
                }
            }
            None => {
                // The channel vanished from the primary; resurrect it so no
                // messages are dropped.
                let mut object = serde_json::Map::new();
                object.insert("messages".to_string(), serde_json::Value::Array(messages));
                checkpoint
                    .channel_values
                    .insert(channel_name, serde_json::Value::Object(object));
            }
        }
    }
    Ok((checkpoint, metadata))
}

/// Content-level: all parts required; concatenate, decode, deserialize.
fn rebuild_from_content(
    parts: &[StoredRecord],
    descriptor: &SplitMetadata,
    options: &ReassemblyOptions,
) -> Result<(Checkpoint, CheckpointMetadata), RebuildError> {
    if parts.len() != descriptor.total_parts as usize {
        return Err(RebuildError::IncompleteSet {
            found: parts.len(),
            expected: descriptor.total_parts,
        });
    }

    let mut encoded = String::with_capacity(descriptor.original_size as usize);
    for part in parts {
        let part_number = part
            .split_metadata
            .as_ref()
            .map_or(0, |sm| sm.part_number);
        let data = part
            .content_split_data
            .as_ref()
            .ok_or(RebuildError::MissingPayload { part_number })?;
        if options.validate_checksums {
            if let Some(expected) = part
                .split_metadata
                .as_ref()
                .and_then(|sm| sm.checksum.as_deref())
            {
                let actual = CheckpointSizer::checksum(data.chunk_data.as_bytes());
                if actual != expected {
                    return Err(RebuildError::ChecksumMismatch { part_number });
                }
            }
        }
        encoded.push_str(&data.chunk_data);
    }

    let decoded = STANDARD.decode(encoded.as_bytes())?;
    let text = String::from_utf8(decoded)?;
    let combined: CombinedPayload = serial::from_canonical(&text, "combined record")?;
    Ok((combined.checkpoint, combined.metadata))
}

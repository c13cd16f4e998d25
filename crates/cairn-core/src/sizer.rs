//! Size analysis — decides whether a checkpoint needs splitting.
//!
//! Pure functions over `(checkpoint, metadata, config)`: serialized byte
//! accounting, threshold verdicts, per-channel profiling, part-count
//! estimation, strategy feasibility, and the short payload checksum.
//! No I/O happens here.

use sha2::{Digest, Sha256};

use crate::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::config::SplitConfig;
use crate::record::SplitStrategy;
use crate::serial::{self, SerializationError};

/// Fixed per-record store overhead (keys, attribute names, item metadata),
/// a conservative bound for KV backends in the reference environment.
pub const STORE_OVERHEAD_BYTES: u64 = 1024;

/// Hex characters kept from the SHA-256 digest. 64 bits of checksum,
/// combined with `part_size` for corruption detection.
pub const CHECKSUM_HEX_CHARS: usize = 16;

/// How many leading messages `can_split` round-trips per channel.
const FEASIBILITY_SAMPLE: usize = 5;

/// Raw UTF-8 length scaled by the exact Base64 expansion factor of 1.33,
/// rounded up. Integer arithmetic — no float wobble at the threshold.
pub fn transport_size(raw_len: usize) -> u64 {
    div_ceil(raw_len as u64 * 133, 100)
}

/// Which logical component dominates the record's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Checkpoint,
    Metadata,
}

/// Transport-size contribution of each logical component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeBreakdown {
    pub checkpoint: u64,
    pub metadata: u64,
    pub overhead: u64,
}

/// The message-bearing channel best suited for message-level sharding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProfile {
    pub name: String,
    pub message_count: usize,
    /// Serialized size of the whole channel value, raw bytes.
    pub estimated_size: u64,
}

/// Everything the splitter needs to know about a record's footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeAnalysis {
    /// Estimated stored size in bytes: transport-encoded payloads plus
    /// the fixed per-record overhead.
    pub total_size: u64,
    /// True iff `total_size` strictly exceeds the configured threshold.
    pub exceeds_threshold: bool,
    pub size_breakdown: SizeBreakdown,
    /// Checkpoint wins ties.
    pub largest_component: Component,
    /// Strategy-specific estimate of how many parts a split would produce.
    pub estimated_parts: u32,
    /// None when no channel carries a `"messages"` sequence.
    pub largest_channel: Option<ChannelProfile>,
}

/// Answer to "can this checkpoint be split with the configured strategy?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitVerdict {
    pub ok: bool,
    pub reason: Option<String>,
}

impl SplitVerdict {
    fn feasible() -> Self {
        Self { ok: true, reason: None }
    }

    fn infeasible(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// Pure size analyzer, parameterized by the split configuration.
#[derive(Debug, Clone)]
pub struct CheckpointSizer {
    config: SplitConfig,
}

impl CheckpointSizer {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// Measure a record's stored footprint and produce the verdict the
    /// splitter acts on. Serialization failures propagate — the caller
    /// never silently degrades to a guess.
    pub fn analyze(
        &self,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<SizeAnalysis, SerializationError> {
        let checkpoint_json = serial::to_canonical(checkpoint, "checkpoint")?;
        let metadata_json = serial::to_canonical(metadata, "checkpoint metadata")?;

        let breakdown = SizeBreakdown {
            checkpoint: transport_size(checkpoint_json.len()),
            metadata: transport_size(metadata_json.len()),
            overhead: STORE_OVERHEAD_BYTES,
        };
        let total_size = breakdown.checkpoint + breakdown.metadata + breakdown.overhead;

        let largest_component = if breakdown.metadata > breakdown.checkpoint {
            Component::Metadata
        } else {
            Component::Checkpoint
        };

        let channels = self.profile_channels(checkpoint)?;
        let largest_channel = channels
            .iter()
            .max_by_key(|profile| profile.estimated_size)
            .cloned();

        let estimated_parts = match self.config.strategy {
            SplitStrategy::ContentLevel => {
                div_ceil(total_size, self.config.max_chunk_size) as u32
            }
            SplitStrategy::MessageLevel => {
                let auxiliaries: u64 = channels
                    .iter()
                    .filter(|profile| profile.message_count > 0)
                    .map(|profile| div_ceil(profile.estimated_size, self.config.max_chunk_size))
                    .sum();
                (1 + auxiliaries) as u32
            }
        };

        Ok(SizeAnalysis {
            total_size,
            exceeds_threshold: total_size > self.config.max_size_threshold,
            size_breakdown: breakdown,
            largest_component,
            estimated_parts,
            largest_channel,
        })
    }

    /// Strategy feasibility. Content-level chunking works on anything that
    /// serializes; message-level needs at least one non-empty message
    /// sequence whose leading entries round-trip cleanly.
    pub fn can_split(&self, checkpoint: &Checkpoint, strategy: SplitStrategy) -> SplitVerdict {
        match strategy {
            SplitStrategy::ContentLevel => SplitVerdict::feasible(),
            SplitStrategy::MessageLevel => {
                let mut found_messages = false;
                for (name, messages) in checkpoint.message_channels() {
                    if messages.is_empty() {
                        continue;
                    }
                    found_messages = true;
                    let sample = messages.len().min(FEASIBILITY_SAMPLE);
                    for (index, message) in messages[..sample].iter().enumerate() {
                        if roundtrip(message).is_err() {
                            return SplitVerdict::infeasible(format!(
                                "Message {index} in channel {name} is not serializable"
                            ));
                        }
                    }
                }
                if found_messages {
                    SplitVerdict::feasible()
                } else {
                    SplitVerdict::infeasible("No messages found to split")
                }
            }
        }
    }

    /// Short payload checksum: SHA-256, lowercase hex, first 16 characters.
    pub fn checksum(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        let mut hex = hex::encode(digest);
        hex.truncate(CHECKSUM_HEX_CHARS);
        hex
    }

    fn profile_channels(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<ChannelProfile>, SerializationError> {
        let mut profiles = Vec::new();
        for (name, messages) in checkpoint.message_channels() {
            let value = &checkpoint.channel_values[name];
            let serialized = serial::to_canonical(value, "channel value")?;
            profiles.push(ChannelProfile {
                name: name.to_string(),
                message_count: messages.len(),
                estimated_size: serialized.len() as u64,
            });
        }
        Ok(profiles)
    }
}

fn div_ceil(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}

fn roundtrip(message: &serde_json::Value) -> Result<(), SerializationError> {
    let text = serial::to_canonical(message, "message sample")?;
    serial::from_canonical::<serde_json::Value>(&text, "message sample")?;
    Ok(())
}

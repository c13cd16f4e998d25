//! Splitting configuration.
//!
//! The engine accepts an already-loaded `SplitConfig`; where the values come
//! from (file, environment, host defaults) is the caller's concern. The
//! facade validates bounds once at construction and the engine trusts the
//! struct afterwards.

use serde::{Deserialize, Serialize};

use crate::record::SplitStrategy;

/// Bounds and defaults for [`SplitConfig`], matching the reference
/// environment's 400 KB per-item cap with headroom.
pub mod limits {
    pub const MIN_SIZE_THRESHOLD: u64 = 100_000;
    pub const MAX_SIZE_THRESHOLD: u64 = 400_000;
    pub const MIN_CHUNK_SIZE: u64 = 50_000;
    pub const MAX_CHUNK_SIZE: u64 = 350_000;
    pub const MIN_RETRIES: u32 = 1;
    pub const MAX_RETRIES: u32 = 10;
    pub const MIN_OPERATION_TIMEOUT_MS: u64 = 5_000;
    pub const MAX_OPERATION_TIMEOUT_MS: u64 = 120_000;
}

/// Tuning for the checkpoint splitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Gate for the whole splitter. When false every record is written
    /// directly, whatever its size.
    pub enabled: bool,
    /// Records whose analyzed size exceeds this (strictly) are split.
    pub max_size_threshold: u64,
    pub strategy: SplitStrategy,
    /// Upper bound on one part's payload bytes.
    pub max_chunk_size: u64,
    /// Emit size-analysis logs on every write.
    pub enable_size_monitoring: bool,
    /// Sort-key prefix of auxiliary parts. Used on write and read alike.
    pub split_record_prefix: String,
    /// Attempts per part before the whole write rolls back.
    pub max_retries: u32,
    /// Wall-clock deadline per operation, milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size_threshold: 358_400,
            strategy: SplitStrategy::MessageLevel,
            max_chunk_size: 307_200,
            enable_size_monitoring: true,
            split_record_prefix: "split".to_string(),
            max_retries: 3,
            operation_timeout_ms: 30_000,
        }
    }
}

impl SplitConfig {
    /// Check every field against its documented bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use limits::*;

        if !(MIN_SIZE_THRESHOLD..=MAX_SIZE_THRESHOLD).contains(&self.max_size_threshold) {
            return Err(ConfigError::SizeThresholdOutOfRange(self.max_size_threshold));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.max_chunk_size) {
            return Err(ConfigError::ChunkSizeOutOfRange(self.max_chunk_size));
        }
        if self.split_record_prefix.is_empty() {
            return Err(ConfigError::EmptySplitPrefix);
        }
        if !(MIN_RETRIES..=MAX_RETRIES).contains(&self.max_retries) {
            return Err(ConfigError::RetriesOutOfRange(self.max_retries));
        }
        if !(MIN_OPERATION_TIMEOUT_MS..=MAX_OPERATION_TIMEOUT_MS)
            .contains(&self.operation_timeout_ms)
        {
            return Err(ConfigError::TimeoutOutOfRange(self.operation_timeout_ms));
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_size_threshold {0} outside 100000..=400000")]
    SizeThresholdOutOfRange(u64),
    #[error("max_chunk_size {0} outside 50000..=350000")]
    ChunkSizeOutOfRange(u64),
    #[error("split_record_prefix must not be empty")]
    EmptySplitPrefix,
    #[error("max_retries {0} outside 1..=10")]
    RetriesOutOfRange(u32),
    #[error("operation_timeout_ms {0} outside 5000..=120000")]
    TimeoutOutOfRange(u64),
}

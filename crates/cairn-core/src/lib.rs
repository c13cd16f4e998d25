//! cairn-core — checkpoint types, stored-record format, configuration, and
//! pure size analysis. The store crate depends on this one; nothing here
//! performs I/O.

pub mod checkpoint;
pub mod config;
pub mod record;
pub mod serial;
pub mod sizer;

pub use checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple, JsonMap,
};
pub use config::{ConfigError, SplitConfig};
pub use record::{SplitMetadata, SplitStrategy, StoredRecord};
pub use serial::SerializationError;
pub use sizer::{CheckpointSizer, SizeAnalysis, SplitVerdict};

//! Logical checkpoint types — the unit a caller stores.
//!
//! A checkpoint is a semi-structured snapshot of an agent conversation:
//! a mapping from channel name to channel value, plus version markers.
//! Certain channel values are objects carrying an ordered `"messages"`
//! sequence; those channels are the target of message-level splitting.
//!
//! Channel maps preserve insertion order (serde_json `preserve_order`),
//! which the canonical serializer depends on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Insertion-ordered JSON object map.
pub type JsonMap = serde_json::Map<String, Value>;

/// Per-channel version markers. Values are opaque to the engine.
pub type ChannelVersions = JsonMap;

/// One snapshot of conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version.
    pub v: u32,
    /// Checkpoint id. Also the tail of the stored record's sort key.
    pub id: String,
    /// Creation time, ISO-8601.
    pub ts: String,
    /// Channel name → channel value, in insertion order.
    pub channel_values: JsonMap,
    /// Channel name → version marker.
    pub channel_versions: ChannelVersions,
}

impl Checkpoint {
    /// Channels whose value is an object carrying a `"messages"` array,
    /// in channel insertion order. Empty arrays are included — feasibility
    /// checks filter those out themselves.
    pub fn message_channels(&self) -> impl Iterator<Item = (&str, &Vec<Value>)> {
        self.channel_values.iter().filter_map(|(name, value)| {
            value
                .as_object()
                .and_then(|obj| obj.get("messages"))
                .and_then(Value::as_array)
                .map(|messages| (name.as_str(), messages))
        })
    }

    /// A copy of this checkpoint with every message sequence emptied.
    ///
    /// The message-level split stores this copy as the primary record; the
    /// original checkpoint is never mutated.
    pub fn with_stripped_messages(&self) -> Checkpoint {
        let mut stripped = self.clone();
        for (_, value) in stripped.channel_values.iter_mut() {
            if let Some(obj) = value.as_object_mut() {
                if obj.contains_key("messages") {
                    obj.insert("messages".to_string(), Value::Array(Vec::new()));
                }
            }
        }
        stripped
    }
}

/// Small opaque metadata stored alongside a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointMetadata(pub JsonMap);

/// Caller-facing reference to a checkpoint slot.
///
/// `checkpoint_id = None` means "the latest checkpoint in this
/// thread/namespace" on reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: String,
    #[serde(default)]
    pub checkpoint_ns: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.checkpoint_ns = ns.into();
        self
    }

    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }
}

/// A retrieved checkpoint together with the reference it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
}

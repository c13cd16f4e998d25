//! Caller-facing checkpoint store.
//!
//! The facade owns the split/reassemble decisions so callers only ever see
//! whole logical records: `put` shards transparently, `get_tuple` and
//! `list` reassemble transparently, and auxiliary part records never leak
//! into results. Degraded reads surface as "absent", with the reasons in
//! the logs.

use std::sync::Arc;

use cairn_core::checkpoint::{
    ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
};
use cairn_core::config::{ConfigError, SplitConfig};
use cairn_core::record::{
    checkpoint_namespace_prefix, checkpoint_record_id, split_key_prefix, StoredRecord,
};
use cairn_core::serial::{self, SerializationError};

use crate::reassembler::{CheckpointReassembler, ReassemblyOptions};
use crate::splitter::{CheckpointSplitter, SplitError};
use crate::store::{RecordStore, StoreError};

/// Failure surfaced by [`CheckpointStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointStoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checkpoint persistence over any [`RecordStore`], with transparent
/// splitting of records too large for the backend's per-item cap.
pub struct CheckpointStore {
    store: Arc<dyn RecordStore>,
    config: SplitConfig,
    splitter: CheckpointSplitter,
    reassembler: CheckpointReassembler,
}

impl CheckpointStore {
    /// Validates `config` once; the engine trusts it afterwards.
    pub fn new(store: Arc<dyn RecordStore>, config: SplitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            splitter: CheckpointSplitter::new(config.clone()),
            reassembler: CheckpointReassembler::new(config.clone()),
            config,
            store,
        })
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Persist a checkpoint. Returns the reference under which it can be
    /// read back.
    ///
    /// `new_versions` is merged into the checkpoint's `channel_versions`
    /// before anything is sized or stored.
    pub async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig, CheckpointStoreError> {
        let mut checkpoint = checkpoint;
        for (channel, version) in new_versions {
            checkpoint.channel_versions.insert(channel, version);
        }

        let record_id = checkpoint_record_id(&config.checkpoint_ns, &checkpoint.id);
        let outcome = self
            .splitter
            .split_if_needed(
                &config.thread_id,
                &record_id,
                &checkpoint,
                &metadata,
                self.store.as_ref(),
            )
            .await?;

        if !outcome.was_split {
            let checkpoint_json = serial::to_canonical(&checkpoint, "checkpoint")?;
            let metadata_json = serial::to_canonical(&metadata, "checkpoint metadata")?;
            self.store
                .create(StoredRecord::unsplit(
                    config.thread_id.clone(),
                    record_id,
                    checkpoint_json,
                    metadata_json,
                ))
                .await?;
        }

        Ok(CheckpointConfig {
            thread_id: config.thread_id.clone(),
            checkpoint_ns: config.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint.id),
        })
    }

    /// Read one checkpoint. With a `checkpoint_id` the lookup is direct;
    /// without one the latest checkpoint in the thread/namespace wins.
    ///
    /// A record that cannot be reassembled (incomplete or corrupted part
    /// set) reads as `None`; the warnings go to the log.
    pub async fn get_tuple(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<CheckpointTuple>, CheckpointStoreError> {
        let record = match &config.checkpoint_id {
            Some(checkpoint_id) => {
                let record_id = checkpoint_record_id(&config.checkpoint_ns, checkpoint_id);
                self.store.get(&config.thread_id, &record_id).await?
            }
            None => self.latest_record(config).await?,
        };
        let Some(record) = record else {
            return Ok(None);
        };
        self.resolve_record(config, record).await
    }

    /// Every checkpoint in the thread/namespace, in `record_id` sort
    /// order. Auxiliary part records are filtered out; split primaries are
    /// reassembled on the fly and skipped if degraded.
    pub async fn list(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Vec<CheckpointTuple>, CheckpointStoreError> {
        let prefix = checkpoint_namespace_prefix(&config.checkpoint_ns);
        let records = self
            .store
            .query_by_thread(&config.thread_id, Some(&prefix))
            .await?;

        let split_prefix = split_key_prefix(&self.config.split_record_prefix);
        let mut tuples = Vec::new();
        for record in records {
            if record.record_id.starts_with(&split_prefix) {
                continue;
            }
            match self.resolve_record(config, record).await {
                Ok(Some(tuple)) => tuples.push(tuple),
                // resolve_record already logged the reassembly warnings
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(error = %error, "skipping undecodable checkpoint record");
                }
            }
        }
        Ok(tuples)
    }

    /// Remove every record under the thread — checkpoints, auxiliary
    /// parts, and anything else the host keeps there. The first failing
    /// delete fails the call; the caller retries and a later call reclaims
    /// survivors.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointStoreError> {
        let records = self.store.query_by_thread(thread_id, None).await?;
        let count = records.len();
        for record in records {
            self.store.delete(thread_id, &record.record_id).await?;
        }
        tracing::debug!(thread_id, records = count, "thread deleted");
        Ok(())
    }

    /// Most recent checkpoint record in the namespace, skipping auxiliary
    /// part records.
    async fn latest_record(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Option<StoredRecord>, CheckpointStoreError> {
        let prefix = checkpoint_namespace_prefix(&config.checkpoint_ns);
        let records = self
            .store
            .query_by_thread(&config.thread_id, Some(&prefix))
            .await?;
        let split_prefix = split_key_prefix(&self.config.split_record_prefix);
        Ok(records
            .into_iter()
            .filter(|record| !record.record_id.starts_with(&split_prefix))
            .last())
    }

    /// Turn a stored record into a caller-facing tuple. Legacy and
    /// unsharded records decode in place; split primaries go through the
    /// reassembler. Degraded reassembly maps to `None`.
    async fn resolve_record(
        &self,
        config: &CheckpointConfig,
        record: StoredRecord,
    ) -> Result<Option<CheckpointTuple>, CheckpointStoreError> {
        if !record.is_split {
            let Some(checkpoint_json) = record.checkpoint.as_deref() else {
                tracing::warn!(record_id = %record.record_id, "stored record has no checkpoint payload");
                return Ok(None);
            };
            let Some(metadata_json) = record.metadata.as_deref() else {
                tracing::warn!(record_id = %record.record_id, "stored record has no metadata payload");
                return Ok(None);
            };
            let checkpoint: Checkpoint = serial::from_canonical(checkpoint_json, "checkpoint")?;
            let metadata: CheckpointMetadata =
                serial::from_canonical(metadata_json, "checkpoint metadata")?;
            return Ok(Some(self.tuple(config, checkpoint, metadata)));
        }

        let options = ReassemblyOptions {
            validate_checksums: true,
            timeout_ms: self.config.operation_timeout_ms,
            enable_logging: self.config.enable_size_monitoring,
        };
        let result = self
            .reassembler
            .reassemble(
                &record.thread_id,
                &record.record_id,
                self.store.as_ref(),
                &options,
            )
            .await;
        if !result.success {
            tracing::warn!(
                record_id = %record.record_id,
                warnings = ?result.warnings,
                "checkpoint reassembly failed; treating record as absent"
            );
            return Ok(None);
        }
        let (Some(checkpoint), Some(metadata)) = (result.checkpoint, result.metadata) else {
            tracing::warn!(record_id = %record.record_id, "reassembly succeeded without payloads");
            return Ok(None);
        };
        Ok(Some(self.tuple(config, checkpoint, metadata)))
    }

    fn tuple(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> CheckpointTuple {
        CheckpointTuple {
            config: CheckpointConfig {
                thread_id: config.thread_id.clone(),
                checkpoint_ns: config.checkpoint_ns.clone(),
                checkpoint_id: Some(checkpoint.id.clone()),
            },
            checkpoint,
            metadata,
        }
    }
}

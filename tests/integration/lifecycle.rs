use crate::*;

use anyhow::Result;
use cairn_core::checkpoint::{CheckpointConfig, JsonMap};
use cairn_core::record::{split_key_prefix, StoredRecord};
use cairn_core::serial;

// ══════════════════════════════════════════════════════════════════════════════
//  Listing
// ══════════════════════════════════════════════════════════════════════════════

/// After a sharded put, listing the thread yields exactly one tuple for
/// the logical record — fully reassembled — and no key with the split
/// prefix ever appears.
#[tokio::test]
async fn list_yields_one_reassembled_tuple_per_logical_record() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");
    let checkpoint = make_checkpoint("c1", 100, 6000);

    facade
        .put(&config, checkpoint.clone(), empty_metadata(), JsonMap::new())
        .await?;
    assert!(store.record_count() > 1, "fixture must shard");

    let tuples = facade.list(&config).await?;
    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0].checkpoint, checkpoint);

    let prefix = split_key_prefix("split");
    for tuple in &tuples {
        let id = tuple.config.checkpoint_id.as_deref().unwrap();
        assert!(!id.starts_with(&prefix));
    }
    Ok(())
}

/// Mixed thread: sharded, plain, and legacy records list together in
/// record-id order, shards invisible.
#[tokio::test]
async fn list_interleaves_sharded_and_plain_records_in_order() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");

    facade
        .put(&config, make_checkpoint("b", 100, 6000), empty_metadata(), JsonMap::new())
        .await?;
    facade
        .put(&config, make_checkpoint("c", 2, 100), empty_metadata(), JsonMap::new())
        .await?;
    let legacy_checkpoint = make_checkpoint("a", 1, 10);
    store
        .create(StoredRecord::unsplit(
            "thread-a",
            "checkpoint##a",
            serial::to_canonical(&legacy_checkpoint, "checkpoint")?,
            "{}".to_string(),
        ))
        .await?;

    let tuples = facade.list(&config).await?;
    let ids: Vec<_> = tuples
        .iter()
        .map(|t| t.checkpoint.id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Thread deletion
// ══════════════════════════════════════════════════════════════════════════════

/// One sharded put (N parts) plus one legacy record: deleting the thread
/// removes exactly N + 1 records.
#[tokio::test]
async fn delete_thread_reclaims_every_part_and_record() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");

    facade
        .put(&config, make_checkpoint("big", 100, 6000), empty_metadata(), JsonMap::new())
        .await?;
    let parts = store
        .get("thread-a", "checkpoint##big")
        .await?
        .unwrap()
        .split_metadata
        .unwrap()
        .total_parts;
    store
        .create(StoredRecord::unsplit(
            "thread-a",
            "checkpoint##legacy",
            "{}".to_string(),
            "{}".to_string(),
        ))
        .await?;
    assert_eq!(store.record_count() as u32, parts + 1);

    facade.delete_thread("thread-a").await?;
    assert_eq!(store.record_count(), 0);
    Ok(())
}

/// Deleting twice lands in the same final state.
#[tokio::test]
async fn delete_thread_is_idempotent() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");
    facade
        .put(&config, make_checkpoint("c1", 100, 6000), empty_metadata(), JsonMap::new())
        .await?;

    facade.delete_thread("thread-a").await?;
    facade.delete_thread("thread-a").await?;
    assert_eq!(store.record_count(), 0);
    assert!(facade.list(&config).await?.is_empty());
    Ok(())
}

/// Deletion is scoped to the partition key: neighbors keep their records.
#[tokio::test]
async fn delete_thread_leaves_other_threads_untouched() -> Result<()> {
    let (facade, store) = facade(message_config());
    facade
        .put(
            &CheckpointConfig::new("thread-a"),
            make_checkpoint("c1", 100, 6000),
            empty_metadata(),
            JsonMap::new(),
        )
        .await?;
    facade
        .put(
            &CheckpointConfig::new("thread-b"),
            make_checkpoint("c1", 2, 100),
            empty_metadata(),
            JsonMap::new(),
        )
        .await?;

    facade.delete_thread("thread-a").await?;
    assert_eq!(store.record_count(), 1);
    let tuples = facade.list(&CheckpointConfig::new("thread-b")).await?;
    assert_eq!(tuples.len(), 1);
    Ok(())
}

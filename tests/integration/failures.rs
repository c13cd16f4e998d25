use crate::*;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use cairn_core::checkpoint::{CheckpointConfig, JsonMap};
use cairn_core::record::{split_part_record_id, split_parts_prefix};
use cairn_store::reassembler::{CheckpointReassembler, ReassemblyOptions};
use cairn_store::splitter::SplitError;

// ══════════════════════════════════════════════════════════════════════════════
//  Degraded reads
// ══════════════════════════════════════════════════════════════════════════════

/// Delete one auxiliary after a successful sharded put: the read degrades
/// to "absent" and the reassembler reports the part count it found.
#[tokio::test]
async fn missing_part_reads_as_absent_with_part_count_warning() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");
    let checkpoint = make_checkpoint("c1", 100, 6000);

    let reference = facade
        .put(&config, checkpoint, empty_metadata(), JsonMap::new())
        .await?;

    let total = store
        .get("thread-a", "checkpoint##c1")
        .await?
        .unwrap()
        .split_metadata
        .unwrap()
        .total_parts;
    store
        .delete("thread-a", &split_part_record_id("split", "checkpoint##c1", 2))
        .await?;

    // The facade maps the degraded read to None
    assert!(facade.get_tuple(&reference).await?.is_none());

    // The reassembler's structured result names the shortfall
    let reassembler = CheckpointReassembler::new(message_config());
    let result = reassembler
        .reassemble(
            "thread-a",
            "checkpoint##c1",
            store.as_ref(),
            &ReassemblyOptions::default(),
        )
        .await;
    assert!(!result.success);
    assert!(result
        .warnings
        .contains(&format!("Found {}/{} parts", total - 1, total)));
    Ok(())
}

/// Corrupt a part's payload in place: checksum validation rejects the set
/// and the facade reads it as absent.
#[tokio::test]
async fn corrupted_part_payload_reads_as_absent() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");
    let reference = facade
        .put(
            &config,
            make_checkpoint("c1", 100, 6000),
            empty_metadata(),
            JsonMap::new(),
        )
        .await?;

    let part_id = split_part_record_id("split", "checkpoint##c1", 1);
    let mut part = store.get("thread-a", &part_id).await?.unwrap();
    let data = part.message_split_data.as_mut().unwrap();
    data.messages_data = data.messages_data.replace("\"role\"", "\"r0le\"");
    store.create(part).await?;

    assert!(facade.get_tuple(&reference).await?.is_none());
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Write failure + rollback
// ══════════════════════════════════════════════════════════════════════════════

/// The store persistently refuses the third part. The put exhausts its
/// retries, rolls back, and surfaces the underlying error; afterwards no
/// record of the set — primary or auxiliary — survives.
#[tokio::test]
async fn failed_part_write_rolls_back_the_whole_set() -> Result<()> {
    let store = Arc::new(FlakyStore::new("#part#0003"));
    let facade = facade_over(store.clone(), message_config());
    let config = CheckpointConfig::new("thread-a");

    let error = facade
        .put(
            &config,
            make_checkpoint("c1", 100, 6000),
            empty_metadata(),
            JsonMap::new(),
        )
        .await
        .unwrap_err();
    match error {
        cairn_store::CheckpointStoreError::Split(SplitError::RetriesExhausted {
            record_id,
            attempts,
            ..
        }) => {
            assert!(record_id.ends_with("#part#0003"));
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(store.create_attempts.load(Ordering::SeqCst), 3);

    // Nothing survives the rollback
    assert!(store.inner.get("thread-a", "checkpoint##c1").await?.is_none());
    let leftovers = store
        .inner
        .query_by_thread(
            "thread-a",
            Some(&split_parts_prefix("split", "checkpoint##c1")),
        )
        .await?;
    assert!(leftovers.is_empty(), "orphan parts: {leftovers:?}");
    assert_eq!(store.inner.record_count(), 0);
    Ok(())
}

/// A failing put leaves the thread clean enough for the same put to
/// succeed once the store recovers.
#[tokio::test]
async fn put_succeeds_after_store_recovers() -> Result<()> {
    let flaky = Arc::new(FlakyStore::new("#part#0002"));
    let facade = facade_over(flaky.clone(), message_config());
    let config = CheckpointConfig::new("thread-a");
    let checkpoint = make_checkpoint("c1", 100, 6000);

    assert!(facade
        .put(&config, checkpoint.clone(), empty_metadata(), JsonMap::new())
        .await
        .is_err());

    // Same payload against a healthy store over the same backing map
    let healthy = facade_over(
        Arc::new(flaky.inner.clone()),
        message_config(),
    );
    let reference = healthy
        .put(&config, checkpoint.clone(), empty_metadata(), JsonMap::new())
        .await?;
    let tuple = healthy.get_tuple(&reference).await?.unwrap();
    assert_eq!(tuple.checkpoint, checkpoint);
    Ok(())
}

use crate::*;

use anyhow::Result;
use cairn_core::checkpoint::{CheckpointConfig, JsonMap};
use cairn_core::config::SplitConfig;
use cairn_core::record::{split_parts_prefix, SplitStrategy};
use cairn_core::sizer::CheckpointSizer;

// ══════════════════════════════════════════════════════════════════════════════
//  Shard-set shape
// ══════════════════════════════════════════════════════════════════════════════

/// Message-level split of a 100-message checkpoint: one stripped primary
/// at the logical key plus a dozen-odd auxiliaries, all carrying the same
/// set descriptor.
#[tokio::test]
async fn message_level_split_produces_a_coherent_part_set() -> Result<()> {
    let (facade, store) = facade(message_config());
    let config = CheckpointConfig::new("thread-a");
    let checkpoint = make_checkpoint("c1", 100, 6000);

    facade
        .put(&config, checkpoint, empty_metadata(), JsonMap::new())
        .await?;

    let primary = store.get("thread-a", "checkpoint##c1").await?.unwrap();
    assert!(primary.is_split);
    let descriptor = primary.split_metadata.clone().unwrap();
    assert_eq!(descriptor.part_number, 0);
    assert_eq!(descriptor.strategy, SplitStrategy::MessageLevel);
    assert_eq!(descriptor.original_record_id, "checkpoint##c1");

    // The primary's stored checkpoint carries empty message sequences
    let stored: cairn_core::checkpoint::Checkpoint =
        serde_json::from_str(primary.checkpoint.as_deref().unwrap())?;
    for (_, messages) in stored.message_channels() {
        assert!(messages.is_empty());
    }

    let auxiliaries = store
        .query_by_thread(
            "thread-a",
            Some(&split_parts_prefix("split", "checkpoint##c1")),
        )
        .await?;
    assert!(
        auxiliaries.len() >= 12,
        "expected at least 12 auxiliaries, found {}",
        auxiliaries.len()
    );
    assert_eq!(descriptor.total_parts as usize, auxiliaries.len() + 1);

    // Part numbers are contiguous 1..=k and every part agrees on the set
    for (i, part) in auxiliaries.iter().enumerate() {
        let sm = part.split_metadata.as_ref().unwrap();
        assert_eq!(sm.part_number as usize, i + 1);
        assert_eq!(sm.total_parts, descriptor.total_parts);
        assert_eq!(sm.original_record_id, "checkpoint##c1");
        assert_eq!(sm.split_timestamp, descriptor.split_timestamp);
        assert!(sm.checksum.is_some());
        assert!(part.checkpoint.is_none());
        let data = part.message_split_data.as_ref().unwrap();
        assert!(data.start_message_index <= data.end_message_index);
        assert_eq!(data.checkpoint_metadata.total_messages, 100);
    }

    // Total stored records for the key set match the descriptor
    assert_eq!(store.record_count() as u32, descriptor.total_parts);
    Ok(())
}

/// Content-level split: numbered chunks starting at 1, the first at the
/// logical key, every chunk at the configured bound except the last.
#[tokio::test]
async fn content_level_split_produces_numbered_chunks() -> Result<()> {
    let (facade, store) = facade(content_config());
    let config = CheckpointConfig::new("thread-a");
    let checkpoint = make_checkpoint("c1", 100, 6000);

    facade
        .put(&config, checkpoint, empty_metadata(), JsonMap::new())
        .await?;

    let first = store.get("thread-a", "checkpoint##c1").await?.unwrap();
    let descriptor = first.split_metadata.clone().unwrap();
    assert_eq!(descriptor.part_number, 1);
    assert_eq!(descriptor.strategy, SplitStrategy::ContentLevel);
    assert!(descriptor.total_parts >= 2);
    assert!(first.checkpoint.is_none());
    assert!(first.message_split_data.is_none());

    let mut chunk_sizes = vec![first.content_split_data.as_ref().unwrap().chunk_data.len()];
    let auxiliaries = store
        .query_by_thread(
            "thread-a",
            Some(&split_parts_prefix("split", "checkpoint##c1")),
        )
        .await?;
    assert_eq!(auxiliaries.len() as u32, descriptor.total_parts - 1);
    for (i, part) in auxiliaries.iter().enumerate() {
        let sm = part.split_metadata.as_ref().unwrap();
        assert_eq!(sm.part_number as usize, i + 2);
        let data = part.content_split_data.as_ref().unwrap();
        assert_eq!(data.encoding, "base64");
        chunk_sizes.push(data.chunk_data.len());
    }

    // Greedy chunking fills every chunk but the last to the bound
    let (last, full) = chunk_sizes.split_last().unwrap();
    for size in full {
        assert_eq!(*size, 50_000);
    }
    assert!(*last <= 50_000 && *last > 0);
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
//  Threshold boundary
// ══════════════════════════════════════════════════════════════════════════════

/// The threshold comparison is strict: a record measuring exactly the
/// threshold is not split; one byte over is.
#[tokio::test]
async fn threshold_boundary_is_strict() -> Result<()> {
    let checkpoint = make_checkpoint("c1", 14, 6000);
    let metadata = empty_metadata();

    // Measure the record once, then pin thresholds around the measurement
    let probe = CheckpointSizer::new(message_config());
    let analysis = probe.analyze(&checkpoint, &metadata)?;
    let measured = analysis.total_size;
    assert!(
        (100_001..=400_000).contains(&measured),
        "fixture drifted out of the configurable threshold range: {measured}"
    );

    let at_threshold = SplitConfig {
        max_size_threshold: measured,
        ..message_config()
    };
    let (facade_at, store_at) = facade(at_threshold);
    facade_at
        .put(
            &CheckpointConfig::new("thread-a"),
            checkpoint.clone(),
            metadata.clone(),
            JsonMap::new(),
        )
        .await?;
    assert_eq!(store_at.record_count(), 1, "size == threshold must not split");

    let below_threshold = SplitConfig {
        max_size_threshold: measured - 1,
        ..message_config()
    };
    let (facade_below, store_below) = facade(below_threshold);
    facade_below
        .put(
            &CheckpointConfig::new("thread-a"),
            checkpoint,
            metadata,
            JsonMap::new(),
        )
        .await?;
    assert!(
        store_below.record_count() > 1,
        "size == threshold + 1 must split"
    );
    Ok(())
}

//! Crash recovery tests
//!
//! These tests verify:
//! - Committed actions survive a restart via log replay
//! - Checkpoints bound replay and let old segments go
//! - Aborted actions leave nothing behind after a restart
//! - The partition reopens onto the recovered pages intact

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use dirpart::partition::{Dn, Entry};
use dirpart::{ActionRecordManager, Config, Partition, PartitionConfig};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn open_arm(dir: &Path) -> ActionRecordManager {
    let config = Config::builder().data_dir(dir).build();
    ActionRecordManager::open(&config).unwrap()
}

fn open_partition(dir: &Path, indexed: &[&str]) -> Partition {
    let config = Config::builder().data_dir(dir).build();
    let arm = Arc::new(ActionRecordManager::open(&config).unwrap());
    Partition::open(arm, config, PartitionConfig::new(indexed.iter().copied())).unwrap()
}

fn person(dn: &str, cn: &str) -> Entry {
    let mut entry = Entry::new(Dn::new(dn));
    entry.add("cn", cn.as_bytes());
    entry
}

fn wal_segments(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".wal"))
        .collect();
    names.sort();
    names
}

// =============================================================================
// Log replay
// =============================================================================

#[test]
fn test_commit_survives_restart_without_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let page;
    {
        let arm = open_arm(dir);
        page = arm.alloc_page_id();
        let ctx = arm.begin_action(false, "writer").unwrap();
        arm.write_page(&ctx, page, Bytes::from_static(b"replayed")).unwrap();
        arm.end_action(&ctx).unwrap();
        // Dropped with no checkpoint and no close: recovery must replay
    }

    let arm = open_arm(dir);
    let ctx = arm.begin_action(true, "reader").unwrap();
    let image = arm.read_page(&ctx, page).unwrap().unwrap();
    assert_eq!(&image[..], b"replayed");
    arm.end_action(&ctx).unwrap();
}

#[test]
fn test_replay_applies_commits_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let page;
    {
        let arm = open_arm(dir);
        page = arm.alloc_page_id();
        let values: [&[u8]; 3] = [b"first", b"second", b"third"];
        for value in values {
            let ctx = arm.begin_action(false, "writer").unwrap();
            arm.write_page(&ctx, page, Bytes::copy_from_slice(value)).unwrap();
            arm.end_action(&ctx).unwrap();
        }
    }

    // Last committed image wins
    let arm = open_arm(dir);
    let ctx = arm.begin_action(true, "reader").unwrap();
    assert_eq!(&arm.read_page(&ctx, page).unwrap().unwrap()[..], b"third");
    arm.end_action(&ctx).unwrap();
}

#[test]
fn test_aborted_action_absent_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let kept_page;
    let lost_page;
    {
        let arm = open_arm(dir);
        kept_page = arm.alloc_page_id();
        lost_page = arm.alloc_page_id();

        let ctx = arm.begin_action(false, "committed").unwrap();
        arm.write_page(&ctx, kept_page, Bytes::from_static(b"kept")).unwrap();
        arm.end_action(&ctx).unwrap();

        let ctx = arm.begin_action(false, "aborted").unwrap();
        arm.write_page(&ctx, lost_page, Bytes::from_static(b"lost")).unwrap();
        arm.abort_action(&ctx).unwrap();
    }

    let arm = open_arm(dir);
    let ctx = arm.begin_action(true, "reader").unwrap();
    assert_eq!(&arm.read_page(&ctx, kept_page).unwrap().unwrap()[..], b"kept");
    assert!(arm.read_page(&ctx, lost_page).unwrap().is_none());
    arm.end_action(&ctx).unwrap();
}

#[test]
fn test_page_ids_never_reused_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let last_page;
    {
        let arm = open_arm(dir);
        let page = arm.alloc_page_id();
        last_page = page;
        let ctx = arm.begin_action(false, "writer").unwrap();
        arm.write_page(&ctx, page, Bytes::from_static(b"data")).unwrap();
        arm.end_action(&ctx).unwrap();
    }

    let arm = open_arm(dir);
    assert!(arm.alloc_page_id() > last_page);
}

// =============================================================================
// Checkpoints
// =============================================================================

#[test]
fn test_checkpoint_then_restart() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let page;
    {
        let arm = open_arm(dir);
        page = arm.alloc_page_id();
        let ctx = arm.begin_action(false, "writer").unwrap();
        arm.write_page(&ctx, page, Bytes::from_static(b"checkpointed")).unwrap();
        arm.end_action(&ctx).unwrap();
        arm.checkpoint().unwrap();
        arm.close().unwrap();
    }

    let arm = open_arm(dir);
    let ctx = arm.begin_action(true, "reader").unwrap();
    assert_eq!(
        &arm.read_page(&ctx, page).unwrap().unwrap()[..],
        b"checkpointed"
    );
    arm.end_action(&ctx).unwrap();
}

#[test]
fn test_checkpoint_purges_replayed_segments() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    // Tiny segments so commits roll the log over several times
    let config = Config::builder()
        .data_dir(dir)
        .log_file_size(256)
        .build();
    let arm = ActionRecordManager::open(&config).unwrap();

    let page = arm.alloc_page_id();
    for i in 0..20u32 {
        let ctx = arm.begin_action(false, "writer").unwrap();
        arm.write_page(&ctx, page, Bytes::from(vec![i as u8; 64])).unwrap();
        arm.end_action(&ctx).unwrap();
    }
    let before = wal_segments(dir);
    assert!(before.len() > 1);

    arm.checkpoint().unwrap();
    let after = wal_segments(dir);
    assert!(after.len() < before.len());
    arm.close().unwrap();

    // Recovery from the checkpoint alone still sees the last image
    let arm = open_arm(dir);
    let ctx = arm.begin_action(true, "reader").unwrap();
    assert_eq!(&arm.read_page(&ctx, page).unwrap().unwrap()[..], &[19u8; 64][..]);
    arm.end_action(&ctx).unwrap();
}

#[test]
fn test_commits_after_checkpoint_are_replayed() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let before_page;
    let after_page;
    {
        let arm = open_arm(dir);
        before_page = arm.alloc_page_id();
        after_page = arm.alloc_page_id();

        let ctx = arm.begin_action(false, "before").unwrap();
        arm.write_page(&ctx, before_page, Bytes::from_static(b"in-checkpoint")).unwrap();
        arm.end_action(&ctx).unwrap();

        arm.checkpoint().unwrap();

        let ctx = arm.begin_action(false, "after").unwrap();
        arm.write_page(&ctx, after_page, Bytes::from_static(b"in-log")).unwrap();
        arm.end_action(&ctx).unwrap();
        // No second checkpoint: the tail commit lives only in the log
    }

    let arm = open_arm(dir);
    let ctx = arm.begin_action(true, "reader").unwrap();
    assert_eq!(
        &arm.read_page(&ctx, before_page).unwrap().unwrap()[..],
        b"in-checkpoint"
    );
    assert_eq!(&arm.read_page(&ctx, after_page).unwrap().unwrap()[..], b"in-log");
    arm.end_action(&ctx).unwrap();
}

// =============================================================================
// Partition recovery
// =============================================================================

#[test]
fn test_partition_reopens_with_data_and_indices() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    {
        let partition = open_partition(dir, &["cn"]);
        let guard = partition.arm().guarded_action(false, "writer").unwrap();
        partition
            .insert(guard.context(), &person("cn=alice,dc=example", "alice"))
            .unwrap();
        partition
            .insert(guard.context(), &person("cn=bob,dc=example", "bob"))
            .unwrap();
        guard.commit().unwrap();
    }

    let partition = open_partition(dir, &["cn"]);
    let guard = partition.arm().guarded_action(true, "reader").unwrap();

    let alice = partition
        .lookup(guard.context(), &Dn::new("cn=alice,dc=example"), None)
        .unwrap();
    assert_eq!(alice.get("cn").unwrap(), &[b"alice".to_vec()][..]);

    let ids = partition.lookup_ids(guard.context(), "cn", b"bob").unwrap();
    assert_eq!(ids.len(), 1);

    partition.verify(guard.context()).unwrap();
    guard.commit().unwrap();
}

#[test]
fn test_entry_ids_monotone_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    let first_ids: Vec<u64>;
    {
        let partition = open_partition(dir, &[]);
        let guard = partition.arm().guarded_action(false, "writer").unwrap();
        first_ids = vec![
            partition
                .insert(guard.context(), &person("cn=a,dc=example", "a"))
                .unwrap(),
            partition
                .insert(guard.context(), &person("cn=b,dc=example", "b"))
                .unwrap(),
        ];
        guard.commit().unwrap();
    }

    let partition = open_partition(dir, &[]);
    let guard = partition.arm().guarded_action(false, "writer").unwrap();
    let next = partition
        .insert(guard.context(), &person("cn=c,dc=example", "c"))
        .unwrap();
    assert!(next > *first_ids.iter().max().unwrap());
    guard.commit().unwrap();
}

#[test]
fn test_index_added_on_reopen_covers_new_entries() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    {
        let partition = open_partition(dir, &[]);
        let guard = partition.arm().guarded_action(false, "writer").unwrap();
        partition
            .insert(guard.context(), &person("cn=alice,dc=example", "alice"))
            .unwrap();
        guard.commit().unwrap();
    }

    // Reopen with cn newly configured: the index tree is created empty and
    // covers entries inserted from here on.
    let partition = open_partition(dir, &["cn"]);
    let guard = partition.arm().guarded_action(false, "writer").unwrap();
    let bob = partition
        .insert(guard.context(), &person("cn=bob,dc=example", "bob"))
        .unwrap();
    assert_eq!(
        partition.lookup_ids(guard.context(), "cn", b"bob").unwrap(),
        vec![bob]
    );
    assert!(partition
        .lookup_ids(guard.context(), "cn", b"alice")
        .unwrap()
        .is_empty());
    guard.commit().unwrap();
}

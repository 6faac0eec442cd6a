//! Tests for the write-ahead log
//!
//! These tests verify:
//! - Appending stamps anchors in order
//! - Scans from an anchor return the appended payloads
//! - Segment rollover at the soft size threshold
//! - Torn / corrupt tails end the scan at the valid prefix
//! - Reopen resumes after the last valid record

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use dirpart::log::{Log, LogAnchor, UserLogRecord};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().to_path_buf();
    (temp_dir, dir)
}

/// Surface tracing output (torn tails, rotations) when RUST_LOG is set
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open_log(dir: &Path) -> Log {
    Log::open(dir, "wal", 4096, 1024 * 1024).unwrap()
}

fn append(log: &mut Log, payload: &[u8], sync: bool) -> LogAnchor {
    let mut record = UserLogRecord::new(payload.to_vec());
    log.append(&mut record, sync).unwrap();
    record.anchor().expect("anchor stamped on append")
}

fn segment_file(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("log_{:08}.wal", seq))
}

// =============================================================================
// Append + Scan
// =============================================================================

#[test]
fn test_append_stamps_anchor() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    let a1 = append(&mut log, b"first", true);
    let a2 = append(&mut log, b"second", true);

    assert_eq!(a1, LogAnchor::START);
    assert!(a2 > a1);
    assert_eq!(a2.segment, 0);
    // len (4) + crc (4) + payload (5)
    assert_eq!(a2.offset, 13);
}

#[test]
fn test_append_then_scan() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    append(&mut log, b"one", true);
    append(&mut log, b"two", true);
    append(&mut log, b"three", true);

    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"one");
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"two");
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"three");
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_scan_from_mid_anchor() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    append(&mut log, b"skipped", true);
    let from = append(&mut log, b"wanted", true);
    append(&mut log, b"also wanted", true);

    let mut scanner = log.begin_scan(from).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"wanted");
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"also wanted");
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_scan_sees_unsynced_records() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    append(&mut log, b"buffered", false);

    // begin_scan flushes the append buffer first
    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"buffered");
}

#[test]
fn test_rescan_after_more_appends() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    append(&mut log, b"a", true);
    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    scanner.next_record().unwrap().unwrap();
    assert!(scanner.next_record().unwrap().is_none());
    let resume = scanner.position();

    append(&mut log, b"b", true);

    let mut scanner = log.begin_scan(resume).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"b");
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_scanned_records_carry_their_anchors() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    let a1 = append(&mut log, b"one", true);
    let a2 = append(&mut log, b"two", true);

    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().anchor(), Some(a1));
    assert_eq!(scanner.next_record().unwrap().unwrap().anchor(), Some(a2));
}

// =============================================================================
// Write-time validation
// =============================================================================

#[test]
fn test_empty_payload_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    let mut record = UserLogRecord::new(Vec::new());
    assert!(log.append(&mut record, true).is_err());
    assert!(record.anchor().is_none());
}

#[test]
fn test_scan_anchor_beyond_head_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    append(&mut log, b"only", true);
    assert!(log.begin_scan(LogAnchor::new(5, 0)).is_err());
}

// =============================================================================
// Segment rollover
// =============================================================================

#[test]
fn test_rollover_at_threshold() {
    let (_temp, dir) = setup_temp_dir();
    // 64-byte soft threshold: a few records per segment
    let mut log = Log::open(&dir, "wal", 0, 64).unwrap();

    let mut anchors = Vec::new();
    for i in 0..20 {
        anchors.push(append(&mut log, format!("record-{:02}", i).as_bytes(), false));
    }

    // Rollover happened: records live in more than one segment
    let last = anchors.last().unwrap();
    assert!(last.segment > 0);
    assert!(segment_file(&dir, 0).exists());
    assert!(segment_file(&dir, last.segment).exists());

    // A scan crosses segment boundaries in order
    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    for i in 0..20 {
        let record = scanner.next_record().unwrap().unwrap();
        assert_eq!(record.data(), format!("record-{:02}", i).as_bytes());
    }
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_record_never_split_across_segments() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = Log::open(&dir, "wal", 0, 64).unwrap();

    // Much larger than the threshold: must still land whole in one segment
    let big = vec![0xAB; 500];
    let anchor = append(&mut log, &big, true);
    assert_eq!(anchor.offset, 0);

    let mut scanner = log.begin_scan(anchor).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), &big[..]);
}

#[test]
fn test_purge_before_checkpoint_anchor() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = Log::open(&dir, "wal", 0, 64).unwrap();

    for i in 0..20 {
        append(&mut log, format!("record-{:02}", i).as_bytes(), false);
    }
    let head = log.head_anchor();
    assert!(head.segment > 1);

    log.purge_before(head).unwrap();

    assert!(!segment_file(&dir, 0).exists());
    assert!(segment_file(&dir, head.segment).exists());

    // Scanning from before the purge horizon is now an error
    assert!(log.begin_scan(LogAnchor::START).is_err());
    // Scanning from the head still works
    let mut scanner = log.begin_scan(head).unwrap();
    assert!(scanner.next_record().unwrap().is_none());
}

// =============================================================================
// Corruption / torn tails
// =============================================================================

#[test]
fn test_torn_tail_ends_scan() {
    let (_temp, dir) = setup_temp_dir();
    let mut log = open_log(&dir);

    append(&mut log, b"good", true);
    drop(log.close());

    // Simulate a crash mid-append: garbage at the tail
    let mut file = OpenOptions::new()
        .append(true)
        .open(segment_file(&dir, 0))
        .unwrap();
    file.write_all(&[0xDE, 0xAD]).unwrap();
    drop(file);

    let mut log = open_log(&dir);
    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"good");
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_reopen_truncates_torn_tail_and_resumes() {
    let (_temp, dir) = setup_temp_dir();

    let first_anchor;
    {
        let mut log = open_log(&dir);
        first_anchor = append(&mut log, b"durable", true);
        log.close().unwrap();
    }

    // Torn frame header at the tail
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(segment_file(&dir, 0))
            .unwrap();
        file.write_all(&[0x10, 0x00, 0x00]).unwrap();
    }

    // Reopen: tail is dropped, append resumes at the valid end
    let mut log = open_log(&dir);
    let second_anchor = append(&mut log, b"after-crash", true);
    assert_eq!(second_anchor.offset, first_anchor.offset + 8 + 7);

    let mut scanner = log.begin_scan(LogAnchor::START).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"durable");
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"after-crash");
    assert!(scanner.next_record().unwrap().is_none());
}

#[test]
fn test_durable_record_survives_reopen() {
    let (_temp, dir) = setup_temp_dir();

    let anchor;
    {
        let mut log = open_log(&dir);
        append(&mut log, b"before", true);
        anchor = append(&mut log, b"must-survive", true);
        // No close: simulate a hard kill after the synced append
    }

    let mut log = open_log(&dir);
    let mut scanner = log.begin_scan(anchor).unwrap();
    assert_eq!(scanner.next_record().unwrap().unwrap().data(), b"must-survive");
}

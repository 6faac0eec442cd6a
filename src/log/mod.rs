//! Write-Ahead Log Module
//!
//! Append-only, segmented durability log for user records.
//!
//! ## Responsibilities
//! - Append opaque user payloads before any page mutation
//! - CRC32 checksums for corruption detection
//! - Stamp each record with its durable LogAnchor
//! - Segment rollover at a soft size threshold
//! - Forward scans from an anchor for recovery and auditing
//!
//! ## File Format
//! ```text
//! log_<seq>.<suffix>
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬──────────┬────────────────┐ │
//! │ │ Len (4) │ CRC (4)  │ Payload        │ │
//! │ └─────────┴──────────┴────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬──────────┬────────────────┐ │
//! │ │ Len (4) │ CRC (4)  │ Payload        │ │
//! │ └─────────┴──────────┴────────────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A truncated or checksum-failing record marks the end of the valid log
//! prefix; scans stop there rather than failing.

mod record;
mod scanner;
mod writer;

pub use record::{LogAnchor, UserLogRecord, FRAME_HEADER_SIZE, MAX_RECORD_SIZE};
pub use scanner::LogScanner;
pub use writer::Log;

//! Log record framing
//!
//! Defines the user record, the durable anchor, and the on-disk frame.

use std::io::Read;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DirError, Result};

/// Size of the per-record frame header: length (4) + CRC32 (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum payload size accepted by the log (16 MB)
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// A durable position in the log: segment id plus byte offset of a record's
/// frame within that segment. Anchors order the same way records were
/// appended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LogAnchor {
    /// Segment sequence number
    pub segment: u64,

    /// Byte offset of the record frame within the segment
    pub offset: u64,
}

impl LogAnchor {
    /// Anchor at the very start of the log
    pub const START: LogAnchor = LogAnchor { segment: 0, offset: 0 };

    pub fn new(segment: u64, offset: u64) -> Self {
        Self { segment, offset }
    }
}

impl std::fmt::Display for LogAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.segment, self.offset)
    }
}

/// A caller-owned log payload. The log stamps in the anchor on append
/// (out-parameter semantics): the caller constructs and owns the payload,
/// the anchor is `None` until the record has been written.
#[derive(Debug, Clone)]
pub struct UserLogRecord {
    data: Vec<u8>,
    anchor: Option<LogAnchor>,
}

impl UserLogRecord {
    /// Create a record around a caller-supplied payload
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, anchor: None }
    }

    /// The payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The position this record was written at, if it has been logged
    pub fn anchor(&self) -> Option<LogAnchor> {
        self.anchor
    }

    pub(crate) fn set_anchor(&mut self, anchor: LogAnchor) {
        self.anchor = Some(anchor);
    }
}

// =============================================================================
// Frame encode / decode
// =============================================================================

/// Encode a payload into its on-disk frame. Fails on empty or oversized
/// payloads (write-time validation).
pub(crate) fn encode_frame(payload: &[u8]) -> Result<BytesMut> {
    if payload.is_empty() {
        return Err(DirError::InvalidLog("empty payload".to_string()));
    }
    if payload.len() > MAX_RECORD_SIZE {
        return Err(DirError::InvalidLog(format!(
            "payload too large: {} bytes",
            payload.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_u32_le(crc32fast::hash(payload));
    buf.put_slice(payload);
    Ok(buf)
}

/// Read one frame from the reader.
///
/// Returns `Ok(Some(payload))` for a valid record and `Ok(None)` at the end
/// of the valid prefix: clean EOF, a torn frame, an out-of-range length, or
/// a checksum mismatch all end the prefix. Only genuine I/O failures are
/// errors.
pub(crate) fn read_frame(reader: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match read_fully(reader, &mut header)? {
        ReadOutcome::Complete => {}
        ReadOutcome::CleanEof => return Ok(None),
        ReadOutcome::Torn => {
            tracing::warn!("torn frame header at log tail");
            return Ok(None);
        }
    }

    let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
    let crc = u32::from_le_bytes(header[4..8].try_into().unwrap());

    if len == 0 || len > MAX_RECORD_SIZE {
        tracing::warn!(len, "frame length out of range, treating as log tail");
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    match read_fully(reader, &mut payload)? {
        ReadOutcome::Complete => {}
        ReadOutcome::CleanEof | ReadOutcome::Torn => {
            tracing::warn!(len, "torn payload at log tail");
            return Ok(None);
        }
    }

    if crc32fast::hash(&payload) != crc {
        tracing::warn!(len, "checksum mismatch, treating as log tail");
        return Ok(None);
    }

    Ok(Some(payload))
}

enum ReadOutcome {
    Complete,
    CleanEof,
    Torn,
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::CleanEof
                } else {
                    ReadOutcome::Torn
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Complete)
}

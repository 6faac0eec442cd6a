//! Log scanner
//!
//! Lazy, forward-only record sequence starting at an anchor.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use crate::error::Result;

use super::record::{read_frame, FRAME_HEADER_SIZE};
use super::writer::segment_path;
use super::{LogAnchor, UserLogRecord};

/// Scans user records forward from a starting anchor, crossing segment
/// boundaries. The first torn or checksum-failing record ends the scan:
/// everything before it is the valid prefix.
pub struct LogScanner {
    dir: PathBuf,
    suffix: String,

    /// Segment currently being read
    segment: u64,

    /// Offset of the next frame within the current segment
    offset: u64,

    reader: Option<BufReader<File>>,

    /// Length of the current segment file, captured at open
    segment_len: u64,

    /// Set once the valid prefix has been exhausted
    done: bool,
}

impl LogScanner {
    pub(crate) fn new(dir: PathBuf, suffix: String, start: LogAnchor) -> Result<Self> {
        Ok(Self {
            dir,
            suffix,
            segment: start.segment,
            offset: start.offset,
            reader: None,
            segment_len: 0,
            done: false,
        })
    }

    /// Return the next valid record, stamped with its anchor, or `None`
    /// once the valid prefix is exhausted.
    pub fn next_record(&mut self) -> Result<Option<UserLogRecord>> {
        loop {
            if self.done {
                return Ok(None);
            }

            if self.reader.is_none() {
                let path = segment_path(&self.dir, &self.suffix, self.segment);
                if !path.exists() {
                    // No such segment: the scan has caught up with the head.
                    self.done = true;
                    return Ok(None);
                }
                let mut file = File::open(&path)?;
                self.segment_len = file.metadata()?.len();
                file.seek(SeekFrom::Start(self.offset))?;
                self.reader = Some(BufReader::new(file));
            }

            let reader = self.reader.as_mut().unwrap();
            match read_frame(reader)? {
                Some(payload) => {
                    let anchor = LogAnchor::new(self.segment, self.offset);
                    self.offset += (FRAME_HEADER_SIZE + payload.len()) as u64;
                    let mut record = UserLogRecord::new(payload);
                    record.set_anchor(anchor);
                    return Ok(Some(record));
                }
                None => {
                    if self.offset < self.segment_len {
                        // Valid prefix ended before the segment did: a corrupt
                        // record mid-log. Everything before it stands; nothing
                        // after it is replayed.
                        tracing::warn!(
                            segment = self.segment,
                            offset = self.offset,
                            "scan stopped at corrupt record"
                        );
                        self.done = true;
                        return Ok(None);
                    }
                    // Clean end of segment: continue into the next one if it
                    // exists. Otherwise this is the head; the position stays
                    // here so a later scan can resume from it.
                    let next = self.segment + 1;
                    if !segment_path(&self.dir, &self.suffix, next).exists() {
                        self.done = true;
                        return Ok(None);
                    }
                    self.reader = None;
                    self.segment = next;
                    self.offset = 0;
                }
            }
        }
    }

    /// Anchor of the position the scan will read next
    pub fn position(&self) -> LogAnchor {
        LogAnchor::new(self.segment, self.offset)
    }
}

impl Iterator for LogScanner {
    type Item = Result<UserLogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

//! Log writer
//!
//! Owns the current segment, the append buffer, and segment rollover.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DirError, Result};

use super::record::{encode_frame, read_frame, FRAME_HEADER_SIZE};
use super::scanner::LogScanner;
use super::{LogAnchor, UserLogRecord};

/// The write-ahead log: an ordered set of segment files plus an open append
/// handle on the newest one.
///
/// ## Durability contract
/// `append(record, sync=true)` returns only after the record is on durable
/// media; the action layer relies on this to make commit acknowledgement
/// imply durability. With `sync=false` the record is visible to scans (which
/// flush the append buffer) but may not survive a crash.
pub struct Log {
    dir: PathBuf,
    suffix: String,
    buffer_size: usize,
    file_size: u64,

    /// Sequence number of the segment being appended to
    segment: u64,

    /// Buffered handle on the current segment, positioned at the valid end
    writer: BufWriter<File>,

    /// End-of-valid-log offset within the current segment
    offset: u64,
}

impl Log {
    /// Open or create the log file set in `dir`.
    ///
    /// On reopen, the newest segment is scanned for its valid prefix and any
    /// torn tail is truncated so appends resume after the last valid record.
    pub fn open(
        dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
        buffer_size: usize,
        file_size: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        let suffix = suffix.into();

        if file_size < FRAME_HEADER_SIZE as u64 {
            return Err(DirError::Config(format!(
                "log_file_size too small: {}",
                file_size
            )));
        }

        fs::create_dir_all(&dir)?;

        let segments = list_segments(&dir, &suffix)?;
        let segment = segments.last().copied().unwrap_or(0);
        let path = segment_path(&dir, &suffix, segment);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        // Find the valid prefix of the newest segment and drop any torn tail.
        let valid = valid_prefix_len(&mut file)?;
        if valid < file.metadata()?.len() {
            tracing::warn!(
                segment,
                valid,
                "truncating torn tail of newest log segment"
            );
            file.set_len(valid)?;
            file.sync_data()?;
        }
        file.seek(SeekFrom::Start(valid))?;

        tracing::debug!(segment, offset = valid, "log opened");

        Ok(Self {
            dir,
            suffix,
            buffer_size,
            file_size,
            segment,
            writer: BufWriter::with_capacity(buffer_size.max(1), file),
            offset: valid,
        })
    }

    /// Append a record, stamping its anchor.
    ///
    /// If `sync` is true, blocks until the record is confirmed on durable
    /// media. With a zero buffer size every append flushes regardless.
    pub fn append(&mut self, record: &mut UserLogRecord, sync: bool) -> Result<()> {
        let frame = encode_frame(record.data())?;
        let anchor = LogAnchor::new(self.segment, self.offset);

        self.writer.write_all(&frame)?;
        self.offset += frame.len() as u64;
        record.set_anchor(anchor);

        if sync {
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
        } else if self.buffer_size == 0 {
            self.writer.flush()?;
        }

        // Soft rollover: the record that crossed the threshold stays whole
        // in its segment; the next append lands in a fresh one.
        if self.offset >= self.file_size {
            self.rotate()?;
        }

        Ok(())
    }

    /// The anchor the next appended record will receive
    pub fn head_anchor(&self) -> LogAnchor {
        LogAnchor::new(self.segment, self.offset)
    }

    /// Begin a lazy forward scan starting at or after `start`.
    ///
    /// Flushes the append buffer first so unsynced records are visible to
    /// the scan. The scan is finite (it ends at the current head) but may be
    /// re-invoked with a fresh anchor after more appends.
    pub fn begin_scan(&mut self, start: LogAnchor) -> Result<LogScanner> {
        self.writer.flush()?;

        if start.segment > self.segment
            || (start.segment == self.segment && start.offset > self.offset)
        {
            return Err(DirError::InvalidLog(format!(
                "scan anchor {} is beyond the log head {}",
                start,
                self.head_anchor()
            )));
        }
        let oldest = list_segments(&self.dir, &self.suffix)?
            .first()
            .copied()
            .unwrap_or(self.segment);
        if start.segment < oldest {
            return Err(DirError::InvalidLog(format!(
                "scan anchor {} precedes the oldest retained segment {}",
                start, oldest
            )));
        }

        LogScanner::new(self.dir.clone(), self.suffix.clone(), start)
    }

    /// Delete segments strictly older than `anchor`'s segment.
    ///
    /// Called after a checkpoint has made everything before the anchor
    /// redundant. The anchor's own segment is always retained.
    pub fn purge_before(&mut self, anchor: LogAnchor) -> Result<()> {
        for seq in list_segments(&self.dir, &self.suffix)? {
            if seq < anchor.segment {
                let path = segment_path(&self.dir, &self.suffix, seq);
                fs::remove_file(&path)?;
                tracing::info!(segment = seq, "purged log segment behind checkpoint");
            }
        }
        Ok(())
    }

    /// Flush and sync, consuming the log
    pub fn close(mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;

        self.segment += 1;
        self.offset = 0;
        let path = segment_path(&self.dir, &self.suffix, self.segment);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        self.writer = BufWriter::with_capacity(self.buffer_size.max(1), file);

        tracing::info!(segment = self.segment, "rotated to new log segment");
        Ok(())
    }
}

// =============================================================================
// Segment file helpers (shared with the scanner)
// =============================================================================

pub(crate) fn segment_path(dir: &Path, suffix: &str, seq: u64) -> PathBuf {
    dir.join(format!("log_{:08}.{}", seq, suffix))
}

pub(crate) fn list_segments(dir: &Path, suffix: &str) -> Result<Vec<u64>> {
    let mut seqs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(seq) = parse_segment_seq(&path, suffix) {
            seqs.push(seq);
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

fn parse_segment_seq(path: &Path, suffix: &str) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{}", suffix))?;
    stem.strip_prefix("log_")?.parse::<u64>().ok()
}

/// Length of the valid record prefix of a segment file
fn valid_prefix_len(file: &mut File) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);
    let mut valid: u64 = 0;
    while let Some(payload) = read_frame(&mut reader)? {
        valid += (FRAME_HEADER_SIZE + payload.len()) as u64;
    }
    Ok(valid)
}

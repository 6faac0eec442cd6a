//! Large-value input path
//!
//! The contract the protocol layer decodes into: values accumulate in
//! memory up to a configured limit; anything larger streams to a spool file
//! and is carried by reference instead of being materialized.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DirError, Result};

static SPOOL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A decoded value: inline bytes, or a reference to a spool file when the
/// value exceeded the decode limit.
#[derive(Debug)]
pub enum LargeValue {
    Inline(Vec<u8>),
    Spooled { path: PathBuf, len: u64 },
}

impl LargeValue {
    pub fn len(&self) -> u64 {
        match self {
            LargeValue::Inline(bytes) => bytes.len() as u64,
            LargeValue::Spooled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_spooled(&self) -> bool {
        matches!(self, LargeValue::Spooled { .. })
    }

    /// Materialize the value, removing the spool file if there was one
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            LargeValue::Inline(bytes) => Ok(bytes),
            LargeValue::Spooled { path, len } => {
                let mut bytes = Vec::with_capacity(len as usize);
                File::open(&path)?.read_to_end(&mut bytes)?;
                fs::remove_file(&path)?;
                Ok(bytes)
            }
        }
    }
}

/// Accumulates decoded chunks, spilling to disk once the in-memory limit is
/// crossed. One buffer produces one value.
pub struct DecodeBuffer {
    limit: usize,
    spool_dir: PathBuf,
    len: u64,
    state: BufferState,
}

enum BufferState {
    Inline(Vec<u8>),
    Spooled { file: File, path: PathBuf },
}

impl DecodeBuffer {
    pub fn new(limit: usize, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            limit,
            spool_dir: spool_dir.into(),
            len: 0,
            state: BufferState::Inline(Vec::new()),
        }
    }

    /// Append a decoded chunk
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.len += chunk.len() as u64;

        match &mut self.state {
            BufferState::Inline(buf) => {
                if buf.len() + chunk.len() <= self.limit {
                    buf.extend_from_slice(chunk);
                    return Ok(());
                }

                // Crossed the limit: move what we have to a spool file and
                // stream from here on.
                fs::create_dir_all(&self.spool_dir)?;
                let path = self.spool_dir.join(format!(
                    "spool_{}_{}.tmp",
                    std::process::id(),
                    SPOOL_COUNTER.fetch_add(1, Ordering::SeqCst)
                ));
                let mut file = OpenOptions::new()
                    .create_new(true)
                    .write(true)
                    .open(&path)?;
                file.write_all(buf)?;
                file.write_all(chunk)?;

                tracing::debug!(limit = self.limit, len = self.len, "value spilled to spool");
                self.state = BufferState::Spooled { file, path };
                Ok(())
            }
            BufferState::Spooled { file, .. } => {
                file.write_all(chunk)?;
                Ok(())
            }
        }
    }

    /// Bytes accumulated so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish decoding and hand back the value
    pub fn finish(self) -> Result<LargeValue> {
        match self.state {
            BufferState::Inline(buf) => Ok(LargeValue::Inline(buf)),
            BufferState::Spooled { mut file, path } => {
                file.flush()?;
                file.sync_data().map_err(DirError::Io)?;
                Ok(LargeValue::Spooled {
                    path,
                    len: self.len,
                })
            }
        }
    }
}

//! Record Manager Module
//!
//! Paged key/value substrate for the tree and partition layers.
//!
//! ## Responsibilities
//! - Hold the committed page map (the state readers snapshot)
//! - Allocate page ids monotonically, never reusing them
//! - Persist and reload the page map as a checkpoint image
//!
//! ## Concurrency
//! - `committed`: RwLock; snapshots are clones of the map (page images are
//!   ref-counted `Bytes`, so a clone is shallow)
//! - `next_page_id`: atomic counter (lock-free)
//!
//! Callers never touch pages directly: all access goes through the action
//! layer, which buffers writes per action and publishes them on commit.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::log::LogAnchor;

/// Identifier of one page in the store
pub type PageId = u64;

/// Page id reserved for the partition's tree directory
pub const DIRECTORY_PAGE: PageId = 0;

/// A consistent view of the committed pages, taken at action begin
pub type PageSnapshot = HashMap<PageId, Bytes>;

/// Checkpoint image persisted to disk: the committed pages plus the log
/// anchor recovery should replay from.
#[derive(Serialize, Deserialize)]
struct CheckpointImage {
    next_page_id: u64,
    anchor: LogAnchor,
    pages: HashMap<PageId, Vec<u8>>,
}

/// The paged record store
pub struct RecordManager {
    /// Committed page images, shared by all snapshots
    committed: RwLock<PageSnapshot>,

    /// Next page id to hand out (page 0 is reserved for the directory)
    next_page_id: AtomicU64,

    /// Where the checkpoint image lives
    checkpoint_path: PathBuf,
}

impl RecordManager {
    /// Open the store, loading the checkpoint image if one exists.
    ///
    /// Returns the manager and the anchor recovery must replay the log from
    /// (`LogAnchor::START` when no checkpoint has ever been taken).
    pub fn open(checkpoint_path: impl Into<PathBuf>) -> Result<(Self, LogAnchor)> {
        let checkpoint_path = checkpoint_path.into();

        let (pages, next_page_id, anchor) = if checkpoint_path.exists() {
            let image = load_checkpoint(&checkpoint_path)?;
            let pages = image
                .pages
                .into_iter()
                .map(|(id, bytes)| (id, Bytes::from(bytes)))
                .collect::<PageSnapshot>();
            tracing::info!(
                pages = pages.len(),
                anchor = %image.anchor,
                "loaded page checkpoint"
            );
            (pages, image.next_page_id, image.anchor)
        } else {
            (PageSnapshot::new(), DIRECTORY_PAGE + 1, LogAnchor::START)
        };

        Ok((
            Self {
                committed: RwLock::new(pages),
                next_page_id: AtomicU64::new(next_page_id),
                checkpoint_path,
            },
            anchor,
        ))
    }

    /// Allocate a fresh page id. Ids are monotone and never reused.
    pub fn alloc_page_id(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Bump the allocator past `id`. Used during log replay so ids seen in
    /// replayed commits are never handed out again.
    pub fn note_page_id(&self, id: PageId) {
        self.next_page_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    /// Take a consistent snapshot of the committed pages
    pub fn snapshot(&self) -> PageSnapshot {
        self.committed.read().clone()
    }

    /// Publish a committed write set. The caller has already made the
    /// corresponding log record durable.
    pub fn publish(&self, writes: Vec<(PageId, Bytes)>) {
        let mut committed = self.committed.write();
        for (id, image) in writes {
            committed.insert(id, image);
        }
    }

    /// Persist the given snapshot and replay anchor as the new checkpoint.
    ///
    /// Written to a temp file, synced, then renamed over the old image so a
    /// crash mid-checkpoint leaves the previous one intact.
    pub fn write_checkpoint(&self, snapshot: &PageSnapshot, anchor: LogAnchor) -> Result<()> {
        let image = CheckpointImage {
            next_page_id: self.next_page_id.load(Ordering::SeqCst),
            anchor,
            pages: snapshot
                .iter()
                .map(|(id, bytes)| (*id, bytes.to_vec()))
                .collect(),
        };

        let tmp_path = self.checkpoint_path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let encoded = bincode::serialize(&image)?;
            file.write_all(&encoded)?;
            file.sync_data()?;
        }
        fs::rename(&tmp_path, &self.checkpoint_path)?;

        tracing::info!(
            pages = snapshot.len(),
            anchor = %anchor,
            "wrote page checkpoint"
        );
        Ok(())
    }
}

fn load_checkpoint(path: &Path) -> Result<CheckpointImage> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

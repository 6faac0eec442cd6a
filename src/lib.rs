//! # dirpart
//!
//! An embedded directory partition store with:
//! - B-tree master table and secondary attribute indices
//! - Snapshot-isolated actions (begin/end/abort) over a paged record manager
//! - Segmented write-ahead logging with crash recovery
//! - Scoped, index-backed search with an assertion chain
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Partition                             │
//! │      (master table + DN table + secondary indices)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  tuples
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        BTree                                │
//! │          (page-backed nodes, pluggable comparator)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  pages
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 ActionRecordManager                         │
//! │        (snapshots, write buffers, commit/abort)             │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!     ┌─────────────┐                  ┌───────────────┐
//!     │     Log     │                  │ RecordManager │
//!     │  (segments) │                  │ (page store)  │
//!     └─────────────┘                  └───────────────┘
//! ```
//!
//! Writes flow through an action: tuple mutations buffer page images in the
//! action's write set, `end_action` frames the write set as one log record,
//! forces it durable, and only then publishes the pages to readers. Reads
//! never touch the log; they see the snapshot taken at `begin_action`.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod log;
pub mod rm;
pub mod action;
pub mod tree;
pub mod partition;
pub mod decode;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DirError, Result};
pub use config::Config;
pub use action::{ActionContext, ActionGuard, ActionRecordManager};
pub use partition::{Partition, PartitionConfig};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of dirpart
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

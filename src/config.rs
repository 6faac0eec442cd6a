//! Configuration for dirpart
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a dirpart instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (log segments, checkpoint).
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── log_<seq>.wal    (write-ahead log segments)
    ///     ├── pages.chk        (page checkpoint)
    ///     └── spool/           (large-value spool files)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Write-Ahead Log Configuration
    // -------------------------------------------------------------------------
    /// Append buffer size in bytes. 0 disables buffering: every append
    /// flushes to the OS immediately.
    pub log_buffer_size: usize,

    /// Soft rollover threshold per log segment (in bytes). A record that
    /// crosses the threshold finishes in its segment; the next append opens
    /// a fresh segment.
    pub log_file_size: u64,

    /// File name suffix for log segments
    pub log_suffix: String,

    // -------------------------------------------------------------------------
    // B-Tree Configuration
    // -------------------------------------------------------------------------
    /// Max tuples per B-tree node before a split
    pub btree_order: usize,

    // -------------------------------------------------------------------------
    // Search Configuration
    // -------------------------------------------------------------------------
    /// Max entries held by one search context's resuscitation cache
    pub search_cache_size: usize,

    // -------------------------------------------------------------------------
    // Decode Configuration
    // -------------------------------------------------------------------------
    /// In-memory size limit for decoded values; larger values spill to a
    /// spool file under the data directory.
    pub decode_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./dirpart_data"),
            log_buffer_size: 4096,
            log_file_size: 4 * 1024 * 1024, // 4 MB
            log_suffix: "wal".to_string(),
            btree_order: 64,
            search_cache_size: 256,
            decode_limit: 1024 * 1024, // 1 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the log append buffer size (0 disables buffering)
    pub fn log_buffer_size(mut self, size: usize) -> Self {
        self.config.log_buffer_size = size;
        self
    }

    /// Set the soft segment rollover threshold (in bytes)
    pub fn log_file_size(mut self, size: u64) -> Self {
        self.config.log_file_size = size;
        self
    }

    /// Set the log segment file suffix
    pub fn log_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.log_suffix = suffix.into();
        self
    }

    /// Set the B-tree node order (max tuples per node)
    pub fn btree_order(mut self, order: usize) -> Self {
        self.config.btree_order = order;
        self
    }

    /// Set the search cache capacity (entries)
    pub fn search_cache_size(mut self, size: usize) -> Self {
        self.config.search_cache_size = size;
        self
    }

    /// Set the decode limit (bytes held in memory before spilling)
    pub fn decode_limit(mut self, limit: usize) -> Self {
        self.config.decode_limit = limit;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

//! Error types for dirpart
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using DirError
pub type Result<T> = std::result::Result<T, DirError>;

/// Unified error type for dirpart operations
#[derive(Debug, Error)]
pub enum DirError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("invalid log record: {0}")]
    InvalidLog(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    #[error("entry not found")]
    EntryNotFound,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Action Usage Errors
    // -------------------------------------------------------------------------
    #[error("action usage error: {0}")]
    Usage(String),

    // -------------------------------------------------------------------------
    // Consistency Errors
    // -------------------------------------------------------------------------
    #[error("index consistency violation: {0}")]
    Consistency(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for DirError {
    fn from(err: bincode::Error) -> Self {
        DirError::Serialization(err.to_string())
    }
}

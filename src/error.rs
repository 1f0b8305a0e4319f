//! Error types for sdio

use std::io;
use thiserror::Error;

use crate::record::Timestamp;

/// Result type for sdio operations
pub type Result<T> = std::result::Result<T, SdioError>;

/// Errors that can occur in sdio
///
/// End of stream and refused seeks are not errors: `read` reports the former
/// as `Ok(None)` and `offset_seek` the latter as [`SeekOutcome::Refused`].
///
/// [`SeekOutcome::Refused`]: crate::reader::SeekOutcome::Refused
#[derive(Debug, Error)]
pub enum SdioError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Time window start lies after its end
    #[error("Invalid time window: start {start} is after end {end}")]
    InvalidWindow {
        /// Requested window start
        start: Timestamp,
        /// Requested window end
        end: Timestamp,
    },

    /// Data format name not recognized
    #[error("Unsupported data format: {0} (supported: dmap, json)")]
    UnsupportedFormat(String),

    /// Data file not found
    #[error("Data file not found: {0}")]
    FileNotFound(String),

    /// Data file not readable
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// `open` called while a file is already open
    #[error("Data file is already open")]
    AlreadyOpen,

    /// Operation needs an open file
    #[error("Data file is not open")]
    NotOpen,

    /// `open` called on a reader constructed without a file path
    #[error("No file path configured")]
    MissingPath,

    /// Malformed record data
    #[error("Invalid record format: {0}")]
    InvalidFormat(String),

    /// Record lacks a required field
    #[error("Record is missing required field '{0}'")]
    MissingField(String),

    /// Record time fields do not form a valid timestamp
    #[error("Invalid record time: {0}")]
    InvalidTime(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

//! Configuration types for sdio

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::FormatKind;
use crate::reader::Reader;
use crate::record::Timestamp;
use crate::window::TimeWindow;
use crate::{Result, SdioError};

/// Reader construction parameters
///
/// ```toml
/// start_time = "2012-11-24T04:00:00Z"
/// end_time = "2012-11-24T05:00:00Z"
/// format = "dmap"
/// file_path = "/data/20121124.0401.00.mcm.fitex"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Window start (inclusive)
    pub start_time: Timestamp,
    /// Window end (inclusive); unbounded if absent
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    /// Data format
    pub format: FormatKind,
    /// Data file to read
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl ReaderConfig {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed, or the window is invalid
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SdioError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| SdioError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`SdioError::InvalidWindow`] if the start is after the end
    pub fn validate(&self) -> Result<()> {
        TimeWindow::new(self.start_time, self.end_time).map(|_| ())
    }

    /// Construct the reader described by this configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn build(&self) -> Result<Reader> {
        Reader::new(
            self.start_time,
            self.end_time,
            self.format,
            self.file_path.clone(),
        )
    }
}

//! Record codecs for the supported data formats
//!
//! Every format implements [`RecordCodec`]. The reader picks one codec when
//! it is constructed and routes all decoding and positioning through it.

mod dmap;
mod json;

use std::fmt;
use std::io::{BufRead, Seek, SeekFrom};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use dmap::{
    encode_record, DmapCodec, DmapType, RecordHeader, DMAP_CODE, MAX_RECORD_SIZE,
    RECORD_HEADER_SIZE,
};
pub use json::JsonCodec;

use crate::record::Record;
use crate::{Result, SdioError};

/// Byte stream a codec decodes from
pub trait RecordStream: BufRead + Seek {}

impl<T: BufRead + Seek> RecordStream for T {}

/// Format-specific record decoding and stream positioning
///
/// Offsets are absolute byte positions. Any offset reported by [`tell`]
/// directly before a successful [`decode_next`] is a valid seek target for
/// that record.
///
/// [`tell`]: RecordCodec::tell
/// [`decode_next`]: RecordCodec::decode_next
pub trait RecordCodec: Send {
    /// Decode the record starting at the current position
    ///
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns error if the record is malformed or the read fails
    fn decode_next(&mut self, stream: &mut dyn RecordStream) -> Result<Option<Record>>;

    /// Current byte offset
    ///
    /// # Errors
    ///
    /// Returns error if the position cannot be queried
    fn tell(&mut self, stream: &mut dyn RecordStream) -> Result<u64> {
        Ok(stream.stream_position()?)
    }

    /// Move to an absolute byte offset, returning the new offset
    ///
    /// # Errors
    ///
    /// Returns error if the seek fails
    fn seek(&mut self, stream: &mut dyn RecordStream, offset: u64) -> Result<u64> {
        Ok(stream.seek(SeekFrom::Start(offset))?)
    }

    /// Move to the first record
    ///
    /// # Errors
    ///
    /// Returns error if the seek fails
    fn rewind(&mut self, stream: &mut dyn RecordStream) -> Result<()> {
        self.seek(stream, 0).map(|_| ())
    }
}

/// Supported data file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum FormatKind {
    /// Packed binary DMAP records
    Dmap,
    /// Concatenated JSON objects, possibly spanning several lines
    Json,
}

impl FormatKind {
    /// All supported formats
    pub const ALL: [Self; 2] = [Self::Dmap, Self::Json];

    /// Format name as used in configuration
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Dmap => "dmap",
            Self::Json => "json",
        }
    }

    /// Build the codec for this format
    #[must_use]
    pub fn codec(self) -> Box<dyn RecordCodec> {
        match self {
            Self::Dmap => Box::new(DmapCodec::new()),
            Self::Json => Box::new(JsonCodec::new()),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for FormatKind {
    type Error = SdioError;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl FromStr for FormatKind {
    type Err = SdioError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SdioError::UnsupportedFormat(s.to_string()))
    }
}

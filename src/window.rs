//! Inclusive time window

use crate::record::Timestamp;
use crate::{Result, SdioError};

/// Inclusive `[start, end]` range of record times; no end means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: Timestamp,
    end: Option<Timestamp>,
}

impl TimeWindow {
    /// Create a window
    ///
    /// # Errors
    ///
    /// Returns [`SdioError::InvalidWindow`] if `start` is after `end`
    pub fn new(start: Timestamp, end: Option<Timestamp>) -> Result<Self> {
        if let Some(end) = end {
            if start > end {
                return Err(SdioError::InvalidWindow { start, end });
            }
        }
        Ok(Self { start, end })
    }

    /// Window start
    #[must_use]
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Window end, if bounded
    #[must_use]
    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    /// Whether `time` lies inside the window
    #[must_use]
    pub fn contains(&self, time: Timestamp) -> bool {
        time >= self.start && !self.is_past(time)
    }

    /// Whether `time` lies after the window end
    #[must_use]
    pub fn is_past(&self, time: Timestamp) -> bool {
        self.end.is_some_and(|end| time > end)
    }
}

//! Time-windowed record reader with byte-offset seeking

use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use crate::codec::{FormatKind, RecordCodec, RecordStream};
use crate::index::TimeIndex;
use crate::record::{Record, Timestamp};
use crate::window::TimeWindow;
use crate::{Result, SdioError};

/// Result of [`Reader::offset_seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Repositioned to this offset
    Moved(u64),
    /// Seek refused; the cursor stayed at this offset
    Refused(u64),
}

impl SeekOutcome {
    /// Offset after the call
    #[must_use]
    pub fn offset(self) -> u64 {
        match self {
            Self::Moved(offset) | Self::Refused(offset) => offset,
        }
    }

    /// Whether the cursor moved
    #[must_use]
    pub fn is_moved(self) -> bool {
        matches!(self, Self::Moved(_))
    }
}

/// Reader for one data file
///
/// Only records whose time falls inside the window are visible. The codec
/// is chosen at construction and handles every format-specific step; the
/// file handle is released on [`close`](Reader::close) or drop.
pub struct Reader {
    window: TimeWindow,
    format: Option<FormatKind>,
    codec: Box<dyn RecordCodec>,
    path: Option<PathBuf>,
    stream: Option<BufReader<File>>,
    index: Option<TimeIndex>,
}

impl Reader {
    /// Create a reader for a supported format
    ///
    /// No file access happens until [`open`](Reader::open).
    ///
    /// # Errors
    ///
    /// Returns [`SdioError::InvalidWindow`] if `start_time` is after `end_time`
    pub fn new(
        start_time: Timestamp,
        end_time: Option<Timestamp>,
        format: FormatKind,
        file_path: Option<PathBuf>,
    ) -> Result<Self> {
        let mut reader = Self::with_codec(start_time, end_time, format.codec(), file_path)?;
        reader.format = Some(format);
        Ok(reader)
    }

    /// Create a reader backed by a caller-supplied codec
    ///
    /// # Errors
    ///
    /// Returns [`SdioError::InvalidWindow`] if `start_time` is after `end_time`
    pub fn with_codec(
        start_time: Timestamp,
        end_time: Option<Timestamp>,
        codec: Box<dyn RecordCodec>,
        file_path: Option<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            window: TimeWindow::new(start_time, end_time)?,
            format: None,
            codec,
            path: file_path,
            stream: None,
            index: None,
        })
    }

    /// Time window
    #[must_use]
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Data format, `None` for a caller-supplied codec
    #[must_use]
    pub fn format(&self) -> Option<FormatKind> {
        self.format
    }

    /// Data file path
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether a file is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Index from the last [`create_index`](Reader::create_index) call
    #[must_use]
    pub fn index(&self) -> Option<&TimeIndex> {
        self.index.as_ref()
    }

    /// Open the data file read-only
    ///
    /// Any index built for a previously opened file is discarded.
    ///
    /// # Errors
    ///
    /// Returns error if the file is already open, no path is configured,
    /// or the file cannot be opened
    pub fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(SdioError::AlreadyOpen);
        }
        let path = self.path.as_ref().ok_or(SdioError::MissingPath)?;

        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SdioError::FileNotFound(path.display().to_string()),
            ErrorKind::PermissionDenied => SdioError::PermissionDenied(path.display().to_string()),
            _ => SdioError::Io(e),
        })?;

        debug!("Opened {} ({})", path.display(), self.format_name());
        self.stream = Some(BufReader::new(file));
        self.index = None;
        Ok(())
    }

    /// Release the file handle; no-op if already closed
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(
                "Closed {}",
                self.path.as_deref().map_or_else(String::new, |p| p.display().to_string())
            );
        }
    }

    /// Read the next record inside the window
    ///
    /// Records before the window start are skipped. Returns `Ok(None)` at end
    /// of stream or at the first record past the window end; that record has
    /// been consumed.
    ///
    /// # Errors
    ///
    /// Returns error if the file is not open or a record cannot be decoded
    pub fn read(&mut self) -> Result<Option<Record>> {
        let stream = self.stream.as_mut().ok_or(SdioError::NotOpen)?;

        loop {
            let Some(record) = self.codec.decode_next(stream)? else {
                debug!("Reached end of data");
                return Ok(None);
            };

            if self.window.is_past(record.time()) {
                debug!("Reached end of window at record time {}", record.time());
                return Ok(None);
            }
            if self.window.contains(record.time()) {
                return Ok(Some(record));
            }
            trace!("Skipping record at {} before window start", record.time());
        }
    }

    /// Iterate over the remaining records inside the window
    pub fn records(&mut self) -> Records<'_> {
        Records {
            reader: self,
            done: false,
        }
    }

    /// Index every in-window record by time
    ///
    /// Scans the whole file from the start, then returns the cursor to where
    /// it was. Replaces any earlier index.
    ///
    /// # Errors
    ///
    /// Returns error if the file is not open or a record cannot be decoded
    pub fn create_index(&mut self) -> Result<&TimeIndex> {
        let stream = self.stream.as_mut().ok_or(SdioError::NotOpen)?;
        let origin = self.codec.tell(stream)?;

        let scanned = scan_index(&mut *self.codec, stream, self.window);
        let restored = self.codec.seek(stream, origin);
        let index = scanned?;
        restored?;

        info!(
            "Indexed {} records ({} scan starts) in {}",
            index.len(),
            index.scan_count(),
            self.format_name()
        );
        Ok(self.index.insert(index))
    }

    /// Move to the record at `offset`
    ///
    /// With `force` the cursor moves unconditionally. Otherwise `offset` must
    /// be the start of an indexed record, and the seek is refused if it is
    /// not. An unforced seek builds the index first when none exists, which
    /// costs a full scan of the file.
    ///
    /// # Errors
    ///
    /// Returns error if the file is not open, indexing fails, or the seek fails
    pub fn offset_seek(&mut self, offset: u64, force: bool) -> Result<SeekOutcome> {
        if self.stream.is_none() {
            return Err(SdioError::NotOpen);
        }

        if !force {
            if self.index.is_none() {
                debug!("No index yet, building one before seeking");
                self.create_index()?;
            }
            let indexed = self
                .index
                .as_ref()
                .is_some_and(|index| index.contains_offset(offset));
            if !indexed {
                let current = self.offset_tell()?;
                debug!("Refused seek to unindexed offset {}, staying at {}", offset, current);
                return Ok(SeekOutcome::Refused(current));
            }
        }

        let stream = self.stream.as_mut().ok_or(SdioError::NotOpen)?;
        Ok(SeekOutcome::Moved(self.codec.seek(stream, offset)?))
    }

    /// Move to the record stamped exactly `time`
    ///
    /// Builds the index first when none exists. Refused if no indexed record
    /// has that time.
    ///
    /// # Errors
    ///
    /// Returns error if the file is not open, indexing fails, or the seek fails
    pub fn seek_time(&mut self, time: Timestamp) -> Result<SeekOutcome> {
        if self.stream.is_none() {
            return Err(SdioError::NotOpen);
        }
        if self.index.is_none() {
            self.create_index()?;
        }

        match self.index.as_ref().and_then(|index| index.offset_of(time)) {
            Some(offset) => self.offset_seek(offset, true),
            None => Ok(SeekOutcome::Refused(self.offset_tell()?)),
        }
    }

    /// Current byte offset
    ///
    /// # Errors
    ///
    /// Returns error if the file is not open or the position cannot be queried
    pub fn offset_tell(&mut self) -> Result<u64> {
        let stream = self.stream.as_mut().ok_or(SdioError::NotOpen)?;
        self.codec.tell(stream)
    }

    /// Move back to the first record
    ///
    /// # Errors
    ///
    /// Returns error if the file is not open or the seek fails
    pub fn rewind(&mut self) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(SdioError::NotOpen)?;
        self.codec.rewind(stream)?;
        debug!("Rewound to start of data");
        Ok(())
    }

    fn format_name(&self) -> &'static str {
        self.format.map_or("custom format", FormatKind::name)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("window", &self.window)
            .field("format", &self.format)
            .field("path", &self.path)
            .field("open", &self.stream.is_some())
            .field("indexed", &self.index.as_ref().map(TimeIndex::len))
            .finish_non_exhaustive()
    }
}

/// Iterator over in-window records, see [`Reader::records`]
///
/// Stops after end of stream or the first error.
#[derive(Debug)]
pub struct Records<'a> {
    reader: &'a mut Reader,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn scan_index(
    codec: &mut dyn RecordCodec,
    stream: &mut dyn RecordStream,
    window: TimeWindow,
) -> Result<TimeIndex> {
    codec.rewind(stream)?;

    let mut index = TimeIndex::new();
    let mut total = 0usize;
    loop {
        let offset = codec.tell(stream)?;
        let Some(record) = codec.decode_next(stream)? else {
            break;
        };
        total += 1;

        if window.contains(record.time()) {
            index.insert(record.time(), offset, record.is_scan_start());
        }
    }

    debug!("Reached end of data after {} records", total);
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_record;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn at(h: u32, m: u32, s: u32, ms: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2012, 11, 24, h, m, s).unwrap() + chrono::Duration::milliseconds(ms)
    }

    fn dmap_file(records: &[(Timestamp, i16)]) -> (NamedTempFile, Vec<u64>) {
        let mut file = NamedTempFile::new().unwrap();
        let mut offsets = Vec::new();
        let mut offset = 0u64;
        for &(time, scan) in records {
            let bytes = encode_record(&Record::new(time, scan)).unwrap();
            offsets.push(offset);
            offset += bytes.len() as u64;
            file.write_all(&bytes).unwrap();
        }
        file.flush().unwrap();
        (file, offsets)
    }

    fn reader_for(file: &NamedTempFile) -> Reader {
        Reader::new(
            at(4, 0, 0, 0),
            Some(at(5, 0, 0, 0)),
            FormatKind::Dmap,
            Some(file.path().to_path_buf()),
        )
        .unwrap()
    }

    #[test]
    fn test_not_open() {
        let mut reader = Reader::new(at(4, 0, 0, 0), None, FormatKind::Dmap, None).unwrap();
        assert!(matches!(reader.read(), Err(SdioError::NotOpen)));
        assert!(matches!(reader.offset_tell(), Err(SdioError::NotOpen)));
        assert!(matches!(reader.offset_seek(0, true), Err(SdioError::NotOpen)));
        assert!(matches!(reader.rewind(), Err(SdioError::NotOpen)));
        assert!(matches!(reader.create_index(), Err(SdioError::NotOpen)));
        assert!(matches!(reader.open(), Err(SdioError::MissingPath)));
    }

    #[test]
    fn test_double_open() {
        let (file, _) = dmap_file(&[(at(4, 5, 0, 0), 1)]);
        let mut reader = reader_for(&file);

        reader.open().unwrap();
        assert!(matches!(reader.open(), Err(SdioError::AlreadyOpen)));

        reader.close();
        reader.close();
        assert!(!reader.is_open());
        reader.open().unwrap();
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = Reader::new(
            at(4, 0, 0, 0),
            None,
            FormatKind::Json,
            Some(dir.path().join("missing.json")),
        )
        .unwrap();
        assert!(matches!(reader.open(), Err(SdioError::FileNotFound(_))));
        assert!(!reader.is_open());
    }

    #[test]
    fn test_read_skips_before_window() {
        let (file, _) = dmap_file(&[
            (at(3, 59, 59, 0), 1),
            (at(4, 0, 0, 0), 0),
            (at(4, 30, 0, 0), 0),
        ]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();

        assert_eq!(reader.read().unwrap().unwrap().time(), at(4, 0, 0, 0));
        assert_eq!(reader.read().unwrap().unwrap().time(), at(4, 30, 0, 0));
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_read_stops_past_window_without_rewinding() {
        let (file, offsets) = dmap_file(&[
            (at(4, 10, 0, 0), 1),
            (at(5, 30, 0, 0), 1),
            (at(4, 20, 0, 0), 0),
        ]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();

        assert!(reader.read().unwrap().is_some());
        assert!(reader.read().unwrap().is_none());
        assert_eq!(reader.offset_tell().unwrap(), offsets[2]);
    }

    #[test]
    fn test_index_restores_position() {
        let (file, offsets) = dmap_file(&[
            (at(4, 1, 0, 0), 1),
            (at(4, 2, 0, 0), 0),
            (at(4, 3, 0, 0), 0),
        ]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();
        reader.read().unwrap();

        let before = reader.offset_tell().unwrap();
        assert_eq!(before, offsets[1]);

        let index = reader.create_index().unwrap().clone();
        assert_eq!(index.len(), 3);
        assert_eq!(index.scan_count(), 1);
        assert_eq!(reader.offset_tell().unwrap(), before);
        assert_eq!(reader.index(), Some(&index));
    }

    #[test]
    fn test_unforced_seek_builds_index() {
        let (file, offsets) = dmap_file(&[(at(4, 1, 0, 0), 1), (at(4, 2, 0, 0), 0)]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();
        assert!(reader.index().is_none());

        let outcome = reader.offset_seek(offsets[1], false).unwrap();
        assert_eq!(outcome, SeekOutcome::Moved(offsets[1]));
        assert!(reader.index().is_some());
        assert_eq!(reader.read().unwrap().unwrap().time(), at(4, 2, 0, 0));
    }

    #[test]
    fn test_seek_refused_and_forced() {
        let (file, offsets) = dmap_file(&[(at(4, 1, 0, 0), 1), (at(4, 2, 0, 0), 0)]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();

        let outcome = reader.offset_seek(offsets[1] + 3, false).unwrap();
        assert_eq!(outcome, SeekOutcome::Refused(0));
        assert!(!outcome.is_moved());
        assert_eq!(reader.offset_tell().unwrap(), 0);

        let outcome = reader.offset_seek(offsets[1], true).unwrap();
        assert_eq!(outcome.offset(), offsets[1]);
    }

    #[test]
    fn test_seek_time() {
        let (file, offsets) = dmap_file(&[(at(4, 1, 0, 0), 1), (at(4, 2, 0, 0), 0)]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();

        assert_eq!(
            reader.seek_time(at(4, 2, 0, 0)).unwrap(),
            SeekOutcome::Moved(offsets[1])
        );
        assert_eq!(
            reader.seek_time(at(4, 2, 30, 0)).unwrap(),
            SeekOutcome::Refused(offsets[1])
        );
    }

    #[test]
    fn test_records_iterator() {
        let (file, _) = dmap_file(&[
            (at(4, 1, 0, 0), 1),
            (at(4, 2, 0, 0), 0),
            (at(6, 0, 0, 0), 1),
        ]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();

        let times: Vec<_> = reader
            .records()
            .map(|record| record.unwrap().time())
            .collect();
        assert_eq!(times, vec![at(4, 1, 0, 0), at(4, 2, 0, 0)]);
    }

    #[test]
    fn test_caller_supplied_codec() {
        let (file, _) = dmap_file(&[(at(4, 1, 0, 0), 1)]);
        let mut reader = Reader::with_codec(
            at(4, 0, 0, 0),
            None,
            Box::new(crate::codec::DmapCodec::new()),
            Some(file.path().to_path_buf()),
        )
        .unwrap();
        assert_eq!(reader.format(), None);

        reader.open().unwrap();
        assert_eq!(reader.read().unwrap().unwrap().time(), at(4, 1, 0, 0));
    }

    #[test]
    fn test_reopen_discards_index() {
        let (file, _) = dmap_file(&[(at(4, 1, 0, 0), 1)]);
        let mut reader = reader_for(&file);
        reader.open().unwrap();
        reader.create_index().unwrap();

        reader.close();
        reader.open().unwrap();
        assert!(reader.index().is_none());
    }
}

//! sdio - time-indexed reader for SuperDARN data files
//!
//! Reads DMAP and JSON record files through one [`Reader`], limited to a
//! time window. An in-memory [`TimeIndex`] maps record times to byte
//! offsets so callers can jump straight to a record or scan start.
//!
//! ```no_run
//! use chrono::{TimeZone, Utc};
//! use sdio::{FormatKind, Reader};
//!
//! let start = Utc.with_ymd_and_hms(2012, 11, 24, 4, 0, 0).unwrap();
//! let end = Utc.with_ymd_and_hms(2012, 11, 24, 5, 0, 0).unwrap();
//! let mut reader = Reader::new(
//!     start,
//!     Some(end),
//!     FormatKind::Dmap,
//!     Some("20121124.0401.00.mcm.fitex".into()),
//! )?;
//! reader.open()?;
//!
//! let scans: Vec<u64> = reader.create_index()?.scan_starts().values().copied().collect();
//! for offset in scans {
//!     reader.offset_seek(offset, false)?;
//!     if let Some(record) = reader.read()? {
//!         println!("scan at {}", record.time());
//!     }
//! }
//! # Ok::<(), sdio::SdioError>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::multiple_crate_versions
)]

pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod reader;
pub mod record;
pub mod window;

pub use codec::{FormatKind, RecordCodec, RecordStream};
pub use config::ReaderConfig;
pub use error::{Result, SdioError};
pub use index::TimeIndex;
pub use reader::{Reader, Records, SeekOutcome};
pub use record::{Record, Timestamp, Value};
pub use window::TimeWindow;

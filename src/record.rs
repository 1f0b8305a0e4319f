//! Decoded records and their field values

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::{Result, SdioError};

/// Record timestamp (UTC, microsecond resolution)
pub type Timestamp = DateTime<Utc>;

/// Field holding the record timestamp as epoch seconds
pub const TIME_FIELD: &str = "time";

/// Field flagging the first record of a scan
pub const SCAN_FIELD: &str = "scan";

/// Sub-fields the timestamp is synthesized from, in order:
/// year, month, day, hour, minute, second, microsecond
pub const TIME_PARTS: [&str; 7] = [
    "time.yr", "time.mo", "time.dy", "time.hr", "time.mt", "time.sc", "time.us",
];

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed 8-bit
    Char(i8),
    /// Signed 16-bit
    Short(i16),
    /// Signed 32-bit
    Int(i32),
    /// Signed 64-bit
    Long(i64),
    /// Unsigned 8-bit
    UChar(u8),
    /// Unsigned 16-bit
    UShort(u16),
    /// Unsigned 32-bit
    UInt(u32),
    /// Unsigned 64-bit
    ULong(u64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Text
    String(String),
    /// Row-major multi-dimensional array of scalar values
    Array {
        /// Dimension sizes, outermost first
        dims: Vec<usize>,
        /// Flattened elements
        values: Vec<Value>,
    },
}

impl Value {
    /// Integer view of an integral scalar
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Char(v) => Some(i64::from(v)),
            Self::Short(v) => Some(i64::from(v)),
            Self::Int(v) => Some(i64::from(v)),
            Self::Long(v) => Some(v),
            Self::UChar(v) => Some(i64::from(v)),
            Self::UShort(v) => Some(i64::from(v)),
            Self::UInt(v) => Some(i64::from(v)),
            Self::ULong(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Floating-point view of any numeric scalar
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            Self::ULong(v) => Some(v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// String view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One decoded record
///
/// Holds every decoded field plus the two attributes the reader relies on:
/// the record timestamp and the scan flag. Both are validated when the
/// record is built, so a `Record` always has them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(skip)]
    time: Timestamp,
    #[serde(skip)]
    scan: i64,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Build a record carrying only the required fields
    ///
    /// The time is stored both as broken-down `time.*` fields and as epoch
    /// seconds, the way the data files carry it.
    #[must_use]
    pub fn new(time: Timestamp, scan: i16) -> Self {
        let year = i16::try_from(time.year()).map_or(Value::Int(time.year()), Value::Short);
        let mut fields = BTreeMap::new();
        fields.insert("time.yr".to_string(), year);
        fields.insert("time.mo".to_string(), part(time.month()));
        fields.insert("time.dy".to_string(), part(time.day()));
        fields.insert("time.hr".to_string(), part(time.hour()));
        fields.insert("time.mt".to_string(), part(time.minute()));
        fields.insert("time.sc".to_string(), part(time.second()));
        fields.insert(
            "time.us".to_string(),
            Value::Int(i32::try_from(time.timestamp_subsec_micros()).unwrap_or(i32::MAX)),
        );
        fields.insert(SCAN_FIELD.to_string(), Value::Short(scan));
        fields.insert(TIME_FIELD.to_string(), Value::Double(epoch_seconds(time)));

        Self {
            time: truncate_to_micros(time),
            scan: i64::from(scan),
            fields,
        }
    }

    /// Build a record from decoded fields
    ///
    /// The timestamp is synthesized from the `time.*` sub-fields when
    /// `time.yr` is present, otherwise read from a numeric `time` field
    /// (epoch seconds). The resolved timestamp is written back to `time`.
    ///
    /// # Errors
    ///
    /// Returns error if the time or scan field is missing or malformed
    pub fn from_fields(mut fields: BTreeMap<String, Value>) -> Result<Self> {
        let time = if fields.contains_key(TIME_PARTS[0]) {
            timestamp_from_parts(&fields)?
        } else {
            let secs = fields
                .get(TIME_FIELD)
                .ok_or_else(|| SdioError::MissingField(TIME_FIELD.to_string()))?
                .as_f64()
                .ok_or_else(|| SdioError::InvalidTime("'time' is not numeric".to_string()))?;
            timestamp_from_epoch(secs)?
        };

        let scan = fields
            .get(SCAN_FIELD)
            .ok_or_else(|| SdioError::MissingField(SCAN_FIELD.to_string()))
            .and_then(|value| {
                integral(value).ok_or_else(|| {
                    SdioError::InvalidFormat(format!("'{SCAN_FIELD}' is not an integer"))
                })
            })?;

        fields.insert(TIME_FIELD.to_string(), Value::Double(epoch_seconds(time)));

        Ok(Self { time, scan, fields })
    }

    /// Record timestamp
    #[must_use]
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Scan flag (1 on the first record of a scan)
    #[must_use]
    pub fn scan(&self) -> i64 {
        self.scan
    }

    /// Whether this record starts a new scan
    #[must_use]
    pub fn is_scan_start(&self) -> bool {
        self.scan == 1
    }

    /// Look up a field by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All fields, ordered by name
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Consume the record, returning its fields
    #[must_use]
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

/// Convert epoch seconds to a timestamp, rounding to the microsecond
///
/// # Errors
///
/// Returns error if the value is not finite or out of range
pub fn timestamp_from_epoch(secs: f64) -> Result<Timestamp> {
    let micros = (secs * 1e6).round();
    if !micros.is_finite() || micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return Err(SdioError::InvalidTime(format!("epoch seconds out of range: {secs}")));
    }

    DateTime::from_timestamp_micros(micros as i64)
        .ok_or_else(|| SdioError::InvalidTime(format!("epoch seconds out of range: {secs}")))
}

/// Epoch seconds of a timestamp at microsecond precision
#[must_use]
pub fn epoch_seconds(time: Timestamp) -> f64 {
    time.timestamp_micros() as f64 / 1e6
}

fn timestamp_from_parts(fields: &BTreeMap<String, Value>) -> Result<Timestamp> {
    let mut parts = [0i64; 7];
    for (slot, name) in parts.iter_mut().zip(TIME_PARTS) {
        *slot = fields
            .get(name)
            .ok_or_else(|| SdioError::MissingField(name.to_string()))
            .map(integral)?
            .ok_or_else(|| SdioError::InvalidTime(format!("'{name}' is not an integer")))?;
    }

    let [yr, mo, dy, hr, mt, sc, us] = parts;
    let invalid = || SdioError::InvalidTime(format!("{yr}-{mo}-{dy} {hr}:{mt}:{sc}.{us:06}"));
    let to_u32 = |v: i64| u32::try_from(v).map_err(|_| invalid());

    let date = NaiveDate::from_ymd_opt(
        i32::try_from(yr).map_err(|_| invalid())?,
        to_u32(mo)?,
        to_u32(dy)?,
    )
    .ok_or_else(invalid)?;

    let us = to_u32(us)?;
    if us >= 1_000_000 {
        return Err(invalid());
    }

    date.and_hms_micro_opt(to_u32(hr)?, to_u32(mt)?, to_u32(sc)?, us)
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}

/// Integer view that also takes whole-valued floats, as JSON writers emit
/// `1.0` for integral fields
fn integral(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| match *value {
        Value::Float(_) | Value::Double(_) => value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(v))
            .map(|v| v as i64),
        _ => None,
    })
}

/// Calendar and clock parts from chrono always fit a short
fn part(v: u32) -> Value {
    Value::Short(i16::try_from(v).unwrap_or(i16::MAX))
}

fn truncate_to_micros(time: Timestamp) -> Timestamp {
    DateTime::from_timestamp_micros(time.timestamp_micros()).unwrap_or(time)
}

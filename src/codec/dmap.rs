//! DMAP binary record codec
//!
//! Little-endian layout of one record:
//!
//! ```text
//! header   code: i32 | size: i32 | scalar_count: i32 | array_count: i32
//! scalar   name\0 | type: i8 | value
//! array    name\0 | type: i8 | ndims: i32 | dims: [i32; ndims] | elements
//! ```
//!
//! `size` counts the whole record including the header. Strings are
//! NUL-terminated.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use bytes::{Buf, BufMut};
use tracing::trace;

use super::{RecordCodec, RecordStream};
use crate::record::{Record, Value};
use crate::{Result, SdioError};

/// Record header code identifying a DMAP record
pub const DMAP_CODE: i32 = 0x0001_0001;

/// Record header size
pub const RECORD_HEADER_SIZE: usize = 16;

/// Largest record accepted by the decoder (64 MiB)
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Record header (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RecordHeader {
    /// Format code, always [`DMAP_CODE`]
    pub code: i32,
    /// Total record size in bytes, header included
    pub size: i32,
    /// Number of scalar entries
    pub scalar_count: i32,
    /// Number of array entries
    pub array_count: i32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<RecordHeader>(), RECORD_HEADER_SIZE);

impl RecordHeader {
    /// Decode a header from its on-disk bytes
    #[must_use]
    pub fn from_le_bytes(raw: &[u8; RECORD_HEADER_SIZE]) -> Self {
        let header: Self = pod_read_unaligned(raw);
        Self {
            code: i32::from_le(header.code),
            size: i32::from_le(header.size),
            scalar_count: i32::from_le(header.scalar_count),
            array_count: i32::from_le(header.array_count),
        }
    }

    /// Encode the header to its on-disk bytes
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let le = Self {
            code: self.code.to_le(),
            size: self.size.to_le(),
            scalar_count: self.scalar_count.to_le(),
            array_count: self.array_count.to_le(),
        };
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        raw.copy_from_slice(bytes_of(&le));
        raw
    }

    /// Check the header, returning the body length that follows it
    fn validate(&self) -> Result<usize> {
        if self.code != DMAP_CODE {
            return Err(SdioError::InvalidFormat(format!(
                "Invalid record code: expected {DMAP_CODE:#x}, got {:#x}",
                self.code
            )));
        }

        let size = usize::try_from(self.size).unwrap_or(0);
        if !(RECORD_HEADER_SIZE..=MAX_RECORD_SIZE).contains(&size) {
            return Err(SdioError::InvalidFormat(format!(
                "Invalid record size: {}",
                self.size
            )));
        }

        if self.scalar_count < 0 || self.array_count < 0 {
            return Err(SdioError::InvalidFormat(format!(
                "Invalid entry counts: {} scalars, {} arrays",
                self.scalar_count, self.array_count
            )));
        }

        Ok(size - RECORD_HEADER_SIZE)
    }
}

/// DMAP element type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum DmapType {
    /// Signed 8-bit
    Char = 1,
    /// Signed 16-bit
    Short = 2,
    /// Signed 32-bit
    Int = 3,
    /// 32-bit float
    Float = 4,
    /// 64-bit float
    Double = 8,
    /// NUL-terminated string
    String = 9,
    /// Signed 64-bit
    Long = 10,
    /// Unsigned 8-bit
    UChar = 16,
    /// Unsigned 16-bit
    UShort = 17,
    /// Unsigned 32-bit
    UInt = 18,
    /// Unsigned 64-bit
    ULong = 19,
}

impl TryFrom<i8> for DmapType {
    type Error = SdioError;

    fn try_from(code: i8) -> Result<Self> {
        Ok(match code {
            1 => Self::Char,
            2 => Self::Short,
            3 => Self::Int,
            4 => Self::Float,
            8 => Self::Double,
            9 => Self::String,
            10 => Self::Long,
            16 => Self::UChar,
            17 => Self::UShort,
            18 => Self::UInt,
            19 => Self::ULong,
            _ => {
                return Err(SdioError::InvalidFormat(format!(
                    "Unknown data type code: {code}"
                )))
            }
        })
    }
}

impl DmapType {
    /// Encoded element size, `None` for variable-length strings
    #[must_use]
    pub fn size(self) -> Option<usize> {
        match self {
            Self::Char | Self::UChar => Some(1),
            Self::Short | Self::UShort => Some(2),
            Self::Int | Self::UInt | Self::Float => Some(4),
            Self::Long | Self::ULong | Self::Double => Some(8),
            Self::String => None,
        }
    }

    fn of(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Char(_) => Self::Char,
            Value::Short(_) => Self::Short,
            Value::Int(_) => Self::Int,
            Value::Long(_) => Self::Long,
            Value::UChar(_) => Self::UChar,
            Value::UShort(_) => Self::UShort,
            Value::UInt(_) => Self::UInt,
            Value::ULong(_) => Self::ULong,
            Value::Float(_) => Self::Float,
            Value::Double(_) => Self::Double,
            Value::String(_) => Self::String,
            Value::Array { .. } => return None,
        })
    }
}

/// Codec for DMAP files
#[derive(Debug, Default)]
pub struct DmapCodec {
    body: Vec<u8>,
}

impl DmapCodec {
    /// Create a DMAP codec
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordCodec for DmapCodec {
    fn decode_next(&mut self, stream: &mut dyn RecordStream) -> Result<Option<Record>> {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        match read_up_to(stream, &mut raw)? {
            0 => return Ok(None),
            RECORD_HEADER_SIZE => {}
            n => {
                return Err(SdioError::InvalidFormat(format!(
                    "Truncated record header: {n} of {RECORD_HEADER_SIZE} bytes"
                )))
            }
        }

        let header = RecordHeader::from_le_bytes(&raw);
        let body_len = header.validate()?;
        self.body.resize(body_len, 0);
        stream.read_exact(&mut self.body).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                SdioError::InvalidFormat(format!("Truncated record body: expected {body_len} bytes"))
            } else {
                SdioError::Io(e)
            }
        })?;

        let fields = parse_body(&self.body, &header)?;
        trace!("Decoded DMAP record: {} bytes, {} fields", header.size, fields.len());

        Record::from_fields(fields).map(Some)
    }
}

/// Encode one record in DMAP layout
///
/// Scalar fields are written first, then arrays, each group in field-name
/// order.
///
/// # Errors
///
/// Returns error if a field cannot be represented in DMAP (nested or
/// mixed-type arrays, names containing NUL, oversized records)
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let (arrays, scalars): (Vec<_>, Vec<_>) = record
        .fields()
        .iter()
        .partition(|(_, value)| matches!(value, Value::Array { .. }));

    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(&[0u8; RECORD_HEADER_SIZE]);

    for (name, value) in &scalars {
        put_name(&mut out, name)?;
        let ty = DmapType::of(value).ok_or_else(|| {
            SdioError::InvalidFormat(format!("Field '{name}' is not a scalar"))
        })?;
        out.put_i8(ty as i8);
        put_scalar(&mut out, value);
    }

    for (name, value) in &arrays {
        let Value::Array { dims, values } = value else {
            continue;
        };
        put_name(&mut out, name)?;

        let ty = match values.first() {
            Some(first) => DmapType::of(first).ok_or_else(|| {
                SdioError::InvalidFormat(format!("Array '{name}' contains nested arrays"))
            })?,
            None => DmapType::Int,
        };
        if values.iter().any(|v| DmapType::of(v) != Some(ty)) {
            return Err(SdioError::InvalidFormat(format!(
                "Array '{name}' mixes element types"
            )));
        }
        if dims.iter().product::<usize>() != values.len() {
            return Err(SdioError::InvalidFormat(format!(
                "Array '{name}' dimensions {dims:?} do not match {} elements",
                values.len()
            )));
        }

        out.put_i8(ty as i8);
        out.put_i32_le(to_i32(dims.len())?);
        for &dim in dims {
            out.put_i32_le(to_i32(dim)?);
        }
        for element in values {
            put_scalar(&mut out, element);
        }
    }

    if out.len() > MAX_RECORD_SIZE {
        return Err(SdioError::InvalidFormat(format!(
            "Record too large: {} bytes",
            out.len()
        )));
    }

    let header = RecordHeader {
        code: DMAP_CODE,
        size: to_i32(out.len())?,
        scalar_count: to_i32(scalars.len())?,
        array_count: to_i32(arrays.len())?,
    };
    out[..RECORD_HEADER_SIZE].copy_from_slice(&header.to_le_bytes());

    Ok(out)
}

/// Fill `buf` as far as the stream allows, returning the byte count
fn read_up_to(stream: &mut dyn RecordStream, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn parse_body(mut buf: &[u8], header: &RecordHeader) -> Result<BTreeMap<String, Value>> {
    let mut fields = BTreeMap::new();

    for _ in 0..header.scalar_count {
        let name = get_cstring(&mut buf)?;
        let ty = get_type(&mut buf)?;
        let value = get_scalar(&mut buf, ty)?;
        fields.insert(name, value);
    }

    for _ in 0..header.array_count {
        let name = get_cstring(&mut buf)?;
        let ty = get_type(&mut buf)?;

        ensure(buf, 4)?;
        let raw_ndims = buf.get_i32_le();
        let ndims = usize::try_from(raw_ndims)
            .ok()
            .filter(|&n| n >= 1)
            .ok_or_else(|| {
                SdioError::InvalidFormat(format!("Array '{name}' has {raw_ndims} dimensions"))
            })?;
        ensure(buf, ndims.saturating_mul(4))?;

        let mut dims = Vec::with_capacity(ndims);
        let mut count = 1usize;
        for _ in 0..ndims {
            ensure(buf, 4)?;
            let dim = usize::try_from(buf.get_i32_le()).map_err(|_| {
                SdioError::InvalidFormat(format!("Array '{name}' has a negative dimension"))
            })?;
            count = count.checked_mul(dim).ok_or_else(|| {
                SdioError::InvalidFormat(format!("Array '{name}' is too large"))
            })?;
            dims.push(dim);
        }

        // Every element takes at least one byte, so this bounds the allocation.
        let min_len = count.saturating_mul(ty.size().unwrap_or(1));
        ensure(buf, min_len)?;

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(get_scalar(&mut buf, ty)?);
        }
        fields.insert(name, Value::Array { dims, values });
    }

    if !buf.is_empty() {
        return Err(SdioError::InvalidFormat(format!(
            "{} unexpected bytes after last field",
            buf.len()
        )));
    }

    Ok(fields)
}

fn ensure(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(SdioError::InvalidFormat(format!(
            "Record body truncated: need {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_type(buf: &mut &[u8]) -> Result<DmapType> {
    ensure(buf, 1)?;
    DmapType::try_from(buf.get_i8())
}

fn get_cstring(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| SdioError::InvalidFormat("Unterminated string".to_string()))?;
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|e| SdioError::InvalidFormat(format!("Invalid UTF-8 in string: {e}")))?
        .to_string();
    buf.advance(end + 1);
    Ok(s)
}

fn get_scalar(buf: &mut &[u8], ty: DmapType) -> Result<Value> {
    if let Some(size) = ty.size() {
        ensure(buf, size)?;
    }

    Ok(match ty {
        DmapType::Char => Value::Char(buf.get_i8()),
        DmapType::Short => Value::Short(buf.get_i16_le()),
        DmapType::Int => Value::Int(buf.get_i32_le()),
        DmapType::Long => Value::Long(buf.get_i64_le()),
        DmapType::UChar => Value::UChar(buf.get_u8()),
        DmapType::UShort => Value::UShort(buf.get_u16_le()),
        DmapType::UInt => Value::UInt(buf.get_u32_le()),
        DmapType::ULong => Value::ULong(buf.get_u64_le()),
        DmapType::Float => Value::Float(buf.get_f32_le()),
        DmapType::Double => Value::Double(buf.get_f64_le()),
        DmapType::String => Value::String(get_cstring(buf)?),
    })
}

fn put_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.as_bytes().contains(&0) {
        return Err(SdioError::InvalidFormat(format!(
            "Field name contains NUL: {name:?}"
        )));
    }
    out.put_slice(name.as_bytes());
    out.put_u8(0);
    Ok(())
}

fn put_scalar(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Char(v) => out.put_i8(*v),
        Value::Short(v) => out.put_i16_le(*v),
        Value::Int(v) => out.put_i32_le(*v),
        Value::Long(v) => out.put_i64_le(*v),
        Value::UChar(v) => out.put_u8(*v),
        Value::UShort(v) => out.put_u16_le(*v),
        Value::UInt(v) => out.put_u32_le(*v),
        Value::ULong(v) => out.put_u64_le(*v),
        Value::Float(v) => out.put_f32_le(*v),
        Value::Double(v) => out.put_f64_le(*v),
        Value::String(s) => {
            // Interior NULs would split the string on decode.
            out.put_slice(s.split('\0').next().unwrap_or_default().as_bytes());
            out.put_u8(0);
        }
        Value::Array { .. } => {}
    }
}

fn to_i32(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| SdioError::InvalidFormat(format!("Value too large: {n}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    fn sample_record(scan: i16) -> Record {
        let time = Utc.with_ymd_and_hms(2012, 11, 24, 4, 4, 39).unwrap()
            + chrono::Duration::milliseconds(141);
        let mut fields = Record::new(time, scan).into_fields();
        fields.insert("stid".to_string(), Value::Short(20));
        fields.insert("combf".to_string(), Value::String("mcm fitex".to_string()));
        fields.insert(
            "slist".to_string(),
            Value::Array {
                dims: vec![3],
                values: vec![Value::Short(5), Value::Short(9), Value::Short(40)],
            },
        );
        fields.insert(
            "pwr0".to_string(),
            Value::Array {
                dims: vec![2, 2],
                values: vec![
                    Value::Float(1.0),
                    Value::Float(2.5),
                    Value::Float(-3.0),
                    Value::Float(0.0),
                ],
            },
        );
        Record::from_fields(fields).unwrap()
    }

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<RecordHeader>(), 16);
    }

    #[test]
    fn test_header_is_little_endian() {
        let header = RecordHeader {
            code: DMAP_CODE,
            size: 0x0102,
            scalar_count: 3,
            array_count: 1,
        };
        let raw = header.to_le_bytes();
        assert_eq!(&raw[..8], &[0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x00, 0x00]);
        assert_eq!(RecordHeader::from_le_bytes(&raw), header);
    }

    #[test]
    fn test_decode_encoded_record() {
        let record = sample_record(1);
        let bytes = encode_record(&record).unwrap();

        let mut stream = Cursor::new(bytes.clone());
        let mut codec = DmapCodec::new();
        let decoded = codec.decode_next(&mut stream).unwrap().unwrap();

        assert_eq!(decoded, record);
        assert_eq!(codec.tell(&mut stream).unwrap(), bytes.len() as u64);
        assert!(codec.decode_next(&mut stream).unwrap().is_none());
    }

    #[test]
    fn test_consecutive_records_and_seek() {
        let first = encode_record(&sample_record(1)).unwrap();
        let second = encode_record(&sample_record(0)).unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second);

        let mut stream = Cursor::new(data);
        let mut codec = DmapCodec::new();

        codec.seek(&mut stream, first.len() as u64).unwrap();
        let record = codec.decode_next(&mut stream).unwrap().unwrap();
        assert_eq!(record.scan(), 0);

        codec.rewind(&mut stream).unwrap();
        assert_eq!(codec.tell(&mut stream).unwrap(), 0);
        assert_eq!(codec.decode_next(&mut stream).unwrap().unwrap().scan(), 1);
    }

    #[test]
    fn test_bad_code() {
        let mut bytes = encode_record(&sample_record(1)).unwrap();
        bytes[0] = 0x7f;

        let err = DmapCodec::new()
            .decode_next(&mut Cursor::new(bytes))
            .unwrap_err();
        assert!(matches!(err, SdioError::InvalidFormat(_)));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = encode_record(&sample_record(1)).unwrap();
        let err = DmapCodec::new()
            .decode_next(&mut Cursor::new(bytes[..10].to_vec()))
            .unwrap_err();
        assert!(matches!(err, SdioError::InvalidFormat(msg) if msg.contains("header")));
    }

    #[test]
    fn test_truncated_body() {
        let bytes = encode_record(&sample_record(1)).unwrap();
        let cut = bytes.len() - 5;
        let err = DmapCodec::new()
            .decode_next(&mut Cursor::new(bytes[..cut].to_vec()))
            .unwrap_err();
        assert!(matches!(err, SdioError::InvalidFormat(msg) if msg.contains("body")));
    }

    #[test]
    fn test_unknown_type_code() {
        let mut out = Vec::new();
        out.extend_from_slice(&[0u8; RECORD_HEADER_SIZE]);
        out.extend_from_slice(b"x\0");
        out.put_i8(42);
        out.put_i32_le(0);
        let header = RecordHeader {
            code: DMAP_CODE,
            size: i32::try_from(out.len()).unwrap(),
            scalar_count: 1,
            array_count: 0,
        };
        out[..RECORD_HEADER_SIZE].copy_from_slice(&header.to_le_bytes());

        let err = DmapCodec::new()
            .decode_next(&mut Cursor::new(out))
            .unwrap_err();
        assert!(matches!(err, SdioError::InvalidFormat(msg) if msg.contains("type code")));
    }

    #[test]
    fn test_oversized_array_rejected() {
        let mut out = Vec::new();
        out.extend_from_slice(&[0u8; RECORD_HEADER_SIZE]);
        out.extend_from_slice(b"big\0");
        out.put_i8(DmapType::Double as i8);
        out.put_i32_le(2);
        out.put_i32_le(1 << 20);
        out.put_i32_le(1 << 20);
        let header = RecordHeader {
            code: DMAP_CODE,
            size: i32::try_from(out.len()).unwrap(),
            scalar_count: 0,
            array_count: 1,
        };
        out[..RECORD_HEADER_SIZE].copy_from_slice(&header.to_le_bytes());

        let err = DmapCodec::new()
            .decode_next(&mut Cursor::new(out))
            .unwrap_err();
        assert!(matches!(err, SdioError::InvalidFormat(_)));
    }

    #[test]
    fn test_negative_dimension_count() {
        let mut out = Vec::new();
        out.extend_from_slice(&[0u8; RECORD_HEADER_SIZE]);
        out.extend_from_slice(b"pwr0\0");
        out.put_i8(DmapType::Float as i8);
        out.put_i32_le(-3);
        let header = RecordHeader {
            code: DMAP_CODE,
            size: i32::try_from(out.len()).unwrap(),
            scalar_count: 0,
            array_count: 1,
        };
        out[..RECORD_HEADER_SIZE].copy_from_slice(&header.to_le_bytes());

        let err = DmapCodec::new()
            .decode_next(&mut Cursor::new(out))
            .unwrap_err();
        assert!(matches!(err, SdioError::InvalidFormat(msg) if msg.contains("-3 dimensions")));
    }

    #[test]
    fn test_mixed_array_not_encodable() {
        let mut fields = sample_record(0).into_fields();
        fields.insert(
            "bad".to_string(),
            Value::Array {
                dims: vec![2],
                values: vec![Value::Int(1), Value::Double(2.0)],
            },
        );
        let record = Record::from_fields(fields).unwrap();
        assert!(encode_record(&record).is_err());
    }
}

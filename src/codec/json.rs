//! JSON record codec
//!
//! Files hold one JSON object per record. An object may span several
//! lines, so lines are accumulated until the pending text parses.

use std::collections::BTreeMap;
use std::io::BufRead;

use serde_json::{Number, Value as Json};
use tracing::trace;

use super::{RecordCodec, RecordStream};
use crate::record::{Record, Value};
use crate::{Result, SdioError};

/// Codec for line-delimited JSON files
#[derive(Debug, Default)]
pub struct JsonCodec {
    pending: String,
    line: String,
    nesting: Nesting,
    attempts: usize,
}

impl JsonCodec {
    /// Create a JSON codec
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordCodec for JsonCodec {
    fn decode_next(&mut self, stream: &mut dyn RecordStream) -> Result<Option<Record>> {
        self.pending.clear();
        self.nesting = Nesting::default();
        self.attempts = 0;
        let mut lines = 0usize;

        loop {
            self.line.clear();
            if stream.read_line(&mut self.line)? == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(SdioError::InvalidFormat(format!(
                    "Truncated JSON record at end of stream after {lines} lines"
                )));
            }

            // Blank lines between records belong to no record.
            if self.pending.is_empty() && self.line.trim().is_empty() {
                continue;
            }

            self.pending.push_str(&self.line);
            self.nesting.feed(&self.line);
            lines += 1;

            if !self.nesting.is_closed() {
                continue;
            }

            self.attempts += 1;
            match serde_json::from_str::<Json>(&self.pending) {
                Ok(value) => {
                    trace!(
                        "Decoded JSON record spanning {} lines in {} parses",
                        lines,
                        self.attempts
                    );
                    return to_record(value).map(Some);
                }
                Err(e) if e.is_eof() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Bracket depth of the pending text, ignoring brackets inside strings
///
/// A record can only be complete once its outermost bracket closes, so the
/// pending text is parsed once per record instead of once per line.
#[derive(Debug, Default)]
struct Nesting {
    depth: i64,
    in_string: bool,
    escaped: bool,
}

impl Nesting {
    fn feed(&mut self, text: &str) {
        for byte in text.bytes() {
            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => self.depth -= 1,
                _ => {}
            }
        }
    }

    /// Worth parsing: depth is back at the top level, or a string ran past
    /// the end of a line, which no more input can repair
    fn is_closed(&self) -> bool {
        self.depth <= 0 || self.in_string
    }
}

fn to_record(value: Json) -> Result<Record> {
    let Json::Object(object) = value else {
        return Err(SdioError::InvalidFormat(
            "JSON record is not an object".to_string(),
        ));
    };

    let mut fields = BTreeMap::new();
    for (name, value) in object {
        if let Some(value) = to_value(&name, value)? {
            fields.insert(name, value);
        }
    }

    Record::from_fields(fields)
}

/// Convert one JSON field; `null` fields are dropped
fn to_value(name: &str, value: Json) -> Result<Option<Value>> {
    Ok(Some(match value {
        Json::Null => return Ok(None),
        Json::Bool(b) => Value::UChar(u8::from(b)),
        Json::Number(n) => number(&n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => {
            let mut dims = Vec::new();
            let mut values = Vec::new();
            let mut leaf_depth = None;
            flatten(name, items, 0, &mut dims, &mut values, &mut leaf_depth)?;
            Value::Array { dims, values }
        }
        Json::Object(_) => {
            return Err(SdioError::InvalidFormat(format!(
                "Field '{name}' is a nested object"
            )))
        }
    }))
}

fn number(n: &Number) -> Value {
    if let Some(v) = n.as_i64() {
        Value::Long(v)
    } else if let Some(v) = n.as_u64() {
        Value::ULong(v)
    } else {
        Value::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

/// Flatten nested JSON arrays in row-major order, checking they are rectangular
fn flatten(
    name: &str,
    items: Vec<Json>,
    depth: usize,
    dims: &mut Vec<usize>,
    values: &mut Vec<Value>,
    leaf_depth: &mut Option<usize>,
) -> Result<()> {
    let ragged = || SdioError::InvalidFormat(format!("Array '{name}' is not rectangular"));

    match dims.get(depth) {
        None => dims.push(items.len()),
        Some(&len) if len != items.len() => return Err(ragged()),
        Some(_) => {}
    }

    for item in items {
        let leaf = match item {
            Json::Array(inner) => {
                if *leaf_depth == Some(depth) {
                    return Err(ragged());
                }
                flatten(name, inner, depth + 1, dims, values, leaf_depth)?;
                continue;
            }
            Json::Object(_) => {
                return Err(SdioError::InvalidFormat(format!(
                    "Array '{name}' contains objects"
                )))
            }
            Json::Null => {
                return Err(SdioError::InvalidFormat(format!(
                    "Array '{name}' contains null"
                )))
            }
            Json::Bool(b) => Value::UChar(u8::from(b)),
            Json::Number(n) => number(&n),
            Json::String(s) => Value::String(s),
        };

        if leaf_depth.is_some_and(|d| d != depth) || dims.len() > depth + 1 {
            return Err(ragged());
        }
        *leaf_depth = Some(depth);
        values.push(leaf);
    }

    Ok(())
}

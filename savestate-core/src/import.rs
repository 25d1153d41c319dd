//! Flag and alias tables read from JSON data files
//!
//! A flag file is a JSON object whose values map onto [`FlagValue`]:
//! integers become `Int`, strings become `Text`, and arrays of integers in
//! `0..=255` become `Bytes`. An alias file is a JSON object of strings.
//! The parsed tables feed [`RecordStore::merge_flags`] and
//! [`RecordStore::merge_aliases`].
//!
//! [`RecordStore::merge_flags`]: crate::RecordStore::merge_flags
//! [`RecordStore::merge_aliases`]: crate::RecordStore::merge_aliases

use crate::record::FlagValue;
use crate::{Result, SaveError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

fn parse_object(json: &str, kind: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        other => Err(SaveError::validation(format!(
            "{kind} file must contain a JSON object, found {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn flag_value(key: &str, value: Value) -> Result<FlagValue> {
    let rejected = |what: &str| {
        warn!(key, found = what, "Unsupported flag value in data file");
        SaveError::validation(format!("flag {key:?}: unsupported value ({what})"))
    };

    match value {
        Value::Number(n) => n.as_i64().map(FlagValue::Int).ok_or_else(|| rejected("non-integer number")),
        Value::String(s) => Ok(FlagValue::Text(s)),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| rejected("array element outside 0..=255"))
            })
            .collect::<Result<Vec<u8>>>()
            .map(FlagValue::Bytes),
        other => Err(rejected(json_type(&other))),
    }
}

/// Parse a flag table from JSON text
///
/// # Errors
/// Returns a validation error naming the first offending key when a value
/// has no [`FlagValue`] form, or a JSON error when the text is malformed.
pub fn parse_flag_file(json: &str) -> Result<BTreeMap<String, FlagValue>> {
    let flags = parse_object(json, "flag")?
        .into_iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| flag_value(&key, value).map(|v| (key, v)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    debug!(count = flags.len(), "Parsed flag file");
    Ok(flags)
}

/// Read and parse a flag table from disk
pub fn load_flag_file<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, FlagValue>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to read flag file");
        SaveError::Io(e)
    })?;
    parse_flag_file(&text)
}

/// Parse a sprite alias table from JSON text
pub fn parse_alias_file(json: &str) -> Result<BTreeMap<String, String>> {
    parse_object(json, "alias")?
        .into_iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| match value {
            Value::String(target) => Ok((key, target)),
            other => {
                warn!(key = %key, found = json_type(&other), "Unsupported alias value in data file");
                Err(SaveError::validation(format!(
                    "alias {key:?}: expected a string, found {}",
                    json_type(&other)
                )))
            }
        })
        .collect()
}

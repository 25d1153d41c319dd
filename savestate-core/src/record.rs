/*!
In-memory save-game record model.

A [`Record`] holds the player's flags, the single current activity snapshot,
and the sprite alias table. All maps are ordered so that encoding a record is
deterministic.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key and activity type used for placeholder entries in a fresh record
pub const PLACEHOLDER_KEY: &str = "nil";

/// Scalar value stored under a flag name
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl FlagValue {
    /// The integer held by this value, if it is integer-typed
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FlagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            FlagValue::Int(_) => "int",
            FlagValue::Text(_) => "text",
            FlagValue::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for FlagValue {
    fn from(v: i64) -> Self {
        FlagValue::Int(v)
    }
}

impl From<i32> for FlagValue {
    fn from(v: i32) -> Self {
        FlagValue::Int(v.into())
    }
}

impl From<&str> for FlagValue {
    fn from(v: &str) -> Self {
        FlagValue::Text(v.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(v: String) -> Self {
        FlagValue::Text(v)
    }
}

impl From<Vec<u8>> for FlagValue {
    fn from(v: Vec<u8>) -> Self {
        FlagValue::Bytes(v)
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Int(v) => write!(f, "{v}"),
            FlagValue::Text(s) => write!(f, "{s:?}"),
            FlagValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Value inside an activity payload; payloads may nest
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, PayloadValue>),
}

impl From<FlagValue> for PayloadValue {
    fn from(v: FlagValue) -> Self {
        match v {
            FlagValue::Int(i) => PayloadValue::Int(i),
            FlagValue::Text(s) => PayloadValue::Text(s),
            FlagValue::Bytes(b) => PayloadValue::Bytes(b),
        }
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Int(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::Text(v.to_string())
    }
}

impl From<BTreeMap<String, PayloadValue>> for PayloadValue {
    fn from(v: BTreeMap<String, PayloadValue>) -> Self {
        PayloadValue::Map(v)
    }
}

/// Activity payload: activity-defined key/value data
pub type ActivityPayload = BTreeMap<String, PayloadValue>;

/// Snapshot of the task the player was engaged in
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActivityState {
    #[serde(rename = "activityType")]
    pub activity_type: String,
    #[serde(rename = "activityPayload")]
    pub payload: ActivityPayload,
}

impl ActivityState {
    pub fn new<S: Into<String>>(activity_type: S, payload: ActivityPayload) -> Self {
        Self {
            activity_type: activity_type.into(),
            payload,
        }
    }

    /// The snapshot a fresh record starts with
    pub fn placeholder() -> Self {
        let mut payload = ActivityPayload::new();
        payload.insert(PLACEHOLDER_KEY.to_string(), PayloadValue::Int(0));
        Self::new(PLACEHOLDER_KEY, payload)
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::placeholder()
    }
}

/// The full save-game state
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub flags: BTreeMap<String, FlagValue>,
    #[serde(rename = "activityState")]
    pub activity_state: ActivityState,
    #[serde(rename = "spriteAliases", default)]
    pub sprite_aliases: BTreeMap<String, String>,
}

impl Record {
    /// A well-formed record holding only placeholder entries
    pub fn empty() -> Self {
        Self {
            flags: placeholder_flags(),
            activity_state: ActivityState::placeholder(),
            sprite_aliases: BTreeMap::new(),
        }
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::empty()
    }
}

/// Flags map holding a single placeholder entry
pub(crate) fn placeholder_flags() -> BTreeMap<String, FlagValue> {
    let mut flags = BTreeMap::new();
    flags.insert(PLACEHOLDER_KEY.to_string(), FlagValue::Int(0));
    flags
}

/// Alias map holding a single placeholder entry
pub(crate) fn placeholder_aliases() -> BTreeMap<String, String> {
    let mut aliases = BTreeMap::new();
    aliases.insert(PLACEHOLDER_KEY.to_string(), PLACEHOLDER_KEY.to_string());
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_well_formed() {
        let record = Record::empty();
        assert_eq!(record.flags.len(), 1);
        assert_eq!(record.flags.get(PLACEHOLDER_KEY), Some(&FlagValue::Int(0)));
        assert_eq!(record.activity_state.activity_type, "nil");
        assert_eq!(record.activity_state.payload.len(), 1);
        assert!(record.activity_state.is_placeholder());
        assert!(record.sprite_aliases.is_empty());
    }

    #[test]
    fn test_flag_value_accessors() {
        assert_eq!(FlagValue::from(7i64).as_int(), Some(7));
        assert_eq!(FlagValue::from("seven").as_int(), None);
        assert_eq!(FlagValue::from("seven").as_text(), Some("seven"));
        assert_eq!(FlagValue::from(vec![1u8, 2]).type_name(), "bytes");
    }

    #[test]
    fn test_record_json_uses_external_key_names() {
        let json = serde_json::to_value(Record::empty()).unwrap();
        assert!(json.get("flags").is_some());
        assert!(json.get("activityState").is_some());
        assert!(json["activityState"].get("activityType").is_some());
        assert!(json["activityState"].get("activityPayload").is_some());
        assert!(json.get("spriteAliases").is_some());
    }

    #[test]
    fn test_missing_aliases_default_to_empty() {
        let json = r#"{
            "flags": {"gold": {"int": 3}},
            "activityState": {"activityType": "nil", "activityPayload": {}}
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.flags.get("gold"), Some(&FlagValue::Int(3)));
        assert!(record.sprite_aliases.is_empty());
    }

    #[test]
    fn test_missing_flags_is_rejected() {
        let json = r#"{"activityState": {"activityType": "nil", "activityPayload": {}}}"#;
        assert!(serde_json::from_str::<Record>(json).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(FlagValue::Int(-4).to_string(), "-4");
        assert_eq!(FlagValue::from("key").to_string(), "\"key\"");
        assert_eq!(FlagValue::Bytes(vec![0; 3]).to_string(), "<3 bytes>");
    }
}

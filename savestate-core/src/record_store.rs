/*!
Owner of the in-memory save-game record.

The store starts out with no record. Every mutating operation first passes
through [`RecordStore::ensure_record`], which materializes an empty record,
so callers never observe a half-initialized state. Read-only operations on an
absent record answer as the empty record would.
*/

use crate::record::{
    placeholder_aliases, placeholder_flags, ActivityPayload, ActivityState, FlagValue, Record,
};
use crate::{Result, SaveError};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Service object holding the single active [`Record`]
///
/// # Example
/// ```rust
/// use savestate_core::RecordStore;
///
/// let mut store = RecordStore::new();
/// assert_eq!(store.get_flag_as_int("gold"), 0);
/// store.increment_flag("gold", 25);
/// store.increment_flag("gold", 5);
/// assert_eq!(store.get_flag_as_int("gold"), 30);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    record: Option<Record>,
}

impl RecordStore {
    /// Create a store with no record
    pub fn new() -> Self {
        Self { record: None }
    }

    /// Create a store that already holds `record`
    pub fn with_record(record: Record) -> Self {
        Self {
            record: Some(record),
        }
    }

    /// A well-formed record holding only placeholder data
    pub fn empty_record() -> Record {
        Record::empty()
    }

    /// Discard the in-memory record and start from an empty one
    ///
    /// Persisted backends are not touched.
    pub fn start_new_record(&mut self) {
        debug!("Starting new record");
        self.record = Some(Self::empty_record());
    }

    /// The current record, or `None` if nothing has been materialized yet
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn has_record(&self) -> bool {
        self.record.is_some()
    }

    /// Replace the in-memory record wholesale
    pub fn replace_record(&mut self, record: Record) {
        self.record = Some(record);
    }

    fn ensure_record(&mut self) -> &mut Record {
        self.record.get_or_insert_with(|| {
            debug!("Materializing empty record");
            Record::empty()
        })
    }

    // Flags

    /// Look up a flag value
    pub fn get_flag(&self, name: &str) -> Option<&FlagValue> {
        self.record.as_ref()?.flags.get(name)
    }

    /// Flag value as an integer; 0 when absent or not integer-typed
    pub fn get_flag_as_int(&self, name: &str) -> i64 {
        match self.get_flag(name) {
            None => 0,
            Some(FlagValue::Int(v)) => *v,
            Some(other) => {
                warn!(
                    flag = name,
                    found = other.type_name(),
                    "Flag is not an integer, treating as 0"
                );
                0
            }
        }
    }

    /// Store a flag value; empty names are ignored
    pub fn set_flag<V: Into<FlagValue>>(&mut self, name: &str, value: V) {
        if name.is_empty() {
            debug!("Ignoring flag write with empty name");
            return;
        }
        let value = value.into();
        self.ensure_record().flags.insert(name.to_string(), value);
    }

    pub fn set_flag_int(&mut self, name: &str, value: i64) {
        self.set_flag(name, FlagValue::Int(value));
    }

    /// Add `delta` to a flag's integer value (0 when absent or non-numeric)
    ///
    /// Returns the stored value. Overflow saturates.
    pub fn increment_flag(&mut self, name: &str, delta: i64) -> i64 {
        let record = self.ensure_record();
        if name.is_empty() {
            debug!("Ignoring flag increment with empty name");
            return 0;
        }
        let current = match record.flags.get(name) {
            Some(FlagValue::Int(v)) => *v,
            Some(other) => {
                warn!(
                    flag = name,
                    found = other.type_name(),
                    "Incrementing non-integer flag from 0"
                );
                0
            }
            None => 0,
        };
        let updated = current.saturating_add(delta);
        record.flags.insert(name.to_string(), FlagValue::Int(updated));
        updated
    }

    /// Remove a single flag, returning its previous value
    pub fn remove_flag(&mut self, name: &str) -> Option<FlagValue> {
        self.ensure_record().flags.remove(name)
    }

    /// Replace every flag with the single placeholder entry
    pub fn reset_all_flags(&mut self) {
        debug!("Resetting all flags");
        self.ensure_record().flags = placeholder_flags();
    }

    /// Merge `source` into the flags
    ///
    /// With `overwrite` unset, flags that already exist keep their value.
    pub fn merge_flags(&mut self, source: &BTreeMap<String, FlagValue>, overwrite: bool) {
        let flags = &mut self.ensure_record().flags;
        let mut applied = 0usize;
        for (name, value) in source {
            if name.is_empty() {
                continue;
            }
            if overwrite || !flags.contains_key(name) {
                flags.insert(name.clone(), value.clone());
                applied += 1;
            }
        }
        debug!(
            offered = source.len(),
            applied, overwrite, "Merged flags"
        );
    }

    /// Flag names in order
    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.record
            .iter()
            .flat_map(|r| r.flags.keys().map(String::as_str))
    }

    // Activity

    /// Replace the current activity snapshot
    ///
    /// An empty payload is rejected and leaves the record unchanged.
    pub fn set_activity<S: Into<String>>(
        &mut self,
        activity_type: S,
        payload: ActivityPayload,
    ) -> Result<()> {
        let activity_type = activity_type.into();
        if payload.is_empty() {
            warn!(activity = %activity_type, "Refusing to store activity with empty payload");
            return Err(SaveError::validation("activity payload cannot be empty"));
        }
        self.ensure_record().activity_state = ActivityState::new(activity_type, payload);
        Ok(())
    }

    /// The current activity snapshot, or the placeholder when no record exists
    pub fn get_activity(&self) -> ActivityState {
        self.record
            .as_ref()
            .map(|r| r.activity_state.clone())
            .unwrap_or_else(ActivityState::placeholder)
    }

    // Sprite aliases

    pub fn get_alias(&self, name: &str) -> Option<&str> {
        self.record
            .as_ref()?
            .sprite_aliases
            .get(name)
            .map(String::as_str)
    }

    /// Store an alias target; empty names are ignored
    pub fn set_alias<S: Into<String>>(&mut self, name: &str, target: S) {
        if name.is_empty() {
            debug!("Ignoring alias write with empty name");
            return;
        }
        let target = target.into();
        self.ensure_record()
            .sprite_aliases
            .insert(name.to_string(), target);
    }

    pub fn reset_all_aliases(&mut self) {
        debug!("Resetting all sprite aliases");
        self.ensure_record().sprite_aliases = placeholder_aliases();
    }

    pub fn merge_aliases(&mut self, source: &BTreeMap<String, String>, overwrite: bool) {
        let aliases = &mut self.ensure_record().sprite_aliases;
        for (name, target) in source {
            if name.is_empty() {
                continue;
            }
            if overwrite || !aliases.contains_key(name) {
                aliases.insert(name.clone(), target.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PayloadValue, PLACEHOLDER_KEY};

    fn payload(pairs: &[(&str, i64)]) -> ActivityPayload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PayloadValue::Int(*v)))
            .collect()
    }

    #[test]
    fn test_starts_absent() {
        let store = RecordStore::new();
        assert!(!store.has_record());
        assert!(store.get_flag("gold").is_none());
        assert_eq!(store.get_flag_as_int("gold"), 0);
    }

    #[test]
    fn test_with_record_starts_populated() {
        let mut record = RecordStore::empty_record();
        record.flags.insert("gold".into(), FlagValue::Int(30));
        record.sprite_aliases.insert("hero".into(), "hero_cloak".into());

        let mut store = RecordStore::with_record(record.clone());
        assert!(store.has_record());
        assert_eq!(store.record(), Some(&record));
        assert_eq!(store.get_flag_as_int("gold"), 30);

        // mutations apply to the supplied record, not a fresh one
        store.increment_flag("gold", 5);
        assert_eq!(store.get_flag_as_int("gold"), 35);
        assert_eq!(store.get_alias("hero"), Some("hero_cloak"));
    }

    #[test]
    fn test_set_then_get_materializes_record() {
        let mut store = RecordStore::new();
        store.set_flag("door_open", "yes");
        assert!(store.has_record());
        assert_eq!(store.get_flag("door_open"), Some(&FlagValue::from("yes")));
        // placeholder survives alongside real flags
        assert!(store.get_flag(PLACEHOLDER_KEY).is_some());
    }

    #[test]
    fn test_set_flag_roundtrips_every_variant() {
        let mut store = RecordStore::new();
        let values = [
            FlagValue::Int(-12),
            FlagValue::Text("blue".into()),
            FlagValue::Bytes(vec![0, 255, 7]),
        ];
        for (i, v) in values.iter().enumerate() {
            let name = format!("flag{i}");
            store.set_flag(&name, v.clone());
            assert_eq!(store.get_flag(&name), Some(v));
        }
    }

    #[test]
    fn test_empty_names_are_ignored() {
        let mut store = RecordStore::new();
        store.set_flag("", 5);
        store.set_alias("", "hero");
        assert!(store.get_flag("").is_none());
        assert!(store.get_alias("").is_none());
    }

    #[test]
    fn test_get_flag_as_int_on_non_integer() {
        let mut store = RecordStore::new();
        store.set_flag("name", "Aria");
        assert_eq!(store.get_flag_as_int("name"), 0);
        store.set_flag_int("gold", 100);
        assert_eq!(store.get_flag_as_int("gold"), 100);
    }

    #[test]
    fn test_increment_from_unset_sums_deltas() {
        let mut store = RecordStore::new();
        store.increment_flag("steps", 3);
        store.increment_flag("steps", -10);
        assert_eq!(store.get_flag_as_int("steps"), -7);
    }

    #[test]
    fn test_increment_non_numeric_starts_from_zero() {
        let mut store = RecordStore::new();
        store.set_flag("steps", "many");
        assert_eq!(store.increment_flag("steps", 4), 4);
        assert_eq!(store.get_flag("steps"), Some(&FlagValue::Int(4)));
    }

    #[test]
    fn test_increment_saturates() {
        let mut store = RecordStore::new();
        store.set_flag_int("big", i64::MAX - 1);
        assert_eq!(store.increment_flag("big", 10), i64::MAX);
    }

    #[test]
    fn test_reset_all_flags() {
        let mut store = RecordStore::new();
        store.set_flag_int("a", 1);
        store.set_flag_int("b", 2);
        store.reset_all_flags();
        let names: Vec<&str> = store.flag_names().collect();
        assert_eq!(names, vec![PLACEHOLDER_KEY]);
    }

    #[test]
    fn test_merge_without_overwrite_keeps_progress() {
        let mut store = RecordStore::new();
        store.set_flag_int("gold", 40);

        let mut defaults = BTreeMap::new();
        defaults.insert("gold".to_string(), FlagValue::Int(0));
        defaults.insert("chapter".to_string(), FlagValue::Int(1));
        store.merge_flags(&defaults, false);

        assert_eq!(store.get_flag_as_int("gold"), 40);
        assert_eq!(store.get_flag_as_int("chapter"), 1);
    }

    #[test]
    fn test_merge_with_overwrite_matches_source() {
        let mut store = RecordStore::new();
        store.set_flag_int("gold", 40);
        store.set_flag_int("keep", 9);

        let mut source = BTreeMap::new();
        source.insert("gold".to_string(), FlagValue::Int(0));
        source.insert("title".to_string(), FlagValue::from("Knight"));
        source.insert(String::new(), FlagValue::Int(1));
        store.merge_flags(&source, true);

        assert_eq!(store.get_flag("gold"), Some(&FlagValue::Int(0)));
        assert_eq!(store.get_flag("title"), Some(&FlagValue::from("Knight")));
        assert_eq!(store.get_flag_as_int("keep"), 9);
        assert!(store.get_flag("").is_none());
    }

    #[test]
    fn test_activity_replaces_previous() {
        let mut store = RecordStore::new();
        assert!(store.get_activity().is_placeholder());

        store.set_activity("battle", payload(&[("turn", 3)])).unwrap();
        store.set_activity("shop", payload(&[("slot", 1)])).unwrap();

        let activity = store.get_activity();
        assert_eq!(activity.activity_type, "shop");
        assert_eq!(activity.payload.len(), 1);
        assert!(!activity.payload.contains_key("turn"));
    }

    #[test]
    fn test_activity_rejects_empty_payload() {
        let mut store = RecordStore::new();
        store.set_activity("battle", payload(&[("turn", 3)])).unwrap();

        let result = store.set_activity("shop", ActivityPayload::new());
        assert!(matches!(result, Err(SaveError::Validation(_))));
        assert_eq!(store.get_activity().activity_type, "battle");
    }

    #[test]
    fn test_aliases_mirror_flags() {
        let mut store = RecordStore::new();
        store.set_alias("hero", "sprite_knight");
        assert_eq!(store.get_alias("hero"), Some("sprite_knight"));

        let mut source = BTreeMap::new();
        source.insert("hero".to_string(), "sprite_mage".to_string());
        source.insert("villain".to_string(), "sprite_lich".to_string());
        store.merge_aliases(&source, false);
        assert_eq!(store.get_alias("hero"), Some("sprite_knight"));
        assert_eq!(store.get_alias("villain"), Some("sprite_lich"));

        store.merge_aliases(&source, true);
        assert_eq!(store.get_alias("hero"), Some("sprite_mage"));

        store.reset_all_aliases();
        assert!(store.get_alias("hero").is_none());
        assert_eq!(store.get_alias(PLACEHOLDER_KEY), Some(PLACEHOLDER_KEY));
        // aliases and flags are separate namespaces
        assert!(store.get_flag("villain").is_none());
    }

    #[test]
    fn test_start_new_record_discards_data() {
        let mut store = RecordStore::new();
        store.set_flag_int("gold", 5);
        store.start_new_record();
        assert_eq!(store.get_flag_as_int("gold"), 0);
        assert_eq!(store.record(), Some(&RecordStore::empty_record()));
    }

    #[test]
    fn test_remove_flag_and_names() {
        let mut store = RecordStore::new();
        store.set_flag_int("gold", 5);
        store.set_flag("title", "Knight");

        let names: Vec<&str> = store.flag_names().collect();
        assert_eq!(names, vec!["gold", PLACEHOLDER_KEY, "title"]);

        assert_eq!(store.remove_flag("gold"), Some(FlagValue::Int(5)));
        assert_eq!(store.remove_flag("gold"), None);
        assert_eq!(store.get_flag_as_int("gold"), 0);
    }

    #[test]
    fn test_replace_record() {
        let mut loaded = Record::empty();
        loaded.flags.insert("chapter".to_string(), FlagValue::Int(4));

        let mut store = RecordStore::new();
        store.set_flag_int("gold", 9);
        store.replace_record(loaded.clone());
        assert_eq!(store.record(), Some(&loaded));
        assert!(store.get_flag("gold").is_none());
        assert_eq!(store.get_flag_as_int("chapter"), 4);
    }
}

/*!
End-to-end tests for savestate.
These run full save/load cycles against directory-backed stores, the way a
game would across separate sessions.
*/

use chrono::{TimeZone, Utc};
use savestate_core::{
    open_save_game, parse_alias_file, parse_flag_file, ActivityPayload, CloudBackend, CloudConfig,
    CloudTarget, DirectoryStore, FlagValue, KeyValueStore, LocalBackend, PayloadValue, RecordCodec,
    RecordStore, SaveConfig, SaveError, SaveGame, SyncSource, BLOB_KEY, TIMESTAMP_KEY,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn mirrored_config(root: &TempDir) -> SaveConfig {
    SaveConfig::local(root.path().join("device")).with_cloud(CloudConfig::new(
        CloudTarget::Directory {
            path: root.path().join("cloud"),
        },
    ))
}

#[test]
fn test_fresh_process_save_and_reload() {
    let root = TempDir::new().unwrap();
    let config = SaveConfig::local(root.path().join("device"));

    let mut first = open_save_game(&config).unwrap();
    assert!(!first.has_local_saved_data());
    assert_eq!(first.records().get_flag_as_int("gold"), 0);
    first.records_mut().set_flag_int("gold", 100);
    first.save_local().unwrap();
    assert!(first.has_local_saved_data());
    drop(first);

    let mut second = open_save_game(&config).unwrap();
    assert!(second.has_local_saved_data());
    second.load_local().unwrap();
    assert_eq!(second.records().get_flag_as_int("gold"), 100);
}

#[test]
fn test_cloud_disabled_keeps_local_state() {
    let root = TempDir::new().unwrap();
    let mut config = mirrored_config(&root);
    config.cloud_enabled = false;

    let mut game = open_save_game(&config).unwrap();
    game.records_mut().set_flag_int("gold", 1);
    game.save_local().unwrap();
    let device = DirectoryStore::new(root.path().join("device"));
    let blob_before = device.get(BLOB_KEY).unwrap();
    let stamp_before = device.get(TIMESTAMP_KEY).unwrap();

    game.records_mut().set_flag_int("gold", 2);
    assert!(matches!(game.save_cloud(), Err(SaveError::CloudDisabled)));
    assert!(matches!(game.load_from_cloud(), Err(SaveError::CloudDisabled)));

    assert_eq!(device.get(BLOB_KEY).unwrap(), blob_before);
    assert_eq!(device.get(TIMESTAMP_KEY).unwrap(), stamp_before);
    assert!(!root.path().join("cloud").exists());
    assert_eq!(game.records().get_flag_as_int("gold"), 2);
}

#[test]
fn test_newer_cloud_save_wins() {
    let root = TempDir::new().unwrap();
    let config = mirrored_config(&root);
    let codec = RecordCodec::default();

    let mut device_record = RecordStore::new();
    device_record.set_flag_int("gold", 10);
    LocalBackend::new(DirectoryStore::new(root.path().join("device")))
        .save(
            &codec.encode(device_record.record().unwrap()).unwrap(),
            Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        )
        .unwrap();

    let mut cloud_record = RecordStore::new();
    cloud_record.set_flag_int("gold", 250);
    cloud_record.set_flag("ending", "good");
    CloudBackend::new(DirectoryStore::new(root.path().join("cloud")))
        .enabled(true)
        .save(
            &codec.encode(cloud_record.record().unwrap()).unwrap(),
            Utc.timestamp_opt(1_700_000_500, 0).single().unwrap(),
        )
        .unwrap();

    let mut game = open_save_game(&config).unwrap();
    game.load_local().unwrap();
    game.records_mut().set_flag_int("gold", 11);

    assert!(game.cloud_is_newer());
    game.load_from_cloud().unwrap();
    assert_eq!(game.records().get_flag_as_int("gold"), 250);
    assert_eq!(
        game.records().get_flag("ending"),
        Some(&FlagValue::Text("good".to_string()))
    );
}

#[test]
fn test_cloud_round_trip_between_devices() {
    let root = TempDir::new().unwrap();

    let mut laptop = SaveGame::new(
        DirectoryStore::new(root.path().join("laptop")),
        DirectoryStore::new(root.path().join("cloud")),
    );
    laptop.set_cloud_enabled(true);
    laptop.records_mut().set_flag_int("chapter", 3);
    let mut payload = ActivityPayload::new();
    payload.insert("node".to_string(), PayloadValue::Text("harbor_intro".to_string()));
    payload.insert("line".to_string(), PayloadValue::Int(14));
    laptop
        .records_mut()
        .set_activity("dialogue", payload.clone())
        .unwrap();
    laptop.records_mut().set_alias("captain", "captain_wounded");
    laptop.save_cloud().unwrap();

    let mut phone = SaveGame::new(
        DirectoryStore::new(root.path().join("phone")),
        DirectoryStore::new(root.path().join("cloud")),
    );
    phone.set_cloud_enabled(true);
    assert!(!phone.has_local_saved_data());
    assert_eq!(phone.load_newest().unwrap(), SyncSource::Cloud);

    let records = phone.records();
    assert_eq!(records.get_flag_as_int("chapter"), 3);
    let activity = records.get_activity();
    assert_eq!(activity.activity_type, "dialogue");
    assert_eq!(activity.payload, payload);
    assert_eq!(records.get_alias("captain"), Some("captain_wounded"));

    // phone saves; both now hold the same timestamp, so local is preferred
    phone.save_cloud().unwrap();
    assert!(!phone.cloud_is_newer());
    assert_eq!(phone.load_newest().unwrap(), SyncSource::Local);
}

#[test]
fn test_corrupt_local_save_leaves_memory_alone() {
    let root = TempDir::new().unwrap();
    let config = SaveConfig::local(root.path().join("device"));

    let mut game = open_save_game(&config).unwrap();
    game.records_mut().set_flag_int("gold", 40);
    game.save_local().unwrap();

    let device = DirectoryStore::new(root.path().join("device"));
    let mut blob = device.get(BLOB_KEY).unwrap().unwrap();
    blob.truncate(blob.len() / 2);
    device.put(BLOB_KEY, &blob).unwrap();

    let mut reloaded = open_save_game(&config).unwrap();
    reloaded.records_mut().set_flag_int("gold", 5);
    let err = reloaded.load_local().unwrap_err();
    assert!(err.is_decode_failure(), "unexpected error: {err}");
    assert_eq!(reloaded.records().get_flag_as_int("gold"), 5);
}

#[test]
fn test_import_then_save() {
    let root = TempDir::new().unwrap();
    let config = SaveConfig::local(root.path().join("device"));

    let flags = parse_flag_file(r#"{"gold": 500, "ship": "Marigold", "map": [1, 0, 1]}"#).unwrap();
    let aliases = parse_alias_file(r#"{"hero": "hero_sailor"}"#).unwrap();

    let mut game = open_save_game(&config).unwrap();
    game.records_mut().set_flag_int("gold", 1);
    game.records_mut().merge_flags(&flags, true);
    game.records_mut().merge_aliases(&aliases, false);
    game.save_local().unwrap();

    let mut reloaded = open_save_game(&config).unwrap();
    reloaded.load_local().unwrap();
    let records = reloaded.records();
    assert_eq!(records.get_flag_as_int("gold"), 500);
    assert_eq!(records.get_flag_as_int("ship"), 0);
    assert_eq!(records.get_flag("map"), Some(&FlagValue::Bytes(vec![1, 0, 1])));
    assert_eq!(records.get_alias("hero"), Some("hero_sailor"));
}

#[test]
fn test_increment_and_reset_survive_reload() {
    let root = TempDir::new().unwrap();
    let config = SaveConfig::local(root.path().join("device"));

    let mut game = open_save_game(&config).unwrap();
    game.records_mut().increment_flag("deaths", 2);
    game.records_mut().increment_flag("deaths", 3);
    game.records_mut().set_flag("note", "x");
    game.save_local().unwrap();

    let mut reloaded = open_save_game(&config).unwrap();
    reloaded.load_local().unwrap();
    assert_eq!(reloaded.records().get_flag_as_int("deaths"), 5);

    reloaded.records_mut().reset_all_flags();
    reloaded.save_local().unwrap();
    let mut after_reset = open_save_game(&config).unwrap();
    after_reset.load_local().unwrap();
    let names: Vec<&str> = after_reset.records().flag_names().collect();
    assert_eq!(names, vec!["nil"]);
}

#[test]
fn test_deterministic_encoding_across_sessions() {
    let mut flags = BTreeMap::new();
    flags.insert("gold".to_string(), FlagValue::Int(9));
    flags.insert("name".to_string(), FlagValue::Text("Ada".to_string()));

    let mut a = RecordStore::new();
    a.merge_flags(&flags, true);
    let mut b = RecordStore::new();
    b.set_flag("name", "Ada");
    b.set_flag_int("gold", 9);

    let codec = RecordCodec::default();
    let blob = codec.encode(a.record().unwrap()).unwrap();
    assert_eq!(blob, codec.encode(b.record().unwrap()).unwrap());
    let decoded = codec.decode(&blob).unwrap();
    assert_eq!(codec.encode(&decoded).unwrap(), blob);
}

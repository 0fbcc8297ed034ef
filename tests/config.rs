use std::fs;

use assert_matches::assert_matches;

use ecostress_sync::config::{Config, ConfigLoader, Overrides};
use ecostress_sync::domain::{Action, DayNight};
use ecostress_sync::error::SyncError;

const FULL: &str = r#"{
  "schema_version": 1,
  "tile": "18TUN",
  "start_date": "2025-01-01",
  "end_date": "2025-11-20",
  "day_night": "night",
  "file_types": ["LST.tif", "QC.tif"],
  "download_base": "/data/ecostress",
  "metadata_path": "/data/metadata_ecostress.csv",
  "gee_project": "ee-project",
  "gee_upload_base": "projects/ee-project/Geneva/Ecostress",
  "gee_user": "user@example.com",
  "action": "download",
  "command_timeout_secs": 120,
  "log_file": "ecostress_download_upload.log"
}"#;

fn write_config(contents: &str) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ecosync.json");
    fs::write(&path, contents).unwrap();
    let path = path.to_string_lossy().to_string();
    (dir, path)
}

#[test]
fn loads_full_config_file() {
    let (_dir, path) = write_config(FULL);
    let resolved = ConfigLoader::resolve(Some(&path), Overrides::default()).unwrap();

    assert_eq!(resolved.tile.as_str(), "18TUN");
    assert_eq!(resolved.day_night, DayNight::Night);
    assert_eq!(resolved.action, Action::Download);
    assert_eq!(resolved.file_types.len(), 2);
    assert_eq!(resolved.file_types[1].type_name(), "QC");
    assert_eq!(resolved.gee_upload_base, "projects/ee-project/Geneva/Ecostress");
    assert_eq!(resolved.command_timeout.as_secs(), 120);
    assert_eq!(
        resolved.log_file.as_ref().map(|path| path.as_str()),
        Some("ecostress_download_upload.log")
    );
}

#[test]
fn cli_overrides_replace_file_values() {
    let (_dir, path) = write_config(FULL);
    let overrides = Overrides {
        action: Some(Action::Both),
        start_date: Some("2025-03-01".to_string()),
        end_date: Some("2025-03-02".to_string()),
        tile: None,
    };
    let resolved = ConfigLoader::resolve(Some(&path), overrides).unwrap();

    assert_eq!(resolved.action, Action::Both);
    assert_eq!(resolved.range.start.to_string(), "2025-03-01");
    assert_eq!(resolved.range.end.to_string(), "2025-03-02");
}

#[test]
fn missing_default_config() {
    let err = ConfigLoader::resolve(None, Overrides::default()).unwrap_err();
    assert_matches!(err, SyncError::MissingConfig);
}

#[test]
fn unreadable_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.json").to_string_lossy().to_string();
    let err = ConfigLoader::resolve(Some(&path), Overrides::default()).unwrap_err();
    assert_matches!(err, SyncError::ConfigRead(_));
}

#[test]
fn malformed_json() {
    let (_dir, path) = write_config("{ not json");
    let err = ConfigLoader::resolve(Some(&path), Overrides::default()).unwrap_err();
    assert_matches!(err, SyncError::ConfigParse(_));
}

#[test]
fn invalid_values_are_rejected_before_any_work() {
    let base = serde_json::from_str::<Config>(FULL).unwrap();

    let bad_tile = Config {
        tile: Some("TUN18".to_string()),
        ..base.clone()
    };
    assert_matches!(
        ConfigLoader::resolve_config(bad_tile, Overrides::default()),
        Err(SyncError::InvalidTile(_))
    );

    let reversed = Config {
        start_date: Some("2025-12-01".to_string()),
        ..base.clone()
    };
    assert_matches!(
        ConfigLoader::resolve_config(reversed, Overrides::default()),
        Err(SyncError::InvalidDateRange { .. })
    );

    let bad_type = Config {
        file_types: Some(vec!["LST".to_string()]),
        ..base.clone()
    };
    assert_matches!(
        ConfigLoader::resolve_config(bad_type, Overrides::default()),
        Err(SyncError::InvalidFileType(_))
    );

    let no_user = Config {
        gee_user: None,
        action: Some(Action::Upload),
        ..base
    };
    assert_matches!(
        ConfigLoader::resolve_config(no_user, Overrides::default()),
        Err(SyncError::InvalidConfig(_))
    );
}

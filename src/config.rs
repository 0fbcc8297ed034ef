use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{Action, DateRange, DayNight, FileType, MgrsTile, default_file_types};
use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILE: &str = "ecosync.json";
pub const DEFAULT_SHORT_NAME: &str = "ECO_L2T_LSTE";
pub const DEFAULT_TILE: &str = "18TUN";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub tile: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub day_night: Option<DayNight>,
    #[serde(default)]
    pub file_types: Option<Vec<String>>,
    #[serde(default)]
    pub download_base: Option<String>,
    #[serde(default)]
    pub metadata_path: Option<String>,
    #[serde(default)]
    pub gee_project: Option<String>,
    #[serde(default)]
    pub gee_upload_base: Option<String>,
    #[serde(default)]
    pub gee_user: Option<String>,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub action: Option<Action>,
    pub tile: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub tile: MgrsTile,
    pub range: DateRange,
    pub day_night: DayNight,
    pub file_types: Vec<FileType>,
    pub download_base: Utf8PathBuf,
    pub metadata_path: Utf8PathBuf,
    pub gee_upload_base: String,
    pub gee_project: Option<String>,
    pub gee_user: String,
    pub action: Action,
    pub short_name: String,
    pub command_timeout: Duration,
    pub log_file: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>, overrides: Overrides) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SyncError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(SyncError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let tile: MgrsTile = overrides
            .tile
            .or(config.tile)
            .as_deref()
            .unwrap_or(DEFAULT_TILE)
            .parse()?;

        let start = overrides
            .start_date
            .or(config.start_date)
            .ok_or_else(|| SyncError::InvalidConfig("start_date is required".to_string()))?;
        let end = overrides
            .end_date
            .or(config.end_date)
            .ok_or_else(|| SyncError::InvalidConfig("end_date is required".to_string()))?;
        let range = DateRange::parse(&start, &end)?;

        let file_types = match config.file_types {
            Some(values) if values.is_empty() => {
                return Err(SyncError::InvalidConfig(
                    "file_types must not be empty".to_string(),
                ));
            }
            Some(values) => values
                .iter()
                .map(|value| value.parse())
                .collect::<Result<Vec<FileType>, SyncError>>()?,
            None => default_file_types(),
        };

        let download_base = required(config.download_base, "download_base")?;
        let metadata_path = required(config.metadata_path, "metadata_path")?;
        if !metadata_path.ends_with(".csv") {
            return Err(SyncError::InvalidConfig(format!(
                "metadata_path must be a .csv file: {metadata_path}"
            )));
        }

        let configured_project = config
            .gee_project
            .map(|project| project.trim().to_string())
            .filter(|project| !project.is_empty());
        let gee_upload_base = match (config.gee_upload_base, &configured_project) {
            (Some(base), _) if !base.trim().is_empty() => base.trim().to_string(),
            (_, Some(project)) => format!("projects/{project}/Ecostress"),
            _ => String::new(),
        };
        let gee_project = configured_project.or_else(|| project_from_asset_path(&gee_upload_base));

        let action = overrides
            .action
            .or(config.action)
            .unwrap_or(Action::Both);
        let gee_user = config.gee_user.unwrap_or_default();
        if action.uploads() && (gee_upload_base.is_empty() || gee_user.trim().is_empty()) {
            return Err(SyncError::InvalidConfig(
                "uploading requires gee_user and gee_project or gee_upload_base".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            tile,
            range,
            day_night: config.day_night.unwrap_or(DayNight::Day),
            file_types,
            download_base: Utf8PathBuf::from(download_base),
            metadata_path: Utf8PathBuf::from(metadata_path),
            gee_upload_base,
            gee_project,
            gee_user: gee_user.trim().to_string(),
            action,
            short_name: config
                .short_name
                .unwrap_or_else(|| DEFAULT_SHORT_NAME.to_string()),
            command_timeout: Duration::from_secs(
                config
                    .command_timeout_secs
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
            ),
            log_file: config
                .log_file
                .filter(|value| !value.trim().is_empty())
                .map(Utf8PathBuf::from),
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, SyncError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SyncError::InvalidConfig(format!("{name} is required")))
}

/// `projects/<project>/...` asset paths name their Cloud project.
fn project_from_asset_path(path: &str) -> Option<String> {
    let mut parts = path.split('/');
    match (parts.next(), parts.next()) {
        (Some("projects"), Some(project)) if !project.is_empty() => Some(project.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        Config {
            start_date: Some("2025-01-01".to_string()),
            end_date: Some("2025-01-31".to_string()),
            download_base: Some("/data/ecostress".to_string()),
            metadata_path: Some("/data/meta.csv".to_string()),
            gee_project: Some("ee-demo".to_string()),
            gee_user: Some("user@example.com".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_fill_in() {
        let resolved = ConfigLoader::resolve_config(minimal(), Overrides::default()).unwrap();
        assert_eq!(resolved.tile.as_str(), DEFAULT_TILE);
        assert_eq!(resolved.file_types.len(), 8);
        assert_eq!(resolved.action, Action::Both);
        assert_eq!(resolved.day_night, DayNight::Day);
        assert_eq!(resolved.gee_upload_base, "projects/ee-demo/Ecostress");
        assert_eq!(resolved.gee_project.as_deref(), Some("ee-demo"));
        assert_eq!(resolved.short_name, DEFAULT_SHORT_NAME);
        assert_eq!(resolved.command_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = Overrides {
            action: Some(Action::Download),
            tile: Some("47mdu".to_string()),
            ..Overrides::default()
        };
        let resolved = ConfigLoader::resolve_config(minimal(), overrides).unwrap();
        assert_eq!(resolved.action, Action::Download);
        assert_eq!(resolved.tile.as_str(), "47MDU");
    }

    #[test]
    fn project_is_read_from_upload_base() {
        let config = Config {
            gee_project: None,
            gee_upload_base: Some("projects/ee-other/Geneva/Ecostress".to_string()),
            ..minimal()
        };
        let resolved = ConfigLoader::resolve_config(config, Overrides::default()).unwrap();
        assert_eq!(resolved.gee_project.as_deref(), Some("ee-other"));
        assert_eq!(project_from_asset_path("users/someone/Ecostress"), None);
    }
}

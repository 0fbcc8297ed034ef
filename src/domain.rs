use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Military Grid Reference System tile designator, e.g. `18TUN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MgrsTile(String);

impl MgrsTile {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MgrsTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MgrsTile {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let bytes = normalized.as_bytes();
        let is_valid = bytes.len() == 5
            && bytes[..2].iter().all(|ch| ch.is_ascii_digit())
            && bytes[2..].iter().all(|ch| ch.is_ascii_uppercase());
        if !is_valid {
            return Err(SyncError::InvalidTile(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for MgrsTile {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MgrsTile> for String {
    fn from(value: MgrsTile) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DayNight {
    Day,
    Night,
}

impl DayNight {
    /// Value of the CMR `day_night_flag` query parameter.
    pub fn as_query(&self) -> &'static str {
        match self {
            DayNight::Day => "DAY",
            DayNight::Night => "NIGHT",
        }
    }
}

impl fmt::Display for DayNight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_query())
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Download,
    Upload,
    Both,
}

impl Action {
    pub fn downloads(&self) -> bool {
        matches!(self, Action::Download | Action::Both)
    }

    pub fn uploads(&self) -> bool {
        matches!(self, Action::Upload | Action::Both)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Download => write!(f, "download"),
            Action::Upload => write!(f, "upload"),
            Action::Both => write!(f, "both"),
        }
    }
}

/// A granule file suffix such as `LST.tif`. The part before the first `.` is
/// the band type name used for folders and catalog paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileType(String);

impl FileType {
    pub fn suffix(&self) -> &str {
        &self.0
    }

    pub fn type_name(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    pub fn matches(&self, filename: &str) -> bool {
        filename.ends_with(&self.0)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = trimmed
            .split_once('.')
            .map(|(name, ext)| !name.is_empty() && !ext.is_empty())
            .unwrap_or(false);
        if !is_valid || trimmed.contains('/') {
            return Err(SyncError::InvalidFileType(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for FileType {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FileType> for String {
    fn from(value: FileType) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn parse(start: &str, end: &str) -> Result<Self, SyncError> {
        let start_date = parse_date(start)?;
        let end_date = parse_date(end)?;
        if start_date > end_date {
            return Err(SyncError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            start: start_date,
            end: end_date,
        })
    }

    /// CMR temporal filter covering both days completely.
    pub fn as_temporal(&self) -> String {
        format!(
            "{}T00:00:00Z,{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| SyncError::InvalidDate(value.to_string()))
}

pub fn default_file_types() -> Vec<FileType> {
    [
        "LST.tif",
        "LST_err.tif",
        "EmisWB.tif",
        "view_zenith.tif",
        "height.tif",
        "QC.tif",
        "cloud.tif",
        "water.tif",
    ]
    .into_iter()
    .map(|suffix| FileType(suffix.to_string()))
    .collect()
}

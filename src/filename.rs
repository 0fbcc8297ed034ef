use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static PROCESSING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"T\d{6}_(\d{4}_\d{2})$").unwrap());
static TILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(\d{2}[A-Z]{3})_").unwrap());
static ORBIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_LSTE_(\d+)_").unwrap());
static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ECOv(\d+)_").unwrap());
static LEVEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ECOv\d+_(L\d[A-Z]?)_").unwrap());
static SCENE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_LSTE_\d+_(\d{3})_").unwrap());
static ORBIT_SCENE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_LSTE_(\d+_\d{3})_").unwrap());

/// Fields recovered from an ECOSTRESS granule identifier such as
/// `ECOv002_L2T_LSTE_00048_003_18TUN_20250101T120000_0712_01`.
///
/// Each extraction is independent; nothing checks that the orbit number and
/// the orbit/scene pair agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilenameFields {
    pub processing_id: Option<String>,
    pub mgrs_tile: Option<String>,
    pub orbit_number: Option<String>,
    pub version: Option<String>,
    pub processing_level: Option<String>,
    pub scene: Option<i64>,
    pub orbit_scene: Option<String>,
}

pub fn parse_granule_name(name: &str) -> FilenameFields {
    FilenameFields {
        processing_id: capture(&PROCESSING_ID, name),
        mgrs_tile: capture(&TILE, name),
        orbit_number: capture(&ORBIT, name),
        version: capture(&VERSION, name),
        processing_level: capture(&LEVEL, name),
        scene: capture(&SCENE, name).and_then(|value| value.parse().ok()),
        orbit_scene: capture(&ORBIT_SCENE, name),
    }
}

/// The MGRS tile embedded in a file name, if any.
pub fn tile_from_filename(name: &str) -> Option<String> {
    capture(&TILE, name)
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|value| value.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_fields_stay_empty() {
        let fields = parse_granule_name("not_an_ecostress_name");
        assert_eq!(fields, FilenameFields::default());
    }

    #[test]
    fn tile_in_download_filename() {
        let name = "ECOv002_L2T_LSTE_35109_012_47MDU_20241001T030405_0713_01_QC.tif";
        assert_eq!(tile_from_filename(name).as_deref(), Some("47MDU"));
    }
}

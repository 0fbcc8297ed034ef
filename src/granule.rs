use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::filename::parse_granule_name;
use crate::metadata::{DynamicKind, Field, FlatMetadata, Scalar};

const DEFAULT_PLATFORM: &str = "ISS";
const DEFAULT_SENSOR: &str = "ECOSTRESS";

/// One CMR UMM-JSON search item: a `meta` section with catalog identity and
/// an `umm` section with the provider-defined granule description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GranuleRecord {
    raw: Value,
}

impl GranuleRecord {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn meta(&self) -> Option<&Value> {
        self.raw.get("meta")
    }

    pub fn umm(&self) -> Option<&Value> {
        self.raw.get("umm")
    }

    pub fn granule_ur(&self) -> &str {
        self.umm()
            .and_then(|umm| umm.get("GranuleUR"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Total archive size in megabytes. The collection publishes `Size` in MB;
    /// records that only carry `SizeInBytes` are converted.
    pub fn size_mb(&self) -> f64 {
        let infos = self
            .umm()
            .and_then(|umm| umm.get("DataGranule"))
            .and_then(|granule| granule.get("ArchiveAndDistributionInformation"))
            .and_then(Value::as_array);
        let Some(infos) = infos else {
            return 0.0;
        };

        let sizes = infos
            .iter()
            .map(|info| info.get("Size").and_then(Value::as_f64))
            .collect::<Option<Vec<_>>>();
        if let Some(sizes) = sizes {
            return sizes.iter().sum();
        }
        infos
            .iter()
            .map(|info| info.get("SizeInBytes").and_then(Value::as_f64))
            .collect::<Option<Vec<_>>>()
            .map(|bytes| bytes.iter().sum::<f64>() / 1024.0 / 1024.0)
            .unwrap_or(0.0)
    }

    /// HTTPS download links (`GET DATA` related URLs outside the S3 region).
    pub fn data_links(&self) -> Vec<String> {
        self.umm()
            .and_then(|umm| umm.get("RelatedUrls"))
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter(|entry| entry.get("Type").and_then(Value::as_str) == Some("GET DATA"))
                    .filter_map(|entry| entry.get("URL").and_then(Value::as_str))
                    .filter(|url| url.starts_with("https://") || url.starts_with("http://"))
                    .map(|url| url.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Flattens a granule record into table-ready metadata.
pub fn extract_granule_metadata(granule: &GranuleRecord) -> FlatMetadata {
    let null = Value::Null;
    let meta = granule.meta().unwrap_or(&null);
    let umm = granule.umm().unwrap_or(&null);
    let mut metadata = FlatMetadata::new();

    for (field, key) in [
        (Field::ConceptType, "concept-type"),
        (Field::ConceptId, "concept-id"),
        (Field::RevisionId, "revision-id"),
        (Field::NativeId, "native-id"),
        (Field::CollectionConceptId, "collection-concept-id"),
        (Field::ProviderId, "provider-id"),
        (Field::Format, "format"),
        (Field::RevisionDate, "revision-date"),
    ] {
        copy_or_empty(&mut metadata, field, meta.get(key));
    }

    let granule_ur = granule.granule_ur();
    metadata.set(Field::GranuleUr, granule_ur);
    extract_filename_fields(&mut metadata, granule_ur);

    let collection = umm.get("CollectionReference");
    copy_or_empty(&mut metadata, Field::ShortName, collection.and_then(|c| c.get("ShortName")));
    copy_or_empty(&mut metadata, Field::Version, collection.and_then(|c| c.get("Version")));
    copy_or_empty(
        &mut metadata,
        Field::PgeVersion,
        umm.get("PGEVersionClass").and_then(|pge| pge.get("PGEVersion")),
    );

    extract_temporal(&mut metadata, umm);
    extract_spatial(&mut metadata, umm);
    extract_provider_dates(&mut metadata, umm);

    let data_granule = umm.get("DataGranule");
    copy_or_empty(
        &mut metadata,
        Field::DayNightFlag,
        data_granule.and_then(|g| g.get("DayNightFlag")),
    );
    copy_or_empty(
        &mut metadata,
        Field::ProductionDateTime,
        data_granule.and_then(|g| g.get("ProductionDateTime")),
    );

    extract_platform(&mut metadata, umm);
    metadata.set(Field::SizeMb, granule.size_mb());
    extract_orbit(&mut metadata, umm);
    metadata.set(Field::ParameterNames, parameter_names(umm));
    extract_additional_attributes(&mut metadata, umm);

    metadata
}

/// Milliseconds since the Unix epoch for an ISO-8601 timestamp. A trailing
/// `Z` means UTC, as do timestamps without an offset.
pub fn timestamp_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    let normalized = match value.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => value.to_string(),
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(parsed.timestamp_millis());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
}

fn copy_or_empty(metadata: &mut FlatMetadata, field: Field, value: Option<&Value>) {
    match value {
        None => metadata.set(field, ""),
        Some(value) => {
            if let Some(scalar) = Scalar::from_json(value) {
                metadata.set(field, scalar);
            }
        }
    }
}

fn extract_filename_fields(metadata: &mut FlatMetadata, granule_ur: &str) {
    for field in [
        Field::ProcessingId,
        Field::MgrsTile,
        Field::OrbitNumberFromFilename,
        Field::VersionFromFilename,
        Field::ProcessingLevel,
    ] {
        metadata.set(field, "");
    }
    if granule_ur.is_empty() {
        return;
    }

    let parsed = parse_granule_name(granule_ur);
    let text_fields = [
        (Field::ProcessingId, parsed.processing_id),
        (Field::MgrsTile, parsed.mgrs_tile),
        (Field::OrbitNumberFromFilename, parsed.orbit_number),
        (Field::VersionFromFilename, parsed.version),
        (Field::ProcessingLevel, parsed.processing_level),
        (Field::OrbitScene, parsed.orbit_scene),
    ];
    for (field, value) in text_fields {
        if let Some(value) = value {
            metadata.set(field, value);
        }
    }
    if let Some(scene) = parsed.scene {
        metadata.set(Field::Scene, scene);
    }
}

fn extract_temporal(metadata: &mut FlatMetadata, umm: &Value) {
    let range = umm
        .get("TemporalExtent")
        .and_then(|extent| extent.get("RangeDateTime"));
    let beginning = range.and_then(|r| r.get("BeginningDateTime"));
    copy_or_empty(metadata, Field::BeginningDateTime, beginning);
    copy_or_empty(metadata, Field::EndingDateTime, range.and_then(|r| r.get("EndingDateTime")));

    let Some(beginning) = beginning.and_then(Value::as_str).filter(|v| !v.is_empty()) else {
        return;
    };
    match timestamp_millis(beginning) {
        Some(millis) => metadata.set(Field::TimeStart, millis),
        None => {
            warn!(value = beginning, "failed to convert beginning_date_time to timestamp");
            metadata.set(Field::TimeStart, "");
        }
    }
}

fn extract_spatial(metadata: &mut FlatMetadata, umm: &Value) {
    let rectangle = umm
        .get("SpatialExtent")
        .and_then(|extent| extent.get("HorizontalSpatialDomain"))
        .and_then(|domain| domain.get("Geometry"))
        .and_then(|geometry| geometry.get("BoundingRectangles"))
        .and_then(Value::as_array)
        .and_then(|rectangles| rectangles.first());

    for (field, key) in [
        (Field::NorthLat, "NorthBoundingCoordinate"),
        (Field::SouthLat, "SouthBoundingCoordinate"),
        (Field::EastLon, "EastBoundingCoordinate"),
        (Field::WestLon, "WestBoundingCoordinate"),
    ] {
        copy_or_empty(metadata, field, rectangle.and_then(|rect| rect.get(key)));
    }
}

fn extract_provider_dates(metadata: &mut FlatMetadata, umm: &Value) {
    let Some(dates) = umm.get("ProviderDates").and_then(Value::as_array) else {
        return;
    };
    for entry in dates {
        let date_type = entry.get("Type").and_then(Value::as_str).unwrap_or("");
        if date_type.is_empty() {
            continue;
        }
        let value = entry
            .get("Date")
            .and_then(Scalar::from_json)
            .unwrap_or_else(|| Scalar::from(""));
        metadata.push_dynamic(DynamicKind::ProviderDate, date_type.to_lowercase(), value);
    }
}

fn extract_platform(metadata: &mut FlatMetadata, umm: &Value) {
    metadata.set(Field::PlatformShortName, "");
    metadata.set(Field::Sensor, "");

    let Some(platform) = umm
        .get("Platforms")
        .and_then(Value::as_array)
        .and_then(|platforms| platforms.first())
    else {
        return;
    };
    let platform_name = platform
        .get("ShortName")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PLATFORM);
    metadata.set(Field::PlatformShortName, platform_name);

    if let Some(instrument) = platform
        .get("Instruments")
        .and_then(Value::as_array)
        .and_then(|instruments| instruments.first())
    {
        let sensor = instrument
            .get("ShortName")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SENSOR);
        metadata.set(Field::Sensor, sensor);
    }
}

fn extract_orbit(metadata: &mut FlatMetadata, umm: &Value) {
    metadata.set(Field::OrbitNumber, "");
    metadata.set(Field::BeginOrbitNumber, "");
    metadata.set(Field::EndOrbitNumber, "");

    let calculated = umm
        .get("OrbitCalculatedSpatialDomains")
        .and_then(Value::as_array)
        .and_then(|domains| domains.first());
    if let Some(begin) = calculated.and_then(|domain| domain.get("BeginOrbitNumber")) {
        let end = calculated.and_then(|domain| domain.get("EndOrbitNumber"));
        copy_or_empty(metadata, Field::BeginOrbitNumber, Some(begin));
        copy_or_empty(metadata, Field::EndOrbitNumber, end);
        copy_or_empty(metadata, Field::OrbitNumber, Some(begin));
    }

    let orbit_unset = metadata
        .get(Field::OrbitNumber)
        .map(Scalar::is_empty)
        .unwrap_or(true);
    if !orbit_unset {
        return;
    }
    if let Some(number) = umm
        .get("OrbitParameters")
        .and_then(Value::as_array)
        .and_then(|parameters| parameters.first())
        .and_then(|parameters| parameters.get("OrbitNumber"))
    {
        copy_or_empty(metadata, Field::OrbitNumber, Some(number));
    }
}

fn parameter_names(umm: &Value) -> String {
    umm.get("MeasuredParameters")
        .and_then(Value::as_array)
        .map(|params| {
            params
                .iter()
                .filter_map(|param| param.get("ParameterName").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn extract_additional_attributes(metadata: &mut FlatMetadata, umm: &Value) {
    let Some(attributes) = umm.get("AdditionalAttributes").and_then(Value::as_array) else {
        return;
    };
    for attribute in attributes {
        let name = attribute.get("Name").and_then(Value::as_str).unwrap_or("");
        let values = attribute
            .get("Values")
            .and_then(Value::as_array)
            .filter(|values| !values.is_empty());
        let Some(values) = values else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let joined = values
            .iter()
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let safe_name = name.to_lowercase().replace('-', "_");
        metadata.push_dynamic(DynamicKind::Attribute, safe_name, joined);
    }
}

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Canonical metadata table columns, in the order they are appended to a
/// table that lacks them.
pub const TABLE_COLUMNS: &[&str] = &[
    "system:time_start",
    "system:time_end",
    "EPSG",
    "band_type",
    "attr_identifier_product_doi",
    "attr_identifier_product_doi_authority",
    "begin_orbit_number",
    "beginning_date_time",
    "collection_concept_id",
    "concept_id",
    "concept_type",
    "day_night_flag",
    "east_lon",
    "end_orbit_number",
    "ending_date_time",
    "format",
    "granule_ur",
    "mgrs_tile",
    "native_id",
    "north_lat",
    "orbit_number",
    "orbit_number_from_filename",
    "parameter_names",
    "pge_version",
    "platform_short_name",
    "processing_ID",
    "processing_level",
    "production_date_time",
    "provider_date_insert",
    "provider_date_update",
    "provider_id",
    "revision_date",
    "revision_id",
    "sensor",
    "short_name",
    "size_mb",
    "south_lat",
    "time_start",
    "version",
    "version_from_filename",
    "west_lon",
    "scene",
    "orbit_scene",
];

/// Fixed metadata vocabulary. Provider dates and additional attributes are
/// open-ended and live in [`DynamicField`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Field {
    ConceptType,
    ConceptId,
    RevisionId,
    NativeId,
    CollectionConceptId,
    ProviderId,
    Format,
    RevisionDate,
    GranuleUr,
    ProcessingId,
    MgrsTile,
    OrbitNumberFromFilename,
    VersionFromFilename,
    ProcessingLevel,
    Scene,
    OrbitScene,
    ShortName,
    Version,
    PgeVersion,
    BeginningDateTime,
    EndingDateTime,
    TimeStart,
    NorthLat,
    SouthLat,
    EastLon,
    WestLon,
    DayNightFlag,
    ProductionDateTime,
    PlatformShortName,
    Sensor,
    SizeMb,
    OrbitNumber,
    BeginOrbitNumber,
    EndOrbitNumber,
    ParameterNames,
    SystemTimeStart,
    SystemTimeEnd,
    Epsg,
    BandType,
}

impl Field {
    pub fn column(&self) -> &'static str {
        match self {
            Field::ConceptType => "concept_type",
            Field::ConceptId => "concept_id",
            Field::RevisionId => "revision_id",
            Field::NativeId => "native_id",
            Field::CollectionConceptId => "collection_concept_id",
            Field::ProviderId => "provider_id",
            Field::Format => "format",
            Field::RevisionDate => "revision_date",
            Field::GranuleUr => "granule_ur",
            Field::ProcessingId => "processing_ID",
            Field::MgrsTile => "mgrs_tile",
            Field::OrbitNumberFromFilename => "orbit_number_from_filename",
            Field::VersionFromFilename => "version_from_filename",
            Field::ProcessingLevel => "processing_level",
            Field::Scene => "scene",
            Field::OrbitScene => "orbit_scene",
            Field::ShortName => "short_name",
            Field::Version => "version",
            Field::PgeVersion => "pge_version",
            Field::BeginningDateTime => "beginning_date_time",
            Field::EndingDateTime => "ending_date_time",
            Field::TimeStart => "time_start",
            Field::NorthLat => "north_lat",
            Field::SouthLat => "south_lat",
            Field::EastLon => "east_lon",
            Field::WestLon => "west_lon",
            Field::DayNightFlag => "day_night_flag",
            Field::ProductionDateTime => "production_date_time",
            Field::PlatformShortName => "platform_short_name",
            Field::Sensor => "sensor",
            Field::SizeMb => "size_mb",
            Field::OrbitNumber => "orbit_number",
            Field::BeginOrbitNumber => "begin_orbit_number",
            Field::EndOrbitNumber => "end_orbit_number",
            Field::ParameterNames => "parameter_names",
            Field::SystemTimeStart => "system:time_start",
            Field::SystemTimeEnd => "system:time_end",
            Field::Epsg => "EPSG",
            Field::BandType => "band_type",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// A single table cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Converts a JSON leaf. `null` is treated as absent.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(Scalar::Text(text.clone())),
            Value::Bool(flag) => Some(Scalar::Text(if *flag { "True" } else { "False" }.into())),
            Value::Number(number) => number
                .as_i64()
                .map(Scalar::Int)
                .or_else(|| number.as_f64().map(Scalar::Float)),
            other => Some(Scalar::Text(other.to_string())),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Empty text counts as "no value" for the fields the reconciler derives
    /// from other fields.
    pub fn is_empty(&self) -> bool {
        matches!(self, Scalar::Text(text) if text.is_empty())
    }

    pub fn to_cell(&self) -> String {
        match self {
            Scalar::Text(text) => text.clone(),
            Scalar::Int(value) => value.to_string(),
            Scalar::Float(value) => format_float(*value),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

// Integral floats keep a trailing `.0` so coordinates and sizes read the same
// as the values the provider published.
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicKind {
    ProviderDate,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicField {
    pub kind: DynamicKind,
    pub name: String,
    pub value: Scalar,
}

impl DynamicField {
    pub fn column(&self) -> String {
        match self.kind {
            DynamicKind::ProviderDate => format!("provider_date_{}", self.name),
            DynamicKind::Attribute => format!("attr_{}", self.name),
        }
    }
}

/// Flattened metadata for one granule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlatMetadata {
    fields: BTreeMap<Field, Scalar>,
    dynamic: Vec<DynamicField>,
}

impl FlatMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, value: impl Into<Scalar>) {
        self.fields.insert(field, value.into());
    }

    pub fn with(mut self, field: Field, value: impl Into<Scalar>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: Field) -> Option<&Scalar> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(Scalar::as_text)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Adds a dynamically named field. A later entry with the same column
    /// replaces the earlier one in place.
    pub fn push_dynamic(&mut self, kind: DynamicKind, name: impl Into<String>, value: impl Into<Scalar>) {
        let entry = DynamicField {
            kind,
            name: name.into(),
            value: value.into(),
        };
        match self
            .dynamic
            .iter_mut()
            .find(|existing| existing.kind == entry.kind && existing.name == entry.name)
        {
            Some(existing) => existing.value = entry.value,
            None => self.dynamic.push(entry),
        }
    }

    pub fn dynamic(&self) -> &[DynamicField] {
        &self.dynamic
    }

    pub fn dynamic_value(&self, kind: DynamicKind, name: &str) -> Option<&Scalar> {
        self.dynamic
            .iter()
            .find(|entry| entry.kind == kind && entry.name == name)
            .map(|entry| &entry.value)
    }

    /// Every present value with its table column name, fixed fields first.
    pub fn columns(&self) -> impl Iterator<Item = (String, &Scalar)> {
        self.fields
            .iter()
            .map(|(field, value)| (field.column().to_string(), value))
            .chain(self.dynamic.iter().map(|entry| (entry.column(), &entry.value)))
    }
}

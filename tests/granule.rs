use serde_json::{Value, json};

use ecostress_sync::granule::{GranuleRecord, extract_granule_metadata};
use ecostress_sync::metadata::{DynamicKind, Field, Scalar};

fn fixture() -> GranuleRecord {
    let raw: Value = serde_json::from_str(include_str!("fixtures/granule_umm.json")).unwrap();
    GranuleRecord::new(raw)
}

#[test]
fn extracts_identity_and_filename_fields() {
    let meta = extract_granule_metadata(&fixture());

    assert_eq!(meta.text(Field::ConceptId), Some("G3312345678-LPCLOUD"));
    assert_eq!(meta.get(Field::RevisionId), Some(&Scalar::Int(1)));
    assert_eq!(meta.text(Field::ProviderId), Some("LPCLOUD"));
    assert_eq!(meta.text(Field::MgrsTile), Some("18TUN"));
    assert_eq!(meta.text(Field::ProcessingId), Some("0713_01"));
    assert_eq!(meta.text(Field::OrbitNumberFromFilename), Some("36016"));
    assert_eq!(meta.text(Field::VersionFromFilename), Some("002"));
    assert_eq!(meta.text(Field::ProcessingLevel), Some("L2T"));
    assert_eq!(meta.get(Field::Scene), Some(&Scalar::Int(11)));
    assert_eq!(meta.text(Field::OrbitScene), Some("36016_011"));
    assert_eq!(meta.text(Field::ShortName), Some("ECO_L2T_LSTE"));
    assert_eq!(meta.text(Field::PgeVersion), Some("v1.3.1"));
}

#[test]
fn extracts_time_space_and_descriptors() {
    let meta = extract_granule_metadata(&fixture());

    assert_eq!(meta.get(Field::TimeStart), Some(&Scalar::Int(1_735_732_800_000)));
    assert_eq!(meta.get(Field::NorthLat).map(Scalar::to_cell).as_deref(), Some("41.0"));
    assert_eq!(meta.get(Field::WestLon), Some(&Scalar::Float(-76.2)));
    assert_eq!(meta.text(Field::DayNightFlag), Some("Day"));
    assert_eq!(meta.text(Field::PlatformShortName), Some("ISS"));
    assert_eq!(meta.text(Field::Sensor), Some("ECOSTRESS"));
    assert_eq!(meta.get(Field::SizeMb), Some(&Scalar::Float(1.75)));
    assert_eq!(meta.text(Field::ParameterNames), Some("LST, QC"));
    assert_eq!(meta.get(Field::OrbitNumber), Some(&Scalar::Int(36016)));
    assert_eq!(meta.get(Field::EndOrbitNumber), Some(&Scalar::Int(36016)));
}

#[test]
fn extracts_dynamic_fields() {
    let meta = extract_granule_metadata(&fixture());

    assert_eq!(
        meta.dynamic_value(DynamicKind::ProviderDate, "insert"),
        Some(&Scalar::from("2025-01-02T10:00:00.000Z"))
    );
    assert_eq!(
        meta.dynamic_value(DynamicKind::Attribute, "identifier_product_doi"),
        Some(&Scalar::from("10.5067/ECOSTRESS/ECO_L2T_LSTE.002"))
    );
    assert_eq!(
        meta.dynamic_value(DynamicKind::Attribute, "cloud_cover"),
        Some(&Scalar::from("12, 13"))
    );
    assert_eq!(meta.dynamic_value(DynamicKind::Attribute, "emptyattr"), None);

    let columns = meta.columns().map(|(column, _)| column).collect::<Vec<_>>();
    assert!(columns.contains(&"provider_date_update".to_string()));
    assert!(columns.contains(&"attr_cloud_cover".to_string()));
}

#[test]
fn data_links_are_external_downloads_only() {
    let links = fixture().data_links();
    assert_eq!(links.len(), 3);
    assert!(links.iter().all(|url| url.starts_with("https://")));
    assert!(links.iter().all(|url| url.ends_with(".tif")));
}

#[test]
fn orbit_parameters_fill_in_when_calculated_domain_lacks_begin() {
    let record = GranuleRecord::new(json!({
        "umm": {
            "GranuleUR": "ECOv002_L2T_LSTE_00048_003_18TUN_20250101T120000_0712_01",
            "OrbitCalculatedSpatialDomains": [{"EndOrbitNumber": 99}],
            "OrbitParameters": [{"OrbitNumber": 123}]
        }
    }));
    let meta = extract_granule_metadata(&record);
    assert_eq!(meta.get(Field::OrbitNumber), Some(&Scalar::Int(123)));
    assert_eq!(meta.text(Field::BeginOrbitNumber), Some(""));
}

#[test]
fn calculated_domain_wins_over_orbit_parameters() {
    let record = GranuleRecord::new(json!({
        "umm": {
            "OrbitCalculatedSpatialDomains": [{"BeginOrbitNumber": 5, "EndOrbitNumber": 6}],
            "OrbitParameters": [{"OrbitNumber": 123}]
        }
    }));
    let meta = extract_granule_metadata(&record);
    assert_eq!(meta.get(Field::OrbitNumber), Some(&Scalar::Int(5)));
    assert_eq!(meta.get(Field::EndOrbitNumber), Some(&Scalar::Int(6)));
}

#[test]
fn sparse_record_yields_empty_defaults() {
    let meta = extract_granule_metadata(&GranuleRecord::new(json!({"meta": {}, "umm": {}})));

    assert_eq!(meta.text(Field::ConceptId), Some(""));
    assert_eq!(meta.text(Field::GranuleUr), Some(""));
    assert_eq!(meta.text(Field::MgrsTile), Some(""));
    assert_eq!(meta.text(Field::NorthLat), Some(""));
    assert_eq!(meta.text(Field::PlatformShortName), Some(""));
    assert_eq!(meta.text(Field::ParameterNames), Some(""));
    assert_eq!(meta.get(Field::SizeMb), Some(&Scalar::Float(0.0)));
    assert!(!meta.contains(Field::Scene));
    assert!(!meta.contains(Field::OrbitScene));
    assert!(!meta.contains(Field::TimeStart));
}

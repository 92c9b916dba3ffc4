//! Integration tests for series grouping and fingerprinting.

use std::collections::BTreeMap;

use seriesmerge::error::{FieldError, MergeError, Result};
use seriesmerge::grouper::SeriesGrouper;
use seriesmerge::metric::{FieldValue, Metric};
use seriesmerge::series::{SeriesKey, fingerprint};

fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_record_and_field_paths_merge() -> Result<()> {
    let cpu0 = tags(&[("cpu", "cpu0")]);
    let mut grouper: SeriesGrouper = SeriesGrouper::new();

    grouper.add_record(Metric::new("cpu", cpu0.clone(), 0).with_field("time_idle", 42)?);
    grouper.add_field("cpu", &cpu0, 0, "time_guest", 42)?;
    grouper.add_field("cpu", &cpu0, 0, "usage", 12.5)?;

    assert_eq!(grouper.len(), 1);
    let merged = &grouper.emit()[0];
    assert_eq!(
        merged.to_string(),
        "cpu,cpu=cpu0 time_idle=42i,time_guest=42i,usage=12.5 0"
    );
    Ok(())
}

#[test]
fn test_identity_isolation() -> Result<()> {
    let mut grouper: SeriesGrouper = SeriesGrouper::new();
    let base = tags(&[("cpu", "cpu0")]);

    grouper.add_field("cpu", &base, 0, "a", 1)?;
    grouper.add_field("mem", &base, 0, "a", 1)?;
    grouper.add_field("cpu", &tags(&[("cpu", "cpu1")]), 0, "a", 1)?;
    grouper.add_field("cpu", &tags(&[("cpu", "cpu0"), ("host", "a")]), 0, "a", 1)?;
    grouper.add_field("cpu", &base, 1, "a", 1)?;

    assert_eq!(grouper.len(), 5);
    assert!(grouper.emit().iter().all(|m| m.fields().len() == 1));
    Ok(())
}

#[test]
fn test_first_seen_order_survives_merges() -> Result<()> {
    let mut grouper: SeriesGrouper = SeriesGrouper::new();
    let none = BTreeMap::new();

    for name in ["c", "a", "b"] {
        grouper.add_field(name, &none, 0, "x", 1)?;
    }
    for name in ["b", "a", "c", "a"] {
        grouper.add_field(name, &none, 0, "y", 2)?;
    }

    let names: Vec<_> = grouper.emit().iter().map(Metric::name).collect();
    assert_eq!(names, vec!["c", "a", "b"]);
    assert!(grouper.emit().iter().all(|m| m.fields().len() == 2));
    Ok(())
}

#[test]
fn test_last_write_wins_per_field() -> Result<()> {
    let mut grouper: SeriesGrouper = SeriesGrouper::new();
    let none = BTreeMap::new();

    grouper.add_field("m", &none, 0, "v", 1)?;
    grouper.add_field("m", &none, 0, "w", true)?;
    grouper.add_field("m", &none, 0, "v", "replaced")?;

    let fields = grouper.emit()[0].fields();
    assert_eq!(fields[0].key, "v");
    assert_eq!(fields[0].value, FieldValue::String("replaced".to_string()));
    assert_eq!(fields[1].value, FieldValue::Boolean(true));
    Ok(())
}

#[test]
fn test_unsupported_value_leaves_grouper_unchanged() {
    let mut grouper: SeriesGrouper = SeriesGrouper::new();
    let none = BTreeMap::new();
    grouper.add_field("m", &none, 0, "v", 1).unwrap();

    let err = grouper
        .add_field("m", &none, 0, "nan", f64::NAN)
        .unwrap_err();
    assert!(matches!(
        err,
        MergeError::Field(FieldError::UnsupportedValueType { ref key, .. }) if key == "nan"
    ));

    let err = grouper
        .add_field("other", &none, 0, "obj", serde_json::json!({"nested": 1}))
        .unwrap_err();
    assert!(matches!(err, MergeError::Field(_)));

    assert_eq!(grouper.len(), 1);
    assert_eq!(grouper.emit()[0].fields().len(), 1);
    assert!(grouper.get("other", &none, 0).is_none());
}

#[test]
fn test_fingerprint_is_stable_and_order_free() {
    let a = tags(&[("cpu", "cpu0"), ("host", "web1")]);
    let mut b = BTreeMap::new();
    b.insert("host".to_string(), "web1".to_string());
    b.insert("cpu".to_string(), "cpu0".to_string());

    assert_eq!(fingerprint("cpu", &a, 42), fingerprint("cpu", &b, 42));
    assert_eq!(
        fingerprint("cpu", &a, 42),
        SeriesKey::new("cpu", &b, 42).fingerprint()
    );
    assert_ne!(fingerprint("cpu", &a, 42), fingerprint("cpu", &a, 43));
    assert_ne!(fingerprint("cpu", &a, 42), fingerprint("cpux", &a, 42));
}

#[test]
fn test_records_from_json_lines_group() -> Result<()> {
    let lines = [
        r#"{"name":"cpu","tags":{"cpu":"cpu0"},"fields":{"time_idle":42},"timestamp":0}"#,
        r#"{"name":"cpu","tags":{"cpu":"cpu0"},"fields":{"time_guest":42},"timestamp":0}"#,
        r#"{"name":"cpu","tags":{"cpu":"cpu1"},"fields":{"time_idle":7},"timestamp":0}"#,
    ];

    let mut grouper: SeriesGrouper = SeriesGrouper::new();
    for line in lines {
        let metric: Metric = serde_json::from_str(line).unwrap();
        grouper.add_record(metric);
    }

    assert_eq!(grouper.len(), 2);
    let merged = grouper.get("cpu", &tags(&[("cpu", "cpu0")]), 0).unwrap();
    assert_eq!(merged.field("time_guest"), Some(&FieldValue::Integer(42)));
    Ok(())
}

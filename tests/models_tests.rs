// Model tests: snapshot JSON shape, field table, windows

use vicare_monitor::models::*;

#[test]
fn test_snapshot_serializes_snake_case_with_nulls() {
    let s = Snapshot {
        active: Some(false),
        temp_heating: Some(40.5),
        ..Snapshot::empty(1_700_000_000)
    };
    let json = serde_json::to_value(&s).unwrap();
    assert_eq!(json["timestamp"], 1_700_000_000);
    assert_eq!(json["active"], false);
    assert_eq!(json["temp_heating"], 40.5);
    assert!(json["dhw_pump"].is_null());
    let back: Snapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back, s);
}

#[test]
fn test_snapshot_missing_keys_deserialize_as_unknown() {
    let s: Snapshot = serde_json::from_str(r#"{"timestamp": 5, "starts": 12}"#).unwrap();
    assert_eq!(s.starts, Some(12));
    assert_eq!(s.present_count(), 1);
    assert!(!s.is_partial_empty());
}

#[test]
fn test_field_serializes_as_its_name() {
    for field in Field::ALL {
        let json = serde_json::to_value(field).unwrap();
        assert_eq!(json, field.name());
    }
}

#[test]
fn test_snapshot_value_and_set_value_agree() {
    let mut s = Snapshot::empty(0);
    s.set_value(Field::Active, Some(1.0));
    s.set_value(Field::Starts, Some(42.0));
    s.set_value(Field::TempOut, Some(-7.5));
    assert_eq!(s.active, Some(true));
    assert_eq!(s.value(Field::Active), Some(1.0));
    assert_eq!(s.value(Field::Starts), Some(42.0));
    assert_eq!(s.value(Field::TempOut), Some(-7.5));
    s.set_value(Field::TempOut, None);
    assert_eq!(s.temp_out, None);
}

#[test]
fn test_window_bounds() {
    let w = Window::new(100, 200);
    assert!(w.contains(100));
    assert!(w.contains(200));
    assert!(!w.contains(201));
    assert!(Window::new(1000, 500).is_empty());
    let last = Window::last_days(1_000_000, 2);
    assert_eq!(last.since, 1_000_000 - 172_800);
    assert_eq!(last.until, 1_000_000);
}

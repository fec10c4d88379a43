use hilsim::data_point::{PointDescriptor, SensorPoint, TruthSnapshot};
use hilsim::error::ParseError;
use hilsim::DataPoint;
use std::sync::Arc;
use std::thread;

const TRUTH_BLOCK: &str = "\
SC[0].qn = 0.0 0.0 0.0 1.0
SC[2].svb = 1.0 2.0 3.0
SC[2].bvb = 2.5e-5 -1.0e-5 3.0e-5
Orb[0].PosN = 6778137.0 0.0 0.0
";

fn point(spacecraft: u16, field: &str, count: usize, text: &str) -> SensorPoint {
    SensorPoint::from_snapshot(PointDescriptor::new(spacecraft, field, count), Arc::new(TruthSnapshot::new(text)))
}

#[test]
fn test_selected_field_is_decoded() {
    let svb = point(2, "svb", 3, TRUTH_BLOCK);
    assert!(svb.is_valid());
    assert_eq!((svb.x(), svb.y(), svb.z()), (1.0, 2.0, 3.0));

    let bvb = point(2, "bvb", 3, TRUTH_BLOCK);
    assert!((bvb.y() + 1.0e-5).abs() < 1e-15);
}

#[test]
fn test_unparseable_values_become_neutral() {
    let bad = point(2, "svb", 3, "SC[2].svb = x 2.0 3.0\n");
    assert!(!bad.is_valid());
    assert_eq!(bad.values(), &[0.0, 0.0, 0.0]);
    assert!(matches!(bad.diagnostic(), Some(ParseError::InvalidNumber { token, .. }) if token == "x"));

    let short = point(2, "svb", 3, "SC[2].svb = 1.0 2.0\n");
    assert!(!short.is_valid());
    assert_eq!(
        short.diagnostic(),
        Some(&ParseError::TooFewValues { key: "SC[2].svb".to_string(), expected: 3, found: 2 })
    );
}

#[test]
fn test_extra_values_are_ignored() {
    let qn = point(0, "qn", 3, TRUTH_BLOCK);
    assert!(qn.is_valid());
    assert_eq!(qn.values(), &[0.0, 0.0, 0.0]);
    assert_eq!(point(0, "qn", 4, TRUTH_BLOCK).get(3), Some(1.0));
}

#[test]
fn test_display_renders_selector_and_validity() {
    let svb = point(2, "svb", 3, TRUTH_BLOCK).with_sequence(7);
    assert_eq!(svb.to_display_string(), "SC[2].svb: 1.000000 2.000000 3.000000 seq=7 (valid)");
    let missing = point(5, "svb", 3, TRUTH_BLOCK);
    assert!(missing.to_string().ends_with("(invalid)"));
}

#[test]
fn test_shared_point_parses_once_across_threads() {
    let shared = Arc::new(point(2, "svb", 3, TRUTH_BLOCK));
    assert!(!shared.is_parsed());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let point = Arc::clone(&shared);
            thread::spawn(move || point.values().to_vec())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![1.0, 2.0, 3.0]);
    }
    assert!(shared.is_parsed());
}

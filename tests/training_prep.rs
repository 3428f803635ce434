use std::collections::HashMap;
use std::path::Path;

use fraud_pipeline::{
    classification_metrics, parse_binary_labels, prepare_training_set, EventTable, PrepConfig,
    PrepError, TableError,
};

fn fixture(name: &str) -> EventTable {
    EventTable::from_csv_path(Path::new("tests/fixtures").join(name).as_path())
        .expect("fixture should load")
}

fn load_fixtures() -> (EventTable, EventTable, EventTable) {
    (
        fixture("transactions_sample.csv"),
        fixture("user_events_sample.csv"),
        fixture("labels_sample.csv"),
    )
}

fn expected_labels_by_amount() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("12.50", "0"),
        ("980.00", "0"),
        ("45.10", "0"),
        ("5.99", "0"),
        ("1500.00", "1"),
        ("23.00", "0"),
        ("310.40", "0"),
        ("14.75", "1"),
        ("250.00", "0"),
    ])
}

#[test]
fn fixture_pipeline_produces_enriched_split() {
    let (transactions, user_events, labels) = load_fixtures();
    let split = prepare_training_set(&transactions, &user_events, &labels, &PrepConfig::default())
        .expect("prep should succeed");

    assert_eq!(
        split.train_features.headers(),
        ["amount", "category", "event", "event_count"]
    );
    assert_eq!(split.test_features.headers(), split.train_features.headers());
    assert_eq!(split.train_features.len(), 7);
    assert_eq!(split.test_features.len(), 2);
    assert_eq!(split.train_labels.len(), 7);
    assert_eq!(split.test_labels.len(), 2);

    let expected = expected_labels_by_amount();
    let mut seen = Vec::new();
    for (features, labels) in [
        (&split.train_features, &split.train_labels),
        (&split.test_features, &split.test_labels),
    ] {
        for (row, label) in features.rows().iter().zip(labels.iter()) {
            assert_eq!(expected.get(row[0].as_str()), Some(&label.as_str()));
            seen.push(row[0].clone());
        }
    }
    seen.sort();
    let mut all: Vec<String> = expected.keys().map(|k| k.to_string()).collect();
    all.sort();
    assert_eq!(seen, all);
}

#[test]
fn enrichment_uses_latest_prior_user_event() {
    let (transactions, user_events, labels) = load_fixtures();
    let split = prepare_training_set(&transactions, &user_events, &labels, &PrepConfig::default())
        .unwrap();

    let by_amount: HashMap<&str, &Vec<String>> = split
        .train_features
        .rows()
        .iter()
        .chain(split.test_features.rows())
        .map(|row| (row[0].as_str(), row))
        .collect();

    assert_eq!(by_amount["1500.00"][2], "password_change");
    assert_eq!(by_amount["250.00"][2], "address_change");
    assert_eq!(by_amount["14.75"][3], "3");
    assert!(!by_amount.contains_key("77.00"));
}

#[test]
fn prep_is_deterministic_for_a_seed() {
    let (transactions, user_events, labels) = load_fixtures();
    let cfg = PrepConfig::default();
    let a = prepare_training_set(&transactions, &user_events, &labels, &cfg).unwrap();
    let b = prepare_training_set(&transactions, &user_events, &labels, &cfg).unwrap();
    assert_eq!(a, b);
}

#[test]
fn missing_drop_column_is_reported() {
    let (transactions, user_events, labels) = load_fixtures();
    let cfg = PrepConfig {
        drop_columns: vec!["age".to_string(), "ip_address".to_string()],
        ..PrepConfig::default()
    };
    let err = prepare_training_set(&transactions, &user_events, &labels, &cfg).unwrap_err();
    assert!(matches!(
        err,
        PrepError::Table(TableError::UnknownColumn(ref name)) if name == "ip_address"
    ));
}

#[test]
fn amount_rule_scores_against_prepared_labels() {
    let (transactions, user_events, labels) = load_fixtures();
    let split = prepare_training_set(&transactions, &user_events, &labels, &PrepConfig::default())
        .unwrap();

    let mut truth_raw = split.train_labels.clone();
    truth_raw.extend(split.test_labels.iter().cloned());
    let truth = parse_binary_labels(&truth_raw).unwrap();

    let predicted: Vec<bool> = split
        .train_features
        .rows()
        .iter()
        .chain(split.test_features.rows())
        .map(|row| row[0].parse::<f64>().unwrap() >= 900.0)
        .collect();

    let metrics = classification_metrics(&truth, &predicted).unwrap();
    assert!((metrics.accuracy - 7.0 / 9.0).abs() < 1e-12);
    assert!((metrics.precision - 0.5).abs() < 1e-12);
    assert!((metrics.recall - 0.5).abs() < 1e-12);
    assert!((metrics.f1 - 0.5).abs() < 1e-12);
}

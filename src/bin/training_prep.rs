use std::path::{Path, PathBuf};

use fraud_pipeline::{
    init_logging, log_app_start, log_input_loaded, log_output_written, logging_config_from_env,
    prepare_training_set, EventTable, PrepConfig,
};

const COMPONENT: &str = "training_prep";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let transactions = load_required("FRAUD_TRANSACTIONS")?;
    let user_events = load_required("FRAUD_USER_EVENTS")?;
    let labels = load_required("FRAUD_LABELS")?;
    let output_dir = std::env::var("FRAUD_PREP_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/prepared"));

    let mut cfg = PrepConfig::default();
    if let Ok(raw) = std::env::var("FRAUD_PREP_TEST_FRACTION") {
        cfg.test_fraction = raw
            .trim()
            .parse()
            .map_err(|_| format!("FRAUD_PREP_TEST_FRACTION must be a number, got '{raw}'"))?;
    }
    if let Ok(raw) = std::env::var("FRAUD_PREP_SEED") {
        cfg.seed = raw
            .trim()
            .parse()
            .map_err(|_| format!("FRAUD_PREP_SEED must be an unsigned integer, got '{raw}'"))?;
    }

    let split = prepare_training_set(&transactions, &user_events, &labels, &cfg)?;

    std::fs::create_dir_all(&output_dir)?;
    write_table(&output_dir.join("x_train.csv"), &split.train_features)?;
    write_table(&output_dir.join("x_test.csv"), &split.test_features)?;
    write_table(
        &output_dir.join("y_train.csv"),
        &label_table(&cfg.label_column, &split.train_labels)?,
    )?;
    write_table(
        &output_dir.join("y_test.csv"),
        &label_table(&cfg.label_column, &split.test_labels)?,
    )?;

    println!(
        "Prepared train={} test={} rows with {} feature columns -> {}",
        split.train_labels.len(),
        split.test_labels.len(),
        split.train_features.headers().len(),
        output_dir.display()
    );

    Ok(())
}

fn load_required(var: &str) -> Result<EventTable, Box<dyn std::error::Error>> {
    let path = std::env::var(var)
        .map(PathBuf::from)
        .map_err(|_| format!("{var} must point to a CSV file"))?;
    let table = EventTable::from_csv_path(&path)?;
    log_input_loaded(COMPONENT, &path, table.len());
    Ok(table)
}

fn label_table(column: &str, labels: &[String]) -> Result<EventTable, Box<dyn std::error::Error>> {
    let rows = labels.iter().map(|label| vec![label.clone()]).collect();
    Ok(EventTable::new(vec![column.to_string()], rows)?)
}

fn write_table(path: &Path, table: &EventTable) -> Result<(), Box<dyn std::error::Error>> {
    table.write_csv_path(path)?;
    log_output_written(COMPONENT, path, table.len());
    Ok(())
}

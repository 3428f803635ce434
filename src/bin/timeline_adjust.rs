use std::path::{Path, PathBuf};

use fraud_pipeline::{
    init_logging, log_app_start, log_input_loaded, log_output_written, logging_config_from_env,
    rescale_table, timespan_request_from_env, EventTable, SystemClock,
};

const COMPONENT: &str = "timeline_adjust";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(COMPONENT, &logging_cfg);

    let input = std::env::var("FRAUD_TIMELINE_INPUT")
        .map(PathBuf::from)
        .map_err(|_| "FRAUD_TIMELINE_INPUT must point to a CSV file")?;
    let output = std::env::var("FRAUD_TIMELINE_OUTPUT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_output_path(&input));
    let report_path = std::env::var("FRAUD_TIMELINE_REPORT").ok().map(PathBuf::from);

    let request = timespan_request_from_env();
    let table = EventTable::from_csv_path(&input)?;
    log_input_loaded(COMPONENT, &input, table.len());

    let (adjusted, report) = rescale_table(&table, &request, &SystemClock)?;
    adjusted.write_csv_path(&output)?;
    log_output_written(COMPONENT, &output, adjusted.len());

    if let Some(report_path) = report_path {
        std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)?;
    }

    println!(
        "Rescaled {} rows from [{} .. {}] to [{} .. {}] -> {}",
        report.rows,
        report.original_min,
        report.original_max,
        report.new_min,
        report.new_max,
        output.display()
    );

    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "events".to_string());
    input.with_file_name(format!("{stem}_adjusted.csv"))
}

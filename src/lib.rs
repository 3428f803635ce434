//! Fraud-detection demo data tooling.
//!
//! Current implemented scope:
//! - timeline rescaling: move a historical event log onto a new time window
//! - CSV-backed event tables
//! - training-set preparation (as-of enrichment, dropna, deterministic split)
//! - binary classification scoring

mod clock;
mod metrics;
mod observability;
mod period;
mod prep;
mod table;
mod timeline;

pub use clock::{Clock, FixedClock, SystemClock};
pub use metrics::{
    classification_metrics, parse_binary_label, parse_binary_labels, ClassificationMetrics,
    MetricsError,
};
pub use observability::{
    init_logging, log_app_start, log_input_loaded, log_output_written, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use period::{
    format_timestamp, parse_period, parse_timestamp, resolve_end_time, PeriodError, NOW_SENTINEL,
};
pub use prep::{
    asof_join, prepare_training_set, split_train_test, PrepConfig, PrepError, TrainingSplit,
};
pub use table::{EventTable, TableError};
pub use timeline::{
    adjust_data_timespan, adjust_data_timespan_with_clock, adjust_sample, rescale_table,
    timespan_request_from_env, TimelineError, TimespanReport, TimespanRequest,
    DEFAULT_NEW_END, DEFAULT_NEW_PERIOD, DEFAULT_TIMESTAMP_COLUMN,
};

//! Timeline rescaling: remap an event history onto a new window.
//!
//! Every timestamp is moved with the same affine map
//! `new = new_max - (original_max - old) * (new_period / original_period)`,
//! so event order and relative spacing survive while the latest event lands
//! exactly on the new end time.

use std::env;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::period::{
    format_timestamp, parse_period, parse_timestamp, resolve_end_time, PeriodError,
};
use crate::table::{EventTable, TableError};

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";
pub const DEFAULT_NEW_PERIOD: &str = "2d";
pub const DEFAULT_NEW_END: &str = "now";

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid period: {0}")]
    InvalidPeriod(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("invalid duration: '{0}'")]
    InvalidDuration(String),
    #[error("invalid timestamp: '{0}'")]
    InvalidTimestamp(String),
    #[error("row {row} has an unparseable timestamp '{value}'")]
    InvalidRecordTimestamp { row: usize, value: String },
    #[error("unknown timestamp column: {0}")]
    UnknownColumn(String),
    #[error("rescaled timestamp out of range: {0}")]
    OutOfRange(String),
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

impl From<PeriodError> for TimelineError {
    fn from(err: PeriodError) -> Self {
        match err {
            PeriodError::InvalidDuration(raw) => Self::InvalidDuration(raw),
            PeriodError::InvalidTimestamp(raw) => Self::InvalidTimestamp(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimespanRequest {
    pub timestamp_column: String,
    /// Length of the target window, e.g. `2d` or `12h`.
    pub new_period: String,
    /// End of the target window; `now` reads the clock.
    pub new_end: String,
}

impl Default for TimespanRequest {
    fn default() -> Self {
        Self {
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            new_period: DEFAULT_NEW_PERIOD.to_string(),
            new_end: DEFAULT_NEW_END.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimespanReport {
    pub rows: u64,
    pub missing_timestamps: u64,
    pub original_min: String,
    pub original_max: String,
    pub new_min: String,
    pub new_max: String,
    pub scale_ratio: f64,
}

pub fn timespan_request_from_env() -> TimespanRequest {
    let mut request = TimespanRequest::default();

    if let Some(column) = non_blank_env("FRAUD_TIMELINE_COLUMN") {
        request.timestamp_column = column;
    }
    if let Some(period) = non_blank_env("FRAUD_TIMELINE_PERIOD") {
        request.new_period = period;
    }
    if let Some(end) = non_blank_env("FRAUD_TIMELINE_END") {
        request.new_end = end;
    }

    request
}

/// Maps one timestamp from the original window onto the new one.
///
/// Samples outside `[original_max - original_period, original_max]` are
/// extrapolated along the same line rather than clamped.
pub fn adjust_sample(
    sample: DateTime<Utc>,
    original_max: DateTime<Utc>,
    new_max: DateTime<Utc>,
    original_period: ChronoDuration,
    new_period: ChronoDuration,
) -> Result<DateTime<Utc>, TimelineError> {
    let plan = RescalePlan::new(original_max, new_max, original_period, new_period)?;
    plan.apply(sample)
}

pub fn adjust_data_timespan(
    table: &EventTable,
    req: &TimespanRequest,
) -> Result<EventTable, TimelineError> {
    adjust_data_timespan_with_clock(table, req, &SystemClock)
}

pub fn adjust_data_timespan_with_clock(
    table: &EventTable,
    req: &TimespanRequest,
    clock: &dyn Clock,
) -> Result<EventTable, TimelineError> {
    rescale_table(table, req, clock).map(|(adjusted, _)| adjusted)
}

/// Rescales `table` into a new copy sorted by the adjusted timestamp.
///
/// Blank timestamp cells count as missing: those rows keep their cells and
/// sort after every dated row. Nothing is written until every row has been
/// rescaled successfully.
pub fn rescale_table(
    table: &EventTable,
    req: &TimespanRequest,
    clock: &dyn Clock,
) -> Result<(EventTable, TimespanReport), TimelineError> {
    let result = rescale_table_inner(table, req, clock);
    if let Err(err) = &result {
        warn!(
            component = "timeline",
            event = "timeline.adjust.rejected",
            timestamp_column = %req.timestamp_column,
            new_period = %req.new_period,
            new_end = %req.new_end,
            error = %err
        );
    }
    result
}

fn rescale_table_inner(
    table: &EventTable,
    req: &TimespanRequest,
    clock: &dyn Clock,
) -> Result<(EventTable, TimespanReport), TimelineError> {
    info!(
        component = "timeline",
        event = "timeline.adjust.start",
        rows = table.len(),
        timestamp_column = %req.timestamp_column,
        new_period = %req.new_period,
        new_end = %req.new_end
    );

    let ts_idx = table
        .column_index(&req.timestamp_column)
        .ok_or_else(|| TimelineError::UnknownColumn(req.timestamp_column.clone()))?;
    if table.is_empty() {
        return Err(TimelineError::EmptyInput("table has no rows".to_string()));
    }

    // `now` is sampled once, before any per-row work.
    let new_max = resolve_end_time(&req.new_end, clock)?;
    let new_period = parse_period(&req.new_period)?;

    let parsed = parse_timestamp_column(table, ts_idx)?;
    let (original_min, original_max) = parsed
        .iter()
        .flatten()
        .fold(None, |bounds: Option<(DateTime<Utc>, DateTime<Utc>)>, ts| {
            Some(match bounds {
                Some((lo, hi)) => (lo.min(*ts), hi.max(*ts)),
                None => (*ts, *ts),
            })
        })
        .ok_or_else(|| {
            TimelineError::EmptyInput(format!(
                "column '{}' has no timestamps",
                req.timestamp_column
            ))
        })?;

    let plan = RescalePlan::new(original_max, new_max, original_max - original_min, new_period)?;
    let new_min = plan.apply(original_min)?;

    let mut adjusted = Vec::with_capacity(parsed.len());
    for ts in &parsed {
        adjusted.push(match ts {
            Some(ts) => Some(plan.apply(*ts)?),
            None => None,
        });
    }

    let mut order: Vec<usize> = (0..adjusted.len()).collect();
    order.sort_by_key(|&idx| (adjusted[idx].is_none(), adjusted[idx]));

    let headers = table.headers().to_vec();
    let rows = order
        .into_iter()
        .map(|idx| {
            let mut row = table.rows()[idx].clone();
            if let Some(ts) = adjusted[idx] {
                row[ts_idx] = format_timestamp(ts);
            }
            row
        })
        .collect();
    let output = EventTable::new(headers, rows)?;

    let missing = parsed.iter().filter(|ts| ts.is_none()).count();
    if missing > 0 {
        debug!(
            component = "timeline",
            event = "timeline.adjust.missing_timestamps",
            missing_timestamps = missing
        );
    }

    let report = TimespanReport {
        rows: output.len() as u64,
        missing_timestamps: missing as u64,
        original_min: format_timestamp(original_min),
        original_max: format_timestamp(original_max),
        new_min: format_timestamp(new_min),
        new_max: format_timestamp(new_max),
        scale_ratio: plan.scale_ratio(),
    };

    info!(
        component = "timeline",
        event = "timeline.adjust.finish",
        rows = report.rows,
        missing_timestamps = report.missing_timestamps,
        original_min = %report.original_min,
        original_max = %report.original_max,
        new_min = %report.new_min,
        new_max = %report.new_max,
        scale_ratio = report.scale_ratio
    );

    Ok((output, report))
}

/// Batch constants shared by every row of one rescale.
#[derive(Debug, Clone, Copy)]
struct RescalePlan {
    original_max: DateTime<Utc>,
    new_max: DateTime<Utc>,
    original_period_ns: i128,
    new_period_ns: i128,
}

impl RescalePlan {
    fn new(
        original_max: DateTime<Utc>,
        new_max: DateTime<Utc>,
        original_period: ChronoDuration,
        new_period: ChronoDuration,
    ) -> Result<Self, TimelineError> {
        let original_period_ns = duration_nanos(original_period)?;
        if original_period_ns <= 0 {
            return Err(TimelineError::InvalidPeriod(format!(
                "original period must be positive, got {original_period_ns}ns"
            )));
        }
        let new_period_ns = duration_nanos(new_period)?;
        if new_period_ns <= 0 {
            return Err(TimelineError::InvalidPeriod(format!(
                "new period must be positive, got {new_period_ns}ns"
            )));
        }

        Ok(Self {
            original_max,
            new_max,
            original_period_ns,
            new_period_ns,
        })
    }

    fn apply(&self, sample: DateTime<Utc>) -> Result<DateTime<Utc>, TimelineError> {
        let distance_ns = duration_nanos(self.original_max - sample)?;
        let scaled = distance_ns
            .checked_mul(self.new_period_ns)
            .ok_or_else(|| out_of_range(sample))?;
        let delta_ns = div_round_half_away(scaled, self.original_period_ns);
        let delta_ns = i64::try_from(delta_ns).map_err(|_| out_of_range(sample))?;

        self.new_max
            .checked_sub_signed(ChronoDuration::nanoseconds(delta_ns))
            .ok_or_else(|| out_of_range(sample))
    }

    fn scale_ratio(&self) -> f64 {
        self.new_period_ns as f64 / self.original_period_ns as f64
    }
}

fn parse_timestamp_column(
    table: &EventTable,
    ts_idx: usize,
) -> Result<Vec<Option<DateTime<Utc>>>, TimelineError> {
    let mut parsed = Vec::with_capacity(table.len());
    for (row, cells) in table.rows().iter().enumerate() {
        let raw = cells[ts_idx].as_str();
        if raw.trim().is_empty() {
            parsed.push(None);
            continue;
        }
        let ts = parse_timestamp(raw).map_err(|_| TimelineError::InvalidRecordTimestamp {
            row,
            value: raw.to_string(),
        })?;
        parsed.push(Some(ts));
    }
    Ok(parsed)
}

fn duration_nanos(duration: ChronoDuration) -> Result<i128, TimelineError> {
    duration.num_nanoseconds().map(i128::from).ok_or_else(|| {
        TimelineError::OutOfRange(format!(
            "duration of {}s exceeds nanosecond precision",
            duration.num_seconds()
        ))
    })
}

fn div_round_half_away(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator.abs() {
        if (numerator < 0) == (denominator < 0) {
            quotient + 1
        } else {
            quotient - 1
        }
    } else {
        quotient
    }
}

fn out_of_range(sample: DateTime<Utc>) -> TimelineError {
    TimelineError::OutOfRange(format_timestamp(sample))
}

fn non_blank_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;
    use std::sync::{Mutex, OnceLock};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn endpoints_map_exactly() {
        let original_max = utc(2021, 1, 3, 0, 0, 0);
        let original_period = ChronoDuration::days(2);
        let new_max = utc(2024, 6, 10, 0, 0, 0);
        let new_period = ChronoDuration::hours(7);

        let top = adjust_sample(original_max, original_max, new_max, original_period, new_period)
            .unwrap();
        assert_eq!(top, new_max);

        let bottom = adjust_sample(
            original_max - original_period,
            original_max,
            new_max,
            original_period,
            new_period,
        )
        .unwrap();
        assert_eq!(bottom, new_max - new_period);
    }

    #[test]
    fn samples_outside_the_window_extrapolate() {
        let original_max = utc(2021, 1, 3, 0, 0, 0);
        let new_max = utc(2024, 6, 10, 0, 0, 0);
        let later = adjust_sample(
            utc(2021, 1, 4, 0, 0, 0),
            original_max,
            new_max,
            ChronoDuration::days(2),
            ChronoDuration::days(1),
        )
        .unwrap();
        assert_eq!(later, utc(2024, 6, 10, 12, 0, 0));
    }

    #[test]
    fn non_positive_periods_are_rejected() {
        let at = utc(2021, 1, 1, 0, 0, 0);
        for (original, new) in [
            (ChronoDuration::zero(), ChronoDuration::days(1)),
            (ChronoDuration::days(-1), ChronoDuration::days(1)),
            (ChronoDuration::days(1), ChronoDuration::zero()),
        ] {
            assert!(matches!(
                adjust_sample(at, at, at, original, new),
                Err(TimelineError::InvalidPeriod(_))
            ));
        }
    }

    #[test]
    fn ordering_is_monotone_across_a_sweep() {
        let original_max = utc(2021, 1, 3, 0, 0, 0);
        let original_period = ChronoDuration::days(2);
        let new_max = utc(2024, 6, 10, 0, 0, 0);
        let new_period = ChronoDuration::seconds(7_919);

        let mut previous = None;
        for step in 0..=2_000 {
            let sample = original_max - original_period
                + ChronoDuration::milliseconds(step * 86_400);
            let adjusted =
                adjust_sample(sample, original_max, new_max, original_period, new_period).unwrap();
            if let Some(prev) = previous {
                assert!(adjusted >= prev);
            }
            previous = Some(adjusted);
        }
    }

    #[test]
    fn rounding_is_symmetric() {
        assert_eq!(div_round_half_away(5, 2), 3);
        assert_eq!(div_round_half_away(-5, 2), -3);
        assert_eq!(div_round_half_away(4, 3), 1);
        assert_eq!(div_round_half_away(-4, 3), -1);
        assert_eq!(div_round_half_away(0, 7), 0);
    }

    #[test]
    fn request_defaults_when_env_missing() {
        let req = with_env_vars(
            &[
                ("FRAUD_TIMELINE_COLUMN", None),
                ("FRAUD_TIMELINE_PERIOD", None),
                ("FRAUD_TIMELINE_END", None),
            ],
            timespan_request_from_env,
        );
        assert_eq!(req, TimespanRequest::default());
        assert_eq!(req.timestamp_column, "timestamp");
        assert_eq!(req.new_period, "2d");
        assert_eq!(req.new_end, "now");
    }

    #[test]
    fn request_reads_env_and_ignores_blank_values() {
        let req = with_env_vars(
            &[
                ("FRAUD_TIMELINE_COLUMN", Some("event_time")),
                ("FRAUD_TIMELINE_PERIOD", Some("  ")),
                ("FRAUD_TIMELINE_END", Some(" 2024-06-10 ")),
            ],
            timespan_request_from_env,
        );
        assert_eq!(req.timestamp_column, "event_time");
        assert_eq!(req.new_period, "2d");
        assert_eq!(req.new_end, "2024-06-10");
    }

    #[test]
    fn now_is_resolved_from_the_injected_clock() {
        let table = EventTable::from_csv_reader(
            "timestamp,v\n2021-01-01,a\n2021-01-02,b\n".as_bytes(),
        )
        .unwrap();
        let clock = FixedClock(utc(2030, 1, 1, 0, 0, 0));
        let (out, report) = rescale_table(&table, &TimespanRequest::default(), &clock).unwrap();
        assert_eq!(
            out.column_values("timestamp").unwrap(),
            ["2029-12-30T00:00:00", "2030-01-01T00:00:00"]
        );
        assert_eq!(report.new_max, "2030-01-01T00:00:00");
        assert!((report.scale_ratio - 2.0).abs() < 1e-12);
    }
}

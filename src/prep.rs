//! Training-set preparation for the fraud model.
//!
//! Transactions are enriched with the latest user event and label recorded
//! for the same source at or before each transaction, incomplete rows are
//! dropped, and the result is split deterministically into train and test
//! sets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::period::parse_timestamp;
use crate::table::{EventTable, TableError};

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("table error: {0}")]
    Table(#[from] TableError),
    #[error("invalid join key in column {column} at row {row}: '{value}'")]
    InvalidJoinKey {
        column: String,
        row: usize,
        value: String,
    },
    #[error("invalid prep config: {0}")]
    InvalidConfig(String),
    #[error("feature rows ({features}) and labels ({labels}) differ in length")]
    LabelLengthMismatch { features: usize, labels: usize },
    #[error("cannot split {rows} rows into non-empty train and test sets (test rows: {test_rows})")]
    InsufficientRows { rows: usize, test_rows: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepConfig {
    pub drop_columns: Vec<String>,
    pub key_column: String,
    pub time_column: String,
    pub label_column: String,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            drop_columns: vec!["age".to_string(), "target".to_string(), "device".to_string()],
            key_column: "source".to_string(),
            time_column: "timestamp".to_string(),
            label_column: "label".to_string(),
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSplit {
    pub train_features: EventTable,
    pub test_features: EventTable,
    pub train_labels: Vec<String>,
    pub test_labels: Vec<String>,
}

pub fn prepare_training_set(
    transactions: &EventTable,
    user_events: &EventTable,
    labels: &EventTable,
    cfg: &PrepConfig,
) -> Result<TrainingSplit, PrepError> {
    let mut trimmed = transactions.clone();
    let drop: Vec<&str> = cfg.drop_columns.iter().map(String::as_str).collect();
    trimmed.drop_columns(&drop)?;

    let enriched = asof_join(&trimmed, user_events, &cfg.time_column, &cfg.key_column)?;
    let mut labelled = asof_join(&enriched, labels, &cfg.time_column, &cfg.key_column)?;
    labelled.drop_columns(&[cfg.key_column.as_str(), cfg.time_column.as_str()])?;

    let incomplete = labelled.retain_complete_rows();
    let label_values = labelled.take_column(&cfg.label_column)?;

    info!(
        component = "prep",
        event = "prep.dataset.ready",
        transactions = transactions.len(),
        rows = labelled.len(),
        dropped_incomplete = incomplete,
        feature_columns = labelled.headers().len()
    );

    split_train_test(&labelled, &label_values, cfg.test_fraction, cfg.seed)
}

/// Backward as-of join on `on`, matched exactly on `by`.
///
/// Each left row takes the remaining columns of the latest right row with the
/// same `by` value and `right.on <= left.on`; rows without a match get blank
/// cells. Output follows the left table sorted by `on`. Column names present on
/// both sides are suffixed `_x` (left) and `_y` (right).
pub fn asof_join(
    left: &EventTable,
    right: &EventTable,
    on: &str,
    by: &str,
) -> Result<EventTable, PrepError> {
    let left_on = left.require_column(on)?;
    let left_by = left.require_column(by)?;
    let right_on = right.require_column(on)?;
    let right_by = right.require_column(by)?;

    let left_times = parse_join_times(left, left_on, on)?;
    let right_times = parse_join_times(right, right_on, on)?;

    let mut right_by_key: HashMap<&str, Vec<(DateTime<Utc>, usize)>> = HashMap::new();
    for (idx, row) in right.rows().iter().enumerate() {
        right_by_key
            .entry(row[right_by].as_str())
            .or_default()
            .push((right_times[idx], idx));
    }
    for candidates in right_by_key.values_mut() {
        candidates.sort_by_key(|(ts, _)| *ts);
    }

    let extra_columns: Vec<usize> = (0..right.headers().len())
        .filter(|idx| *idx != right_on && *idx != right_by)
        .collect();

    let mut headers: Vec<String> = left
        .headers()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let collides = idx != left_on
                && idx != left_by
                && extra_columns
                    .iter()
                    .any(|extra| &right.headers()[*extra] == name);
            if collides {
                format!("{name}_x")
            } else {
                name.clone()
            }
        })
        .collect();
    for extra in &extra_columns {
        let name = &right.headers()[*extra];
        if left.column_index(name).is_some() {
            headers.push(format!("{name}_y"));
        } else {
            headers.push(name.clone());
        }
    }

    let mut order: Vec<usize> = (0..left.len()).collect();
    order.sort_by_key(|idx| left_times[*idx]);

    let mut matched = 0usize;
    let mut rows = Vec::with_capacity(order.len());
    for idx in order {
        let left_row = &left.rows()[idx];
        let mut row = left_row.clone();

        let hit = right_by_key
            .get(left_row[left_by].as_str())
            .and_then(|candidates| {
                let upper = candidates.partition_point(|(ts, _)| *ts <= left_times[idx]);
                upper.checked_sub(1).map(|pos| candidates[pos].1)
            });

        match hit {
            Some(right_idx) => {
                matched += 1;
                let right_row = &right.rows()[right_idx];
                row.extend(extra_columns.iter().map(|col| right_row[*col].clone()));
            }
            None => row.extend(extra_columns.iter().map(|_| String::new())),
        }
        rows.push(row);
    }

    let joined = EventTable::new(headers, rows)?;

    info!(
        component = "prep",
        event = "prep.join.finish",
        on,
        by,
        left_rows = left.len(),
        right_rows = right.len(),
        matched_rows = matched,
        unmatched_rows = joined.len() - matched
    );

    Ok(joined)
}

/// Deterministic shuffle-and-split: rows are ordered by SHA-256 of
/// `"{seed}:{row_index}"` and the first `ceil(n * test_fraction)` become the
/// test set.
pub fn split_train_test(
    features: &EventTable,
    labels: &[String],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainingSplit, PrepError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PrepError::InvalidConfig(format!(
            "test_fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    if features.len() != labels.len() {
        return Err(PrepError::LabelLengthMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }

    let rows = features.len();
    let test_rows = (rows as f64 * test_fraction).ceil() as usize;
    if test_rows == 0 || test_rows >= rows {
        return Err(PrepError::InsufficientRows { rows, test_rows });
    }

    let mut shuffled: Vec<(String, usize)> = (0..rows)
        .map(|idx| (shuffle_key(seed, idx), idx))
        .collect();
    shuffled.sort();
    let order: Vec<usize> = shuffled.into_iter().map(|(_, idx)| idx).collect();
    let (test_idx, train_idx) = order.split_at(test_rows);

    let split = TrainingSplit {
        train_features: features.select_rows(train_idx)?,
        test_features: features.select_rows(test_idx)?,
        train_labels: train_idx.iter().map(|idx| labels[*idx].clone()).collect(),
        test_labels: test_idx.iter().map(|idx| labels[*idx].clone()).collect(),
    };

    info!(
        component = "prep",
        event = "prep.split.finish",
        rows,
        train_rows = split.train_labels.len(),
        test_rows = split.test_labels.len(),
        seed
    );

    Ok(split)
}

fn shuffle_key(seed: u64, idx: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{seed}:{idx}"));
    hex::encode(hasher.finalize())
}

fn parse_join_times(
    table: &EventTable,
    column_idx: usize,
    column: &str,
) -> Result<Vec<DateTime<Utc>>, PrepError> {
    table
        .rows()
        .iter()
        .enumerate()
        .map(|(row, cells)| {
            parse_timestamp(&cells[column_idx]).map_err(|_| PrepError::InvalidJoinKey {
                column: column.to_string(),
                row,
                value: cells[column_idx].clone(),
            })
        })
        .collect()
}

//! In-memory event table backed by CSV.
//!
//! Cells are kept as the exact strings read from the source. Transforms only
//! rewrite the cells they own; everything else passes through untouched.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("table has no header row")]
    MissingHeader,
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("row index {index} out of range for table with {len} rows")]
    RowOutOfRange { index: usize, len: usize },
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
}

impl EventTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        if headers.is_empty() {
            return Err(TableError::MissingHeader);
        }

        let mut seen = HashSet::new();
        for header in &headers {
            if !seen.insert(header.as_str()) {
                return Err(TableError::DuplicateColumn(header.clone()));
            }
        }

        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != headers.len() {
                return Err(TableError::RaggedRow {
                    row,
                    found: cells.len(),
                    expected: headers.len(),
                });
            }
        }

        Ok(Self { headers, rows })
    }

    pub fn from_csv_reader<R: Read>(source: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Self::new(headers, rows)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, TableError> {
        let file = fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    pub fn write_csv<W: Write>(&self, sink: W) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_writer(sink);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, TableError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Writes through a sibling `.tmp` file and renames it into place.
    pub fn write_csv_path(&self, path: &Path) -> Result<(), TableError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| TableError::InvalidPath(path.to_path_buf()))?;
        let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

        {
            let file = fs::File::create(&tmp_path)?;
            self.write_csv(&file)?;
            file.sync_all()?;
        }

        fs::rename(tmp_path, path)?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<&str>, TableError> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Fails without touching the table if any name is missing.
    pub fn drop_columns(&mut self, names: &[&str]) -> Result<(), TableError> {
        let mut doomed = Vec::with_capacity(names.len());
        for name in names {
            doomed.push(self.require_column(name)?);
        }

        let keep: Vec<bool> = (0..self.headers.len())
            .map(|idx| !doomed.contains(&idx))
            .collect();
        self.headers = retain_by_mask(std::mem::take(&mut self.headers), &keep);
        for row in &mut self.rows {
            *row = retain_by_mask(std::mem::take(row), &keep);
        }
        Ok(())
    }

    /// Removes a column and returns its cells in row order.
    pub fn take_column(&mut self, name: &str) -> Result<Vec<String>, TableError> {
        let idx = self.require_column(name)?;
        self.headers.remove(idx);
        Ok(self.rows.iter_mut().map(|row| row.remove(idx)).collect())
    }

    /// Drops every row that has a blank cell; returns how many were dropped.
    pub fn retain_complete_rows(&mut self) -> usize {
        let before = self.rows.len();
        self.rows
            .retain(|row| row.iter().all(|cell| !cell.trim().is_empty()));
        before - self.rows.len()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Result<Self, TableError> {
        let mut rows = Vec::with_capacity(indices.len());
        for &index in indices {
            let row = self.rows.get(index).ok_or(TableError::RowOutOfRange {
                index,
                len: self.rows.len(),
            })?;
            rows.push(row.clone());
        }

        Ok(Self {
            headers: self.headers.clone(),
            rows,
        })
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<String>>) {
        (self.headers, self.rows)
    }
}

fn retain_by_mask(values: Vec<String>, keep: &[bool]) -> Vec<String> {
    values
        .into_iter()
        .zip(keep.iter())
        .filter_map(|(value, keep)| keep.then_some(value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventTable {
        EventTable::from_csv_reader(
            "timestamp,source,amount\n2021-01-02,a,10.5\n2021-01-01,b,\n2021-01-03,a,7\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn reads_headers_and_rows_verbatim() {
        let table = sample();
        assert_eq!(table.headers(), ["timestamp", "source", "amount"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[0], ["2021-01-02", "a", "10.5"]);
        assert_eq!(table.rows()[1][2], "");
    }

    #[test]
    fn ragged_rows_report_position() {
        let err = EventTable::from_csv_reader("a,b\n1,2\n3\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            TableError::RaggedRow {
                row: 1,
                found: 1,
                expected: 2
            }
        ));
    }

    #[test]
    fn duplicate_and_missing_headers_are_rejected() {
        assert!(matches!(
            EventTable::from_csv_reader("a,a\n1,2\n".as_bytes()),
            Err(TableError::DuplicateColumn(name)) if name == "a"
        ));
        assert!(matches!(
            EventTable::new(Vec::new(), Vec::new()),
            Err(TableError::MissingHeader)
        ));
    }

    #[test]
    fn drop_columns_is_all_or_nothing() {
        let mut table = sample();
        let err = table.drop_columns(&["amount", "missing"]).unwrap_err();
        assert!(matches!(err, TableError::UnknownColumn(name) if name == "missing"));
        assert_eq!(table.headers().len(), 3);

        table.drop_columns(&["amount"]).unwrap();
        assert_eq!(table.headers(), ["timestamp", "source"]);
        assert_eq!(table.rows()[2], ["2021-01-03", "a"]);
    }

    #[test]
    fn take_column_and_dropna() {
        let mut table = sample();
        assert_eq!(table.retain_complete_rows(), 1);
        let sources = table.take_column("source").unwrap();
        assert_eq!(sources, ["a", "a"]);
        assert_eq!(table.headers(), ["timestamp", "amount"]);
    }

    #[test]
    fn select_rows_checks_bounds() {
        let table = sample();
        let picked = table.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.column_values("timestamp").unwrap(), ["2021-01-03", "2021-01-02"]);
        assert!(matches!(
            table.select_rows(&[3]),
            Err(TableError::RowOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn csv_output_round_trips_quoted_cells() {
        let table = EventTable::new(
            vec!["timestamp".to_string(), "note".to_string()],
            vec![vec!["2021-01-01".to_string(), "a, \"quoted\" note".to_string()]],
        )
        .unwrap();
        let text = table.to_csv_string().unwrap();
        let reread = EventTable::from_csv_reader(text.as_bytes()).unwrap();
        assert_eq!(reread, table);
    }
}

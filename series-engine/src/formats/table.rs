//! Tabular measurement exports (CSV and Excel)
//!
//! Test benches frequently export the same recordings as CSV or spreadsheet
//! tables, sometimes with a description row and a units row wedged between the
//! header and the data. This reader detects and skips those metadata rows,
//! finds (or synthesizes) a time axis, and exposes every remaining column as a
//! channel.

use super::{ChannelData, ChannelSource};
use crate::types::{EngineError, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDateTime;
use std::path::Path;

/// Coefficient-of-variation bound under which a numeric column's successive
/// differences are regular enough to serve as a time axis.
const TIME_CV_THRESHOLD: f64 = 0.5;

/// Column names recognized as an explicit time axis (case-insensitive)
const TIME_COLUMN_NAMES: &[&str] = &["time", "timestamp", "t", "date", "datetime", "index"];

/// How the time axis was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeAxis {
    /// A real column, by index into the header row
    Column(usize),
    /// No usable column; the row index stands in
    RowIndex,
}

/// A CSV or Excel file exposed as a channel source
pub struct TableSource {
    headers: Vec<String>,
    /// Data rows only (header and metadata rows already stripped)
    rows: Vec<Vec<String>>,
    /// Per-row time values, aligned with `rows`
    times: Vec<f64>,
    channel_names: Vec<String>,
}

impl TableSource {
    /// Open a tabular file and prepare its channel catalog
    pub fn open(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        let raw_rows = match ext.as_str() {
            "csv" => read_csv_rows(path)?,
            "xlsx" | "xls" => read_sheet_rows(path)?,
            other => {
                return Err(EngineError::FormatError(format!(
                    "not a tabular extension: .{}",
                    other
                )))
            }
        };

        if raw_rows.is_empty() {
            return Err(EngineError::FormatError(format!(
                "tabular file has no rows: {:?}",
                path
            )));
        }

        let head = &raw_rows[..raw_rows.len().min(4)];
        let skip = metadata_rows_to_skip(head);
        log::debug!(
            "Table {:?}: {} metadata row(s) skipped after header",
            path,
            skip
        );

        let headers: Vec<String> = raw_rows[0].iter().map(|h| h.trim().to_string()).collect();
        let rows: Vec<Vec<String>> = raw_rows.into_iter().skip(1 + skip).collect();

        let time_axis = detect_time_axis(&headers, &rows);
        let times = build_time_values(time_axis, &rows);

        let channel_names: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| {
                !h.is_empty()
                    && match time_axis {
                        TimeAxis::Column(t) => *i != t,
                        TimeAxis::RowIndex => true,
                    }
            })
            .map(|(_, h)| h.clone())
            .collect();

        Ok(Self {
            headers,
            rows,
            times,
            channel_names,
        })
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.headers.iter().position(|h| h == name) {
            return Some(i);
        }
        // Case-insensitive fallback for requests formatted by other tools
        let lower = name.to_lowercase();
        self.headers.iter().position(|h| h.to_lowercase() == lower)
    }
}

impl ChannelSource for TableSource {
    fn channels(&self) -> &[String] {
        &self.channel_names
    }

    fn read(&self, name: &str) -> ChannelData {
        let Some(col) = self.column_index(name) else {
            return ChannelData::default();
        };

        // Rows where the channel cell is not numeric are dropped from both
        // axes together, keeping timestamps and values aligned.
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        for (row_idx, row) in self.rows.iter().enumerate() {
            let Some(cell) = row.get(col) else { continue };
            let Some(v) = parse_numeric(cell) else {
                continue;
            };
            timestamps.push(self.times[row_idx]);
            values.push(v);
        }

        ChannelData {
            timestamps,
            values,
            unit: String::new(),
        }
    }
}

/// Parse a cell as a number, tolerating thousands separators and whitespace
fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    let compact = trimmed.replace(',', "");
    compact.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a cell as a datetime, for exports whose time column is wall-clock
fn parse_datetime(cell: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S%.f",
        "%d.%m.%Y %H:%M:%S%.f",
    ];
    let trimmed = cell.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

/// Decide how many metadata rows sit between the header row and the data.
///
/// Pure heuristic over a small row sample read without a header: when row 3
/// parses as numeric while row 1 looks like descriptive text and row 2 looks
/// like a short units row, the table carries a description row and a units
/// row that must be skipped. A weaker match (long row 2) still skips one row.
pub fn metadata_rows_to_skip(sample: &[Vec<String>]) -> usize {
    if sample.len() < 4 {
        return 0;
    }
    let first_cell = |row: &[String]| -> String {
        row.first().map(|c| c.trim().to_string()).unwrap_or_default()
    };

    let row1 = first_cell(&sample[1]);
    let row2 = first_cell(&sample[2]);
    let row3 = first_cell(&sample[3]);

    let row3_numeric = parse_numeric(&row3).is_some();
    let row1_descriptive = row1.len() > 3 && parse_numeric(&row1).is_none();

    if row3_numeric && row1_descriptive {
        if row2.len() < 50 {
            return 2;
        }
        return 1;
    }
    0
}

/// Find the time column: explicit name match first, then the first numeric
/// column whose successive differences are regular, else the row index.
fn detect_time_axis(headers: &[String], rows: &[Vec<String>]) -> TimeAxis {
    for (i, h) in headers.iter().enumerate() {
        let lower = h.trim().to_lowercase();
        if TIME_COLUMN_NAMES.contains(&lower.as_str()) {
            return TimeAxis::Column(i);
        }
    }

    for (i, _) in headers.iter().enumerate() {
        let vals: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(i).and_then(|c| parse_numeric(c)))
            .collect();
        if vals.len() < 2 || vals.len() < rows.len() / 2 {
            continue;
        }
        let diffs: Vec<f64> = vals.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
        let cv = var.sqrt() / (mean.abs() + 1e-10);
        if cv < TIME_CV_THRESHOLD {
            return TimeAxis::Column(i);
        }
    }

    TimeAxis::RowIndex
}

/// Materialize a per-row time value for the chosen axis
fn build_time_values(axis: TimeAxis, rows: &[Vec<String>]) -> Vec<f64> {
    match axis {
        TimeAxis::RowIndex => (0..rows.len()).map(|i| i as f64).collect(),
        TimeAxis::Column(col) => {
            let cells: Vec<String> = rows
                .iter()
                .map(|row| row.get(col).cloned().unwrap_or_default())
                .collect();

            let numeric: Vec<Option<f64>> = cells.iter().map(|c| parse_numeric(c)).collect();
            if numeric.iter().any(|v| v.is_some()) {
                // Numeric axis; rows with an unparseable time fall back to
                // their row index so lengths stay aligned.
                return numeric
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v.unwrap_or(i as f64))
                    .collect();
            }

            // Wall-clock axis: seconds since the first parseable datetime
            let parsed: Vec<Option<NaiveDateTime>> =
                cells.iter().map(|c| parse_datetime(c)).collect();
            if let Some(t0) = parsed.iter().flatten().next().copied() {
                return parsed
                    .iter()
                    .enumerate()
                    .map(|(i, p)| match p {
                        Some(t) => {
                            let delta = t.signed_duration_since(t0);
                            delta.num_nanoseconds().map(|ns| ns as f64 / 1e9).unwrap_or(i as f64)
                        }
                        None => i as f64,
                    })
                    .collect();
            }

            (0..rows.len()).map(|i| i as f64).collect()
        }
    }
}

/// Read all CSV rows as strings, decoding bytes defensively
fn read_csv_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EngineError::FormatError(format!("CSV open failed: {}", e)))?;

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record =
            record.map_err(|e| EngineError::FormatError(format!("CSV parse failed: {}", e)))?;
        rows.push(
            record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).into_owned())
                .collect(),
        );
    }
    Ok(rows)
}

/// Read the first worksheet of an Excel workbook as string rows
fn read_sheet_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| EngineError::FormatError(format!("spreadsheet open failed: {}", e)))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| EngineError::FormatError("workbook has no sheets".to_string()))?
        .map_err(|e| EngineError::FormatError(format!("sheet read failed: {}", e)))?;

    let mut rows = Vec::new();
    for row in range.rows() {
        rows.push(row.iter().map(cell_to_string).collect());
    }
    Ok(rows)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => format!("{}", i),
        Data::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{:?}", e),
    }
}

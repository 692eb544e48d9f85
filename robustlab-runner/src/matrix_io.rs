//! CSV import and export of performance matrices.
//!
//! One row per configuration, one column per time block. Empty or
//! non-numeric cells become NaN, which the analysers treat as missing.
//! Rows may be ragged on input; shape validation is left to CSCV.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading or writing a matrix CSV.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("cannot read matrix {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed matrix CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush CSV writer: {0}")]
    Flush(#[source] std::io::Error),
    #[error("CSV output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Layout of a matrix CSV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCsvOptions {
    /// First record is a header and is skipped.
    pub has_header: bool,
    /// First column holds a row label rather than a value.
    pub label_column: bool,
}

/// A performance matrix with optional row labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledMatrix {
    /// One label per row; synthesised as `row_<i>` when the file has none.
    pub labels: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

fn parse_cell(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Parse a matrix from any reader.
pub fn read_matrix<R: Read>(reader: R, options: MatrixCsvOptions) -> Result<LabeledMatrix, MatrixError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(options.has_header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut matrix = LabeledMatrix::default();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let mut cells = record.iter();
        let label = if options.label_column {
            cells.next().unwrap_or_default().to_string()
        } else {
            format!("row_{i}")
        };
        matrix.labels.push(label);
        matrix.rows.push(cells.map(parse_cell).collect());
    }
    Ok(matrix)
}

/// Parse a matrix from a file on disk.
pub fn read_matrix_file(path: &Path, options: MatrixCsvOptions) -> Result<LabeledMatrix, MatrixError> {
    let file = std::fs::File::open(path).map_err(|source| MatrixError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_matrix(file, options)
}

/// Render a matrix as CSV with a `label,b0,b1,…` header. Missing cells are
/// written empty.
pub fn matrix_to_csv(labels: &[String], rows: &[Vec<f64>]) -> Result<String, MatrixError> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(vec![]);

    let mut header = vec!["label".to_string()];
    header.extend((0..width).map(|b| format!("b{b}")));
    wtr.write_record(&header)?;

    for (i, row) in rows.iter().enumerate() {
        let label = labels.get(i).cloned().unwrap_or_else(|| format!("row_{i}"));
        let mut record = vec![label];
        record.extend(row.iter().map(|v| if v.is_finite() { format!("{v}") } else { String::new() }));
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().map_err(|e| MatrixError::Flush(e.into_error()))?;
    Ok(String::from_utf8(data)?)
}

//! Conversion of delimited tabular text into [`Record`]s.

use std::io::Read;
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecordsIntoIter};

use crate::error::{HarvesterError, Result};
use crate::types::Record;

/// Lazy sequence of records read from delimited text.
///
/// The first line defines the column names for every following row. A row
/// with a different number of fields yields a [`HarvesterError::Parse`].
pub struct Rows<R: Read> {
    columns: Arc<[String]>,
    records: StringRecordsIntoIter<R>,
}

impl<R: Read> Rows<R> {
    /// Column names from the header line.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl<R: Read> Iterator for Rows<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.records.next()?;
        Some(
            row.map(|values| {
                Record::new(
                    Arc::clone(&self.columns),
                    values.iter().map(str::to_string).collect(),
                )
            })
            .map_err(parse_error),
        )
    }
}

/// Start reading records from `reader`.
///
/// Empty input produces no columns and no records.
pub fn parse_rows<R: Read>(reader: R, delimiter: u8) -> Result<Rows<R>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let columns: Arc<[String]> = reader
        .headers()
        .map_err(parse_error)?
        .iter()
        .map(str::to_string)
        .collect();

    tracing::debug!(columns = columns.len(), "Parsed header row");

    Ok(Rows {
        columns,
        records: reader.into_records(),
    })
}

fn parse_error(err: csv::Error) -> HarvesterError {
    let line = err.position().map(|p| p.line()).unwrap_or_default();
    let reason = match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {expected_len} fields, found {len}"),
        csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8 in field {}", err.field() + 1),
        _ => err.to_string(),
    };
    HarvesterError::Parse { line, reason }
}

//! Core data types for the harvester.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{HarvesterError, Result};

/// Published open-data sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Certificates of conformity.
    Certificate,

    /// Declarations of conformity.
    Declaration,
}

impl Dataset {
    /// All datasets in processing order.
    pub const ALL: [Dataset; 2] = [Dataset::Certificate, Dataset::Declaration];

    /// Name used for folders and file prefixes.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::Declaration => "declaration",
        }
    }

    /// Root folder of this dataset under `output_dir`.
    #[must_use]
    pub fn root_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(self.as_str())
    }

    /// Folder holding the last downloaded raw archive.
    #[must_use]
    pub fn original_dir(&self, output_dir: &Path) -> PathBuf {
        self.root_dir(output_dir).join("original")
    }

    /// Folder holding the batches of one year.
    #[must_use]
    pub fn year_dir(&self, output_dir: &Path, year: &str) -> PathBuf {
        self.root_dir(output_dir).join(year)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = HarvesterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "certificate" | "certificates" | "rss" => Ok(Self::Certificate),
            "declaration" | "declarations" | "rds" => Ok(Self::Declaration),
            other => Err(HarvesterError::Config(format!("unknown dataset '{other}'"))),
        }
    }
}

/// Archive filename split into its date token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveName {
    /// Full filename, e.g. `data-20240315-structure-v2.7z`.
    pub filename: String,

    /// Date token, e.g. `20240315`.
    pub date: String,
}

impl ArchiveName {
    /// First four characters of the date token.
    #[must_use]
    pub fn year(&self) -> &str {
        // The filename pattern guarantees four leading ASCII digits.
        self.date.get(..4).unwrap_or(&self.date)
    }

    /// Date token as a calendar date, when it is formatted as `YYYYMMDD`.
    #[must_use]
    pub fn calendar_date(&self) -> Option<chrono::NaiveDate> {
        let digits = self.date.get(..8)?;
        chrono::NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
    }

    /// Name of the JSON document with the given 1-based record index.
    #[must_use]
    pub fn document_name(&self, dataset: Dataset, index: u64) -> String {
        format!("{dataset}-{}-{index:08}.json", self.date)
    }

    /// Name of the zip batch with the given 1-based batch number.
    #[must_use]
    pub fn batch_name(&self, dataset: Dataset, number: u32) -> String {
        format!("{dataset}-{}-{number:03}.zip", self.date)
    }
}

/// One tabular row: column names (shared by all rows of a run) and cell values.
///
/// Serializes as a JSON object with keys in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl Record {
    /// Create a record; `values` must have one entry per column.
    #[must_use]
    pub fn new(columns: Arc<[String]>, values: Vec<String>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Cell value for a column name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// Iterate over `(column, value)` pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Outcome of a successful dataset run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DatasetOutcome {
    /// The archive matched the local copy; nothing was reprocessed.
    Unchanged { archive: String },

    /// The archive was (re)downloaded and converted into batches.
    Processed {
        archive: String,
        year: String,
        records: u64,
        batches: u32,
    },
}

/// Per-dataset results of one harvester run.
#[derive(Debug, Default)]
pub struct HarvestReport {
    pub runs: Vec<(Dataset, Result<DatasetOutcome>)>,
}

impl HarvestReport {
    /// True if every attempted dataset either was processed or was unchanged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.runs.iter().all(|(_, result)| result.is_ok())
    }

    /// Datasets whose run failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (Dataset, &HarvesterError)> {
        self.runs
            .iter()
            .filter_map(|(dataset, result)| result.as_ref().err().map(|e| (*dataset, e)))
    }

    /// Serializable view of the report.
    #[must_use]
    pub fn summary(&self) -> Vec<RunSummary> {
        self.runs
            .iter()
            .map(|(dataset, result)| RunSummary {
                dataset: *dataset,
                outcome: result.as_ref().ok().cloned(),
                error: result.as_ref().err().map(ToString::to_string),
            })
            .collect()
    }
}

/// One line of [`HarvestReport::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dataset: Dataset,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub outcome: Option<DatasetOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

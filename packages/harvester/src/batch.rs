//! Batching of JSON documents into size-bounded zip archives.
//!
//! [`BatchWriter`] is a forward-only state machine:
//!
//! ```text
//! Accumulating --(buffered == batch_size)--> Flushing --> Accumulating
//!      |
//!      +--(input exhausted, buffered > 0)--> FinalFlush
//!      +--(input exhausted, buffered == 0)--> done, no empty batch
//! ```
//!
//! Document indices run from 1 across all batches of a run; batch numbers
//! start at 1. Earlier batches are never rewritten.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::extract::scratch_dir;
use crate::types::{ArchiveName, Dataset, Record};

/// What a finished [`BatchWriter`] produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Total documents written.
    pub records: u64,
    /// Total zip batches written.
    pub batches: u32,
    /// Paths of the zip batches in batch order.
    pub paths: Vec<PathBuf>,
}

/// Serializes records into a scratch dir and flushes them into zip batches.
#[derive(Debug)]
pub struct BatchWriter {
    dataset: Dataset,
    archive: ArchiveName,
    out_dir: PathBuf,
    scratch: TempDir,
    batch_size: usize,
    json_indent: bool,
    /// Documents waiting in the scratch dir, in index order.
    buffered: Vec<String>,
    summary: BatchSummary,
}

impl BatchWriter {
    /// Create a writer emitting batches into `out_dir`.
    ///
    /// # Arguments
    /// * `dataset` - Dataset the documents belong to
    /// * `archive` - Source archive, supplies the date token for file names
    /// * `out_dir` - Directory receiving the zip batches
    /// * `scratch_root` - Parent of the buffering dir; system temp dir when `None`
    /// * `batch_size` - Documents per batch
    pub fn new(
        dataset: Dataset,
        archive: ArchiveName,
        out_dir: impl Into<PathBuf>,
        scratch_root: Option<&Path>,
        batch_size: usize,
    ) -> Result<Self> {
        let scratch = scratch_dir(scratch_root, ".batch-")?;
        let batch_size = batch_size.max(1);

        Ok(Self {
            dataset,
            archive,
            out_dir: out_dir.into(),
            scratch,
            batch_size,
            json_indent: true,
            buffered: Vec::with_capacity(batch_size),
            summary: BatchSummary::default(),
        })
    }

    /// Write compact instead of indented JSON.
    #[must_use]
    pub fn with_json_indent(mut self, json_indent: bool) -> Self {
        self.json_indent = json_indent;
        self
    }

    /// Documents accepted so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.summary.records
    }

    /// Batches flushed so far.
    #[must_use]
    pub fn batches(&self) -> u32 {
        self.summary.batches
    }

    /// Serialize one record and flush if the batch is full.
    pub fn push(&mut self, record: &Record) -> Result<()> {
        let index = self.summary.records + 1;
        let name = self.archive.document_name(self.dataset, index);

        let mut writer = BufWriter::new(File::create(self.scratch.path().join(&name))?);
        if self.json_indent {
            serde_json::to_writer_pretty(&mut writer, record)?;
        } else {
            serde_json::to_writer(&mut writer, record)?;
        }
        writer.flush()?;

        self.summary.records = index;
        self.buffered.push(name);

        if self.buffered.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the remaining documents, if any, and return the totals.
    pub fn finish(mut self) -> Result<BatchSummary> {
        if !self.buffered.is_empty() {
            self.flush()?;
        }
        Ok(self.summary)
    }

    /// Write all buffered documents into the next zip batch and clear the scratch dir.
    fn flush(&mut self) -> Result<()> {
        let number = self.summary.batches + 1;
        let path = self.out_dir.join(self.archive.batch_name(self.dataset, number));

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(BufWriter::new(File::create(&path)?));
        for name in &self.buffered {
            zip.start_file(name.as_str(), options)?;
            let mut document = File::open(self.scratch.path().join(name))?;
            io::copy(&mut document, &mut zip)?;
        }
        zip.finish()?.flush()?;

        for name in self.buffered.drain(..) {
            fs::remove_file(self.scratch.path().join(name))?;
        }

        self.summary.batches = number;
        self.summary.paths.push(path);

        tracing::info!(
            dataset = %self.dataset,
            batch = number,
            records = self.summary.records,
            "Flushed batch"
        );
        Ok(())
    }
}

/// Feed every record into a fresh writer and finish it.
pub fn write_batches<I>(records: I, writer: BatchWriter) -> Result<BatchSummary>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut writer = writer;
    for record in records {
        writer.push(&record?)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use std::sync::Arc;
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn archive() -> ArchiveName {
        ArchiveName {
            filename: "data-20240315-structure-v2.7z".to_string(),
            date: "20240315".to_string(),
        }
    }

    fn records(n: usize) -> impl Iterator<Item = Result<Record>> {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        (1..=n).map(move |i| {
            Ok(Record::new(
                Arc::clone(&columns),
                vec![i.to_string(), format!("Заявитель {i}")],
            ))
        })
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn run(n: usize, batch_size: usize, out: &Path) -> BatchSummary {
        let writer = BatchWriter::new(Dataset::Certificate, archive(), out, Some(out), batch_size)
            .unwrap();
        write_batches(records(n), writer).unwrap()
    }

    #[test]
    fn test_partial_final_batch() {
        let dir = tempdir().unwrap();
        let summary = run(25, 10, dir.path());

        assert_eq!(summary.records, 25);
        assert_eq!(summary.batches, 3);
        let sizes: Vec<usize> = summary.paths.iter().map(|p| entry_names(p).len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(
            summary.paths[2].file_name().unwrap(),
            "certificate-20240315-003.zip"
        );
    }

    #[test]
    fn test_exact_multiple_has_no_empty_batch() {
        let dir = tempdir().unwrap();
        let summary = run(20, 10, dir.path());

        assert_eq!(summary.batches, 2);
        assert!(!dir.path().join("certificate-20240315-003.zip").exists());
    }

    #[test]
    fn test_no_records_no_batches() {
        let dir = tempdir().unwrap();
        let summary = run(0, 10, dir.path());

        assert_eq!(summary, BatchSummary::default());
        let zips = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "zip"))
            .count();
        assert_eq!(zips, 0);
    }

    #[test]
    fn test_indices_are_contiguous_across_batches() {
        let dir = tempdir().unwrap();
        let summary = run(23, 10, dir.path());

        let all: Vec<String> = summary.paths.iter().flat_map(|p| entry_names(p)).collect();
        let expected: Vec<String> = (1..=23)
            .map(|i| format!("certificate-20240315-{i:08}.json"))
            .collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_document_body_is_indented_utf8_json() {
        let dir = tempdir().unwrap();
        let summary = run(1, 10, dir.path());

        let mut zip = ZipArchive::new(File::open(&summary.paths[0]).unwrap()).unwrap();
        let mut body = String::new();
        zip.by_name("certificate-20240315-00000001.json")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();

        assert_eq!(body, "{\n  \"id\": \"1\",\n  \"name\": \"Заявитель 1\"\n}");
    }

    #[test]
    fn test_compact_json() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(Dataset::Declaration, archive(), dir.path(), Some(dir.path()), 5)
            .unwrap()
            .with_json_indent(false);
        let summary = write_batches(records(1), writer).unwrap();

        let mut zip = ZipArchive::new(File::open(&summary.paths[0]).unwrap()).unwrap();
        let mut body = String::new();
        zip.by_name("declaration-20240315-00000001.json")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, r#"{"id":"1","name":"Заявитель 1"}"#);
    }

    #[test]
    fn test_scratch_is_cleared_between_flushes_and_removed() {
        let dir = tempdir().unwrap();
        let scratch_root = dir.path().join("scratch");
        let mut writer = BatchWriter::new(
            Dataset::Certificate,
            archive(),
            dir.path(),
            Some(&scratch_root),
            3,
        )
        .unwrap();

        for record in records(4) {
            writer.push(&record.unwrap()).unwrap();
        }
        let scratch = fs::read_dir(&scratch_root)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 1);
        assert_eq!(writer.records(), 4);
        assert_eq!(writer.batches(), 1);

        writer.finish().unwrap();
        assert!(!scratch.exists());
    }

    #[test]
    fn test_record_error_aborts() {
        let dir = tempdir().unwrap();
        let writer = BatchWriter::new(Dataset::Certificate, archive(), dir.path(), Some(dir.path()), 10)
            .unwrap();
        let input = records(2).chain(std::iter::once(Err(crate::error::HarvesterError::Parse {
            line: 4,
            reason: "expected 2 fields, found 1".to_string(),
        })));

        assert!(write_batches(input, writer).is_err());
        assert!(!dir.path().join("certificate-20240315-001.zip").exists());
    }
}

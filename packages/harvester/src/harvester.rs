//! Main harvester service that ties all components together.

use std::fs;
use std::path::Path;

use crate::batch::{write_batches, BatchSummary, BatchWriter};
use crate::config::{parse_archive_name, HarvesterConfig, FIELD_DELIMITER};
use crate::digest::HashVerifier;
use crate::error::Result;
use crate::extract::extract_table;
use crate::http::Fetcher;
use crate::link::resolve_download_link;
use crate::rows::parse_rows;
use crate::types::{ArchiveName, Dataset, DatasetOutcome, HarvestReport};

/// Runs the download-and-batch pipeline for one or more datasets.
#[derive(Debug)]
pub struct Harvester {
    config: HarvesterConfig,
    fetcher: Fetcher,
    verifier: HashVerifier,
}

impl Harvester {
    /// Create a harvester from an explicit configuration.
    pub fn new(config: HarvesterConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(&config)?;
        let verifier = HashVerifier::new(config.digest, config.chunk_size);

        Ok(Self {
            config,
            fetcher,
            verifier,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    /// Process datasets one after another.
    ///
    /// A failing dataset is recorded in the report; the next one still runs.
    pub fn run(&self, datasets: &[Dataset]) -> HarvestReport {
        let mut report = HarvestReport::default();

        for &dataset in datasets {
            let result = self.process(dataset);
            if let Err(e) = &result {
                tracing::error!(%dataset, error = %e, "Dataset failed");
            }
            report.runs.push((dataset, result));
        }

        report
    }

    /// Process both datasets, certificates first.
    pub fn run_all(&self) -> HarvestReport {
        self.run(&Dataset::ALL)
    }

    /// Run the pipeline for a single dataset.
    pub fn process(&self, dataset: Dataset) -> Result<DatasetOutcome> {
        let output_dir = self.config.output_dir.as_path();
        tracing::info!(%dataset, "Begin processing");

        let original_dir = dataset.original_dir(output_dir);
        fs::create_dir_all(&original_dir)?;

        let link = resolve_download_link(&self.fetcher, self.config.listing_url(dataset))?;
        tracing::info!(%dataset, archive = %link.filename, "Downloading");

        let archive_path = original_dir.join(&link.filename);
        let verification = self.verifier.download_with_verification(
            &self.fetcher,
            &link.url,
            &archive_path,
            self.config.force,
        )?;
        verification.ensure_integrity()?;
        tracing::info!(
            %dataset,
            bytes = verification.file_size,
            hash = %verification.content_hash,
            existed = verification.file_existed,
            "Downloaded"
        );

        if verification.hashes_match && !self.config.force {
            tracing::info!(
                %dataset,
                archive = %link.filename,
                "Archive matches the local copy, nothing to process"
            );
            return Ok(DatasetOutcome::Unchanged {
                archive: link.filename,
            });
        }

        let archive = parse_archive_name(&link.filename)?;
        let year_dir = dataset.year_dir(output_dir, archive.year());
        fs::create_dir_all(&year_dir)?;

        let summary = self.convert(dataset, &archive_path, archive.clone(), &year_dir)?;

        tracing::info!(
            %dataset,
            records = summary.records,
            batches = summary.batches,
            "Finished processing"
        );

        Ok(DatasetOutcome::Processed {
            year: archive.year().to_string(),
            archive: archive.filename,
            records: summary.records,
            batches: summary.batches,
        })
    }

    /// Extract the stored archive and write its rows as zip batches.
    fn convert(
        &self,
        dataset: Dataset,
        archive_path: &Path,
        archive: ArchiveName,
        year_dir: &Path,
    ) -> Result<BatchSummary> {
        let scratch_root = self.config.scratch_dir.as_deref();

        // Both scratch dirs are removed when `table` and `writer` drop, on
        // success and on every error path.
        let table = extract_table(archive_path, scratch_root)?;
        let rows = parse_rows(table.open()?, FIELD_DELIMITER)?;
        tracing::debug!(%dataset, columns = rows.columns().len(), "Begin processing rows");

        let writer = BatchWriter::new(
            dataset,
            archive,
            year_dir,
            scratch_root,
            self.config.batch_size,
        )?
        .with_json_indent(self.config.json_indent);

        write_batches(rows, writer)
    }
}

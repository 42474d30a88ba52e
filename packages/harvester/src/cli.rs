//! Command-line interface for the harvester.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{HarvesterConfig, RetryPolicy};
use crate::digest::DigestAlgorithm;
use crate::error::{HarvesterError, Result};
use crate::harvester::Harvester;
use crate::types::{Dataset, DatasetOutcome, HarvestReport};

/// FSA Harvester - Download conformity certificates and declarations as JSON batches.
#[derive(Parser)]
#[command(name = "fsa-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the latest archives and convert them to zip batches.
    Run {
        /// Dataset to process (certificate, declaration); repeatable. Default: both
        #[arg(short, long = "dataset", value_parser = parse_dataset)]
        datasets: Vec<Dataset>,

        /// Output directory (default: current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reprocess the archive even if it matches the local copy
        #[arg(short, long)]
        force: bool,

        /// Digest algorithm used for change detection (md5, sha256)
        #[arg(long, value_parser = parse_digest)]
        digest: Option<DigestAlgorithm>,

        /// Listing page timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Archive download timeout in seconds (default: unbounded)
        #[arg(long)]
        archive_timeout: Option<u64>,

        /// Attempts per request for transient network failures
        #[arg(long)]
        retries: Option<u32>,

        /// Write compact instead of indented JSON documents
        #[arg(long)]
        compact: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_dataset(value: &str) -> std::result::Result<Dataset, String> {
    value.parse().map_err(|e: HarvesterError| e.to_string())
}

fn parse_digest(value: &str) -> std::result::Result<DigestAlgorithm, String> {
    value.parse().map_err(|e: HarvesterError| e.to_string())
}

/// Run the CLI and return the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            datasets,
            output,
            force,
            digest,
            timeout,
            archive_timeout,
            retries,
            compact,
            json,
        } => {
            let mut config = HarvesterConfig::from_env()?;
            if let Some(output) = output {
                config = config.with_output_dir(output);
            }
            if force {
                config = config.with_force(true);
            }
            if let Some(digest) = digest {
                config = config.with_digest(digest);
            }
            if let Some(secs) = timeout {
                config = config.with_timeout(Duration::from_secs(secs));
            }
            if let Some(secs) = archive_timeout {
                config = config.with_archive_timeout(Some(Duration::from_secs(secs)));
            }
            if let Some(attempts) = retries {
                let retry = RetryPolicy {
                    max_attempts: attempts,
                    ..config.retry
                };
                config = config.with_retry(retry);
            }
            if compact {
                config = config.with_json_indent(false);
            }

            let datasets = if datasets.is_empty() {
                Dataset::ALL.to_vec()
            } else {
                datasets
            };

            run_command(config, &datasets, json)
        }
    }
}

/// Execute the run command.
fn run_command(config: HarvesterConfig, datasets: &[Dataset], json: bool) -> Result<i32> {
    let harvester = Harvester::new(config)?;
    let mut report = HarvestReport::default();

    for &dataset in datasets {
        // Create progress spinner
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        pb.set_message(format!("Processing {dataset}..."));
        pb.enable_steady_tick(Duration::from_millis(100));

        let single = harvester.run(&[dataset]);
        pb.finish_and_clear();
        report.runs.extend(single.runs);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    } else {
        print_report(&report);
    }

    Ok(if report.is_success() { 0 } else { 1 })
}

fn print_report(report: &HarvestReport) {
    for (dataset, result) in &report.runs {
        match result {
            Ok(DatasetOutcome::Unchanged { archive }) => println!(
                "{} {}: {} matches the local copy, nothing to process",
                style("Unchanged").yellow().bold(),
                style(dataset).cyan(),
                archive
            ),
            Ok(DatasetOutcome::Processed {
                archive,
                year,
                records,
                batches,
            }) => println!(
                "{} {}: {} -> {} records in {} batches ({}/{})",
                style("Processed").green().bold(),
                style(dataset).cyan(),
                archive,
                style(records).green(),
                style(batches).green(),
                dataset,
                year
            ),
            Err(e) => println!(
                "{} {}: {}",
                style("Failed").red().bold(),
                style(dataset).cyan(),
                e
            ),
        }
    }
}

//! FSA Harvester - Download conformity certificate and declaration open data.
//!
//! This crate downloads the open-data archives published by the Federal
//! Accreditation Service (certificates and declarations of conformity),
//! converts every row of the enclosed tabular file into a JSON document and
//! packs the documents into zip batches grouped by year.
//!
//! # Example
//!
//! ```
//! use fsa_harvester::config;
//!
//! let archive = config::parse_archive_name("data-20240315-structure-v2.7z").unwrap();
//! assert_eq!(archive.date, "20240315");
//! assert_eq!(archive.year(), "2024");
//! ```
//!
//! # Architecture
//!
//! The harvester is organized into several modules:
//!
//! - [`config`]: Configuration defaults, run configuration and filename convention
//! - [`types`]: Core data types (Dataset, ArchiveName, Record, outcomes)
//! - [`error`]: Error types and Result alias
//! - [`http`]: HTTP fetcher with bounded retries
//! - [`digest`]: Content digests and change detection
//! - [`link`]: Download link resolution from listing pages
//! - [`extract`]: Archive extraction into scratch directories
//! - [`rows`]: Tabular text to records
//! - [`batch`]: JSON documents into zip batches
//! - [`cli`]: Command-line interface
//! - [`harvester`]: Main harvester service

pub mod batch;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod extract;
pub mod harvester;
pub mod http;
pub mod link;
pub mod rows;
pub mod types;

// Re-export main entry point
pub use harvester::Harvester;

// Re-export commonly used items
pub use config::{parse_archive_name, HarvesterConfig, RetryPolicy};
pub use digest::{DigestAlgorithm, HashVerifier, Verification};
pub use error::{HarvesterError, Result};
pub use types::{ArchiveName, Dataset, DatasetOutcome, HarvestReport, Record};

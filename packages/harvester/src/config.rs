//! Configuration constants, run configuration and filename validation.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::digest::DigestAlgorithm;
use crate::error::{HarvesterError, Result};
use crate::types::{ArchiveName, Dataset};

/// Listing page for certificates of conformity.
pub const CERTIFICATE_PAGE_URL: &str = "https://fsa.gov.ru/opendata/7736638268-rss/";

/// Listing page for declarations of conformity.
pub const DECLARATION_PAGE_URL: &str = "https://fsa.gov.ru/opendata/7736638268-rds/";

/// HTTP timeout in seconds for the listing page request.
pub const HTTP_TIMEOUT_SECS: u64 = 5;

/// Chunk size used when hashing files on disk (128 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Number of JSON documents per zip batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Field delimiter of the published tabular file.
pub const FIELD_DELIMITER: u8 = b';';

/// Default number of attempts for transient HTTP failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Archive filename convention: `data-<date>-structure...`, date starting with a year.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static ARCHIVE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^data-(\d{4}.*)-structure").expect("valid regex"));

/// Bounded retry policy for network requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each following attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay to wait before the given attempt (0-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use fsa_harvester::config::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for(0), Duration::ZERO);
    /// assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    /// assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    /// ```
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX))
    }

    /// Number of attempts, at least one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Configuration for one harvester run.
///
/// Passed to [`crate::harvester::Harvester::new`]; nothing is read from
/// process-wide state after construction.
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub certificate_url: String,
    pub declaration_url: String,
    /// Root under which `<dataset>/original` and `<dataset>/<year>` live.
    pub output_dir: PathBuf,
    /// Parent directory for scratch dirs; system temp dir when `None`.
    pub scratch_dir: Option<PathBuf>,
    pub digest: DigestAlgorithm,
    pub chunk_size: usize,
    /// Total timeout of the listing page request, also used as connect timeout.
    pub timeout: Duration,
    /// Total timeout of the archive download; unbounded when `None`.
    pub archive_timeout: Option<Duration>,
    /// Rewrite and reprocess the archive even if its digest is unchanged.
    pub force: bool,
    pub batch_size: usize,
    /// Pretty-print JSON documents with two-space indentation.
    pub json_indent: bool,
    pub retry: RetryPolicy,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            certificate_url: CERTIFICATE_PAGE_URL.to_string(),
            declaration_url: DECLARATION_PAGE_URL.to_string(),
            output_dir: PathBuf::from("."),
            scratch_dir: None,
            digest: DigestAlgorithm::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            archive_timeout: None,
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            json_indent: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarvesterConfig {
    /// Build a configuration from defaults overridden by environment variables.
    ///
    /// Recognized: `FSA_CERTIFICATE_URL`, `FSA_DECLARATION_URL`,
    /// `HARVEST_OUTPUT_DIR`, `HARVEST_DIGEST`, `HARVEST_TIMEOUT_SECS`,
    /// `HARVEST_FORCE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("FSA_CERTIFICATE_URL") {
            config.certificate_url = url;
        }
        if let Ok(url) = std::env::var("FSA_DECLARATION_URL") {
            config.declaration_url = url;
        }
        if let Ok(dir) = std::env::var("HARVEST_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("HARVEST_DIGEST") {
            config.digest = DigestAlgorithm::from_str(&name)?;
        }
        if let Ok(secs) = std::env::var("HARVEST_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                HarvesterError::Config(format!("HARVEST_TIMEOUT_SECS is not a number: '{secs}'"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        config.force = std::env::var("HARVEST_FORCE")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(config.force);

        Ok(config)
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(scratch_dir.into());
        self
    }

    pub fn with_listing_url(mut self, dataset: Dataset, url: impl Into<String>) -> Self {
        match dataset {
            Dataset::Certificate => self.certificate_url = url.into(),
            Dataset::Declaration => self.declaration_url = url.into(),
        }
        self
    }

    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_archive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.archive_timeout = timeout;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_json_indent(mut self, json_indent: bool) -> Self {
        self.json_indent = json_indent;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Listing page URL for a dataset.
    #[must_use]
    pub fn listing_url(&self, dataset: Dataset) -> &str {
        match dataset {
            Dataset::Certificate => &self.certificate_url,
            Dataset::Declaration => &self.declaration_url,
        }
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(HarvesterError::Config("batch size must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(HarvesterError::Config("chunk size must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(HarvesterError::Config("timeout must be positive".into()));
        }
        if self.archive_timeout.is_some_and(|t| t.is_zero()) {
            return Err(HarvesterError::Config(
                "archive timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Boolean environment flag; empty, `0`, `false` and `no` are off.
fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no"
    )
}

/// Parse an archive filename following the `data-<date>-structure...` convention.
///
/// # Examples
/// ```
/// use fsa_harvester::config::parse_archive_name;
///
/// let name = parse_archive_name("data-20240315-structure-v2.7z").unwrap();
/// assert_eq!(name.date, "20240315");
/// assert_eq!(name.year(), "2024");
/// assert!(parse_archive_name("export.7z").is_err());
/// ```
pub fn parse_archive_name(filename: &str) -> Result<ArchiveName> {
    let date = ARCHIVE_NAME_PATTERN
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| HarvesterError::FilenameConvention(filename.to_string()))?;

    Ok(ArchiveName {
        filename: filename.to_string(),
        date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_archive_name() {
        let name = parse_archive_name("data-20240315-structure-v2.7z").unwrap();
        assert_eq!(name.filename, "data-20240315-structure-v2.7z");
        assert_eq!(name.date, "20240315");
        assert_eq!(name.year(), "2024");
    }

    #[test]
    fn test_parse_archive_name_real_listing_format() {
        let name = parse_archive_name("data-20250110-structure-20141120.7z").unwrap();
        assert_eq!(name.date, "20250110");
        assert_eq!(name.year(), "2025");
    }

    #[test]
    fn test_parse_archive_name_invalid() {
        assert!(parse_archive_name("").is_err());
        assert!(parse_archive_name("data.7z").is_err());
        assert!(parse_archive_name("data-20240315.7z").is_err());
        assert!(parse_archive_name("xdata-20240315-structure.7z").is_err());
        assert!(parse_archive_name("data-latest-structure.7z").is_err());
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 3);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.attempts(), 1);

        let zero = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        };
        assert_eq!(zero.attempts(), 1);
    }

    #[test]
    fn test_default_config() {
        let config = HarvesterConfig::default();
        assert_eq!(config.listing_url(Dataset::Certificate), CERTIFICATE_PAGE_URL);
        assert_eq!(config.listing_url(Dataset::Declaration), DECLARATION_PAGE_URL);
        assert_eq!(config.digest, DigestAlgorithm::Md5);
        assert_eq!(config.chunk_size, 131_072);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.batch_size, 1000);
        assert!(!config.force);
        assert!(config.json_indent);
        assert!(config.archive_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = HarvesterConfig::default()
            .with_listing_url(Dataset::Declaration, "http://localhost/rds/")
            .with_output_dir("/tmp/out")
            .with_force(true)
            .with_batch_size(10);

        assert_eq!(config.listing_url(Dataset::Declaration), "http://localhost/rds/");
        assert_eq!(config.listing_url(Dataset::Certificate), CERTIFICATE_PAGE_URL);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert!(config.force);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let config = HarvesterConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(HarvesterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = HarvesterConfig::default().with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(HarvesterError::Config(_))));

        let config = HarvesterConfig::default().with_archive_timeout(Some(Duration::ZERO));
        assert!(matches!(config.validate(), Err(HarvesterError::Config(_))));

        let config =
            HarvesterConfig::default().with_archive_timeout(Some(Duration::from_secs(600)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_flag() {
        assert!(!parse_flag(""));
        assert!(!parse_flag("  "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("FALSE"));
        assert!(!parse_flag("no"));
        assert!(parse_flag("1"));
        assert!(parse_flag("true"));
        assert!(parse_flag("yes"));
    }
}

//! Error types for the harvester.
//!
//! Every variant aborts processing of the current dataset. The orchestrator
//! records the error in that dataset's outcome and moves on to the next one.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// Building the HTTP client failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A request could not be sent or its body could not be read.
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("Failed to fetch {url}: HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// Transient failures persisted through every retry attempt.
    #[error("Failed to fetch {url} after {attempts} attempts: {message}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The listing page contained no download link.
    #[error("Link to the archive was not found on {page}")]
    LinkNotFound { page: String },

    /// The archive filename does not encode a date token.
    #[error("Archive filename '{0}' does not match 'data-<date>-structure...'")]
    FilenameConvention(String),

    /// The archive could not be opened or holds no tabular file.
    #[error("Failed to extract {}: {reason}", .archive.display())]
    Extraction { archive: PathBuf, reason: String },

    /// A tabular row could not be parsed.
    #[error("Malformed row at line {line}: {reason}")]
    Parse { line: u64, reason: String },

    /// The stored file does not hash to the downloaded content.
    #[error("Write integrity check failed for {}: expected digest {expected}, found {actual}", .path.display())]
    WriteIntegrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip batch could not be written.
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl HarvesterError {
    /// Whether this error belongs to the fetch family (network or status).
    #[must_use]
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Fetch { .. } | Self::HttpStatus { .. } | Self::RetriesExhausted { .. }
        )
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarvesterError::FilenameConvention("archive.7z".to_string());
        assert!(err.to_string().contains("archive.7z"));
        assert!(err.to_string().contains("data-<date>-structure"));
    }

    #[test]
    fn test_http_status_is_fetch_error() {
        let err = HarvesterError::HttpStatus {
            url: "https://example.com/".to_string(),
            status: 404,
        };
        assert!(err.is_fetch_error());
        assert_eq!(
            err.to_string(),
            "Failed to fetch https://example.com/: HTTP status 404"
        );
    }

    #[test]
    fn test_parse_error_is_not_fetch_error() {
        let err = HarvesterError::Parse {
            line: 3,
            reason: "found record with 2 fields, but the previous record has 3 fields"
                .to_string(),
        };
        assert!(!err.is_fetch_error());
        assert!(err.to_string().starts_with("Malformed row at line 3"));
    }

    #[test]
    fn test_extraction_error_shows_path() {
        let err = HarvesterError::Extraction {
            archive: PathBuf::from("certificate/original/data.7z"),
            reason: "no .csv entry".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to extract certificate/original/data.7z: no .csv entry"
        );
    }
}

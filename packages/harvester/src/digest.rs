//! Content digests and change detection for downloaded archives.
//!
//! [`HashVerifier`] is the gate that decides whether a freshly fetched
//! archive differs from the copy already on disk. Only when it does (or when
//! forced) is the archive written and processed further.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{HarvesterError, Result};
use crate::http::Fetcher;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// 128-bit MD5.
    #[default]
    Md5,

    /// 256-bit SHA-2.
    Sha256,
}

impl DigestAlgorithm {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = HarvesterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            other => Err(HarvesterError::Config(format!(
                "unsupported digest algorithm '{other}' (expected md5 or sha256)"
            ))),
        }
    }
}

/// Running hash state for one of the supported algorithms.
enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Result of comparing fetched content against the local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub url: String,
    pub path: PathBuf,
    pub content_hash: String,
    pub existing_hash: Option<String>,
    pub file_existed: bool,
    pub hashes_match: bool,
    /// Whether the content was written to `path`.
    pub downloaded: bool,
    pub file_size: u64,
    /// After a write: whether re-reading the file reproduced `content_hash`.
    pub save_verified: Option<bool>,
    /// Digest of the written file, when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_hash: Option<String>,
}

impl Verification {
    /// Turn a failed write-integrity check into an error.
    pub fn ensure_integrity(&self) -> Result<()> {
        if self.save_verified == Some(false) {
            return Err(HarvesterError::WriteIntegrity {
                path: self.path.clone(),
                expected: self.content_hash.clone(),
                actual: self.saved_hash.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Computes digests and stores content only when it changed.
#[derive(Debug, Clone, Copy)]
pub struct HashVerifier {
    algorithm: DigestAlgorithm,
    chunk_size: usize,
}

impl Default for HashVerifier {
    fn default() -> Self {
        Self::new(DigestAlgorithm::default(), DEFAULT_CHUNK_SIZE)
    }
}

impl HashVerifier {
    #[must_use]
    pub fn new(algorithm: DigestAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Hex digest of an in-memory byte slice.
    ///
    /// ```
    /// use fsa_harvester::digest::HashVerifier;
    ///
    /// let verifier = HashVerifier::default();
    /// assert_eq!(verifier.hash_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    /// ```
    #[must_use]
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut hasher = self.algorithm.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }

    /// Hex digest of a file, read in `chunk_size` pieces.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn hash_file(&self, path: &Path) -> Result<Option<String>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut hasher = self.algorithm.hasher();
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buffer[..read]);
        }

        Ok(Some(hasher.finalize_hex()))
    }

    /// Write `content` to `path` unless the file already holds the same bytes.
    ///
    /// With `force` the file is written regardless. After every write the
    /// file is hashed again and the outcome recorded in `save_verified`.
    pub fn store_if_changed(
        &self,
        url: &str,
        content: &[u8],
        path: &Path,
        force: bool,
    ) -> Result<Verification> {
        let content_hash = self.hash_bytes(content);
        let existing_hash = self.hash_file(path)?;
        let hashes_match = existing_hash.as_deref() == Some(content_hash.as_str());

        let mut verification = Verification {
            url: url.to_string(),
            path: path.to_path_buf(),
            file_existed: existing_hash.is_some(),
            hashes_match,
            content_hash,
            existing_hash,
            downloaded: false,
            file_size: content.len() as u64,
            save_verified: None,
            saved_hash: None,
        };

        if !force && hashes_match {
            tracing::debug!(path = %path.display(), "Local file is up to date");
            return Ok(verification);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        verification.downloaded = true;

        let saved_hash = self.hash_file(path)?;
        verification.save_verified =
            Some(saved_hash.as_deref() == Some(verification.content_hash.as_str()));
        verification.saved_hash = saved_hash;

        tracing::debug!(
            path = %path.display(),
            bytes = verification.file_size,
            verified = ?verification.save_verified,
            "Stored archive"
        );

        Ok(verification)
    }

    /// Fetch `url` and store it at `path` if its content changed.
    ///
    /// # Arguments
    /// * `fetcher` - Fetcher used for the download
    /// * `url` - Archive URL
    /// * `path` - Local copy to compare against and overwrite
    /// * `force` - Write even when the hashes match
    ///
    /// # Returns
    /// A [`Verification`] describing both hashes and the write outcome
    pub fn download_with_verification(
        &self,
        fetcher: &Fetcher,
        url: &str,
        path: &Path,
        force: bool,
    ) -> Result<Verification> {
        let content = fetcher.fetch_archive(url)?;
        self.store_if_changed(url, &content, path, force)
    }
}

//! Archive extraction into scoped scratch directories.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{HarvesterError, Result};

/// Extension of the tabular entry inside an archive.
pub const TABLE_EXTENSION: &str = "csv";

const SEVEN_Z_MAGIC: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Container formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    SevenZ,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from the leading bytes of a file.
    pub fn detect(path: &Path) -> Result<Self> {
        let mut header = [0u8; 6];
        let mut file = File::open(path)?;
        let mut filled = 0;
        while filled < header.len() {
            match file.read(&mut header[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        let header = &header[..filled];

        if header.starts_with(SEVEN_Z_MAGIC) {
            Ok(Self::SevenZ)
        } else if header.starts_with(ZIP_MAGIC) {
            Ok(Self::Zip)
        } else {
            Err(HarvesterError::Extraction {
                archive: path.to_path_buf(),
                reason: "unsupported archive format".to_string(),
            })
        }
    }
}

/// The tabular file of an extracted archive.
///
/// Owns the scratch directory the archive was extracted into; dropping the
/// table removes the directory.
#[derive(Debug)]
pub struct ExtractedTable {
    scratch: TempDir,
    path: PathBuf,
}

impl ExtractedTable {
    /// Location of the tabular file inside the scratch directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory holding all extracted entries.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Open the tabular file for reading.
    pub fn open(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(&self.path)?))
    }
}

/// Extract `archive` into a fresh scratch dir and locate its tabular entry.
///
/// `scratch_root` is the parent of the scratch dir; the system temp dir is
/// used when it is `None`.
pub fn extract_table(archive: &Path, scratch_root: Option<&Path>) -> Result<ExtractedTable> {
    let format = ArchiveFormat::detect(archive)?;
    let scratch = scratch_dir(scratch_root, ".extract-")?;

    tracing::debug!(
        archive = %archive.display(),
        scratch = %scratch.path().display(),
        ?format,
        "Extracting archive"
    );

    let extraction_error = |reason: String| HarvesterError::Extraction {
        archive: archive.to_path_buf(),
        reason,
    };

    match format {
        ArchiveFormat::SevenZ => sevenz_rust2::decompress_file(archive, scratch.path())
            .map_err(|e| extraction_error(e.to_string()))?,
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(File::open(archive)?)
                .map_err(|e| extraction_error(e.to_string()))?;
            zip.extract(scratch.path())
                .map_err(|e| extraction_error(e.to_string()))?;
        }
    }

    let mut tables: Vec<PathBuf> = WalkDir::new(scratch.path())
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(TABLE_EXTENSION))
        })
        .collect();

    if tables.len() > 1 {
        tracing::warn!(
            archive = %archive.display(),
            count = tables.len(),
            "Archive holds several tabular files, using the first"
        );
    }
    if tables.is_empty() {
        return Err(extraction_error(format!("no .{TABLE_EXTENSION} entry found")));
    }
    let path = tables.swap_remove(0);

    Ok(ExtractedTable { scratch, path })
}

/// Create a scratch directory under `root`, or under the system temp dir.
pub(crate) fn scratch_dir(root: Option<&Path>, prefix: &str) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let dir = match root {
        Some(root) => {
            std::fs::create_dir_all(root)?;
            builder.tempdir_in(root)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir)
}

//! Error types for the archive module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while detecting, extracting or building archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file is not in a format we can extract.
    #[error("archive is not in a supported format: {path}")]
    Unsupported { path: PathBuf },

    /// An entry would be written outside the destination directory.
    #[error("illegal entry path escapes destination: {entry}")]
    PathTraversal { entry: String },

    /// The archive container itself could not be read.
    #[error("malformed archive {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// The operation was cancelled between entries.
    #[error("archive operation cancelled")]
    Cancelled,

    /// I/O error while reading or writing entries.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn malformed(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

//! Transfer-package construction.
//!
//! Turns a downloaded payload into the directory layout the archival
//! processing service ingests: the payload under `data/`, PREMIS and
//! descriptive metadata under `metadata/`. The payload is MOVED into the
//! package, not copied.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::archive::{self, ArchiveError, ArchiveFormat};
use crate::cms::{NodeCollection, UserRecord};
use crate::premis::{self, PremisError};

/// Errors while assembling a transfer package.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The payload is neither a regular file nor a directory.
    #[error("file type not supported: {path}")]
    Unsupported { path: PathBuf },

    /// Payload extraction failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Metadata construction or validation failed.
    #[error(transparent)]
    Premis(#[from] PremisError),

    /// The operation was cancelled.
    #[error("preprocessing cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the transfer package for `payload_path` under `transfer_dir` and
/// returns the package root.
///
/// Layout: `<transfer_dir>/<payload stem>/data/...` plus
/// `metadata/premis.xml` (when any node carries stored events) and
/// `metadata/metadata.json` (when any node carries descriptive fields).
pub async fn preprocess_package(
    token: &CancellationToken,
    payload_path: &Path,
    transfer_dir: &Path,
    collection: &NodeCollection,
    user: &UserRecord,
    organization: &str,
) -> Result<PathBuf, PreprocessError> {
    let package_name = archive::package_stem(payload_path);

    let transfer_root = transfer_dir.join(&package_name);
    let data_dir = transfer_root.join("data");
    tokio::fs::create_dir_all(&data_dir).await?;

    let file_info = tokio::fs::metadata(payload_path).await?;

    if token.is_cancelled() {
        return Err(PreprocessError::Cancelled);
    }

    if file_info.is_file() && archive::detect(payload_path)? == ArchiveFormat::Zip {
        archive::extract(token, payload_path, &data_dir.join(&package_name)).await?;
    } else if file_info.is_file() || file_info.is_dir() {
        let file_name = payload_path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| PreprocessError::Unsupported {
                path: payload_path.to_path_buf(),
            })?;
        tokio::fs::rename(payload_path, data_dir.join(file_name)).await?;
    } else {
        return Err(PreprocessError::Unsupported {
            path: payload_path.to_path_buf(),
        });
    }

    if token.is_cancelled() {
        return Err(PreprocessError::Cancelled);
    }

    let metadata_dir = transfer_root.join("metadata");
    tokio::fs::create_dir_all(&metadata_dir).await?;

    let (record, sidecar) = premis::build_from_collection(collection, user, organization)?;

    if !record.objects.is_empty() {
        record.validate()?;
        record.write(&metadata_dir.join("premis.xml"))?;
        debug!(package = package_name, "wrote premis.xml");
    }

    if !sidecar.is_empty() {
        let json = serde_json::to_vec(&sidecar).map_err(std::io::Error::other)?;
        let sidecar_path = metadata_dir.join("metadata.json");
        tokio::fs::write(&sidecar_path, json).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&sidecar_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        debug!(package = package_name, "wrote metadata.json");
    }

    Ok(transfer_root)
}

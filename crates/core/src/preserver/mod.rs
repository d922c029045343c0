//! The per-request preservation pipeline.
//!
//! One [`Preserver::run`] call drives a single package through download,
//! transfer-package construction, submission to the archival processing
//! service, AIP post-processing, optional DIP delivery and the final upload
//! back to the CMS. Every state transition is mirrored to a user-visible
//! progress tag before the work it labels; failures land in a terminal
//! `Failed` tag and cleanup runs on every exit path.

pub mod tags;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ads::{AdsApi, AdsError};
use crate::aps::{processing_config, ApsClient, ApsError, TransferRpc};
use crate::archive::{self, ArchiveError};
use crate::cms::{unquote_meta, CmsApi, CmsError, NodeCollection, UserClient};
use crate::config::{AtomConfig, Config, PreservationConfig};
use crate::preprocess::{preprocess_package, PreprocessError};
use crate::retry::{with_retry, RetryPolicy};

use tags::ProgressTag;

/// Upper bound for one submit-and-poll attempt against the processing
/// service.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Errors surfaced by a preservation run.
#[derive(Debug, Error)]
pub enum PreserveError {
    #[error(transparent)]
    Cms(#[from] CmsError),

    #[error(transparent)]
    Aps(#[from] ApsError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Ads(#[from] AdsError),

    /// Any failure inside the DIP delivery stage; drives the DIP failure
    /// tag instead of the preservation one.
    #[error("DIP delivery failed: {0}")]
    Dip(#[source] Box<PreserveError>),

    /// The processing service finished but its AIP is not on disk.
    #[error("AIP not found: {path}")]
    AipMissing { path: PathBuf },

    /// The processing service produced no DIP directory.
    #[error("DIP not found: {path}")]
    DipMissing { path: PathBuf },

    /// The uploaded package could not be found again.
    #[error("uploaded package missing at {path}")]
    UploadVerify { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PreserveError {
    fn is_dip(&self) -> bool {
        matches!(self, Self::Dip(_))
    }
}

/// Node metadata gathered before the pipeline starts.
struct NodeEnvironment {
    logical_path: String,
    collection: NodeCollection,
    preservation_namespace: &'static str,
    dip_namespace: &'static str,
}

/// Resources owned by one run, torn down in a fixed order (AIP file, DIP
/// directory, processing directory) on every exit path. Removal is
/// best-effort; failures are logged.
struct Cleaner {
    enabled: bool,
    aip_file: Option<PathBuf>,
    dip_dir: Option<PathBuf>,
    processing_dir: Option<PathBuf>,
}

impl Cleaner {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            aip_file: None,
            dip_dir: None,
            processing_dir: None,
        }
    }

    async fn run(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(aip) = self.aip_file.take() {
            match tokio::fs::remove_file(&aip).await {
                Ok(()) => debug!(path = %aip.display(), "deleted AIP"),
                Err(err) => warn!(path = %aip.display(), %err, "error deleting AIP"),
            }
        }
        if let Some(dip) = self.dip_dir.take() {
            match tokio::fs::remove_dir_all(&dip).await {
                Ok(()) => debug!(path = %dip.display(), "deleted DIP directory"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %dip.display(), %err, "error deleting DIP directory"),
            }
        }
        if let Some(dir) = self.processing_dir.take() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(path = %dir.display(), "deleted processing directory"),
                Err(err) => warn!(path = %dir.display(), %err, "error deleting processing directory"),
            }
        }
    }
}

/// Writes progress values into one tag namespace, with retry.
struct Tagger<'a, C: CmsApi> {
    cms: &'a C,
    user: &'a UserClient,
    node_uuid: &'a str,
    namespace: &'static str,
}

impl<C: CmsApi> Tagger<'_, C> {
    async fn set(&self, tag: ProgressTag) -> Result<(), CmsError> {
        self.set_raw(tag.as_str()).await
    }

    async fn set_raw(&self, value: &str) -> Result<(), CmsError> {
        debug!(node = self.node_uuid, namespace = self.namespace, value, "tagging");
        with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms
                .update_tag(self.user, self.node_uuid, self.namespace, value)
        })
        .await
    }
}

/// Drives the preservation pipeline for single packages.
pub struct Preserver<C: CmsApi, R: TransferRpc, A: AdsApi> {
    cms: Arc<C>,
    aps: ApsClient<R>,
    ads: Arc<A>,
    config: Arc<Config>,
}

impl<C: CmsApi, R: TransferRpc, A: AdsApi> Preserver<C, R, A> {
    pub fn new(cms: Arc<C>, aps: ApsClient<R>, ads: Arc<A>, config: Arc<Config>) -> Self {
        Self {
            cms,
            aps,
            ads,
            config,
        }
    }

    /// Service configuration this preserver runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mints a user client for this request, with retry.
    pub async fn user_client(&self, username: &str) -> Result<UserClient, CmsError> {
        with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms.new_user_client(username)
        })
        .await
    }

    /// Runs the full pipeline for one package path.
    pub async fn run(
        &self,
        token: &CancellationToken,
        pcfg: &PreservationConfig,
        atom: &AtomConfig,
        user: &UserClient,
        package_path: &str,
        cleanup: bool,
        path_resolved: bool,
    ) -> Result<(), PreserveError> {
        let mut logical_path = package_path.to_string();
        if path_resolved {
            logical_path = self.cms.unresolve_path(user, &logical_path).await?;
            info!(path = %logical_path, "unresolved package path");
        }

        let env = self.gather_node_environment(user, &logical_path).await?;
        let tag = Tagger {
            cms: self.cms.as_ref(),
            user,
            node_uuid: &env.collection.parent.uuid,
            namespace: env.preservation_namespace,
        };
        let dip_tag = Tagger {
            cms: self.cms.as_ref(),
            user,
            node_uuid: &env.collection.parent.uuid,
            namespace: env.dip_namespace,
        };

        let mut cleaner = Cleaner::new(cleanup);
        let result = self
            .pipeline(token, pcfg, atom, user, &env, &tag, &dip_tag, &mut cleaner)
            .await;
        cleaner.run().await;

        if let Err(err) = &result {
            error!(path = %env.logical_path, %err, "preservation failed");
            if err.is_dip() {
                if let Err(tag_err) = dip_tag.set_raw(&tags::dip_failed_tag(&err.to_string())).await
                {
                    error!(%tag_err, "error updating DIP tag on failure");
                }
                if let Err(tag_err) = tag.set_raw(tags::DIP_FAILED_MARKER).await {
                    error!(%tag_err, "error updating preservation tag on failure");
                }
            } else if let Err(tag_err) = tag.set_raw(&tags::failed_tag(&err.to_string())).await {
                error!(%tag_err, "error updating preservation tag on failure");
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn pipeline(
        &self,
        token: &CancellationToken,
        pcfg: &PreservationConfig,
        atom: &AtomConfig,
        user: &UserClient,
        env: &NodeEnvironment,
        tag: &Tagger<'_, C>,
        dip_tag: &Tagger<'_, C>,
        cleaner: &mut Cleaner,
    ) -> Result<(), PreserveError> {
        tag.set(ProgressTag::Starting).await?;
        let processing_dir = self.make_processing_dir().await?;
        cleaner.processing_dir = Some(processing_dir.clone());
        info!(dir = %processing_dir.display(), "created processing directory");

        // Download the package into the processing directory.
        tag.set(ProgressTag::Downloading).await?;
        let download_dir = processing_dir.join("cells_download");
        tokio::fs::create_dir_all(&download_dir).await?;
        info!(path = %env.logical_path, "downloading package");
        let downloaded = with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms.download(user, &env.logical_path, &download_dir)
        })
        .await?;

        // Build the transfer package. No retry here: the payload is moved
        // away by the first attempt.
        tag.set(ProgressTag::Preprocessing).await?;
        let transfer_dir = processing_dir.join("a3m_transfer");
        tokio::fs::create_dir_all(&transfer_dir).await?;
        let transfer_root = preprocess_package(
            token,
            &downloaded,
            &transfer_dir,
            &env.collection,
            &user.user,
            &self.config.premis_organization,
        )
        .await?;

        // Submit to the processing service and locate the produced AIP.
        tag.set(ProgressTag::Packaging).await?;
        let transfer_name = transfer_root
            .file_name()
            .map(|n| n.to_string_lossy().replace(' ', ""))
            .unwrap_or_default();
        let transfer_path = transfer_root.to_string_lossy().into_owned();
        info!(name = transfer_name, "queueing transfer");
        let outcome = with_retry(RetryPolicy::default(), ApsError::is_transient, || async {
            match tokio::time::timeout(
                SUBMIT_TIMEOUT,
                self.aps
                    .submit_package(token, &transfer_path, &transfer_name, Some(pcfg.a3m.clone())),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ApsError::Rpc(tonic::Status::deadline_exceeded(
                    "transfer processing timed out",
                ))),
            }
        })
        .await?;
        let aip_uuid = outcome.aip_uuid;

        let extension = aip_extension(pcfg.a3m.aip_compression_algorithm);
        let aip_source = self
            .config
            .a3m_completed_dir
            .join(format!("{transfer_name}-{aip_uuid}{extension}"));
        if !aip_source.exists() {
            return Err(PreserveError::AipMissing { path: aip_source });
        }
        info!(path = %aip_source.display(), "AIP generated");
        cleaner.aip_file = Some(aip_source.clone());
        cleaner.dip_dir = Some(self.config.a3m_dips_dir.join(&aip_uuid));

        // Extract the AIP, optionally re-wrapping it as a ZIP.
        tag.set(ProgressTag::Extracting).await?;
        let aip_dir = processing_dir.join("aip");
        tokio::fs::create_dir_all(&aip_dir).await?;
        let mut aip_path = archive::extract(token, &aip_source, &aip_dir).await?;
        info!(path = %aip_path.display(), "extracted AIP");

        if pcfg.compress_aip {
            tag.set(ProgressTag::Compressing).await?;
            let file_name = aip_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let zipped = aip_dir.join(format!("{file_name}.zip"));
            archive::compress_zip(token, &aip_path, &zipped).await?;
            info!(path = %zipped.display(), "compressed AIP");
            aip_path = zipped;
        }

        // DIP delivery, when a slug and a complete config are available.
        let stored_slug = unquote_meta(env.collection.parent.meta(tags::ATOM_SLUG_NAMESPACE));
        let slug = if stored_slug.is_empty() {
            atom.slug.clone()
        } else {
            stored_slug
        };
        if !slug.is_empty() && atom.is_complete() {
            self.deliver_dip(token, atom, user, env, &slug, &aip_uuid, dip_tag)
                .await
                .map_err(|e| PreserveError::Dip(Box::new(e)))?;
        } else if !env.collection.parent.meta(env.dip_namespace).is_empty() {
            // Stale DIP status from an earlier run; clear it.
            if let Err(err) = dip_tag.set_raw("").await {
                warn!(%err, "error clearing DIP tag");
            }
        }

        // Upload the finished AIP and verify it landed.
        tag.set(ProgressTag::Uploading).await?;
        let upload_logical = with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms
                .upload(user, &aip_path, &self.config.cells_archive_workspace)
        })
        .await?;
        info!(path = upload_logical, "uploaded AIP");

        let resolved_upload = self.cms.resolve_path(user, &upload_logical).await?;
        let stat = with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms.stat_node(&resolved_upload)
        })
        .await;
        match stat {
            Ok(_) => {}
            Err(CmsError::NotFound { .. }) => {
                return Err(PreserveError::UploadVerify {
                    path: upload_logical,
                })
            }
            Err(err) => return Err(err.into()),
        }

        tag.set(ProgressTag::Preserved).await?;
        info!(package = %env.logical_path, "preservation successful");
        Ok(())
    }

    /// Migrates and deposits the DIP, then records the slug on the node.
    async fn deliver_dip(
        &self,
        token: &CancellationToken,
        atom: &AtomConfig,
        user: &UserClient,
        env: &NodeEnvironment,
        slug: &str,
        aip_uuid: &str,
        dip_tag: &Tagger<'_, C>,
    ) -> Result<(), PreserveError> {
        dip_tag.set(ProgressTag::Waiting).await?;

        let dip_dir = self.config.a3m_dips_dir.join(aip_uuid);
        if !dip_dir.is_dir() {
            return Err(PreserveError::DipMissing { path: dip_dir });
        }

        dip_tag.set(ProgressTag::Migrating).await?;
        info!(path = %dip_dir.display(), target = atom.rsync_target, "migrating DIP");
        self.ads.migrate(token, atom, &dip_dir).await?;

        dip_tag.set(ProgressTag::Depositing).await?;
        self.ads.deposit(atom, slug, aip_uuid).await?;

        with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms.update_tag(
                user,
                &env.collection.parent.uuid,
                tags::ATOM_SLUG_NAMESPACE,
                slug,
            )
        })
        .await?;

        dip_tag.set(ProgressTag::Deposited).await?;
        Ok(())
    }

    /// Resolves the package path, reads its node tree and decides which tag
    /// namespaces to write.
    async fn gather_node_environment(
        &self,
        user: &UserClient,
        logical_path: &str,
    ) -> Result<NodeEnvironment, PreserveError> {
        let resolved = self.cms.resolve_path(user, logical_path).await?;
        let collection = with_retry(RetryPolicy::default(), CmsError::is_transient, || {
            self.cms.node_collection(&resolved)
        })
        .await?;

        // The CMS only materialises a namespace on a node once it has been
        // written. A populated legacy namespace means the package predates
        // the current one; keep writing where the UI is already looking.
        let preservation_namespace =
            if !collection.parent.meta(tags::PRESERVATION_NAMESPACE_LEGACY).is_empty() {
                tags::PRESERVATION_NAMESPACE_LEGACY
            } else {
                tags::PRESERVATION_NAMESPACE
            };
        let dip_namespace = if !collection.parent.meta(tags::DIP_NAMESPACE_LEGACY).is_empty() {
            tags::DIP_NAMESPACE_LEGACY
        } else {
            tags::DIP_NAMESPACE
        };

        Ok(NodeEnvironment {
            logical_path: logical_path.to_string(),
            collection,
            preservation_namespace,
            dip_namespace,
        })
    }

    /// Creates a UUID-named directory under the configured base.
    async fn make_processing_dir(&self) -> Result<PathBuf, PreserveError> {
        loop {
            let candidate = self.config.processing_base_dir.join(Uuid::new_v4().to_string());
            if candidate.exists() {
                continue;
            }
            tokio::fs::create_dir(&candidate).await?;
            return Ok(candidate);
        }
    }
}

/// Extension of the AIP the processing service writes, by compression
/// algorithm. Only S7_COPY is exercised today.
fn aip_extension(algorithm: i32) -> &'static str {
    use processing_config::AipCompressionAlgorithm as Algorithm;
    match Algorithm::try_from(algorithm) {
        Ok(Algorithm::Tar) => ".tar",
        Ok(Algorithm::TarBzip2) => ".tar.bz2",
        Ok(Algorithm::TarGzip) => ".tar.gz",
        _ => ".7z",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aip_extension_lookup_defaults_to_7z() {
        use processing_config::AipCompressionAlgorithm as Algorithm;
        assert_eq!(aip_extension(Algorithm::S7Copy as i32), ".7z");
        assert_eq!(aip_extension(Algorithm::S7Lzma as i32), ".7z");
        assert_eq!(aip_extension(Algorithm::TarGzip as i32), ".tar.gz");
        assert_eq!(aip_extension(0), ".7z");
        assert_eq!(aip_extension(999), ".7z");
    }

    #[test]
    fn dip_errors_are_marked() {
        let err = PreserveError::Dip(Box::new(PreserveError::UploadVerify {
            path: "x".to_string(),
        }));
        assert!(err.is_dip());
        assert!(!PreserveError::UploadVerify { path: "x".to_string() }.is_dip());
    }
}

//! Request-level orchestration.
//!
//! One request may carry many package paths. The service mints a single
//! user client, fans the paths out over a bounded worker pool and runs the
//! pipeline for each; the admission gate inside the APS client serialises
//! the packaging stage independently of this pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::ads::AdsApi;
use crate::aps::TransferRpc;
use crate::cms::{CmsApi, CmsError};
use crate::config::{AtomConfig, PreservationConfig};
use crate::preserver::Preserver;

/// Paths concurrently inside the pipeline per request.
const MAX_WORKERS: usize = 10;

/// Whole-pipeline attempts per path.
const MAX_RETRIES: u32 = 1;

/// A node reference passed instead of a logical path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub uuid: String,
}

/// Arguments for one preservation request.
#[derive(Debug, Clone, Default)]
pub struct ServiceArgs {
    pub username: String,
    pub paths: Vec<String>,
    pub nodes: Vec<NodeRef>,
    pub cleanup: bool,
    pub allow_insecure_tls: bool,
    /// Paths derived from CMS nodes are already resolved and must be
    /// unresolved before the pipeline runs.
    pub paths_resolved: bool,
    pub preservation: PreservationConfig,
    pub atom: AtomConfig,
}

impl ServiceArgs {
    /// Request identity for in-flight deduplication: the user plus the
    /// sorted set of paths and node paths.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<&str> = self
            .paths
            .iter()
            .map(String::as_str)
            .chain(self.nodes.iter().map(|n| n.path.as_str()))
            .collect();
        parts.sort_unstable();

        let mut id = self.username.clone();
        for part in parts {
            id.push(':');
            id.push_str(part);
        }
        id
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// At least one path failed; details are in the log.
    #[error("preservation process completed with errors")]
    PreservationFailed,

    /// The user client could not be created.
    #[error(transparent)]
    Cms(#[from] CmsError),
}

/// The surface the HTTP front-end and CLI drive.
#[async_trait]
pub trait PreserveRunner: Send + Sync {
    async fn run_args(
        &self,
        token: CancellationToken,
        args: ServiceArgs,
    ) -> Result<(), ServiceError>;
}

/// Production request service around a [`Preserver`].
pub struct RequestService<C: CmsApi, R: TransferRpc, A: AdsApi> {
    preserver: Arc<Preserver<C, R, A>>,
    max_workers: usize,
}

impl<C, R, A> RequestService<C, R, A>
where
    C: CmsApi + 'static,
    R: TransferRpc + 'static,
    A: AdsApi + 'static,
{
    pub fn new(preserver: Preserver<C, R, A>) -> Self {
        Self {
            preserver: Arc::new(preserver),
            max_workers: MAX_WORKERS,
        }
    }
}

#[async_trait]
impl<C, R, A> PreserveRunner for RequestService<C, R, A>
where
    C: CmsApi + 'static,
    R: TransferRpc + 'static,
    A: AdsApi + 'static,
{
    async fn run_args(
        &self,
        token: CancellationToken,
        args: ServiceArgs,
    ) -> Result<(), ServiceError> {
        let pcfg = Arc::new(args.preservation.merge_with_defaults());
        let atom = Arc::new(args.atom.clone());
        debug!(
            config = %serde_json::to_string_pretty(self.preserver.config()).unwrap_or_default(),
            "service configuration"
        );
        debug!(
            config = %serde_json::to_string_pretty(pcfg.as_ref()).unwrap_or_default(),
            "preservation configuration"
        );

        // One user client per request, shared by all paths.
        let user = Arc::new(self.preserver.user_client(&args.username).await?);

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(args.paths.len());

        for path in args.paths.clone() {
            let preserver = Arc::clone(&self.preserver);
            let workers = Arc::clone(&workers);
            let user = Arc::clone(&user);
            let pcfg = Arc::clone(&pcfg);
            let atom = Arc::clone(&atom);
            let token = token.clone();
            let cleanup = args.cleanup;
            let paths_resolved = args.paths_resolved;

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = workers.acquire().await else {
                    return Err(());
                };
                for attempt in 1..=MAX_RETRIES {
                    match preserver
                        .run(&token, &pcfg, &atom, &user, &path, cleanup, paths_resolved)
                        .await
                    {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            error!(
                                %path,
                                attempt,
                                max_attempts = MAX_RETRIES,
                                %err,
                                "error running preservation for package"
                            );
                        }
                    }
                }
                Err(())
            }));
        }

        let mut failed = false;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(())) => failed = true,
                Err(join_err) => {
                    error!(%join_err, "preservation task panicked");
                    failed = true;
                }
            }
        }

        if failed {
            return Err(ServiceError::PreservationFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with(username: &str, paths: &[&str], node_paths: &[&str]) -> ServiceArgs {
        ServiceArgs {
            username: username.to_string(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            nodes: node_paths
                .iter()
                .map(|p| NodeRef {
                    path: p.to_string(),
                    uuid: String::new(),
                })
                .collect(),
            ..ServiceArgs::default()
        }
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = args_with("u", &["p/one", "p/two"], &[]);
        let b = args_with("u", &["p/two", "p/one"], &[]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_includes_user_and_node_paths() {
        let a = args_with("u", &["p/one"], &["n/two"]);
        let b = args_with("u", &["p/one"], &[]);
        let c = args_with("v", &["p/one"], &["n/two"]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}

//! Client for the archival processing service.
//!
//! Submissions are serialised through an in-process admission semaphore: the
//! service can only work one package at a time, so at most
//! `max_active_processing` submissions (default 1) are in flight against it.
//! Everyone else queues at the semaphore, not at the RPC layer. After
//! submission the client polls until the package reaches a terminal status.

pub mod proto;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry;

pub use proto::{
    processing_config, transfer_service_client::TransferServiceClient, ListTasksRequest,
    ListTasksResponse, PackageStatus, ProcessingConfig, ReadRequest, ReadResponse, SubmitRequest,
    SubmitResponse,
};

/// Per-job timeout when listing the tasks of a failed job.
const LIST_TASKS_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from package submission and polling.
#[derive(Debug, Error)]
pub enum ApsError {
    /// Cancelled while queued for a slot or mid-poll.
    #[error("cancelled while waiting for the processing service")]
    Cancelled,

    /// Could not build the transport channel.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// An RPC failed outright.
    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),

    /// The service reported the package as failed or rejected.
    #[error("error processing package (status: {status}). Failed jobs: {jobs:?}")]
    Failed { status: String, jobs: Vec<FailedJob> },

    /// The service answered with a status outside the protocol.
    #[error("package has an unspecified or unknown status ({status})")]
    Protocol { status: i32 },
}

impl ApsError {
    /// Whether the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rpc(status) => retry::grpc_code_is_transient(status.code()),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

/// Diagnostics collected for one failed job.
#[derive(Debug, Clone, Serialize)]
pub struct FailedJob {
    pub job_name: String,
    pub job_id: String,
    pub link_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task_id: String,
    pub execution: String,
    pub arguments: String,
    pub stdout: String,
    pub stderr: String,
}

/// The raw RPC surface, kept behind a trait so tests can run the client
/// against a scripted service.
#[async_trait]
pub trait TransferRpc: Send + Sync {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, tonic::Status>;
    async fn read(&self, request: ReadRequest) -> Result<ReadResponse, tonic::Status>;
    async fn list_tasks(
        &self,
        request: ListTasksRequest,
    ) -> Result<ListTasksResponse, tonic::Status>;
}

#[async_trait]
impl<T: TransferRpc + ?Sized> TransferRpc for std::sync::Arc<T> {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, tonic::Status> {
        (**self).submit(request).await
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResponse, tonic::Status> {
        (**self).read(request).await
    }

    async fn list_tasks(
        &self,
        request: ListTasksRequest,
    ) -> Result<ListTasksResponse, tonic::Status> {
        (**self).list_tasks(request).await
    }
}

/// Production RPC transport over a tonic channel.
pub struct GrpcTransferRpc {
    client: TransferServiceClient,
}

impl GrpcTransferRpc {
    /// Builds a lazily-connecting transport. Addresses without a scheme get
    /// `http://` prepended.
    pub fn connect(address: &str) -> Result<Self, ApsError> {
        let dst = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        Ok(Self {
            client: TransferServiceClient::connect_lazy(dst)?,
        })
    }
}

#[async_trait]
impl TransferRpc for GrpcTransferRpc {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, tonic::Status> {
        let mut client = self.client.clone();
        Ok(client.submit(request).await?.into_inner())
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResponse, tonic::Status> {
        let mut client = self.client.clone();
        Ok(client.read(request).await?.into_inner())
    }

    async fn list_tasks(
        &self,
        request: ListTasksRequest,
    ) -> Result<ListTasksResponse, tonic::Status> {
        let mut client = self.client.clone();
        Ok(client.list_tasks(request).await?.into_inner())
    }
}

/// Tuning for the APS client.
#[derive(Debug, Clone, Copy)]
pub struct ApsClientOptions {
    /// Concurrent submissions allowed against the service.
    pub max_active_processing: usize,
    /// Time between status polls.
    pub poll_interval: Duration,
}

impl Default for ApsClientOptions {
    fn default() -> Self {
        Self {
            max_active_processing: 1,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Package id assigned by the service; also the AIP UUID.
    pub aip_uuid: String,
    /// Final status response.
    pub response: ReadResponse,
}

/// Admission-controlled submission client.
pub struct ApsClient<R: TransferRpc> {
    rpc: R,
    slots: Semaphore,
    options: ApsClientOptions,
}

impl<R: TransferRpc> ApsClient<R> {
    pub fn new(rpc: R) -> Self {
        Self::with_options(rpc, ApsClientOptions::default())
    }

    pub fn with_options(rpc: R, options: ApsClientOptions) -> Self {
        let capacity = options.max_active_processing.max(1);
        Self {
            rpc,
            slots: Semaphore::new(capacity),
            options: ApsClientOptions {
                max_active_processing: capacity,
                poll_interval: if options.poll_interval.is_zero() {
                    Duration::from_secs(1)
                } else {
                    options.poll_interval
                },
            },
        }
    }

    /// Submits the transfer at `path` and polls until it reaches a terminal
    /// status. Blocks while the service is busy with other packages;
    /// cancellation is honoured both in the queue and between polls.
    pub async fn submit_package(
        &self,
        token: &CancellationToken,
        path: &str,
        name: &str,
        config: Option<ProcessingConfig>,
    ) -> Result<SubmitOutcome, ApsError> {
        let name = name.replace(' ', "_");

        let _permit = tokio::select! {
            permit = self.slots.acquire() => permit.map_err(|_| ApsError::Cancelled)?,
            _ = token.cancelled() => return Err(ApsError::Cancelled),
        };

        let request = SubmitRequest {
            name: name.clone(),
            url: path.to_string(),
            config,
        };
        debug!(name, url = path, "submitting transfer");
        let submitted = self.rpc.submit(request).await?;
        debug!(name, id = %submitted.id, "transfer accepted");

        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(ApsError::Cancelled),
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }

            let read = self
                .rpc
                .read(ReadRequest {
                    id: submitted.id.clone(),
                })
                .await?;

            match PackageStatus::try_from(read.status) {
                Ok(PackageStatus::Processing) => {
                    debug!(name, id = %submitted.id, "package still processing");
                }
                Ok(PackageStatus::Complete) => {
                    let failed = self.collect_failed_jobs(token, &read.jobs).await;
                    if !failed.is_empty() {
                        warn!(name, id = %submitted.id, jobs = ?failed, "package completed with failed jobs");
                    }
                    return Ok(SubmitOutcome {
                        aip_uuid: submitted.id,
                        response: read,
                    });
                }
                Ok(status @ (PackageStatus::Failed | PackageStatus::Rejected)) => {
                    let jobs = self.collect_failed_jobs(token, &read.jobs).await;
                    return Err(ApsError::Failed {
                        status: status.as_str_name().to_string(),
                        jobs,
                    });
                }
                Ok(PackageStatus::Unspecified) | Err(_) => {
                    return Err(ApsError::Protocol { status: read.status })
                }
            }
        }
    }

    /// Gathers diagnostics for every failed job, with a bounded task-listing
    /// call per job.
    async fn collect_failed_jobs(
        &self,
        token: &CancellationToken,
        jobs: &[proto::Job],
    ) -> Vec<FailedJob> {
        let mut failed = Vec::new();
        for job in jobs {
            if job.status != proto::job::Status::Failed as i32 {
                continue;
            }
            if token.is_cancelled() {
                failed.push(FailedJob {
                    job_name: String::new(),
                    job_id: String::new(),
                    link_id: String::new(),
                    tasks: None,
                    tasks_error: Some(
                        "cancelled while collecting job information".to_string(),
                    ),
                });
                return failed;
            }

            let mut info = FailedJob {
                job_name: job.name.clone(),
                job_id: job.id.clone(),
                link_id: job.link_id.clone(),
                tasks: None,
                tasks_error: None,
            };

            let listing = tokio::time::timeout(
                LIST_TASKS_TIMEOUT,
                self.rpc.list_tasks(ListTasksRequest {
                    job_id: job.id.clone(),
                }),
            )
            .await;

            match listing {
                Ok(Ok(response)) => {
                    info.tasks = Some(
                        response
                            .tasks
                            .into_iter()
                            .map(|t| TaskDetail {
                                task_id: t.id,
                                execution: t.execution,
                                arguments: t.arguments,
                                stdout: t.stdout,
                                stderr: t.stderr,
                            })
                            .collect(),
                    );
                }
                Ok(Err(status)) => info.tasks_error = Some(status.to_string()),
                Err(_) => info.tasks_error = Some("timed out listing tasks".to_string()),
            }
            failed.push(info);
        }
        failed
    }
}

//! Transfer-service wire types, vendored in generated form.
//!
//! The archival processing service exposes a small gRPC surface: submit a
//! transfer, poll its status, list the tasks of a job. Messages mirror the
//! service's `transferservice.v1beta1` package; only the fields the pipeline
//! consumes are carried.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub url: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub config: ::core::option::Option<ProcessingConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitResponse {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadResponse {
    #[prost(enumeration = "PackageStatus", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub jobs: ::prost::alloc::vec::Vec<Job>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListTasksRequest {
    #[prost(string, tag = "1")]
    pub job_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListTasksResponse {
    #[prost(message, repeated, tag = "1")]
    pub tasks: ::prost::alloc::vec::Vec<Task>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Job {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub link_id: ::prost::alloc::string::String,
    #[prost(enumeration = "job::Status", tag = "4")]
    pub status: i32,
}

/// Nested message and enum types in `Job`.
pub mod job {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Status {
        Unspecified = 0,
        Complete = 1,
        Processing = 2,
        Failed = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Task {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub execution: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub arguments: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub stdout: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub stderr: ::prost::alloc::string::String,
}

/// Processing flags submitted alongside a transfer.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    #[prost(bool, tag = "1")]
    pub assign_uuids_to_directories: bool,
    #[prost(bool, tag = "2")]
    pub examine_contents: bool,
    #[prost(bool, tag = "3")]
    pub generate_transfer_structure_report: bool,
    #[prost(bool, tag = "4")]
    pub document_empty_directories: bool,
    #[prost(bool, tag = "5")]
    pub extract_packages: bool,
    #[prost(bool, tag = "6")]
    pub delete_packages_after_extraction: bool,
    #[prost(bool, tag = "7")]
    pub identify_transfer: bool,
    #[prost(bool, tag = "8")]
    pub identify_submission_and_metadata: bool,
    #[prost(bool, tag = "9")]
    pub identify_before_normalization: bool,
    #[prost(bool, tag = "10")]
    pub normalize: bool,
    #[prost(bool, tag = "11")]
    pub transcribe_files: bool,
    #[prost(bool, tag = "12")]
    pub perform_policy_checks_on_originals: bool,
    #[prost(bool, tag = "13")]
    pub perform_policy_checks_on_preservation_derivatives: bool,
    #[prost(bool, tag = "14")]
    pub perform_policy_checks_on_access_derivatives: bool,
    #[prost(enumeration = "processing_config::ThumbnailMode", tag = "15")]
    pub thumbnail_mode: i32,
    #[prost(int32, tag = "16")]
    pub aip_compression_level: i32,
    #[prost(enumeration = "processing_config::AipCompressionAlgorithm", tag = "17")]
    pub aip_compression_algorithm: i32,
}

/// Nested message and enum types in `ProcessingConfig`.
pub mod processing_config {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum ThumbnailMode {
        Unspecified = 0,
        Generate = 1,
        GenerateNonDefault = 2,
        DoNotGenerate = 3,
    }

    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum AipCompressionAlgorithm {
        Unspecified = 0,
        Uncompressed = 1,
        Tar = 2,
        TarBzip2 = 3,
        TarGzip = 4,
        S7Copy = 5,
        S7Bzip2 = 6,
        S7Lzma = 7,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PackageStatus {
    Unspecified = 0,
    Processing = 1,
    Complete = 2,
    Failed = 3,
    Rejected = 4,
}

impl PackageStatus {
    /// Proto-style name of the status value, used in diagnostics.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unspecified => "PACKAGE_STATUS_UNSPECIFIED",
            Self::Processing => "PACKAGE_STATUS_PROCESSING",
            Self::Complete => "PACKAGE_STATUS_COMPLETE",
            Self::Failed => "PACKAGE_STATUS_FAILED",
            Self::Rejected => "PACKAGE_STATUS_REJECTED",
        }
    }
}

/// Generated client implementations.
pub mod transfer_service_client {
    use super::*;
    use tonic::codegen::http::uri::PathAndQuery;

    #[derive(Debug, Clone)]
    pub struct TransferServiceClient {
        inner: tonic::client::Grpc<tonic::transport::Channel>,
    }

    impl TransferServiceClient {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        /// Builds a client that connects on first use.
        pub fn connect_lazy(dst: String) -> Result<Self, tonic::transport::Error> {
            let endpoint = tonic::transport::Endpoint::from_shared(dst)?;
            Ok(Self::new(endpoint.connect_lazy()))
        }

        pub async fn submit(
            &mut self,
            request: impl tonic::IntoRequest<SubmitRequest>,
        ) -> Result<tonic::Response<SubmitResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {e}"))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static(
                "/a3m.api.transferservice.v1beta1.TransferService/Submit",
            );
            self.inner.unary(request.into_request(), path, codec).await
        }

        pub async fn read(
            &mut self,
            request: impl tonic::IntoRequest<ReadRequest>,
        ) -> Result<tonic::Response<ReadResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {e}"))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static(
                "/a3m.api.transferservice.v1beta1.TransferService/Read",
            );
            self.inner.unary(request.into_request(), path, codec).await
        }

        pub async fn list_tasks(
            &mut self,
            request: impl tonic::IntoRequest<ListTasksRequest>,
        ) -> Result<tonic::Response<ListTasksResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {e}"))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static(
                "/a3m.api.transferservice.v1beta1.TransferService/ListTasks",
            );
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}

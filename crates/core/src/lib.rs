//! Core of the preservation service.
//!
//! The pipeline takes a package living in a content-management system,
//! wraps it into a transfer package with PREMIS and descriptive metadata,
//! submits it to the archival processing service, post-processes the
//! returned AIP, optionally delivers a DIP to the archival description
//! system and uploads the finished AIP back to the CMS, reporting progress
//! through user-visible tags the whole way.

pub mod ads;
pub mod aps;
pub mod archive;
pub mod cms;
pub mod config;
pub mod metadata;
pub mod premis;
pub mod preprocess;
pub mod preserver;
pub mod retry;
pub mod service;
pub mod testing;
pub mod version;

pub use ads::{AdsApi, AdsClient, AdsError};
pub use aps::{ApsClient, ApsClientOptions, ApsError, GrpcTransferRpc, TransferRpc};
pub use archive::{ArchiveError, ArchiveFormat};
pub use cms::{CmsApi, CmsError, Node, NodeCollection, RestCms, RestCmsOptions, UserClient, UserRecord};
pub use config::{AtomConfig, Config, ConfigError, PreservationConfig};
pub use preserver::{PreserveError, Preserver};
pub use retry::{with_retry, RetryPolicy};
pub use service::{NodeRef, PreserveRunner, RequestService, ServiceArgs, ServiceError};

//! Error types for the CMS adapter.

use thiserror::Error;

use crate::retry;

/// Errors from CMS API calls, path resolution and file transfer.
#[derive(Debug, Error)]
pub enum CmsError {
    /// A node or resolved path does not exist.
    #[error("node not found: {path}")]
    NotFound { path: String },

    /// No workspace carries the requested slug.
    #[error("no workspace matches slug {slug:?}")]
    WorkspaceNotFound { slug: String },

    /// A workspace resolution template could not be parsed.
    #[error("unable to parse workspace resolution {resolution:?}")]
    BadResolution { resolution: String },

    /// A user could not be found by login.
    #[error("user not found: {login}")]
    UserNotFound { login: String },

    /// The API answered with an unexpected status.
    #[error("unexpected status {status} from {endpoint}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Transport-level HTTP failure.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The external transfer binary failed.
    #[error("transfer binary failed: {detail}")]
    Transfer { detail: String },

    /// I/O error around downloads and uploads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CmsError {
    /// Whether the operation is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => retry::reqwest_is_transient(err),
            Self::Api { status, .. } => retry::http_status_is_transient(*status),
            Self::Transfer { detail } => retry::message_is_transient(detail),
            _ => false,
        }
    }
}

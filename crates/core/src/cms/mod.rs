//! CMS adapter: token minting, node metadata, path resolution and file
//! transfer.
//!
//! The pipeline only ever talks to the CMS through the [`CmsApi`] trait so
//! tests can swap in an in-memory fake; production uses [`RestCms`], which
//! speaks the REST API and shells out to the transfer binary for bulk data.

mod cec;
mod error;
mod rest;

pub use error::CmsError;
pub use rest::{RestCms, RestCmsOptions};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A node in the CMS tree together with its metadata store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "Uuid", default)]
    pub uuid: String,
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "MetaStore", default)]
    pub meta_store: HashMap<String, String>,
}

impl Node {
    /// Convenience accessor that treats missing keys as empty values.
    pub fn meta(&self, key: &str) -> &str {
        self.meta_store.get(key).map(String::as_str).unwrap_or("")
    }
}

/// A package node and its recursive children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeCollection {
    #[serde(rename = "Parent")]
    pub parent: Node,
    #[serde(rename = "Children", default)]
    pub children: Vec<Node>,
}

/// Identity of the requesting user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "Uuid", default)]
    pub uuid: String,
    #[serde(rename = "Login", default)]
    pub login: String,
    #[serde(rename = "GroupPath", default)]
    pub group_path: String,
}

/// A user record plus the impersonation token minted for this request.
#[derive(Debug, Clone, Default)]
pub struct UserClient {
    pub user: UserRecord,
    pub token: String,
}

/// A workspace root node as exposed by the workspace search API.
#[derive(Debug, Clone, Default)]
pub struct RootNode {
    /// Map key under which the root was listed; datasource roots are
    /// prefixed with `DATASOURCE`.
    pub label: String,
    pub path: String,
    /// Resolution template, empty when the root is not templated.
    pub resolution: String,
}

/// A CMS workspace and its roots, cached read-only per adapter.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub slug: String,
    pub root_nodes: Vec<RootNode>,
}

/// Operations the pipeline needs from the CMS.
#[async_trait]
pub trait CmsApi: Send + Sync {
    /// Mints an impersonation token and fetches the user record.
    async fn new_user_client(&self, username: &str) -> Result<UserClient, CmsError>;

    /// Translates a user-facing logical path into an absolute admin path.
    async fn resolve_path(&self, user: &UserClient, logical: &str) -> Result<String, CmsError>;

    /// Reverse of [`CmsApi::resolve_path`]; returns the input unchanged when
    /// no workspace matches.
    async fn unresolve_path(&self, user: &UserClient, absolute: &str) -> Result<String, CmsError>;

    /// Reads the package node and its recursive children.
    async fn node_collection(&self, path: &str) -> Result<NodeCollection, CmsError>;

    /// Stats a single node by admin path.
    async fn stat_node(&self, path: &str) -> Result<Node, CmsError>;

    /// Writes a user-metadata tag; content is stored JSON-quoted.
    async fn update_tag(
        &self,
        user: &UserClient,
        node_uuid: &str,
        namespace: &str,
        content: &str,
    ) -> Result<(), CmsError>;

    /// Downloads a node into `dest_dir`, returning the local path.
    async fn download(
        &self,
        user: &UserClient,
        logical: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, CmsError>;

    /// Uploads a local file under the logical destination directory,
    /// returning the logical path of the uploaded node.
    async fn upload(
        &self,
        user: &UserClient,
        local: &Path,
        logical_dest: &str,
    ) -> Result<String, CmsError>;
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Outcome of resolving a logical path against the workspace collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolved {
    /// Rewritten through a resolution template; trusted as-is.
    Template(String),
    /// Rewritten through the datasource root; must be stat-verified.
    Datasource(String),
}

impl Resolved {
    pub(crate) fn path(&self) -> &str {
        match self {
            Self::Template(p) | Self::Datasource(p) => p,
        }
    }
}

/// Rewrites only the leading workspace component of `logical`; the tail is
/// preserved untouched.
pub(crate) fn resolve_with_workspaces(
    workspaces: &[Workspace],
    user: &UserRecord,
    logical: &str,
) -> Result<Resolved, CmsError> {
    let (slug, tail) = split_first_segment(logical);
    let workspace = workspaces
        .iter()
        .find(|w| w.slug == slug)
        .ok_or_else(|| CmsError::WorkspaceNotFound {
            slug: slug.to_string(),
        })?;

    let (root, templated) = admin_root(workspace, user)?;
    let resolved = join_segments(&root, tail);
    Ok(if templated {
        Resolved::Template(resolved)
    } else {
        Resolved::Datasource(resolved)
    })
}

/// Reverse search across workspaces. The first workspace whose admin root
/// prefixes `absolute` wins; with no match the path is returned unchanged.
pub(crate) fn unresolve_with_workspaces(
    workspaces: &[Workspace],
    user: &UserRecord,
    absolute: &str,
) -> String {
    for workspace in workspaces {
        let Ok((root, _)) = admin_root(workspace, user) else {
            continue;
        };
        if root.is_empty() {
            continue;
        }
        if absolute == root {
            return workspace.slug.clone();
        }
        if let Some(tail) = absolute.strip_prefix(&format!("{root}/")) {
            return join_segments(&workspace.slug, tail);
        }
    }
    warn!(path = absolute, "no workspace matches path, leaving it unresolved");
    absolute.to_string()
}

/// Computes the admin root of a workspace for `user`. Returns the root and
/// whether it came from a resolution template.
fn admin_root(workspace: &Workspace, user: &UserRecord) -> Result<(String, bool), CmsError> {
    let templated = workspace
        .root_nodes
        .iter()
        .find(|r| !r.label.starts_with("DATASOURCE") && !r.resolution.is_empty());

    if let Some(root) = templated {
        let expression = parse_resolution(&root.resolution).ok_or_else(|| {
            CmsError::BadResolution {
                resolution: root.resolution.clone(),
            }
        })?;
        return Ok((apply_resolution(&expression, user), true));
    }

    let datasource = workspace
        .root_nodes
        .iter()
        .find(|r| r.label.starts_with("DATASOURCE"))
        .or_else(|| workspace.root_nodes.first())
        .ok_or_else(|| CmsError::WorkspaceNotFound {
            slug: workspace.slug.clone(),
        })?;
    Ok((datasource.path.trim_end_matches('/').to_string(), false))
}

static RESOLUTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Path\s*=\s*(.*?)\s*;").expect("resolution pattern is valid"));

/// Extracts the expression body from `Path = <expr> ;`, tolerating leading
/// comment lines.
fn parse_resolution(resolution: &str) -> Option<String> {
    RESOLUTION_PATTERN
        .captures(resolution)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Substitutes datasource and user variables into a resolution expression,
/// e.g. `DataSources.personal + "/" + User.Name` -> `personal/alice`.
fn apply_resolution(expression: &str, user: &UserRecord) -> String {
    expression
        .replace(' ', "")
        .replace("DataSources.", "")
        .replace("+\"/\"+", "/")
        .replace("User.Name", &user.login)
        .replace("User.Group", &user.group_path)
}

/// Metadata values arrive JSON-quoted (`"\"value\""`); this unwraps one
/// layer of quoting and leaves unquoted values untouched.
pub fn unquote_meta(value: &str) -> String {
    serde_json::from_str::<String>(value).unwrap_or_else(|_| value.to_string())
}

fn split_first_segment(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((head, tail)) => (head, tail),
        None => (trimmed, ""),
    }
}

fn join_segments(root: &str, tail: &str) -> String {
    if tail.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{tail}")
    }
}

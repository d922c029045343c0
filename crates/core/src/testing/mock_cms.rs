//! In-memory CMS for tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cms::{CmsApi, CmsError, Node, NodeCollection, UserClient, UserRecord};

/// A recorded tag write.
#[derive(Debug, Clone, PartialEq)]
pub struct TagUpdate {
    pub node_uuid: String,
    pub namespace: String,
    pub content: String,
}

#[derive(Default)]
struct CmsState {
    user: UserRecord,
    /// Node collections by (resolved) path.
    collections: HashMap<String, NodeCollection>,
    /// Download sources by logical path.
    payloads: HashMap<String, PathBuf>,
    /// Paths that stat successfully.
    stats: HashSet<String>,
    tags: Vec<TagUpdate>,
    uploads: Vec<(PathBuf, String)>,
    fail_upload_stat: bool,
}

/// Controllable in-memory CMS.
///
/// Path resolution is the identity function: tests use plain paths for both
/// logical and admin views. Downloads copy a configured local file into the
/// destination; uploads are recorded and (unless configured otherwise)
/// registered so the post-upload stat succeeds.
pub struct MockCms {
    state: Mutex<CmsState>,
}

impl Default for MockCms {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCms {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CmsState {
                user: UserRecord {
                    uuid: "user-uuid".to_string(),
                    login: "admin".to_string(),
                    group_path: "/".to_string(),
                },
                ..CmsState::default()
            }),
        }
    }

    pub fn set_user(&self, user: UserRecord) {
        self.state.lock().unwrap().user = user;
    }

    pub fn set_collection(&self, path: impl Into<String>, collection: NodeCollection) {
        self.state.lock().unwrap().collections.insert(path.into(), collection);
    }

    /// Registers the local file served when `logical` is downloaded.
    pub fn set_payload(&self, logical: impl Into<String>, source: PathBuf) {
        self.state.lock().unwrap().payloads.insert(logical.into(), source);
    }

    pub fn add_stat(&self, path: impl Into<String>) {
        self.state.lock().unwrap().stats.insert(path.into());
    }

    /// Makes the post-upload stat fail, simulating a lost upload.
    pub fn set_fail_upload_stat(&self, fail: bool) {
        self.state.lock().unwrap().fail_upload_stat = fail;
    }

    pub fn tags(&self) -> Vec<TagUpdate> {
        self.state.lock().unwrap().tags.clone()
    }

    /// Tag values written to one namespace, in order.
    pub fn tag_values(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .iter()
            .filter(|t| t.namespace == namespace)
            .map(|t| t.content.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl CmsApi for MockCms {
    async fn new_user_client(&self, username: &str) -> Result<UserClient, CmsError> {
        let mut user = self.state.lock().unwrap().user.clone();
        if user.login.is_empty() {
            user.login = username.to_string();
        }
        Ok(UserClient {
            user,
            token: "test-token".to_string(),
        })
    }

    async fn resolve_path(&self, _user: &UserClient, logical: &str) -> Result<String, CmsError> {
        Ok(logical.to_string())
    }

    async fn unresolve_path(&self, _user: &UserClient, absolute: &str) -> Result<String, CmsError> {
        Ok(absolute.to_string())
    }

    async fn node_collection(&self, path: &str) -> Result<NodeCollection, CmsError> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(path)
            .cloned()
            .ok_or_else(|| CmsError::NotFound {
                path: path.to_string(),
            })
    }

    async fn stat_node(&self, path: &str) -> Result<Node, CmsError> {
        let state = self.state.lock().unwrap();
        if state.stats.contains(path) {
            Ok(Node {
                path: path.to_string(),
                ..Node::default()
            })
        } else {
            Err(CmsError::NotFound {
                path: path.to_string(),
            })
        }
    }

    async fn update_tag(
        &self,
        _user: &UserClient,
        node_uuid: &str,
        namespace: &str,
        content: &str,
    ) -> Result<(), CmsError> {
        self.state.lock().unwrap().tags.push(TagUpdate {
            node_uuid: node_uuid.to_string(),
            namespace: namespace.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn download(
        &self,
        _user: &UserClient,
        logical: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, CmsError> {
        let source = self
            .state
            .lock()
            .unwrap()
            .payloads
            .get(logical)
            .cloned()
            .ok_or_else(|| CmsError::NotFound {
                path: logical.to_string(),
            })?;
        let name = source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("payload"));
        let dest = dest_dir.join(name);
        std::fs::copy(&source, &dest)?;
        Ok(dest)
    }

    async fn upload(
        &self,
        _user: &UserClient,
        local: &Path,
        logical_dest: &str,
    ) -> Result<String, CmsError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let logical = format!("{}/{name}", logical_dest.trim_end_matches('/'));

        let mut state = self.state.lock().unwrap();
        state.uploads.push((local.to_path_buf(), logical.clone()));
        if !state.fail_upload_stat {
            state.stats.insert(logical.clone());
        }
        Ok(logical)
    }
}

//! REST implementation of the CMS adapter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::cec::CecTransfer;
use super::{
    resolve_with_workspaces, unquote_meta, unresolve_with_workspaces, CmsApi, CmsError, Node,
    NodeCollection, Resolved, RootNode, UserClient, UserRecord, Workspace,
};

/// Connection settings for [`RestCms`].
#[derive(Debug, Clone)]
pub struct RestCmsOptions {
    /// Base URL of the CMS, e.g. `https://cells.example.org`.
    pub address: String,
    /// Admin personal access token used for impersonation and tree reads.
    pub admin_token: String,
    /// Path to the transfer binary.
    pub cec_path: PathBuf,
    /// Accept self-signed certificates.
    pub allow_insecure_tls: bool,
    /// Lifetime of minted user tokens.
    pub token_ttl: Duration,
    /// Per-request timeout for metadata calls.
    pub http_timeout: Duration,
}

impl RestCmsOptions {
    pub fn new(
        address: impl Into<String>,
        admin_token: impl Into<String>,
        cec_path: PathBuf,
    ) -> Self {
        Self {
            address: address.into(),
            admin_token: admin_token.into(),
            cec_path,
            allow_insecure_tls: false,
            token_ttl: Duration::from_secs(60 * 60),
            http_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Deserialize)]
struct WireRootNode {
    #[serde(rename = "Path", default)]
    path: String,
    #[serde(rename = "MetaStore", default)]
    meta_store: HashMap<String, String>,
}

#[derive(Deserialize)]
struct WireWorkspace {
    #[serde(rename = "Slug", default)]
    slug: String,
    #[serde(rename = "RootNodes", default)]
    root_nodes: HashMap<String, WireRootNode>,
}

#[derive(Deserialize)]
struct WorkspacesResponse {
    #[serde(rename = "Workspaces", default)]
    workspaces: Vec<WireWorkspace>,
}

/// Converts the workspace search payload into the cached collection.
/// Root nodes are sorted by label so the resolution lookup is stable across
/// restarts; resolution templates arrive JSON-quoted and are unwrapped.
fn workspaces_from_wire(response: WorkspacesResponse) -> Vec<Workspace> {
    response
        .workspaces
        .into_iter()
        .map(|ws| {
            let mut root_nodes: Vec<RootNode> = ws
                .root_nodes
                .into_iter()
                .map(|(label, node)| RootNode {
                    label,
                    path: node.path,
                    resolution: node
                        .meta_store
                        .get("resolution")
                        .map(|r| unquote_meta(r))
                        .unwrap_or_default(),
                })
                .collect();
            root_nodes.sort_by(|a, b| a.label.cmp(&b.label));
            Workspace {
                slug: ws.slug,
                root_nodes,
            }
        })
        .collect()
}

/// Production CMS adapter speaking the REST API.
pub struct RestCms {
    http: reqwest::Client,
    address: String,
    admin_token: String,
    token_ttl: Duration,
    cec: CecTransfer,
    /// Workspace collection, fetched once and read-only afterwards.
    workspaces: Vec<Workspace>,
}

impl RestCms {
    /// Connects to the CMS and caches the workspace collection.
    pub async fn connect(options: RestCmsOptions) -> Result<Self, CmsError> {
        let http = reqwest::Client::builder()
            .timeout(options.http_timeout)
            .danger_accept_invalid_certs(options.allow_insecure_tls)
            .build()?;

        let address = options.address.trim_end_matches('/').to_string();
        let mut cms = Self {
            http,
            cec: CecTransfer::new(options.cec_path, address.clone()),
            address,
            admin_token: options.admin_token,
            token_ttl: options.token_ttl,
            workspaces: Vec::new(),
        };
        cms.workspaces = cms.fetch_workspaces().await?;
        info!(count = cms.workspaces.len(), "cached CMS workspace collection");
        Ok(cms)
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<T, CmsError> {
        let url = format!("{}{endpoint}", self.address);
        debug!(%url, "CMS request");
        let response = self
            .http
            .request(method, &url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CmsError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_workspaces(&self) -> Result<Vec<Workspace>, CmsError> {
        let body = json!({ "Queries": [ { "scope": "ADMIN" } ] });
        let response: WorkspacesResponse = self
            .request(reqwest::Method::POST, "/a/workspace", &self.admin_token, &body)
            .await?;
        Ok(workspaces_from_wire(response))
    }

    async fn impersonate(&self, username: &str) -> Result<String, CmsError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            #[serde(rename = "AccessToken", default)]
            access_token: String,
        }

        let expires_at = Utc::now().timestamp() + self.token_ttl.as_secs() as i64;
        let body = json!({
            "Label": "Preservation Token",
            "UserLogin": username,
            "ExpiresAt": expires_at,
        });
        let response: TokenResponse = self
            .request(
                reqwest::Method::POST,
                "/a/auth/token/impersonate",
                &self.admin_token,
                &body,
            )
            .await?;
        Ok(response.access_token)
    }

    async fn user_record(&self, username: &str) -> Result<UserRecord, CmsError> {
        #[derive(Deserialize)]
        struct UsersResponse {
            #[serde(rename = "Users", default)]
            users: Vec<UserRecord>,
        }

        let body = json!({ "Limit": 1, "Queries": [ { "Login": username } ] });
        let response: UsersResponse = self
            .request(reqwest::Method::POST, "/a/user", &self.admin_token, &body)
            .await?;
        response
            .users
            .into_iter()
            .find(|u| !u.login.is_empty())
            .ok_or_else(|| CmsError::UserNotFound {
                login: username.to_string(),
            })
    }
}

#[async_trait]
impl CmsApi for RestCms {
    async fn new_user_client(&self, username: &str) -> Result<UserClient, CmsError> {
        let token = self.impersonate(username).await?;
        let user = self.user_record(username).await?;
        Ok(UserClient { user, token })
    }

    async fn resolve_path(&self, user: &UserClient, logical: &str) -> Result<String, CmsError> {
        let resolved = resolve_with_workspaces(&self.workspaces, &user.user, logical)?;
        if let Resolved::Datasource(path) = &resolved {
            // A datasource rewrite is a guess; confirm the node exists.
            self.stat_node(path).await.map_err(|_| CmsError::NotFound {
                path: path.clone(),
            })?;
        }
        Ok(resolved.path().to_string())
    }

    async fn unresolve_path(&self, user: &UserClient, absolute: &str) -> Result<String, CmsError> {
        Ok(unresolve_with_workspaces(&self.workspaces, &user.user, absolute))
    }

    async fn node_collection(&self, path: &str) -> Result<NodeCollection, CmsError> {
        let body = json!({ "Node": { "Path": path }, "Recursive": true });
        let collection: NodeCollection = self
            .request(reqwest::Method::POST, "/a/tree/admin/list", &self.admin_token, &body)
            .await?;
        if collection.parent.path.is_empty() {
            return Err(CmsError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(collection)
    }

    async fn stat_node(&self, path: &str) -> Result<Node, CmsError> {
        #[derive(Deserialize)]
        struct StatResponse {
            #[serde(rename = "Node")]
            node: Option<Node>,
        }

        let body = json!({ "Node": { "Path": path } });
        let response: Result<StatResponse, CmsError> = self
            .request(reqwest::Method::POST, "/a/tree/admin/stat", &self.admin_token, &body)
            .await;

        match response {
            Ok(StatResponse { node: Some(node) }) if !node.path.is_empty() => Ok(node),
            Ok(_) => Err(CmsError::NotFound {
                path: path.to_string(),
            }),
            Err(CmsError::Api { status: 404, .. }) => Err(CmsError::NotFound {
                path: path.to_string(),
            }),
            Err(err) => Err(err),
        }
    }

    async fn update_tag(
        &self,
        user: &UserClient,
        node_uuid: &str,
        namespace: &str,
        content: &str,
    ) -> Result<(), CmsError> {
        let body = json!({
            "MetaDatas": [ {
                "NodeUuid": node_uuid,
                "Namespace": namespace,
                "JsonValue": serde_json::Value::String(content.to_string()).to_string(),
            } ],
            "Operation": "PUT",
        });
        let _: serde_json::Value = self
            .request(reqwest::Method::PUT, "/a/user-meta/update", &user.token, &body)
            .await?;
        Ok(())
    }

    async fn download(
        &self,
        user: &UserClient,
        logical: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, CmsError> {
        self.cec.download(user, logical, dest_dir).await
    }

    async fn upload(
        &self,
        user: &UserClient,
        local: &Path,
        logical_dest: &str,
    ) -> Result<String, CmsError> {
        self.cec.upload(user, local, logical_dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_wire_conversion_unquotes_and_sorts() {
        let raw = r#"{
            "Workspaces": [
                {
                    "Slug": "personal-files",
                    "RootNodes": {
                        "b-template": {
                            "MetaStore": {
                                "resolution": "\"Path = DataSources.personal + \\\"/\\\" + User.Name;\""
                            }
                        },
                        "DATASOURCE_personal": { "Path": "personal/" }
                    }
                },
                { "Slug": "common-files", "RootNodes": {} }
            ]
        }"#;
        let response: WorkspacesResponse = serde_json::from_str(raw).unwrap();
        let workspaces = workspaces_from_wire(response);

        assert_eq!(workspaces.len(), 2);
        assert_eq!(workspaces[0].slug, "personal-files");
        assert_eq!(workspaces[0].root_nodes[0].label, "DATASOURCE_personal");
        assert_eq!(workspaces[0].root_nodes[0].path, "personal/");
        assert_eq!(
            workspaces[0].root_nodes[1].resolution,
            "Path = DataSources.personal + \"/\" + User.Name;"
        );
        assert!(workspaces[1].root_nodes.is_empty());
    }

    #[test]
    fn node_collection_wire_shape() {
        let raw = r#"{
            "Parent": {
                "Uuid": "p1",
                "Path": "personal/admin/pkg",
                "MetaStore": { "usermeta-preservation-status": "\"🔒 Preserved\"" }
            },
            "Children": [ { "Uuid": "c1", "Path": "personal/admin/pkg/a.txt" } ]
        }"#;
        let collection: NodeCollection = serde_json::from_str(raw).unwrap();
        assert_eq!(collection.parent.uuid, "p1");
        assert_eq!(collection.children.len(), 1);
        assert_eq!(collection.children[0].path, "personal/admin/pkg/a.txt");
    }
}

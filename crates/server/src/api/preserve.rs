//! The preservation request handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use preserva_core::{AtomConfig, NodeRef, PreservationConfig, ServiceArgs};

use crate::state::AppState;

/// Body of `POST /preserve`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreserveBody {
    pub username: String,
    pub paths: Vec<String>,
    pub nodes: Vec<NodeRef>,
    /// Omitted means the server default.
    pub cleanup: Option<bool>,
    #[serde(rename = "preservationCfg")]
    pub preservation_cfg: Option<PreservationConfig>,
    #[serde(rename = "atomCfg")]
    pub atom_cfg: Option<AtomConfig>,
    #[serde(rename = "allowInsecureTLS")]
    pub allow_insecure_tls: bool,
}

/// Removes the request fingerprint from the in-flight set on every exit
/// path, including panics unwinding through the handler.
struct ActiveGuard {
    state: Arc<AppState>,
    fingerprint: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.state.finish(&self.fingerprint);
    }
}

pub async fn preserve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreserveBody>,
) -> Response {
    debug!(username = body.username, paths = ?body.paths, nodes = body.nodes.len(), "received preserve request");

    if body.username.is_empty() {
        error!("received request with no username");
        return (StatusCode::BAD_REQUEST, "no username provided").into_response();
    }

    let mut paths = body.paths.clone();
    let mut paths_resolved = false;
    if paths.is_empty() {
        if body.nodes.is_empty() {
            error!("received request with no paths or nodes");
            return (StatusCode::BAD_REQUEST, "no paths or nodes provided").into_response();
        }
        // Paths coming from CMS nodes are already resolved, e.g.
        // `personal/user/file` rather than `personal-files/file`.
        paths = body.nodes.iter().map(|n| n.path.clone()).collect();
        paths_resolved = true;
    }

    let args = ServiceArgs {
        username: body.username,
        paths,
        nodes: body.nodes,
        cleanup: body.cleanup.unwrap_or(state.default_cleanup),
        allow_insecure_tls: body.allow_insecure_tls,
        paths_resolved,
        preservation: body
            .preservation_cfg
            .unwrap_or_default()
            .merge_with_defaults(),
        atom: body
            .atom_cfg
            .unwrap_or_default()
            .overlay(&state.default_atom),
    };

    let fingerprint = args.fingerprint();
    if !state.try_begin(&fingerprint) {
        return (
            StatusCode::CONFLICT,
            "identical request already being processed",
        )
            .into_response();
    }
    let _active = ActiveGuard {
        state: Arc::clone(&state),
        fingerprint: fingerprint.clone(),
    };

    debug!(fingerprint, "processing request");

    // Dropping the handler (client gone, panic) cancels the pipeline.
    let token = CancellationToken::new();
    let _cancel = token.clone().drop_guard();

    match state.runner.run_args(token, args).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!(%err, "preserve error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

use std::sync::Arc;

use axum::{routing::post, Router};
use tower_http::catch_panic::CatchPanicLayer;

use super::preserve;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/preserve", post(preserve::preserve))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

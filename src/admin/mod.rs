pub mod handlers;
pub mod auth;

use std::sync::Arc;
use axum::{
    routing::{get, post},
    Router,
    middleware,
};
use crate::routing::Reloader;
use self::handlers::*;
use self::auth::admin_auth_middleware;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub reloader: Arc<Reloader>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/table", get(get_table))
        .route("/admin/reload", post(post_reload))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

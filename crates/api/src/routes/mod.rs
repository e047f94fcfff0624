//! API routes

pub mod admin;
pub mod auth;
pub mod health;
pub mod oauth;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    security::{enforce_rate_limit, security_headers_middleware},
    state::AppState,
};

/// Request bodies here are small JSON documents
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (not rate limited, polled by infrastructure)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Credential-accepting routes share the strict auth policy
    let auth_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/:provider/init", get(oauth::init))
        .route("/auth/:provider/callback", post(oauth::callback))
        .route_layer(middleware::from_fn_with_state(
            state.auth_rate_limit(),
            enforce_rate_limit,
        ));

    let general_routes = Router::new()
        .route("/auth/status/:user_id", get(auth::status))
        .route("/auth/me", get(auth::me))
        .route("/admin/approve/:user_id", post(admin::approve))
        .route("/admin/set-admin/:user_id", post(admin::set_admin))
        .route_layer(middleware::from_fn_with_state(
            state.general_rate_limit(),
            enforce_rate_limit,
        ));

    Router::new()
        .merge(health_routes)
        .merge(auth_routes)
        .merge(general_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

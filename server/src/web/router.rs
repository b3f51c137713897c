use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::{Any, CorsLayer};

use super::app_state::AppState;
use super::rest_api;

/// Build the axum router: the public stats endpoint plus the
/// secret-protected ingress and admin routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Stats are read by a public website, so any origin may fetch them.
    let public_routes = Router::new()
        .route("/api/stats", get(rest_api::get_stats))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let protected_routes = Router::new()
        .route("/api/events", post(rest_api::post_event))
        .route(
            "/api/networks",
            get(rest_api::list_networks).post(rest_api::create_network),
        )
        .route("/api/networks/link", post(rest_api::link_channel))
        .route("/api/channels/{id}", delete(rest_api::unlink_channel))
        .route(
            "/api/channels/{id}/permissions",
            get(rest_api::channel_permissions),
        )
        .route("/api/deny-list", get(rest_api::list_denied))
        .route(
            "/api/deny-list/{user_id}",
            put(rest_api::deny_user).delete(rest_api::allow_user),
        );

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

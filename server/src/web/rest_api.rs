use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::engine::events::PlatformEvent;
use crate::engine::registry::LinkRequest;
use crate::error::RelayResult;

use super::app_state::AppState;
use super::auth_middleware::RelaySecret;

#[derive(Deserialize)]
pub struct NetworkQuery {
    pub guild_id: Option<String>,
}

#[derive(Serialize)]
pub struct UnlinkResponse {
    pub channel_id: String,
    pub network: String,
}

#[derive(Serialize)]
pub struct DenyListChange {
    pub user_id: String,
    /// False when the list already had (or lacked) the user.
    pub changed: bool,
}

// ── Public ──────────────────────────────────────────────────────────

pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.stats().await)
}

// ── Gateway ingress ─────────────────────────────────────────────────

pub async fn post_event(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Json(event): Json<PlatformEvent>,
) -> impl IntoResponse {
    Json(state.engine.handle_event(event).await)
}

// ── Networks ────────────────────────────────────────────────────────

pub async fn list_networks(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Query(query): Query<NetworkQuery>,
) -> impl IntoResponse {
    Json(state.engine.search_networks(query.guild_id.as_deref()))
}

pub async fn create_network(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Json(body): Json<LinkRequest>,
) -> RelayResult<impl IntoResponse> {
    let membership = state.engine.create_network(body).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

pub async fn link_channel(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Json(body): Json<LinkRequest>,
) -> RelayResult<impl IntoResponse> {
    let membership = state.engine.link_channel(body).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

// ── Channels ────────────────────────────────────────────────────────

pub async fn unlink_channel(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Path(channel_id): Path<String>,
) -> RelayResult<impl IntoResponse> {
    let network = state.engine.unlink_channel(&channel_id)?;
    Ok(Json(UnlinkResponse {
        channel_id,
        network,
    }))
}

pub async fn channel_permissions(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Path(channel_id): Path<String>,
) -> RelayResult<impl IntoResponse> {
    Ok(Json(state.engine.check_permissions(&channel_id).await?))
}

// ── Deny list ───────────────────────────────────────────────────────

pub async fn list_denied(State(state): State<Arc<AppState>>, _auth: RelaySecret) -> impl IntoResponse {
    Json(state.engine.deny_list().snapshot())
}

pub async fn deny_user(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let changed = state.engine.deny_user(&user_id);
    Json(DenyListChange { user_id, changed })
}

pub async fn allow_user(
    State(state): State<Arc<AppState>>,
    _auth: RelaySecret,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let changed = state.engine.allow_user(&user_id);
    Json(DenyListChange { user_id, changed })
}

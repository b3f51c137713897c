use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::warn;

use crate::error::RelayError;

use super::app_state::AppState;

pub const SECRET_HEADER: &str = "x-relay-secret";

/// Extractor that checks the `x-relay-secret` header against the configured
/// inbound secret. Use this in any handler that changes relay state.
pub struct RelaySecret;

impl FromRequestParts<Arc<AppState>> for RelaySecret {
    type Rejection = RelayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.inbound_secret else {
            return Ok(RelaySecret);
        };

        let provided = parts
            .headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided.is_some_and(|p| constant_time_eq(p.as_bytes(), expected.as_bytes())) {
            Ok(RelaySecret)
        } else {
            warn!(path = %parts.uri.path(), "rejected request with bad relay secret");
            Err(RelayError::Unauthorized)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

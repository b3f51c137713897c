use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::platform::PlatformError;
use crate::store::DocumentError;

pub type RelayResult<T> = Result<T, RelayError>;

/// Refusals and failures surfaced by the relay core.
///
/// Membership and permission variants are structured refusals returned to the
/// admin or user who asked for the operation. Per-target delivery problems never
/// show up here; they are folded into a `DeliveryReport` instead.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("channel is already linked to network `{network}`")]
    AlreadyLinked { network: String },

    #[error("channel is not linked to any network")]
    NotLinked,

    #[error("network `{network}` does not exist")]
    NetworkNotFound { network: String },

    #[error("network `{network}` already exists")]
    NetworkExists { network: String },

    #[error("this server already has a channel in network `{network}`; one server may join one network")]
    ServerAlreadyNetworked { network: String },

    #[error("this server already has a channel in network `{network}`")]
    ServerAlreadyInNetwork { network: String },

    #[error("network name cannot be empty or consist only of mentions")]
    InvalidNetworkName,

    #[error("missing permissions in channel {channel_id}: {}", missing.join(", "))]
    PermissionDenied {
        channel_id: String,
        missing: Vec<String>,
    },

    #[error("file {filename} is too large ({size} bytes, limit {limit})")]
    PayloadTooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    #[error("channel {channel_id} is unreachable")]
    UnreachableTarget { channel_id: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] DocumentError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("missing or invalid relay secret")]
    Unauthorized,
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::AlreadyLinked { .. }
            | RelayError::NetworkExists { .. }
            | RelayError::ServerAlreadyNetworked { .. }
            | RelayError::ServerAlreadyInNetwork { .. } => StatusCode::CONFLICT,
            RelayError::NotLinked | RelayError::NetworkNotFound { .. } => StatusCode::NOT_FOUND,
            RelayError::InvalidNetworkName => StatusCode::BAD_REQUEST,
            RelayError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UnreachableTarget { .. } | RelayError::Platform(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_conflicts_map_to_409() {
        let err = RelayError::NetworkExists {
            network: "RelayEN".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "network `RelayEN` already exists");
    }

    #[test]
    fn test_permission_denied_lists_missing() {
        let err = RelayError::PermissionDenied {
            channel_id: "42".into(),
            missing: vec!["Send Messages".into(), "Attach Files".into()],
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("Send Messages, Attach Files"));
    }

    #[test]
    fn test_platform_errors_are_bad_gateway() {
        let err = RelayError::from(PlatformError::Timeout);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
}

//! The chat platform, seen from the relay's side.
//!
//! The relay never talks to a chat network directly. Everything it needs
//! (sending, deleting, webhooks, permission lookups) goes through [`Platform`],
//! which the binary backs with [`http::HttpPlatform`] and tests back with
//! [`testing::RecordingPlatform`].

pub mod http;
#[cfg(test)]
pub mod testing;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::events::Attachment;
use crate::engine::permissions::{PermissionCheck, Permissions};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("not found")]
    NotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// A per-channel delivery handle that posts under an arbitrary name and avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundIdentity {
    pub id: String,
    pub token: String,
    pub channel_id: String,
}

/// File contents ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Aggregate platform counts for the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildStats {
    pub guilds: u64,
    pub users: u64,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Post a message as the bot itself.
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        file: Option<&OutboundFile>,
    ) -> Result<(), PlatformError>;

    /// Post a message through an outbound identity, showing `display_name` and `avatar_url`.
    async fn send_as_identity(
        &self,
        identity: &OutboundIdentity,
        text: &str,
        display_name: &str,
        avatar_url: Option<&str>,
        file: Option<&OutboundFile>,
    ) -> Result<(), PlatformError>;

    /// Find an identity in `channel_id` previously created by the bot.
    async fn find_outbound_identity(
        &self,
        channel_id: &str,
    ) -> Result<Option<OutboundIdentity>, PlatformError>;

    async fn create_outbound_identity(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<OutboundIdentity, PlatformError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str)
    -> Result<(), PlatformError>;

    /// Send a direct message to a user.
    async fn send_direct(&self, user_id: &str, text: &str) -> Result<(), PlatformError>;

    /// Check the bot's permissions in `channel_id` against `required`.
    async fn check_permissions(
        &self,
        channel_id: &str,
        required: Permissions,
    ) -> Result<PermissionCheck, PlatformError>;

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PlatformError>;

    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError>;

    /// The channel in `guild_id` where admin-facing notices should go, if any.
    async fn admin_channel(&self, guild_id: &str) -> Result<Option<String>, PlatformError>;

    async fn guild_stats(&self) -> Result<GuildStats, PlatformError>;
}

/// Bound a platform call by `limit`. Elapsed calls surface as [`PlatformError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, PlatformError>
where
    F: Future<Output = Result<T, PlatformError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PlatformError::Timeout),
    }
}

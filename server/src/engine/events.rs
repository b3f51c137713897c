use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub size: u64,
    pub filename: String,
}

/// A message as delivered by the platform gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub author_id: String,
    /// Account name (used in reports).
    pub author_name: String,
    /// Per-server display name (used when relaying).
    pub author_display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_avatar_url: Option<String>,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub author_role_ids: Vec<String>,
    pub channel_id: String,
    pub channel_name: String,
    pub guild_id: String,
    pub guild_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Set when the message carries rich embedded content (gif previews, link cards).
    #[serde(default)]
    pub has_rich_embed: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn has_rich_content(&self) -> bool {
        !self.attachments.is_empty() || self.has_rich_embed
    }
}

/// Events the platform gateway pushes into the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// A message was posted in a channel the bot can see.
    MessageCreate(InboundMessage),

    /// The bot was removed from a server (or the server was deleted).
    GuildRemove { guild_id: String, guild_name: String },

    /// A member joined a server.
    MemberJoin {
        guild_id: String,
        user_id: String,
        user_name: String,
    },

    /// A member left a server.
    MemberLeave {
        guild_id: String,
        user_id: String,
        user_name: String,
    },
}

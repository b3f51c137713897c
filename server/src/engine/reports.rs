//! Texts posted to the moderation and antispam log channels.
//!
//! Reports are plain values built straight from an [`InboundMessage`] or from
//! the relevant fields when there is no single message to point at (a mute
//! covers several messages).

use chrono::{DateTime, Utc};

use super::events::InboundMessage;
use super::sanitizer::truncate;

const REPORT_CONTENT_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    DenyListed,
    MassMention,
    InviteLink,
    LinksRemoved { count: usize },
    Spam { mute_secs: u64 },
}

impl ViolationKind {
    pub fn label(&self) -> String {
        match self {
            ViolationKind::DenyListed => "Message from a deny-listed user".to_string(),
            ViolationKind::MassMention => "Mass mention (@everyone/@here)".to_string(),
            ViolationKind::InviteLink => "Server invite link".to_string(),
            ViolationKind::LinksRemoved { count } => {
                format!("Links posted in a networked channel ({count} removed)")
            }
            ViolationKind::Spam { mute_secs } => {
                format!("Spam in a networked channel (muted for {mute_secs} s)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationReport {
    pub kind: ViolationKind,
    pub author_id: String,
    pub author_name: String,
    pub guild_id: String,
    pub guild_name: String,
    pub channel_id: String,
    pub channel_name: String,
    pub message_id: Option<String>,
    pub content: Option<String>,
    /// False when the offending message could not be deleted.
    pub message_removed: bool,
    pub at: DateTime<Utc>,
}

impl ViolationReport {
    pub fn for_message(kind: ViolationKind, msg: &InboundMessage) -> Self {
        Self {
            kind,
            author_id: msg.author_id.clone(),
            author_name: msg.author_name.clone(),
            guild_id: msg.guild_id.clone(),
            guild_name: msg.guild_name.clone(),
            channel_id: msg.channel_id.clone(),
            channel_name: msg.channel_name.clone(),
            message_id: Some(msg.message_id.clone()),
            content: Some(msg.content.clone()),
            message_removed: false,
            at: Utc::now(),
        }
    }

    /// Report for a mute, which is about the user rather than one message.
    pub fn for_mute(msg: &InboundMessage, mute_secs: u64, limit_description: String) -> Self {
        Self {
            message_id: None,
            content: Some(limit_description),
            ..Self::for_message(ViolationKind::Spam { mute_secs }, msg)
        }
    }

    pub fn removed(mut self, removed: bool) -> Self {
        self.message_removed = removed;
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "🚨 **Violation detected**\n\
             **Type:** {}\n\
             **User:** <@{}> ({}) ID: {}\n\
             **Server:** {} ID: {}\n\
             **Channel:** #{} ID: {}",
            self.kind.label(),
            self.author_id,
            self.author_name,
            self.author_id,
            self.guild_name,
            self.guild_id,
            self.channel_name,
            self.channel_id,
        );

        if let Some(content) = self.content.as_deref().filter(|c| !c.is_empty()) {
            out.push_str("\n**Original message:** ");
            out.push_str(&truncate(content, REPORT_CONTENT_LIMIT + 3));
        }

        match (&self.message_id, self.message_removed) {
            (Some(id), false) => out.push_str(&format!("\n**Message:** {id} (still present)")),
            (Some(_), true) => out.push_str("\n**Message:** deleted"),
            (None, _) => {}
        }

        out.push_str(&format!("\n{}", self.at.format("%Y-%m-%d %H:%M:%S UTC")));
        out
    }
}

/// Antispam log-channel notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntispamNotice {
    Warning,
    Mute,
}

/// Limit as shown to users and moderators.
pub fn describe_limit(max_messages: usize, window_secs: u64) -> String {
    format!("{max_messages} messages per {window_secs} seconds")
}

impl AntispamNotice {
    pub fn render(
        self,
        msg: &InboundMessage,
        max_messages: usize,
        window_secs: u64,
        mute_secs: u64,
    ) -> String {
        let head = match self {
            AntispamNotice::Warning => "⚠️ **Spam warning**",
            AntispamNotice::Mute => "🔇 **User muted for spam**",
        };
        let mut out = format!(
            "{head}\n\
             **User:** <@{}> (`{}`)\n\
             **Server:** {} (`{}`)\n\
             **Channel:** <#{}> (`{}`)",
            msg.author_id,
            msg.author_id,
            msg.guild_name,
            msg.guild_id,
            msg.channel_id,
            msg.channel_id,
        );
        match self {
            AntispamNotice::Warning => out.push_str(&format!(
                "\n**Status:** reached the limit of {}",
                describe_limit(max_messages, window_secs)
            )),
            AntispamNotice::Mute => out.push_str(&format!(
                "\n**Mute:** {mute_secs} seconds\n**Limit:** {}",
                describe_limit(max_messages, window_secs)
            )),
        }
        out
    }
}

/// DM sent to a user whose message was dropped by the rate limiter.
pub fn mute_direct_message(
    msg: &InboundMessage,
    max_messages: usize,
    window_secs: u64,
    mute_secs: u64,
) -> String {
    format!(
        "⚠️ You are sending messages too fast!\n\
         You are muted for **{mute_secs} seconds**.\n\
         Limit: **{}**.\n\
         Server: {} • Channel: #{}",
        describe_limit(max_messages, window_secs),
        msg.guild_name,
        msg.channel_name,
    )
}

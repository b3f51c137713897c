use serde::Serialize;

use super::reports::ViolationKind;

/// What a raid-pattern message was caught for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidViolation {
    MassMention,
    InviteLink,
}

impl RaidViolation {
    pub fn kind(self) -> ViolationKind {
        match self {
            RaidViolation::MassMention => ViolationKind::MassMention,
            RaidViolation::InviteLink => ViolationKind::InviteLink,
        }
    }

    /// Direct-message text sent to the author after removal.
    pub fn author_notice(self, guild_name: &str, channel_name: &str) -> String {
        let reason = match self {
            RaidViolation::MassMention => "using mass mentions (@everyone/@here)",
            RaidViolation::InviteLink => "posting a server invite link",
        };
        format!(
            "⚠️ Your message was removed for {reason}.\nServer: {guild_name} • Channel: #{channel_name}"
        )
    }
}

/// Substring matcher for mass mentions and invite links.
#[derive(Debug, Clone)]
pub struct RaidGuard {
    mention_tokens: Vec<String>,
    invite_patterns: Vec<String>,
}

impl RaidGuard {
    /// Empty token lists disable the corresponding check.
    pub fn new(mention_tokens: Vec<String>, invite_patterns: Vec<String>) -> Self {
        Self {
            mention_tokens: mention_tokens.into_iter().map(|t| t.to_lowercase()).collect(),
            invite_patterns: invite_patterns
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Mass mentions are checked first; a message with both is reported once,
    /// as a mass mention.
    pub fn classify(&self, content: &str) -> Option<RaidViolation> {
        let content = content.to_lowercase();
        if self.mention_tokens.iter().any(|t| content.contains(t.as_str())) {
            return Some(RaidViolation::MassMention);
        }
        if self.invite_patterns.iter().any(|p| content.contains(p.as_str())) {
            return Some(RaidViolation::InviteLink);
        }
        None
    }
}

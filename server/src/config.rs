use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

/// Top-level relay configuration, loaded from relay.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSection,
    pub platform: PlatformSection,
    pub storage: StorageSection,
    pub relay: RelaySection,
    pub antispam: AntispamSection,
    pub raid: RaidSection,
    pub deny_list: DenyListSection,
    pub levels: LevelsSection,
    pub moderation: ModerationSection,
    pub notifications: NotificationsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    pub log_level: String,
    /// Shared secret expected in `x-relay-secret` on ingress and admin routes.
    /// May only be left unset when `web_address` is a loopback address.
    pub inbound_secret: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:25758".into(),
            log_level: "info".into(),
            inbound_secret: None,
        }
    }
}

impl ServerSection {
    /// The configured secret, ignoring a blank value.
    pub fn inbound_secret(&self) -> Option<&str> {
        self.inbound_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
    }
}

/// True when `address` only accepts local connections.
fn binds_loopback(address: &str) -> bool {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return addr.ip().is_loopback();
    }
    address
        .rsplit_once(':')
        .is_some_and(|(host, _)| host.eq_ignore_ascii_case("localhost"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub base_url: String,
    pub token: String,
    pub request_timeout_secs: u64,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:25759".into(),
            token: String::new(),
            request_timeout_secs: 10,
        }
    }
}

impl PlatformSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub channels_file: String,
    pub deny_list_file: String,
    pub levels_file: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            channels_file: "channels_config.json".into(),
            deny_list_file: "blacklist.json".into(),
            levels_file: "levels.json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub max_file_size: u64,
    pub max_message_length: usize,
    /// Name given to the outbound identities the bot creates.
    pub identity_name: String,
    pub log_messages: bool,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            max_file_size: 8 * 1024 * 1024,
            max_message_length: 2000,
            identity_name: "Channel Bridge".into(),
            log_messages: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AntispamSection {
    pub enabled: bool,
    pub max_messages: usize,
    pub window_secs: u64,
    pub mute_secs: u64,
    pub log_channel_id: Option<String>,
    pub sweep_interval_secs: u64,
}

impl Default for AntispamSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: 5,
            window_secs: 10,
            mute_secs: 60,
            log_channel_id: None,
            sweep_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RaidSection {
    pub enabled: bool,
    pub block_mass_mentions: bool,
    pub block_invites: bool,
    pub invite_patterns: Vec<String>,
    pub mention_tokens: Vec<String>,
}

impl Default for RaidSection {
    fn default() -> Self {
        Self {
            enabled: true,
            block_mass_mentions: true,
            block_invites: true,
            invite_patterns: vec![
                "discord.gg/".into(),
                "discordapp.com/invite/".into(),
                "discord.com/invite/".into(),
            ],
            mention_tokens: vec!["@everyone".into(), "@here".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DenyListSection {
    pub enabled: bool,
    pub moderator_role_id: Option<String>,
    pub ban_channel_id: Option<String>,
    pub unban_channel_id: Option<String>,
}

impl Default for DenyListSection {
    fn default() -> Self {
        Self {
            enabled: true,
            moderator_role_id: None,
            ban_channel_id: None,
            unban_channel_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelsSection {
    pub enabled: bool,
    pub xp_min: u64,
    pub xp_max: u64,
    pub cooldown_secs: u64,
}

impl Default for LevelsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            xp_min: 5,
            xp_max: 15,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationSection {
    pub report_channel_id: Option<String>,
    /// Servers exempt from the one-channel-per-server network rules.
    pub privileged_servers: Vec<String>,
    pub auto_cleanup_channels: bool,
    pub permission_audit_interval_secs: u64,
}

impl Default for ModerationSection {
    fn default() -> Self {
        Self {
            report_channel_id: None,
            privileged_servers: vec!["1387900625324478506".into()],
            auto_cleanup_channels: true,
            permission_audit_interval_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub connection_enabled: bool,
    pub connection_channel_id: Option<String>,
    pub connection_guild_id: Option<String>,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            connection_enabled: true,
            connection_channel_id: None,
            connection_guild_id: None,
        }
    }
}

impl RelayConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        } else {
            info!(path = %path.display(), "no config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("RELAY_INBOUND_SECRET") {
            self.server.inbound_secret = Some(v);
        }
        if let Ok(v) = std::env::var("PLATFORM_BASE_URL") {
            self.platform.base_url = v;
        }
        if let Ok(v) = std::env::var("PLATFORM_TOKEN") {
            self.platform.token = v;
        }
        if let Ok(v) = std::env::var("PLATFORM_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.platform.request_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("MAX_FILE_SIZE")
            && let Ok(size) = v.parse()
        {
            self.relay.max_file_size = size;
        }
        if let Ok(v) = std::env::var("LOG_MESSAGES") {
            self.relay.log_messages = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ANTISPAM_ENABLED") {
            self.antispam.enabled = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("ANTISPAM_MAX_MESSAGES")
            && let Ok(n) = v.parse()
        {
            self.antispam.max_messages = n;
        }
        if let Ok(v) = std::env::var("ANTISPAM_TIME_WINDOW")
            && let Ok(secs) = v.parse()
        {
            self.antispam.window_secs = secs;
        }
        if let Ok(v) = std::env::var("ANTISPAM_MUTE_DURATION")
            && let Ok(secs) = v.parse()
        {
            self.antispam.mute_secs = secs;
        }
        if let Ok(v) = std::env::var("ANTISPAM_LOG_CHANNEL_ID") {
            self.antispam.log_channel_id = Some(v);
        }
        if let Ok(v) = std::env::var("RAID_PROTECTION_ENABLED") {
            self.raid.enabled = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BLACKLIST_ENABLED") {
            self.deny_list.enabled = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BLACKLIST_MODERATOR_ROLE_ID") {
            self.deny_list.moderator_role_id = Some(v);
        }
        if let Ok(v) = std::env::var("BLACKLIST_BAN_CHANNEL_ID") {
            self.deny_list.ban_channel_id = Some(v);
        }
        if let Ok(v) = std::env::var("BLACKLIST_UNBAN_CHANNEL_ID") {
            self.deny_list.unban_channel_id = Some(v);
        }
        if let Ok(v) = std::env::var("LEVELS_ENABLED") {
            self.levels.enabled = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("REPORT_CHANNEL_ID") {
            self.moderation.report_channel_id = Some(v);
        }
        if let Ok(v) = std::env::var("PRIVILEGED_SERVERS") {
            self.moderation.privileged_servers = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("CONNECTION_NOTIFICATIONS_ENABLED") {
            self.notifications.connection_enabled = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("CONNECTION_NOTIFICATIONS_CHANNEL_ID") {
            self.notifications.connection_channel_id = Some(v);
        }
        if let Ok(v) = std::env::var("CONNECTION_NOTIFICATIONS_GUILD_ID") {
            self.notifications.connection_guild_id = Some(v);
        }
    }

    /// Problems that should stop the relay from starting. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.platform.token.trim().is_empty() {
            problems.push("platform.token is not set (or PLATFORM_TOKEN)".to_string());
        }
        if self.server.inbound_secret().is_none() && !binds_loopback(&self.server.web_address) {
            problems.push(format!(
                "server.inbound_secret is not set (or RELAY_INBOUND_SECRET) but {} is reachable \
                 from other hosts",
                self.server.web_address
            ));
        }
        if self.platform.base_url.trim().is_empty() {
            problems.push("platform.base_url is empty".to_string());
        }
        if self.platform.request_timeout_secs == 0 {
            problems.push("platform.request_timeout_secs must be positive".to_string());
        }
        if self.relay.max_file_size == 0 {
            problems.push("relay.max_file_size must be positive".to_string());
        }
        if self.relay.max_message_length < 4 {
            problems.push("relay.max_message_length must be at least 4".to_string());
        }
        if self.levels.xp_min > self.levels.xp_max {
            problems.push(format!(
                "levels.xp_min ({}) is greater than levels.xp_max ({})",
                self.levels.xp_min, self.levels.xp_max
            ));
        }
        if self.antispam.enabled {
            if self.antispam.max_messages == 0 {
                problems.push("antispam.max_messages must be positive".to_string());
            }
            if self.antispam.window_secs == 0 {
                problems.push("antispam.window_secs must be positive".to_string());
            }
            if self.antispam.mute_secs == 0 {
                problems.push("antispam.mute_secs must be positive".to_string());
            }
        }
        if self.antispam.sweep_interval_secs == 0 {
            problems.push("antispam.sweep_interval_secs must be positive".to_string());
        }
        if self.moderation.permission_audit_interval_secs == 0 {
            problems.push("moderation.permission_audit_interval_secs must be positive".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.server.web_address, "0.0.0.0:25758");
        assert_eq!(config.relay.max_file_size, 8_388_608);
        assert_eq!(config.relay.max_message_length, 2000);
        assert_eq!(config.antispam.max_messages, 5);
        assert_eq!(config.antispam.window_secs, 10);
        assert_eq!(config.antispam.mute_secs, 60);
        assert_eq!(config.levels.xp_min..=config.levels.xp_max, 5..=15);
        assert_eq!(config.moderation.privileged_servers, vec!["1387900625324478506"]);
        assert_eq!(config.storage.deny_list_file, "blacklist.json");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [antispam]
            max_messages = 3

            [platform]
            token = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.antispam.max_messages, 3);
        assert_eq!(config.antispam.window_secs, 10);
        assert_eq!(config.platform.token, "abc");
        assert_eq!(config.platform.request_timeout(), Duration::from_secs(10));
        assert!(config.raid.enabled);
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = RelayConfig::default();
        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("token")));

        config.platform.token = "t".into();
        let problems = config.validate();
        assert_eq!(problems.len(), 1, "{problems:?}");
        assert!(problems[0].contains("inbound_secret"));

        config.server.inbound_secret = Some("  ".into());
        assert_eq!(config.validate().len(), 1, "blank secret counts as unset");

        config.server.web_address = "127.0.0.1:25758".into();
        assert!(config.validate().is_empty(), "loopback may run without a secret");
        config.server.web_address = "localhost:25758".into();
        assert!(config.validate().is_empty());

        config.server.web_address = "0.0.0.0:25758".into();
        config.server.inbound_secret = Some("s3cret".into());
        assert!(config.validate().is_empty());

        config.levels.xp_min = 20;
        config.antispam.max_messages = 0;
        let problems = config.validate();
        assert_eq!(problems.len(), 2, "{problems:?}");
    }

    #[test]
    fn test_disabled_antispam_skips_limit_checks() {
        let mut config = RelayConfig::default();
        config.platform.token = "t".into();
        config.server.inbound_secret = Some("s3cret".into());
        config.antispam.enabled = false;
        config.antispam.max_messages = 0;
        assert!(config.validate().is_empty());
    }
}

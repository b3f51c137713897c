use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::deny_list::DenyListStore;
use super::events::{InboundMessage, PlatformEvent};
use super::gates::{
    AntispamGate, DenyListGate, Gate, GateOutcome, Moderation, PolicyChain, RaidGate, StopReason,
};
use super::levels::LevelStore;
use super::permissions::{self, RELAY_REQUIRED};
use super::raid_guard::RaidGuard;
use super::rate_limiter::RateLimiter;
use super::registry::{ChannelRegistry, LinkRequest, MemberSummary, Membership};
use super::relay::{DeliveryReport, PermissionMonitor, RelayDispatcher, RelaySettings};
use super::sanitizer::{ContentSanitizer, truncate};
use super::validation;
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::platform::{Platform, with_timeout};
use crate::store::JsonDocument;

/// Characters of message content written to the debug log.
const LOGGED_CONTENT_CHARS: usize = 100;

// ── Outcomes ────────────────────────────────────────────────────────

/// What happened to one inbound message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum MessageOutcome {
    IgnoredBot,
    ModerationCommand,
    Stopped(StopReason),
    NotNetworked,
    Relayed(DeliveryReport),
    RelayFailed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "result", rename_all = "snake_case")]
pub enum EventOutcome {
    Message(MessageOutcome),
    /// Channels unlinked because their server went away.
    ServerRemoved(Vec<String>),
    /// Whether a connection notice was posted.
    ConnectionNotice(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    AlreadyJoined,
    Available,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkListing {
    pub name: String,
    pub status: NetworkStatus,
    /// Distinct known servers in the network.
    pub server_count: usize,
    pub channels: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionReport {
    pub channel_id: String,
    pub ok: bool,
    pub granted: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub servers: u64,
    pub users: u64,
    pub networks: usize,
    pub linked_channels: usize,
    pub relayed_messages: u64,
    pub last_updated: DateTime<Utc>,
}

// ── Stores ──────────────────────────────────────────────────────────

/// The three persisted documents the engine works on.
pub struct Stores {
    pub registry: Arc<ChannelRegistry>,
    pub deny_list: Arc<DenyListStore>,
    pub levels: Arc<LevelStore>,
}

impl Stores {
    /// Load every store from the files named in `config.storage`.
    pub fn open(config: &RelayConfig) -> Self {
        let storage = &config.storage;
        Self {
            registry: Arc::new(ChannelRegistry::load(
                JsonDocument::new(Path::new(&storage.channels_file)),
                config.moderation.privileged_servers.clone(),
            )),
            deny_list: Arc::new(DenyListStore::load(JsonDocument::new(Path::new(
                &storage.deny_list_file,
            )))),
            levels: Arc::new(LevelStore::load(
                JsonDocument::new(Path::new(&storage.levels_file)),
                config.levels.xp_min..=config.levels.xp_max,
                Duration::from_secs(config.levels.cooldown_secs),
            )),
        }
    }

    pub fn in_memory(config: &RelayConfig) -> Self {
        Self {
            registry: Arc::new(ChannelRegistry::in_memory(
                config.moderation.privileged_servers.clone(),
            )),
            deny_list: Arc::new(DenyListStore::in_memory()),
            levels: Arc::new(LevelStore::in_memory(
                config.levels.xp_min..=config.levels.xp_max,
                Duration::from_secs(config.levels.cooldown_secs),
            )),
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// The relay core. Every inbound event and admin action goes through here;
/// the HTTP layer and the housekeeping task only hold an `Arc<RelayEngine>`.
pub struct RelayEngine {
    config: RelayConfig,
    platform: Arc<dyn Platform>,
    registry: Arc<ChannelRegistry>,
    deny_list: Arc<DenyListStore>,
    levels: Arc<LevelStore>,
    limiter: Arc<RateLimiter>,
    moderation: Arc<Moderation>,
    permissions: Arc<PermissionMonitor>,
    chain: PolicyChain,
    dispatcher: RelayDispatcher,
    relayed_messages: AtomicU64,
}

impl RelayEngine {
    pub fn new(config: RelayConfig, platform: Arc<dyn Platform>, stores: Stores) -> Self {
        let timeout = config.platform.request_timeout();
        let Stores {
            registry,
            deny_list,
            levels,
        } = stores;

        let limiter = Arc::new(RateLimiter::new(
            config.antispam.max_messages,
            Duration::from_secs(config.antispam.window_secs),
            Duration::from_secs(config.antispam.mute_secs),
        ));
        let moderation = Arc::new(Moderation::new(
            platform.clone(),
            config.moderation.report_channel_id.clone(),
            timeout,
        ));
        let permissions = Arc::new(PermissionMonitor::new(
            platform.clone(),
            timeout,
            Duration::from_secs(config.moderation.permission_audit_interval_secs),
        ));

        let mut gates: Vec<Box<dyn Gate>> = Vec::new();
        if config.deny_list.enabled {
            gates.push(Box::new(DenyListGate::new(
                deny_list.clone(),
                moderation.clone(),
            )));
        }
        if config.raid.enabled {
            let mentions = if config.raid.block_mass_mentions {
                config.raid.mention_tokens.clone()
            } else {
                Vec::new()
            };
            let invites = if config.raid.block_invites {
                config.raid.invite_patterns.clone()
            } else {
                Vec::new()
            };
            gates.push(Box::new(RaidGate::new(
                RaidGuard::new(mentions, invites),
                moderation.clone(),
            )));
        }
        if config.antispam.enabled {
            gates.push(Box::new(AntispamGate::new(
                limiter.clone(),
                registry.clone(),
                moderation.clone(),
                config.antispam.log_channel_id.clone(),
            )));
        }
        let chain = PolicyChain::new(gates);

        let dispatcher = RelayDispatcher::new(
            registry.clone(),
            platform.clone(),
            moderation.clone(),
            permissions.clone(),
            ContentSanitizer::new(config.relay.max_message_length),
            RelaySettings {
                identity_name: config.relay.identity_name.clone(),
                max_file_size: config.relay.max_file_size,
                timeout,
            },
        );

        info!(gates = ?chain.names(), "relay engine ready");
        Self {
            config,
            platform,
            registry,
            deny_list,
            levels,
            limiter,
            moderation,
            permissions,
            chain,
            dispatcher,
            relayed_messages: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn deny_list(&self) -> &DenyListStore {
        &self.deny_list
    }

    pub fn levels(&self) -> &LevelStore {
        &self.levels
    }

    /// Gate names in evaluation order.
    pub fn policy_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    fn timeout(&self) -> Duration {
        self.config.platform.request_timeout()
    }

    // ── Inbound events ──────────────────────────────────────────────

    pub async fn handle_event(&self, event: PlatformEvent) -> EventOutcome {
        match event {
            PlatformEvent::MessageCreate(msg) => EventOutcome::Message(self.handle_message(&msg).await),
            PlatformEvent::GuildRemove {
                guild_id,
                guild_name,
            } => {
                let removed = self.registry.cascade_remove_server(&guild_id);
                self.forget_identities(&removed);
                info!(
                    %guild_id,
                    %guild_name,
                    channels = removed.len(),
                    "bot removed from server, unlinked its channels"
                );
                EventOutcome::ServerRemoved(removed)
            }
            PlatformEvent::MemberJoin {
                guild_id,
                user_id,
                user_name,
            } => EventOutcome::ConnectionNotice(
                self.connection_notice(&guild_id, &user_id, &user_name, true)
                    .await,
            ),
            PlatformEvent::MemberLeave {
                guild_id,
                user_id,
                user_name,
            } => EventOutcome::ConnectionNotice(
                self.connection_notice(&guild_id, &user_id, &user_name, false)
                    .await,
            ),
        }
    }

    pub async fn handle_message(&self, msg: &InboundMessage) -> MessageOutcome {
        if msg.author_is_bot {
            return MessageOutcome::IgnoredBot;
        }

        if self.config.deny_list.enabled && self.is_moderation_channel(&msg.channel_id) {
            self.moderation_command(msg).await;
            return MessageOutcome::ModerationCommand;
        }

        if let GateOutcome::Stop(reason) = self.chain.evaluate(msg).await {
            return MessageOutcome::Stopped(reason);
        }

        if self.config.relay.log_messages {
            debug!(
                author = %msg.author_name,
                guild = %msg.guild_name,
                channel = %msg.channel_name,
                content = %truncate(&msg.content, LOGGED_CONTENT_CHARS),
                "message"
            );
        }

        if self.config.levels.enabled {
            self.award_xp(msg).await;
        }

        if self.registry.get(&msg.channel_id).is_none() {
            return MessageOutcome::NotNetworked;
        }

        let badge = self
            .config
            .levels
            .enabled
            .then(|| self.levels.level_of(&msg.author_id));
        match self.dispatcher.relay(msg, badge).await {
            Ok(report) => {
                self.relayed_messages.fetch_add(1, Ordering::Relaxed);
                MessageOutcome::Relayed(report)
            }
            Err(e) => {
                warn!(channel_id = %msg.channel_id, error = %e, "message not relayed");
                MessageOutcome::RelayFailed(e.to_string())
            }
        }
    }

    async fn award_xp(&self, msg: &InboundMessage) {
        let levels = self.levels.clone();
        let author_id = msg.author_id.clone();
        let awarded =
            tokio::task::spawn_blocking(move || levels.award(&author_id, Utc::now())).await;
        let award = match awarded {
            Ok(Some(award)) => award,
            Ok(None) => return,
            Err(e) => {
                error!(author_id = %msg.author_id, error = %e, "xp award task failed");
                return;
            }
        };
        if !award.should_announce() {
            return;
        }

        let info = self.levels.info(&msg.author_id);
        info!(author_id = %msg.author_id, level = award.level, "level up");
        let text = format!(
            "🎉 **Level up!** Congratulations <@{}>, you reached **level {}**!\n\
             🔥 Level: {} • ⭐ XP: {} • 💬 Messages: {}",
            msg.author_id, award.level, award.level, info.xp, info.messages
        );
        self.moderation.post(&msg.channel_id, &text).await;
    }

    fn is_moderation_channel(&self, channel_id: &str) -> bool {
        let section = &self.config.deny_list;
        section.ban_channel_id.as_deref() == Some(channel_id)
            || section.unban_channel_id.as_deref() == Some(channel_id)
    }

    /// Ban/unban by user id, typed into the configured moderation channels.
    async fn moderation_command(&self, msg: &InboundMessage) {
        let section = &self.config.deny_list;
        let is_moderator = section
            .moderator_role_id
            .as_ref()
            .is_some_and(|role| msg.author_role_ids.contains(role));
        if !is_moderator {
            debug!(author_id = %msg.author_id, "ignoring non-moderator in moderation channel");
            return;
        }

        let banning = section.ban_channel_id.as_deref() == Some(msg.channel_id.as_str());
        let reply = match validation::parse_user_id(&msg.content) {
            None => "❌ Invalid user id. Send only the numeric id.".to_string(),
            Some(user_id) if banning => {
                if self.deny_list.add(user_id) {
                    format!(
                        "🚫 User `{user_id}` added to the deny list by <@{}>.",
                        msg.author_id
                    )
                } else {
                    format!("ℹ️ User `{user_id}` is already on the deny list.")
                }
            }
            Some(user_id) => {
                if self.deny_list.remove(user_id) {
                    format!(
                        "✅ User `{user_id}` removed from the deny list by <@{}>.",
                        msg.author_id
                    )
                } else {
                    format!("❌ User `{user_id}` is not on the deny list.")
                }
            }
        };
        self.moderation.post(&msg.channel_id, &reply).await;
    }

    async fn connection_notice(
        &self,
        guild_id: &str,
        user_id: &str,
        user_name: &str,
        joined: bool,
    ) -> bool {
        let section = &self.config.notifications;
        if !section.connection_enabled || section.connection_guild_id.as_deref() != Some(guild_id)
        {
            return false;
        }
        let Some(channel_id) = &section.connection_channel_id else {
            warn!("connection notices enabled without a channel");
            return false;
        };

        let head = if joined {
            "📥 **Member joined**"
        } else {
            "📤 **Member left**"
        };
        let text = format!(
            "{head}\n**User:** <@{user_id}> (`{user_id}`)\n**Name:** {user_name}\n{}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.moderation.post(channel_id, &text).await
    }

    // ── Admin operations ────────────────────────────────────────────

    /// Start a new network with `req.channel_id` as its first member.
    pub async fn create_network(&self, mut req: LinkRequest) -> RelayResult<Membership> {
        req.network = validation::sanitize_network_name(&req.network)?;
        self.require_permissions(&req.channel_id).await?;
        self.registry.create_network(&req)
    }

    /// Add `req.channel_id` to an existing network.
    pub async fn link_channel(&self, mut req: LinkRequest) -> RelayResult<Membership> {
        req.network = validation::sanitize_network_name(&req.network)?;
        self.require_permissions(&req.channel_id).await?;
        self.registry.link_to_existing_network(&req)
    }

    pub fn unlink_channel(&self, channel_id: &str) -> RelayResult<String> {
        let network = self.registry.unlink(channel_id)?;
        self.dispatcher.forget_identity(channel_id);
        Ok(network)
    }

    /// Every network, marked joined when `guild_id` already has a channel in it.
    pub fn search_networks(&self, guild_id: Option<&str>) -> Vec<NetworkListing> {
        self.registry
            .list_networks()
            .into_iter()
            .map(|(name, channels)| {
                let joined = guild_id.is_some_and(|g| {
                    channels.iter().any(|c| c.guild_id.as_deref() == Some(g))
                });
                let server_count = channels
                    .iter()
                    .filter(|c| c.guild_name != "unknown")
                    .filter_map(|c| c.guild_id.as_deref())
                    .collect::<BTreeSet<_>>()
                    .len();
                NetworkListing {
                    name,
                    status: if joined {
                        NetworkStatus::AlreadyJoined
                    } else {
                        NetworkStatus::Available
                    },
                    server_count,
                    channels,
                }
            })
            .collect()
    }

    pub async fn check_permissions(&self, channel_id: &str) -> RelayResult<PermissionReport> {
        let check = with_timeout(
            self.timeout(),
            self.platform.check_permissions(channel_id, RELAY_REQUIRED),
        )
        .await?;
        Ok(PermissionReport {
            channel_id: channel_id.to_string(),
            ok: check.is_satisfied(),
            granted: permissions::describe(check.granted & RELAY_REQUIRED),
            missing: check.missing_names(),
        })
    }

    async fn require_permissions(&self, channel_id: &str) -> RelayResult<()> {
        let check = self.permissions.check(channel_id, None, false).await?;
        if check.is_satisfied() {
            return Ok(());
        }
        Err(RelayError::PermissionDenied {
            channel_id: channel_id.to_string(),
            missing: check.missing_names(),
        })
    }

    pub fn deny_user(&self, user_id: &str) -> bool {
        self.deny_list.add(user_id)
    }

    pub fn allow_user(&self, user_id: &str) -> bool {
        self.deny_list.remove(user_id)
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Drop linked channels the platform says no longer exist. Lookups that
    /// fail count as reachable. Returns the removed channel ids.
    pub async fn reconcile(&self) -> Vec<String> {
        if !self.config.moderation.auto_cleanup_channels {
            debug!("channel cleanup disabled");
            return Vec::new();
        }

        let channel_ids = self.registry.channel_ids();
        let lookups = channel_ids.iter().map(|id| async move {
            let reachable = match with_timeout(self.timeout(), self.platform.channel_exists(id)).await
            {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(channel_id = %id, error = %e, "channel lookup failed, keeping it");
                    true
                }
            };
            (id.clone(), reachable)
        });
        let reachable: HashMap<String, bool> = join_all(lookups).await.into_iter().collect();

        let removed = self
            .registry
            .prune_unreachable(|id| reachable.get(id).copied().unwrap_or(true));
        info!(
            checked = channel_ids.len(),
            removed = removed.len(),
            "startup reconciliation done"
        );
        self.forget_identities(&removed);
        removed
    }

    fn forget_identities(&self, channel_ids: &[String]) {
        for channel_id in channel_ids {
            self.dispatcher.forget_identity(channel_id);
        }
    }

    /// Check every linked channel and notify admins of missing permissions.
    /// Returns how many channels have problems.
    pub async fn audit_permissions(&self) -> usize {
        let mut with_issues = 0;
        for channel_id in self.registry.channel_ids() {
            let guild_id = self.registry.get(&channel_id).and_then(|m| m.guild_id);
            match self
                .permissions
                .check(&channel_id, guild_id.as_deref(), true)
                .await
            {
                Ok(check) if check.is_satisfied() => {}
                Ok(_) => with_issues += 1,
                Err(e) => debug!(%channel_id, error = %e, "permission audit skipped channel"),
            }
        }
        if with_issues > 0 {
            warn!(channels = with_issues, "permission audit found problems");
        } else {
            debug!("permission audit clean");
        }
        with_issues
    }

    /// Forget rate-limit state that can no longer affect a verdict.
    pub fn sweep_antispam(&self) -> usize {
        let removed = self.limiter.sweep(Instant::now());
        debug!(removed, tracked = self.limiter.tracked_users(), "antispam sweep");
        removed
    }

    pub async fn stats(&self) -> RelayStats {
        let platform = match with_timeout(self.timeout(), self.platform.guild_stats()).await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "failed to fetch platform stats");
                Default::default()
            }
        };
        RelayStats {
            servers: platform.guilds,
            users: platform.users,
            networks: self.registry.network_count(),
            linked_channels: self.registry.len(),
            relayed_messages: self.relayed_messages.load(Ordering::Relaxed),
            last_updated: Utc::now(),
        }
    }
}

//! Ordered policy checks run on every inbound message before relay.
//!
//! The chain is built once as `deny_list → raid_guard → antispam`. Each gate
//! either lets the message continue or stops it with a reason; the first stop
//! wins and later gates never see the message. A deny-listed author therefore
//! never reaches the rate limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::deny_list::DenyListStore;
use super::events::InboundMessage;
use super::raid_guard::{RaidGuard, RaidViolation};
use super::rate_limiter::{RateLimiter, Verdict};
use super::registry::ChannelRegistry;
use super::reports::{self, AntispamNotice, ViolationKind, ViolationReport};
use crate::platform::{Platform, with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    DenyListed,
    MassMention,
    InviteLink,
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Continue,
    Stop(StopReason),
}

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, msg: &InboundMessage) -> GateOutcome;
}

pub struct PolicyChain {
    gates: Vec<Box<dyn Gate>>,
}

impl PolicyChain {
    pub fn new(gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    pub async fn evaluate(&self, msg: &InboundMessage) -> GateOutcome {
        for gate in &self.gates {
            if let GateOutcome::Stop(reason) = gate.evaluate(msg).await {
                debug!(
                    gate = gate.name(),
                    ?reason,
                    message_id = %msg.message_id,
                    "message stopped by policy"
                );
                return GateOutcome::Stop(reason);
            }
        }
        GateOutcome::Continue
    }
}

// ── Shared moderation actions ───────────────────────────────────────

/// Deletes, reports and DMs on behalf of the gates and the relay.
/// Every call is bounded by the platform timeout and never fails the caller.
pub struct Moderation {
    platform: Arc<dyn Platform>,
    report_channel: Option<String>,
    timeout: Duration,
}

impl Moderation {
    pub fn new(platform: Arc<dyn Platform>, report_channel: Option<String>, timeout: Duration) -> Self {
        Self {
            platform,
            report_channel,
            timeout,
        }
    }

    /// Delete `msg`. Returns whether it is gone.
    pub async fn delete(&self, msg: &InboundMessage) -> bool {
        match with_timeout(
            self.timeout,
            self.platform.delete_message(&msg.channel_id, &msg.message_id),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    channel_id = %msg.channel_id,
                    message_id = %msg.message_id,
                    error = %e,
                    "could not delete message"
                );
                false
            }
        }
    }

    pub async fn report(&self, report: &ViolationReport) {
        let Some(channel_id) = &self.report_channel else {
            debug!(kind = ?report.kind, "no report channel configured");
            return;
        };
        if self.post(channel_id, &report.render()).await {
            info!(
                kind = ?report.kind,
                author_id = %report.author_id,
                guild = %report.guild_name,
                "violation reported"
            );
        }
    }

    /// Post `text` as the bot. Returns whether it was sent.
    pub async fn post(&self, channel_id: &str, text: &str) -> bool {
        match with_timeout(self.timeout, self.platform.send_message(channel_id, text, None)).await {
            Ok(()) => true,
            Err(e) => {
                error!(%channel_id, error = %e, "failed to post notice");
                false
            }
        }
    }

    /// Best-effort direct message; users with closed DMs are common.
    pub async fn direct(&self, user_id: &str, text: &str) {
        if let Err(e) = with_timeout(self.timeout, self.platform.send_direct(user_id, text)).await {
            debug!(%user_id, error = %e, "direct message not delivered");
        }
    }
}

// ── Gates ───────────────────────────────────────────────────────────

pub struct DenyListGate {
    deny_list: Arc<DenyListStore>,
    moderation: Arc<Moderation>,
}

impl DenyListGate {
    pub fn new(deny_list: Arc<DenyListStore>, moderation: Arc<Moderation>) -> Self {
        Self {
            deny_list,
            moderation,
        }
    }
}

#[async_trait]
impl Gate for DenyListGate {
    fn name(&self) -> &'static str {
        "deny_list"
    }

    async fn evaluate(&self, msg: &InboundMessage) -> GateOutcome {
        if !self.deny_list.contains(&msg.author_id) {
            return GateOutcome::Continue;
        }

        let removed = self.moderation.delete(msg).await;
        self.moderation
            .report(&ViolationReport::for_message(ViolationKind::DenyListed, msg).removed(removed))
            .await;
        info!(author_id = %msg.author_id, removed, "dropped message from deny-listed user");
        GateOutcome::Stop(StopReason::DenyListed)
    }
}

pub struct RaidGate {
    guard: RaidGuard,
    moderation: Arc<Moderation>,
}

impl RaidGate {
    pub fn new(guard: RaidGuard, moderation: Arc<Moderation>) -> Self {
        Self { guard, moderation }
    }
}

#[async_trait]
impl Gate for RaidGate {
    fn name(&self) -> &'static str {
        "raid_guard"
    }

    async fn evaluate(&self, msg: &InboundMessage) -> GateOutcome {
        let Some(violation) = self.guard.classify(&msg.content) else {
            return GateOutcome::Continue;
        };

        // A failed delete still stops the message: it stays visible in its
        // own channel but is never relayed.
        let removed = self.moderation.delete(msg).await;
        warn!(
            author_id = %msg.author_id,
            guild = %msg.guild_name,
            channel = %msg.channel_name,
            ?violation,
            removed,
            "raid pattern blocked"
        );

        self.moderation
            .report(&ViolationReport::for_message(violation.kind(), msg).removed(removed))
            .await;
        self.moderation
            .direct(
                &msg.author_id,
                &violation.author_notice(&msg.guild_name, &msg.channel_name),
            )
            .await;

        GateOutcome::Stop(match violation {
            RaidViolation::MassMention => StopReason::MassMention,
            RaidViolation::InviteLink => StopReason::InviteLink,
        })
    }
}

/// Rate limits authors in networked channels. Other channels pass untouched.
pub struct AntispamGate {
    limiter: Arc<RateLimiter>,
    registry: Arc<ChannelRegistry>,
    moderation: Arc<Moderation>,
    log_channel: Option<String>,
}

impl AntispamGate {
    pub fn new(
        limiter: Arc<RateLimiter>,
        registry: Arc<ChannelRegistry>,
        moderation: Arc<Moderation>,
        log_channel: Option<String>,
    ) -> Self {
        Self {
            limiter,
            registry,
            moderation,
            log_channel,
        }
    }

    async fn log_notice(&self, notice: AntispamNotice, msg: &InboundMessage) {
        let Some(channel_id) = &self.log_channel else {
            return;
        };
        let text = notice.render(
            msg,
            self.limiter.max_messages(),
            self.limiter.window().as_secs(),
            self.limiter.mute_duration().as_secs(),
        );
        self.moderation.post(channel_id, &text).await;
    }
}

#[async_trait]
impl Gate for AntispamGate {
    fn name(&self) -> &'static str {
        "antispam"
    }

    async fn evaluate(&self, msg: &InboundMessage) -> GateOutcome {
        if self.registry.get(&msg.channel_id).is_none() {
            return GateOutcome::Continue;
        }

        let mute_started = match self.limiter.check(&msg.author_id, Instant::now()) {
            Verdict::Allow => return GateOutcome::Continue,
            Verdict::WarnThreshold => {
                self.log_notice(AntispamNotice::Warning, msg).await;
                return GateOutcome::Continue;
            }
            Verdict::Block { mute_started } => mute_started,
        };

        let max = self.limiter.max_messages();
        let window_secs = self.limiter.window().as_secs();
        let mute_secs = self.limiter.mute_duration().as_secs();

        if mute_started {
            warn!(author_id = %msg.author_id, mute_secs, "user muted for spam");
            self.log_notice(AntispamNotice::Mute, msg).await;
            self.moderation
                .report(&ViolationReport::for_mute(
                    msg,
                    mute_secs,
                    format!("Exceeded {}", reports::describe_limit(max, window_secs)),
                ))
                .await;
        }

        if self.moderation.delete(msg).await {
            info!(
                author_id = %msg.author_id,
                guild = %msg.guild_name,
                channel = %msg.channel_name,
                "removed message from muted user"
            );
        }
        let remaining_secs = self
            .limiter
            .mute_remaining(&msg.author_id, Instant::now())
            .map_or(mute_secs, |left| left.as_secs_f64().ceil() as u64);
        self.moderation
            .direct(
                &msg.author_id,
                &reports::mute_direct_message(msg, max, window_secs, remaining_secs),
            )
            .await;

        GateOutcome::Stop(StopReason::RateLimited)
    }
}

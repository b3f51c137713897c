//! Fan-out of one inbound message to every sibling channel in its network.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::events::{Attachment, InboundMessage};
use super::gates::Moderation;
use super::permissions::{PermissionCheck, Permissions, RELAY_REQUIRED};
use super::registry::ChannelRegistry;
use super::reports::{ViolationKind, ViolationReport};
use super::sanitizer::{ContentSanitizer, truncate};
use crate::error::{RelayError, RelayResult};
use crate::platform::{OutboundFile, OutboundIdentity, Platform, PlatformError, with_timeout};

/// Stands in for messages that carry only attachments.
pub const NO_TEXT_PLACEHOLDER: &str = "*message has no text*";

#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub channel_id: String,
    pub reason: String,
}

/// How one fan-out went. `delivered` never exceeds `eligible`.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub network: String,
    pub delivered: usize,
    pub eligible: usize,
    pub failures: Vec<TargetFailure>,
}

// ── Permission checks with admin notices ────────────────────────────

/// Checks the bot's relay permissions and tells server admins what is missing.
/// Notices for the same channel are sent at most once per `notice_interval`.
pub struct PermissionMonitor {
    platform: Arc<dyn Platform>,
    timeout: Duration,
    notice_interval: Duration,
    last_notice: DashMap<String, Instant>,
}

impl PermissionMonitor {
    pub fn new(platform: Arc<dyn Platform>, timeout: Duration, notice_interval: Duration) -> Self {
        Self {
            platform,
            timeout,
            notice_interval,
            last_notice: DashMap::new(),
        }
    }

    /// Check `channel_id` against [`RELAY_REQUIRED`]. With `notify_admin`,
    /// a failed check posts a notice to the guild's admin channel, or to the
    /// channel itself when the bot can still speak there.
    pub async fn check(
        &self,
        channel_id: &str,
        guild_id: Option<&str>,
        notify_admin: bool,
    ) -> Result<PermissionCheck, PlatformError> {
        let check = with_timeout(
            self.timeout,
            self.platform.check_permissions(channel_id, RELAY_REQUIRED),
        )
        .await?;

        if !check.is_satisfied() && notify_admin {
            self.notify(channel_id, guild_id, &check).await;
        }
        Ok(check)
    }

    async fn notify(&self, channel_id: &str, guild_id: Option<&str>, check: &PermissionCheck) {
        let now = Instant::now();
        if let Some(last) = self.last_notice.get(channel_id)
            && now.duration_since(*last) < self.notice_interval
        {
            debug!(%channel_id, "permission notice throttled");
            return;
        }

        let admin_channel = match guild_id {
            Some(guild_id) => with_timeout(self.timeout, self.platform.admin_channel(guild_id))
                .await
                .unwrap_or_else(|e| {
                    debug!(%guild_id, error = %e, "admin channel lookup failed");
                    None
                }),
            None => None,
        };
        let destination = match admin_channel {
            Some(ch) => ch,
            None if check.granted.contains(Permissions::SEND_MESSAGES) => channel_id.to_string(),
            None => {
                warn!(%channel_id, "no channel available for a permission notice");
                return;
            }
        };

        let text = permission_notice(channel_id, &check.missing_names());
        match with_timeout(self.timeout, self.platform.send_message(&destination, &text, None))
            .await
        {
            Ok(()) => {
                self.last_notice.insert(channel_id.to_string(), now);
                warn!(%channel_id, %destination, "sent missing-permission notice");
            }
            Err(e) => error!(%channel_id, error = %e, "failed to send permission notice"),
        }
    }
}

fn permission_notice(channel_id: &str, missing: &[String]) -> String {
    let mut text = format!("⚠️ **The relay bot is missing permissions in <#{channel_id}>**\n");
    for name in missing {
        text.push_str(&format!("• {name}\n"));
    }
    text.push_str(
        "Grant them to the bot's role (or directly in the channel settings); \
         without them messages cannot be relayed.",
    );
    text
}

// ── Dispatcher ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Name given to outbound identities the bot creates.
    pub identity_name: String,
    pub max_file_size: u64,
    pub timeout: Duration,
}

/// What every target receives, computed once per message.
struct Prepared<'a> {
    msg: &'a InboundMessage,
    text: String,
    /// Display name with level badge, used for the text message.
    badge_name: String,
}

pub struct RelayDispatcher {
    registry: Arc<ChannelRegistry>,
    platform: Arc<dyn Platform>,
    moderation: Arc<Moderation>,
    permissions: Arc<PermissionMonitor>,
    sanitizer: ContentSanitizer,
    settings: RelaySettings,
    identities: DashMap<String, OutboundIdentity>,
}

impl RelayDispatcher {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        platform: Arc<dyn Platform>,
        moderation: Arc<Moderation>,
        permissions: Arc<PermissionMonitor>,
        sanitizer: ContentSanitizer,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry,
            platform,
            moderation,
            permissions,
            sanitizer,
            settings,
            identities: DashMap::new(),
        }
    }

    /// Forward `msg` to every other channel in its network.
    ///
    /// Fails only when the source is not linked or the bot cannot relay out of
    /// it. Individual targets that fail are recorded in the report.
    pub async fn relay(
        &self,
        msg: &InboundMessage,
        level_badge: Option<u32>,
    ) -> RelayResult<DeliveryReport> {
        let (network, targets) = self
            .registry
            .siblings(&msg.channel_id)
            .ok_or(RelayError::NotLinked)?;

        let source = self
            .permissions
            .check(&msg.channel_id, Some(msg.guild_id.as_str()), true)
            .await?;
        if !source.is_satisfied() {
            let missing = source.missing_names();
            warn!(
                channel_id = %msg.channel_id,
                guild = %msg.guild_name,
                missing = %missing.join(", "),
                "missing permissions in source channel, not relaying"
            );
            return Err(RelayError::PermissionDenied {
                channel_id: msg.channel_id.clone(),
                missing,
            });
        }

        let raw = if msg.content.is_empty() {
            NO_TEXT_PLACEHOLDER
        } else {
            msg.content.as_str()
        };
        let sanitized = self.sanitizer.sanitize(raw, msg.has_rich_content());
        if !sanitized.links.is_empty() {
            info!(
                author_id = %msg.author_id,
                links = ?sanitized.links,
                "stripped links from relayed message"
            );
            self.moderation
                .report(&ViolationReport::for_message(
                    ViolationKind::LinksRemoved {
                        count: sanitized.links.len(),
                    },
                    msg,
                ))
                .await;
        }

        let badge_name = match level_badge {
            Some(level) if level > 0 => format!("{} 🔥{level}", msg.author_display_name),
            _ => msg.author_display_name.clone(),
        };
        let prepared = Prepared {
            msg,
            text: sanitized.text,
            badge_name,
        };

        let results = join_all(targets.iter().map(|t| self.deliver(t, &prepared))).await;

        let eligible = targets.len();
        let failures: Vec<TargetFailure> = results.into_iter().filter_map(Result::err).collect();
        let delivered = eligible - failures.len();

        info!(
            author_id = %msg.author_id,
            %network,
            delivered,
            eligible,
            "message relayed"
        );
        Ok(DeliveryReport {
            network,
            delivered,
            eligible,
            failures,
        })
    }

    /// Drop the cached identity of a channel that left its network.
    pub fn forget_identity(&self, channel_id: &str) {
        self.identities.remove(channel_id);
    }

    pub fn cached_identities(&self) -> usize {
        self.identities.len()
    }

    async fn deliver(&self, target: &str, prepared: &Prepared<'_>) -> Result<(), TargetFailure> {
        let fail = |error: RelayError| {
            warn!(channel_id = %target, error = %error, "skipping relay target");
            TargetFailure {
                channel_id: target.to_string(),
                reason: error.to_string(),
            }
        };

        let guild_id = self.registry.get(target).and_then(|m| m.guild_id);
        let check = self
            .permissions
            .check(target, guild_id.as_deref(), true)
            .await
            .map_err(|e| fail(self.classify(target, e)))?;
        if !check.is_satisfied() {
            return Err(fail(RelayError::PermissionDenied {
                channel_id: target.to_string(),
                missing: check.missing_names(),
            }));
        }

        let mut identity = self.identity_for(target).await;
        let msg = prepared.msg;

        if let Some(current) = identity.clone() {
            match self
                .timed(self.platform.send_as_identity(
                    &current,
                    &prepared.text,
                    &prepared.badge_name,
                    msg.author_avatar_url.as_deref(),
                    None,
                ))
                .await
            {
                Ok(()) => {}
                Err(PlatformError::NotFound) => {
                    warn!(channel_id = %target, "outbound identity vanished, falling back to plain send");
                    self.identities.remove(target);
                    identity = None;
                }
                Err(e) => return Err(fail(self.classify(target, e))),
            }
        }
        if identity.is_none() {
            let text = truncate(
                &format!("**{}**: {}", prepared.badge_name, prepared.text),
                self.sanitizer.max_length(),
            );
            self.timed(self.platform.send_message(target, &text, None))
                .await
                .map_err(|e| fail(self.classify(target, e)))?;
        }

        for attachment in &msg.attachments {
            self.forward_attachment(target, identity.as_ref(), msg, attachment)
                .await;
        }

        debug!(channel_id = %target, "relayed to target");
        Ok(())
    }

    /// Files go under the plain display name; problems become inline notices.
    async fn forward_attachment(
        &self,
        target: &str,
        identity: Option<&OutboundIdentity>,
        msg: &InboundMessage,
        attachment: &Attachment,
    ) {
        let name = msg.author_display_name.as_str();

        if attachment.size > self.settings.max_file_size {
            let err = RelayError::PayloadTooLarge {
                filename: attachment.filename.clone(),
                size: attachment.size,
                limit: self.settings.max_file_size,
            };
            debug!(channel_id = %target, error = %err, "attachment not forwarded");
            self.send_notice(target, identity, name, &too_large_notice(attachment))
                .await;
            return;
        }

        let data = match self.timed(self.platform.fetch_attachment(attachment)).await {
            Ok(data) => data,
            Err(e) => {
                error!(filename = %attachment.filename, error = %e, "failed to download attachment");
                self.send_notice(target, identity, name, &failed_notice(attachment))
                    .await;
                return;
            }
        };
        let file = OutboundFile {
            filename: attachment.filename.clone(),
            data,
        };

        let sent = match identity {
            Some(identity) => {
                self.timed(self.platform.send_as_identity(
                    identity,
                    "",
                    name,
                    msg.author_avatar_url.as_deref(),
                    Some(&file),
                ))
                .await
            }
            None => {
                let caption = format!("📎 **{name}** sent a file:");
                self.timed(self.platform.send_message(target, &caption, Some(&file)))
                    .await
            }
        };

        match sent {
            Ok(()) => {}
            Err(PlatformError::PayloadTooLarge) => {
                self.send_notice(target, identity, name, &too_large_notice(attachment))
                    .await;
            }
            Err(e) => {
                error!(channel_id = %target, filename = %attachment.filename, error = %e, "failed to forward attachment");
                self.send_notice(target, identity, name, &failed_notice(attachment))
                    .await;
            }
        }
    }

    async fn send_notice(
        &self,
        target: &str,
        identity: Option<&OutboundIdentity>,
        name: &str,
        text: &str,
    ) {
        let result = match identity {
            Some(identity) => {
                self.timed(self.platform.send_as_identity(identity, text, name, None, None))
                    .await
            }
            None => {
                self.timed(self.platform.send_message(target, text, None))
                    .await
            }
        };
        if let Err(e) = result {
            error!(channel_id = %target, error = %e, "failed to send attachment notice");
        }
    }

    /// Cached identity, else one the bot made earlier, else a new one.
    /// `None` means plain sends for this channel.
    async fn identity_for(&self, channel_id: &str) -> Option<OutboundIdentity> {
        if let Some(cached) = self.identities.get(channel_id) {
            return Some(cached.clone());
        }

        let found = match self
            .timed(self.platform.find_outbound_identity(channel_id))
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!(%channel_id, error = %e, "outbound identity lookup failed");
                None
            }
        };

        let identity = match found {
            Some(identity) => identity,
            None => match self
                .timed(
                    self.platform
                        .create_outbound_identity(channel_id, &self.settings.identity_name),
                )
                .await
            {
                Ok(identity) => {
                    info!(%channel_id, "created outbound identity");
                    identity
                }
                Err(e) => {
                    warn!(%channel_id, error = %e, "cannot create outbound identity, using plain messages");
                    return None;
                }
            },
        };

        self.identities
            .insert(channel_id.to_string(), identity.clone());
        Some(identity)
    }

    async fn timed<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, PlatformError>>,
    ) -> Result<T, PlatformError> {
        with_timeout(self.settings.timeout, call).await
    }

    fn classify(&self, channel_id: &str, e: PlatformError) -> RelayError {
        match e {
            PlatformError::Timeout | PlatformError::NotFound => RelayError::UnreachableTarget {
                channel_id: channel_id.to_string(),
            },
            other => RelayError::Platform(other),
        }
    }
}

fn too_large_notice(attachment: &Attachment) -> String {
    format!(
        "📎 File too large: {} ({} bytes)",
        attachment.filename, attachment.size
    )
}

fn failed_notice(attachment: &Attachment) -> String {
    format!("❌ Could not forward file: {}", attachment.filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::LinkRequest;
    use crate::platform::testing::RecordingPlatform;

    const REPORTS: &str = "reports";

    struct Fixture {
        platform: Arc<RecordingPlatform>,
        registry: Arc<ChannelRegistry>,
        dispatcher: RelayDispatcher,
    }

    fn fixture_with_timeout(timeout: Duration) -> Fixture {
        let platform = Arc::new(RecordingPlatform::new());
        let registry = Arc::new(ChannelRegistry::in_memory(Vec::<String>::new()));
        for (i, ch) in ["a", "b", "c"].iter().enumerate() {
            let req = LinkRequest {
                channel_id: ch.to_string(),
                network: "Lobby".into(),
                guild_id: format!("g{i}"),
                guild_name: format!("Guild {i}"),
                channel_name: ch.to_string(),
                actor_id: "admin".into(),
            };
            if i == 0 {
                registry.create_network(&req).unwrap();
            } else {
                registry.link_to_existing_network(&req).unwrap();
            }
        }

        let moderation = Arc::new(Moderation::new(
            platform.clone(),
            Some(REPORTS.into()),
            timeout,
        ));
        let permissions = Arc::new(PermissionMonitor::new(
            platform.clone(),
            timeout,
            Duration::from_secs(1800),
        ));
        let dispatcher = RelayDispatcher::new(
            registry.clone(),
            platform.clone(),
            moderation,
            permissions,
            ContentSanitizer::new(2000),
            RelaySettings {
                identity_name: "Channel Bridge".into(),
                max_file_size: 1024,
                timeout,
            },
        );
        Fixture {
            platform,
            registry,
            dispatcher,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_timeout(Duration::from_secs(5))
    }

    fn message(channel: &str, content: &str) -> InboundMessage {
        serde_json::from_value(serde_json::json!({
            "message_id": "m1", "author_id": "u1", "author_name": "alice",
            "author_display_name": "Alice", "author_avatar_url": "https://cdn/a.png",
            "channel_id": channel, "channel_name": channel,
            "guild_id": "g0", "guild_name": "Guild 0", "content": content,
            "timestamp": "2025-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn attachment(name: &str, size: u64) -> Attachment {
        Attachment {
            url: format!("https://cdn/{name}"),
            size,
            filename: name.into(),
        }
    }

    #[tokio::test]
    async fn test_fans_out_to_siblings_only() {
        let f = fixture();
        let report = f.dispatcher.relay(&message("a", "hello"), None).await.unwrap();
        assert_eq!(report.network, "Lobby");
        assert_eq!(report.delivered, 2);
        assert_eq!(report.eligible, 2);

        let sent = f.platform.sent();
        assert_eq!(sent.len(), 2);
        assert!(f.platform.sent_to("a").is_empty());
        for ch in ["b", "c"] {
            let to = f.platform.sent_to(ch);
            assert_eq!(to.len(), 1, "one message to {ch}");
            assert_eq!(to[0].text, "hello");
            assert_eq!(to[0].identity_name.as_deref(), Some("Alice"));
        }
    }

    #[tokio::test]
    async fn test_target_permission_failure_is_isolated() {
        let f = fixture();
        f.platform.grant("b", Permissions::VIEW_CHANNEL);
        let report = f.dispatcher.relay(&message("a", "hi"), None).await.unwrap();

        assert_eq!((report.delivered, report.eligible), (1, 2));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].channel_id, "b");
        assert_eq!(f.platform.sent_to("c").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_permission_notice_to_admin_channel() {
        let f = fixture();
        f.platform.grant("b", Permissions::VIEW_CHANNEL);
        f.platform.set_admin_channel("g1", "admin-g1");

        f.dispatcher.relay(&message("a", "one"), None).await.unwrap();
        f.dispatcher.relay(&message("a", "two"), None).await.unwrap();

        let notices = f.platform.sent_to("admin-g1");
        assert_eq!(notices.len(), 1, "second notice is throttled");
        assert!(notices[0].text.contains("Send Messages"));
        assert!(notices[0].text.contains("Manage Webhooks"));
    }

    #[tokio::test]
    async fn test_unlinked_source() {
        let f = fixture();
        let err = f.dispatcher.relay(&message("zzz", "hi"), None).await.unwrap_err();
        assert!(matches!(err, RelayError::NotLinked));
        assert!(f.platform.sent().is_empty());
    }

    #[tokio::test]
    async fn test_source_without_permissions_aborts() {
        let f = fixture();
        f.platform
            .grant("a", Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNEL);
        let err = f.dispatcher.relay(&message("a", "hi"), None).await.unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied { ref channel_id, .. } if channel_id == "a"));
        // only the notice in the source channel itself, no fan-out
        assert!(f.platform.sent_to("b").is_empty());
        assert!(f.platform.sent_to("c").is_empty());
        assert_eq!(f.platform.sent_to("a").len(), 1);
    }

    #[tokio::test]
    async fn test_links_stripped_and_reported() {
        let f = fixture();
        f.dispatcher
            .relay(&message("a", "visit http://x.co now"), None)
            .await
            .unwrap();
        assert_eq!(f.platform.sent_to("b")[0].text, "visit (link removed) now");
        let reports = f.platform.sent_to(REPORTS);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].text.contains("1 removed"));
    }

    #[tokio::test]
    async fn test_links_kept_with_attachment() {
        let f = fixture();
        let mut msg = message("a", "look http://x.co");
        msg.attachments.push(attachment("cat.gif", 10));
        f.dispatcher.relay(&msg, None).await.unwrap();
        assert_eq!(f.platform.sent_to("b")[0].text, "look http://x.co");
        assert!(f.platform.sent_to(REPORTS).is_empty());
    }

    #[tokio::test]
    async fn test_level_badge_on_text_not_on_files() {
        let f = fixture();
        let mut msg = message("a", "gg");
        msg.attachments.push(attachment("pic.png", 10));
        f.dispatcher.relay(&msg, Some(3)).await.unwrap();

        let to_b = f.platform.sent_to("b");
        assert_eq!(to_b.len(), 2);
        assert_eq!(to_b[0].identity_name.as_deref(), Some("Alice 🔥3"));
        assert_eq!(to_b[1].identity_name.as_deref(), Some("Alice"));
        assert_eq!(to_b[1].filename.as_deref(), Some("pic.png"));
    }

    #[tokio::test]
    async fn test_level_zero_has_no_badge() {
        let f = fixture();
        f.dispatcher.relay(&message("a", "gg"), Some(0)).await.unwrap();
        assert_eq!(f.platform.sent_to("b")[0].identity_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_empty_text_placeholder() {
        let f = fixture();
        f.dispatcher.relay(&message("a", ""), None).await.unwrap();
        assert_eq!(f.platform.sent_to("b")[0].text, NO_TEXT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_identity_created_once_and_cached() {
        let f = fixture();
        f.dispatcher.relay(&message("a", "1"), None).await.unwrap();
        f.dispatcher.relay(&message("a", "2"), None).await.unwrap();
        let mut created = f.platform.identity_creations();
        created.sort();
        assert_eq!(created, vec!["b", "c"]);
        assert_eq!(f.dispatcher.cached_identities(), 2);
    }

    #[tokio::test]
    async fn test_existing_identity_reused() {
        let f = fixture();
        f.platform.preinstall_identity("b");
        f.dispatcher.relay(&message("a", "1"), None).await.unwrap();
        assert_eq!(f.platform.identity_creations(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_plain_fallback_when_identity_denied() {
        let f = fixture();
        f.platform.deny_identity_creation("c");
        let report = f.dispatcher.relay(&message("a", "hey"), Some(2)).await.unwrap();
        assert_eq!(report.delivered, 2);
        let to_c = f.platform.sent_to("c");
        assert_eq!(to_c[0].text, "**Alice 🔥2**: hey");
        assert_eq!(to_c[0].identity_name, None);
    }

    #[tokio::test]
    async fn test_plain_fallback_respects_length_limit() {
        let f = fixture();
        f.platform.deny_identity_creation("c");
        let long = "x".repeat(2500);
        f.dispatcher.relay(&message("a", &long), Some(7)).await.unwrap();

        let to_c = f.platform.sent_to("c");
        assert_eq!(to_c[0].text.chars().count(), 2000);
        assert!(to_c[0].text.starts_with("**Alice 🔥7**: xxx"));
        assert!(to_c[0].text.ends_with("..."));
        assert_eq!(f.platform.sent_to("b")[0].text.chars().count(), 2000);
    }

    #[tokio::test]
    async fn test_vanished_identity_evicted() {
        let f = fixture();
        f.dispatcher.relay(&message("a", "1"), None).await.unwrap();
        f.platform.remove_identity("b");
        f.platform.deny_identity_creation("b");
        f.platform.clear_recordings();

        let report = f.dispatcher.relay(&message("a", "2"), None).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(f.platform.sent_to("b")[0].text, "**Alice**: 2");
        assert_eq!(f.dispatcher.cached_identities(), 1);
    }

    #[tokio::test]
    async fn test_attachment_notices() {
        let f = fixture();
        let mut msg = message("a", "files");
        msg.attachments.push(attachment("huge.zip", 4096));
        msg.attachments.push(attachment("broken.png", 10));
        msg.attachments.push(attachment("ok.txt", 10));
        f.platform.fail_attachment("broken.png");

        let report = f.dispatcher.relay(&msg, None).await.unwrap();
        assert_eq!(report.delivered, 2);

        let to_b = f.platform.sent_to("b");
        let texts: Vec<&str> = to_b.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts[0], "files");
        assert_eq!(texts[1], "📎 File too large: huge.zip (4096 bytes)");
        assert_eq!(texts[2], "❌ Could not forward file: broken.png");
        assert_eq!(to_b[3].filename.as_deref(), Some("ok.txt"));
    }

    #[tokio::test]
    async fn test_send_failure_counted() {
        let f = fixture();
        f.platform.fail_sends_to("c");
        let report = f.dispatcher.relay(&message("a", "x"), None).await.unwrap();
        assert_eq!((report.delivered, report.eligible), (1, 2));
        assert_eq!(report.failures[0].channel_id, "c");
    }

    #[tokio::test]
    async fn test_stalled_target_times_out() {
        let f = fixture_with_timeout(Duration::from_millis(100));
        f.platform.stall("b");
        let report = f.dispatcher.relay(&message("a", "x"), None).await.unwrap();
        assert_eq!((report.delivered, report.eligible), (1, 2));
        assert!(report.failures[0].reason.contains("unreachable"));
        assert_eq!(f.platform.sent_to("c").len(), 1);
    }

    #[tokio::test]
    async fn test_single_member_network() {
        let f = fixture();
        f.registry.unlink("b").unwrap();
        f.registry.unlink("c").unwrap();
        let report = f.dispatcher.relay(&message("a", "alone"), None).await.unwrap();
        assert_eq!((report.delivered, report.eligible), (0, 0));
        assert!(f.platform.sent().is_empty());
    }
}

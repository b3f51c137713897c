//! In-memory [`Platform`] that records every call, for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GuildStats, OutboundFile, OutboundIdentity, Platform, PlatformError};
use crate::engine::events::Attachment;
use crate::engine::permissions::{PermissionCheck, Permissions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub text: String,
    /// Display name when sent through an outbound identity.
    pub identity_name: Option<String>,
    pub filename: Option<String>,
}

#[derive(Default)]
struct Behaviour {
    granted: HashMap<String, Permissions>,
    identity_denied: HashSet<String>,
    failing_channels: HashSet<String>,
    failing_attachments: HashSet<String>,
    unreachable: HashSet<String>,
    stalled: HashSet<String>,
    delete_denied: bool,
    admin_channels: HashMap<String, String>,
    stats: GuildStats,
}

#[derive(Default)]
pub struct RecordingPlatform {
    behaviour: Mutex<Behaviour>,
    identities: Mutex<HashMap<String, OutboundIdentity>>,
    sent: Mutex<Vec<SentMessage>>,
    deleted: Mutex<Vec<(String, String)>>,
    directs: Mutex<Vec<(String, String)>>,
    permission_checks: Mutex<Vec<String>>,
    identity_creations: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Behaviour knobs ─────────────────────────────────────────────

    pub fn grant(&self, channel_id: &str, perms: Permissions) {
        self.behaviour
            .lock()
            .unwrap()
            .granted
            .insert(channel_id.to_string(), perms);
    }

    pub fn deny_identity_creation(&self, channel_id: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .identity_denied
            .insert(channel_id.to_string());
    }

    pub fn fail_sends_to(&self, channel_id: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .failing_channels
            .insert(channel_id.to_string());
    }

    pub fn fail_attachment(&self, filename: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .failing_attachments
            .insert(filename.to_string());
    }

    pub fn mark_unreachable(&self, channel_id: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .unreachable
            .insert(channel_id.to_string());
    }

    /// Calls touching `channel_id` hang far longer than any test timeout.
    pub fn stall(&self, channel_id: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .stalled
            .insert(channel_id.to_string());
    }

    pub fn deny_deletes(&self) {
        self.behaviour.lock().unwrap().delete_denied = true;
    }

    pub fn set_admin_channel(&self, guild_id: &str, channel_id: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .admin_channels
            .insert(guild_id.to_string(), channel_id.to_string());
    }

    pub fn set_stats(&self, stats: GuildStats) {
        self.behaviour.lock().unwrap().stats = stats;
    }

    pub fn preinstall_identity(&self, channel_id: &str) -> OutboundIdentity {
        let identity = OutboundIdentity {
            id: format!("wh-{channel_id}"),
            token: "preinstalled".into(),
            channel_id: channel_id.to_string(),
        };
        self.identities
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), identity.clone());
        identity
    }

    pub fn remove_identity(&self, channel_id: &str) {
        self.identities.lock().unwrap().remove(channel_id);
    }

    // ── Recorded calls ──────────────────────────────────────────────

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.channel_id == channel_id)
            .collect()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn directs(&self) -> Vec<(String, String)> {
        self.directs.lock().unwrap().clone()
    }

    pub fn permission_checks(&self) -> Vec<String> {
        self.permission_checks.lock().unwrap().clone()
    }

    pub fn identity_creations(&self) -> Vec<String> {
        self.identity_creations.lock().unwrap().clone()
    }

    pub fn clear_recordings(&self) {
        self.sent.lock().unwrap().clear();
        self.deleted.lock().unwrap().clear();
        self.directs.lock().unwrap().clear();
        self.permission_checks.lock().unwrap().clear();
        self.identity_creations.lock().unwrap().clear();
    }

    async fn maybe_stall(&self, channel_id: &str) {
        let stalled = self.behaviour.lock().unwrap().stalled.contains(channel_id);
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    fn channel_fails(&self, channel_id: &str) -> bool {
        self.behaviour
            .lock()
            .unwrap()
            .failing_channels
            .contains(channel_id)
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        file: Option<&OutboundFile>,
    ) -> Result<(), PlatformError> {
        self.maybe_stall(channel_id).await;
        if self.channel_fails(channel_id) {
            return Err(PlatformError::Transport("send failed".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
            identity_name: None,
            filename: file.map(|f| f.filename.clone()),
        });
        Ok(())
    }

    async fn send_as_identity(
        &self,
        identity: &OutboundIdentity,
        text: &str,
        display_name: &str,
        _avatar_url: Option<&str>,
        file: Option<&OutboundFile>,
    ) -> Result<(), PlatformError> {
        self.maybe_stall(&identity.channel_id).await;
        if !self
            .identities
            .lock()
            .unwrap()
            .contains_key(&identity.channel_id)
        {
            return Err(PlatformError::NotFound);
        }
        if self.channel_fails(&identity.channel_id) {
            return Err(PlatformError::Transport("send failed".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            channel_id: identity.channel_id.clone(),
            text: text.to_string(),
            identity_name: Some(display_name.to_string()),
            filename: file.map(|f| f.filename.clone()),
        });
        Ok(())
    }

    async fn find_outbound_identity(
        &self,
        channel_id: &str,
    ) -> Result<Option<OutboundIdentity>, PlatformError> {
        self.maybe_stall(channel_id).await;
        Ok(self.identities.lock().unwrap().get(channel_id).cloned())
    }

    async fn create_outbound_identity(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<OutboundIdentity, PlatformError> {
        self.maybe_stall(channel_id).await;
        if self
            .behaviour
            .lock()
            .unwrap()
            .identity_denied
            .contains(channel_id)
        {
            return Err(PlatformError::PermissionDenied);
        }
        let identity = OutboundIdentity {
            id: format!("wh-{channel_id}"),
            token: format!("token-{name}"),
            channel_id: channel_id.to_string(),
        };
        self.identities
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), identity.clone());
        self.identity_creations
            .lock()
            .unwrap()
            .push(channel_id.to_string());
        Ok(identity)
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        if self.behaviour.lock().unwrap().delete_denied {
            return Err(PlatformError::PermissionDenied);
        }
        self.deleted
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn send_direct(&self, user_id: &str, text: &str) -> Result<(), PlatformError> {
        self.directs
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn check_permissions(
        &self,
        channel_id: &str,
        required: Permissions,
    ) -> Result<PermissionCheck, PlatformError> {
        self.maybe_stall(channel_id).await;
        self.permission_checks
            .lock()
            .unwrap()
            .push(channel_id.to_string());
        let granted = self
            .behaviour
            .lock()
            .unwrap()
            .granted
            .get(channel_id)
            .copied()
            .unwrap_or(Permissions::all());
        Ok(PermissionCheck::evaluate(granted, required))
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PlatformError> {
        if self
            .behaviour
            .lock()
            .unwrap()
            .failing_attachments
            .contains(&attachment.filename)
        {
            return Err(PlatformError::Transport("download failed".into()));
        }
        Ok(vec![0u8; attachment.size as usize])
    }

    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError> {
        self.maybe_stall(channel_id).await;
        Ok(!self
            .behaviour
            .lock()
            .unwrap()
            .unreachable
            .contains(channel_id))
    }

    async fn admin_channel(&self, guild_id: &str) -> Result<Option<String>, PlatformError> {
        Ok(self
            .behaviour
            .lock()
            .unwrap()
            .admin_channels
            .get(guild_id)
            .cloned())
    }

    async fn guild_stats(&self) -> Result<GuildStats, PlatformError> {
        Ok(self.behaviour.lock().unwrap().stats)
    }
}

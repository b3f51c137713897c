use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::store::JsonDocument;

const UNKNOWN: &str = "unknown";

/// One channel's binding to a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub network: String,
    /// Owning server. Older documents store it as a number, or not at all.
    #[serde(default, deserialize_with = "deserialize_guild_id")]
    pub guild_id: Option<String>,
    #[serde(default = "unknown")]
    pub guild_name: String,
    #[serde(default = "unknown")]
    pub channel_name: String,
    #[serde(default = "now_naive")]
    pub linked_at: NaiveDateTime,
    #[serde(default = "unknown")]
    pub linked_by: String,
}

/// Everything needed to bind a channel to a network.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkRequest {
    pub channel_id: String,
    pub network: String,
    pub guild_id: String,
    pub guild_name: String,
    pub channel_name: String,
    pub actor_id: String,
}

/// A member as shown in network listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSummary {
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub guild_name: String,
    pub channel_name: String,
}

/// Stored entries are either full records or the older bare network name.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Full(Membership),
    Legacy(String),
}

fn unknown() -> String {
    UNKNOWN.to_string()
}

fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn deserialize_guild_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Number(n)) => Some(n.to_string()),
        Some(RawId::Text(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// Durable channel → network membership.
///
/// Invariants:
/// - a channel id is a key at most once, so a channel is in at most one network
/// - a non-privileged server owns at most one channel per network
///   (and at most one network it created itself)
///
/// Every mutation snapshots the whole map under the write lock and writes the
/// file after releasing it. A failed save is logged and the in-memory map
/// stays authoritative.
pub struct ChannelRegistry {
    members: RwLock<BTreeMap<String, Membership>>,
    privileged: HashSet<String>,
    document: Option<JsonDocument>,
}

impl ChannelRegistry {
    pub fn in_memory(privileged: impl IntoIterator<Item = String>) -> Self {
        Self {
            members: RwLock::new(BTreeMap::new()),
            privileged: privileged.into_iter().collect(),
            document: None,
        }
    }

    /// Load memberships from `document`, upgrading legacy entries in place.
    pub fn load(document: JsonDocument, privileged: impl IntoIterator<Item = String>) -> Self {
        let stored: BTreeMap<String, StoredEntry> = document.load().unwrap_or_else(|e| {
            error!(error = %e, "failed to load channel memberships, starting empty");
            BTreeMap::new()
        });

        let mut upgraded = 0usize;
        let members: BTreeMap<String, Membership> = stored
            .into_iter()
            .map(|(channel_id, entry)| {
                let membership = match entry {
                    StoredEntry::Full(m) => m,
                    StoredEntry::Legacy(network) => {
                        upgraded += 1;
                        Membership {
                            network,
                            guild_id: None,
                            guild_name: unknown(),
                            channel_name: unknown(),
                            linked_at: now_naive(),
                            linked_by: unknown(),
                        }
                    }
                };
                (channel_id, membership)
            })
            .collect();

        let registry = Self {
            members: RwLock::new(members),
            privileged: privileged.into_iter().collect(),
            document: Some(document),
        };

        if upgraded > 0 {
            info!(upgraded, "converted legacy channel entries");
            registry.persist(registry.read());
        }
        info!(
            channels = registry.len(),
            networks = registry.network_count(),
            "loaded channel memberships"
        );
        registry
    }

    pub fn is_privileged(&self, guild_id: &str) -> bool {
        self.privileged.contains(guild_id)
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Start a new network with `req.channel_id` as its first member.
    pub fn create_network(&self, req: &LinkRequest) -> RelayResult<Membership> {
        let mut members = self.write();

        if let Some(existing) = members.get(&req.channel_id) {
            return Err(RelayError::AlreadyLinked {
                network: existing.network.clone(),
            });
        }
        if members.values().any(|m| m.network == req.network) {
            return Err(RelayError::NetworkExists {
                network: req.network.clone(),
            });
        }
        if !self.is_privileged(&req.guild_id)
            && let Some(owned) = members
                .values()
                .find(|m| m.guild_id.as_deref() == Some(req.guild_id.as_str()))
        {
            return Err(RelayError::ServerAlreadyNetworked {
                network: owned.network.clone(),
            });
        }

        let membership = Self::membership_for(req);
        members.insert(req.channel_id.clone(), membership.clone());
        self.persist(members);

        info!(
            channel_id = %req.channel_id,
            network = %req.network,
            guild = %req.guild_name,
            actor = %req.actor_id,
            "network created"
        );
        Ok(membership)
    }

    /// Add `req.channel_id` to a network that already has members.
    pub fn link_to_existing_network(&self, req: &LinkRequest) -> RelayResult<Membership> {
        let mut members = self.write();

        if let Some(existing) = members.get(&req.channel_id) {
            return Err(RelayError::AlreadyLinked {
                network: existing.network.clone(),
            });
        }
        if !members.values().any(|m| m.network == req.network) {
            return Err(RelayError::NetworkNotFound {
                network: req.network.clone(),
            });
        }
        if !self.is_privileged(&req.guild_id)
            && members.values().any(|m| {
                m.network == req.network && m.guild_id.as_deref() == Some(req.guild_id.as_str())
            })
        {
            return Err(RelayError::ServerAlreadyInNetwork {
                network: req.network.clone(),
            });
        }

        let membership = Self::membership_for(req);
        members.insert(req.channel_id.clone(), membership.clone());
        self.persist(members);

        info!(
            channel_id = %req.channel_id,
            network = %req.network,
            guild = %req.guild_name,
            actor = %req.actor_id,
            "channel linked"
        );
        Ok(membership)
    }

    /// Remove a channel from its network. Returns the network it left.
    pub fn unlink(&self, channel_id: &str) -> RelayResult<String> {
        let mut members = self.write();
        let removed = members.remove(channel_id).ok_or(RelayError::NotLinked)?;
        self.persist(members);
        info!(%channel_id, network = %removed.network, "channel unlinked");
        Ok(removed.network)
    }

    /// Drop every channel `is_reachable` rejects. Returns the removed channel ids.
    pub fn prune_unreachable<F>(&self, is_reachable: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut members = self.write();
        let doomed: Vec<String> = members
            .keys()
            .filter(|id| !is_reachable(id))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return doomed;
        }

        for channel_id in &doomed {
            if let Some(m) = members.remove(channel_id) {
                warn!(%channel_id, network = %m.network, "removing unreachable channel");
            }
        }
        self.persist(members);
        doomed
    }

    /// Drop every channel owned by `guild_id`. Returns the removed channel ids.
    pub fn cascade_remove_server(&self, guild_id: &str) -> Vec<String> {
        let mut members = self.write();
        let doomed: Vec<String> = members
            .iter()
            .filter(|(_, m)| m.guild_id.as_deref() == Some(guild_id))
            .map(|(id, _)| id.clone())
            .collect();
        if doomed.is_empty() {
            return doomed;
        }

        for channel_id in &doomed {
            members.remove(channel_id);
        }
        self.persist(members);
        info!(%guild_id, removed = doomed.len(), "removed channels of departed server");
        doomed
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn get(&self, channel_id: &str) -> Option<Membership> {
        self.read().get(channel_id).cloned()
    }

    pub fn network_of(&self, channel_id: &str) -> Option<String> {
        self.read().get(channel_id).map(|m| m.network.clone())
    }

    /// Every other channel in `channel_id`'s network, in registry order.
    pub fn siblings(&self, channel_id: &str) -> Option<(String, Vec<String>)> {
        let members = self.read();
        let network = members.get(channel_id)?.network.clone();
        let targets = members
            .iter()
            .filter(|(id, m)| m.network == network && id.as_str() != channel_id)
            .map(|(id, _)| id.clone())
            .collect();
        Some((network, targets))
    }

    /// Networks and their members, grouped by name.
    pub fn list_networks(&self) -> BTreeMap<String, Vec<MemberSummary>> {
        let mut networks: BTreeMap<String, Vec<MemberSummary>> = BTreeMap::new();
        for (channel_id, m) in self.read().iter() {
            networks
                .entry(m.network.clone())
                .or_default()
                .push(MemberSummary {
                    channel_id: channel_id.clone(),
                    guild_id: m.guild_id.clone(),
                    guild_name: m.guild_name.clone(),
                    channel_name: m.channel_name.clone(),
                });
        }
        networks
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn network_count(&self) -> usize {
        self.read()
            .values()
            .map(|m| m.network.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn membership_for(req: &LinkRequest) -> Membership {
        Membership {
            network: req.network.clone(),
            guild_id: Some(req.guild_id.clone()),
            guild_name: req.guild_name.clone(),
            channel_name: req.channel_name.clone(),
            linked_at: now_naive(),
            linked_by: req.actor_id.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Membership>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Membership>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot under the caller's lock, release it, then write the file.
    fn persist<G>(&self, members: G)
    where
        G: Deref<Target = BTreeMap<String, Membership>>,
    {
        let Some(document) = &self.document else {
            return;
        };
        if let Err(e) = Self::save(document, members) {
            error!(error = %e, "failed to save channel memberships; in-memory state remains authoritative");
        }
    }

    fn save<G>(document: &JsonDocument, members: G) -> RelayResult<()>
    where
        G: Deref<Target = BTreeMap<String, Membership>>,
    {
        let snapshot = document.snapshot(&*members)?;
        drop(members);
        document.write(snapshot)?;
        Ok(())
    }
}

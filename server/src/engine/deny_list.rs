use std::collections::{BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use tracing::{error, info};

use crate::error::RelayResult;
use crate::store::JsonDocument;

/// Users whose messages are always deleted and never relayed.
///
/// Read on every message, written only by moderators, so a `RwLock` is enough.
/// The document is a flat JSON list of user ids.
pub struct DenyListStore {
    users: RwLock<HashSet<String>>,
    document: Option<JsonDocument>,
}

impl DenyListStore {
    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            users: RwLock::new(HashSet::new()),
            document: None,
        }
    }

    /// Load from `document`. Unreadable documents start empty.
    pub fn load(document: JsonDocument) -> Self {
        let users: Vec<String> = document.load().unwrap_or_else(|e| {
            error!(error = %e, "failed to load deny list, starting empty");
            Vec::new()
        });
        info!(count = users.len(), "loaded deny list");
        Self {
            users: RwLock::new(users.into_iter().collect()),
            document: Some(document),
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
    }

    /// Add `user_id`. Returns false if already present.
    pub fn add(&self, user_id: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if !users.insert(user_id.to_string()) {
            return false;
        }
        self.persist(users);
        info!(%user_id, "user added to deny list");
        true
    }

    /// Remove `user_id`. Returns false if it was not present.
    pub fn remove(&self, user_id: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if !users.remove(user_id) {
            return false;
        }
        self.persist(users);
        info!(%user_id, "user removed from deny list");
        true
    }

    pub fn len(&self) -> usize {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of every denied user id.
    pub fn snapshot(&self) -> Vec<String> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    fn persist(&self, users: RwLockWriteGuard<'_, HashSet<String>>) {
        let Some(document) = &self.document else {
            return;
        };
        if let Err(e) = Self::save(document, users) {
            error!(error = %e, "failed to save deny list; in-memory copy remains authoritative");
        }
    }

    fn save(
        document: &JsonDocument,
        users: RwLockWriteGuard<'_, HashSet<String>>,
    ) -> RelayResult<()> {
        let sorted: BTreeSet<&String> = users.iter().collect();
        let snapshot = document.snapshot(&sorted)?;
        drop(sorted);
        drop(users);
        document.write(snapshot)?;
        Ok(())
    }
}

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::RelayResult;
use crate::store::JsonDocument;

/// Stored progress for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub xp: u64,
    pub level: u32,
    pub messages: u64,
    /// Unix seconds of the last award.
    #[serde(default)]
    pub last_message: Option<f64>,
}

/// Derived view of a user's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelInfo {
    pub xp: u64,
    pub level: u32,
    pub messages: u64,
    pub xp_to_next: u64,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Award {
    pub gained: u64,
    pub level: u32,
    pub leveled_up: bool,
}

impl Award {
    /// Level-ups out of level zero are not worth announcing.
    pub fn should_announce(&self) -> bool {
        self.leveled_up && self.level > 0
    }
}

/// `floor(sqrt(xp / 100))`
pub fn calculate_level(xp: u64) -> u32 {
    (xp / 100).isqrt() as u32
}

/// XP needed to reach `level`.
pub fn xp_for_level(level: u32) -> u64 {
    let level = u64::from(level);
    level * level * 100
}

/// Per-user XP with a cooldown between awards.
pub struct LevelStore {
    records: Mutex<BTreeMap<String, LevelRecord>>,
    document: Option<JsonDocument>,
    xp_range: RangeInclusive<u64>,
    cooldown: Duration,
}

impl LevelStore {
    pub fn in_memory(xp_range: RangeInclusive<u64>, cooldown: Duration) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            document: None,
            xp_range,
            cooldown,
        }
    }

    pub fn load(document: JsonDocument, xp_range: RangeInclusive<u64>, cooldown: Duration) -> Self {
        let records: BTreeMap<String, LevelRecord> = document.load().unwrap_or_else(|e| {
            error!(error = %e, "failed to load levels, starting empty");
            BTreeMap::new()
        });
        info!(users = records.len(), "loaded level data");
        Self {
            records: Mutex::new(records),
            document: Some(document),
            xp_range,
            cooldown,
        }
    }

    /// Award random XP for a message sent at `now`, unless the user is still
    /// inside the cooldown from their previous award.
    pub fn award(&self, user_id: &str, now: DateTime<Utc>) -> Option<Award> {
        let gained = rand::thread_rng().gen_range(self.xp_range.clone());
        self.award_amount(user_id, gained, now)
    }

    fn award_amount(&self, user_id: &str, gained: u64, now: DateTime<Utc>) -> Option<Award> {
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records.entry(user_id.to_string()).or_default();

        if let Some(last) = record.last_message
            && now_secs - last < self.cooldown.as_secs_f64()
        {
            return None;
        }

        let old_level = record.level;
        record.xp += gained;
        record.messages += 1;
        record.last_message = Some(now_secs);
        record.level = calculate_level(record.xp);

        let award = Award {
            gained,
            level: record.level,
            leveled_up: record.level != old_level,
        };

        if let Some(document) = &self.document
            && let Err(e) = Self::save(document, records)
        {
            error!(error = %e, "failed to save levels");
        }
        Some(award)
    }

    fn save(
        document: &JsonDocument,
        records: MutexGuard<'_, BTreeMap<String, LevelRecord>>,
    ) -> RelayResult<()> {
        let snapshot = document.snapshot(&*records)?;
        drop(records);
        document.write(snapshot)?;
        Ok(())
    }

    pub fn level_of(&self, user_id: &str) -> u32 {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map_or(0, |r| r.level)
    }

    pub fn info(&self, user_id: &str) -> LevelInfo {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = records.get(user_id) else {
            return LevelInfo {
                xp: 0,
                level: 0,
                messages: 0,
                xp_to_next: xp_for_level(1),
                progress_percent: 0.0,
            };
        };

        let current = xp_for_level(record.level);
        let next = xp_for_level(record.level + 1);
        let progress_percent = if next > current {
            (record.xp.saturating_sub(current)) as f64 / (next - current) as f64 * 100.0
        } else {
            100.0
        };

        LevelInfo {
            xp: record.xp,
            level: record.level,
            messages: record.messages,
            xp_to_next: next.saturating_sub(record.xp),
            progress_percent,
        }
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

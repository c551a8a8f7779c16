use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Idempotence marker persisted in the same transaction as the reward it
/// guards. Existence of the marker proves the reward was applied; a consumer
/// that finds its key already present skips without writing anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardEvent {
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl RewardEvent {
    pub fn new(kind: EventKind, created_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            created_at,
            payload: None,
        }
    }

    pub fn with_payload(
        kind: EventKind,
        created_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            created_at,
            payload: Some(payload),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionXp,
    ExerciseMastery,
    MalocraftLoot,
    ZoneRebuild,
    BiomeRebuild,
    DailyProgress,
    DailyBonus,
    CollectibleUnlock,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionXp => "session_xp",
            EventKind::ExerciseMastery => "exercise_mastery",
            EventKind::MalocraftLoot => "malocraft_loot",
            EventKind::ZoneRebuild => "zone_rebuild",
            EventKind::BiomeRebuild => "biome_rebuild",
            EventKind::DailyProgress => "daily_progress",
            EventKind::DailyBonus => "daily_bonus",
            EventKind::CollectibleUnlock => "collectible_unlock",
        }
    }
}

/// Event key formats, one per consumer. Keys are unique per user, so two
/// consumers reacting to the same session never collide.
pub mod keys {
    /// Session XP/coin award: the session id itself.
    pub fn session_xp(session_id: &str) -> String {
        session_id.to_string()
    }

    /// Per-exercise mastery event inside a session.
    pub fn exercise_mastery(session_id: &str, exercise_id: &str) -> String {
        format!("{}_{}", session_id, exercise_id)
    }

    /// Malocraft loot roll for a completed session.
    pub fn malocraft_loot(session_id: &str) -> String {
        format!("malocraftLoot:{}", session_id)
    }

    /// Zone rebuild contribution of one session.
    pub fn zone_rebuild(zone_key: &str, session_id: &str) -> String {
        format!("zone_rebuild_{}_{}", zone_key, session_id)
    }

    /// Biome (subject-wide) rebuild contribution of one session.
    pub fn biome_rebuild(subject: &str, session_id: &str) -> String {
        format!("biome_rebuild_{}_{}", subject, session_id)
    }

    /// Daily-quest progress from one session.
    pub fn daily_progress(session_id: &str) -> String {
        format!("daily_{}", session_id)
    }

    /// All-quests-done bonus, at most once per Paris day.
    pub fn daily_bonus(date_key: &str) -> String {
        format!("daily_bonus_{}", date_key)
    }

    /// Direct collectible unlock for an external trigger.
    pub fn collectible_unlock(collectible_id: &str, event_id: &str) -> String {
        format!("collectible_{}_{}", collectible_id, event_id)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Daily quest board of one user for one Paris day. Stored as its own
/// document next to the rewards document and rebuilt on first touch after
/// the day rolls over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DailyState {
    pub date_key: String,
    pub quests: Vec<DailyQuest>,
    /// Mirrors the `daily_bonus_<dateKey>` marker for cheap reads; the
    /// marker stays authoritative.
    pub bonus_awarded: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DailyState {
    fn default() -> Self {
        Self {
            date_key: String::new(),
            quests: Vec::new(),
            bonus_awarded: false,
            updated_at: None,
        }
    }
}

impl DailyState {
    pub fn is_for(&self, date_key: &str) -> bool {
        self.date_key == date_key
    }

    pub fn all_completed(&self) -> bool {
        !self.quests.is_empty() && self.quests.iter().all(|q| q.completed_at.is_some())
    }

    pub fn quest_mut(&mut self, kind: QuestKind) -> Option<&mut DailyQuest> {
        self.quests.iter_mut().find(|q| q.kind == kind)
    }

    pub fn quest(&self, kind: QuestKind) -> Option<&DailyQuest> {
        self.quests.iter().find(|q| q.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DailyQuest {
    pub kind: QuestKind,
    /// Target tag for remediation and progress quests.
    pub tag: Option<String>,
    pub label: String,
    pub target: u32,
    pub progress: u32,
    pub xp: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for DailyQuest {
    fn default() -> Self {
        Self {
            kind: QuestKind::Session,
            tag: None,
            label: String::new(),
            target: 1,
            progress: 0,
            xp: 0,
            completed_at: None,
        }
    }
}

impl DailyQuest {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestKind {
    /// Finish a session today.
    Session,
    /// Correct answers on the weakest tag.
    Remediation,
    /// Correct answers on the strongest not-yet-mastered tag.
    Progress,
}

impl QuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestKind::Session => "session",
            QuestKind::Remediation => "remediation",
            QuestKind::Progress => "progress",
        }
    }
}

/// Additive per-day rollup used by streak displays and teacher dashboards.
/// All counters only ever grow; writes are increments, never replacements.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DayStats {
    pub date_key: String,
    pub sessions: u32,
    pub answered: u32,
    pub correct: u32,
    pub xp: u64,
}

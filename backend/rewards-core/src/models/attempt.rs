use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of one finished (or abandoned) quiz session as handed over by
/// the session orchestrator. Items keep presentation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub session_id: String,
    pub items: Vec<AttemptItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptItem {
    pub exercise_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 1 = easy, 2 = standard, 3+ = hard.
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    pub answered: bool,
    /// Only meaningful when `answered` is true.
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
}

fn default_difficulty() -> u8 {
    1
}

/// Per-tag counters of one session, input to mastery and rebuild updates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionTagStats {
    pub attempted: u32,
    pub correct: u32,
}

/// Aggregated counters the XP formula consumes. Usually derived from an
/// [`Attempt`] but orchestrators may also assemble one directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionXpSummary {
    pub answered: u32,
    pub correct: u32,
    /// Lengths of correct-answer runs of at least two.
    pub streaks: Vec<u32>,
    /// Correct answers given directly after an incorrect one.
    pub comebacks: u32,
    pub completed: bool,
}

impl Attempt {
    pub fn answered_count(&self) -> u32 {
        self.items.iter().filter(|i| i.answered).count() as u32
    }

    pub fn correct_count(&self) -> u32 {
        self.items.iter().filter(|i| i.answered && i.correct).count() as u32
    }

    /// Share of answered items that were correct, 0.0 when nothing was
    /// answered.
    pub fn correct_rate(&self) -> f64 {
        let answered = self.answered_count();
        if answered == 0 {
            return 0.0;
        }
        f64::from(self.correct_count()) / f64::from(answered)
    }

    pub fn is_completed(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| i.answered)
    }

    /// Counters per tag over answered items. An item carrying several tags
    /// counts toward each of them.
    pub fn tag_stats(&self) -> BTreeMap<String, SessionTagStats> {
        let mut stats: BTreeMap<String, SessionTagStats> = BTreeMap::new();
        for item in self.items.iter().filter(|i| i.answered) {
            for tag in &item.tags {
                let entry = stats.entry(tag.clone()).or_default();
                entry.attempted += 1;
                if item.correct {
                    entry.correct += 1;
                }
            }
        }
        stats
    }

    /// Correct-answer runs over the answered subsequence, keeping only runs
    /// of two or more. Skipped items neither extend nor break a run.
    pub fn streak_runs(&self) -> Vec<u32> {
        let mut runs = Vec::new();
        let mut current = 0u32;
        for item in self.items.iter().filter(|i| i.answered) {
            if item.correct {
                current += 1;
            } else {
                if current >= 2 {
                    runs.push(current);
                }
                current = 0;
            }
        }
        if current >= 2 {
            runs.push(current);
        }
        runs
    }

    /// Correct answers given directly after an incorrect one, over the
    /// answered subsequence.
    pub fn comeback_count(&self) -> u32 {
        let answered: Vec<&AttemptItem> = self.items.iter().filter(|i| i.answered).collect();
        answered
            .windows(2)
            .filter(|w| !w[0].correct && w[1].correct)
            .count() as u32
    }

    pub fn xp_summary(&self) -> SessionXpSummary {
        SessionXpSummary {
            answered: self.answered_count(),
            correct: self.correct_count(),
            streaks: self.streak_runs(),
            comebacks: self.comeback_count(),
            completed: self.is_completed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, tags: &[&str], answered: bool, correct: bool) -> AttemptItem {
        AttemptItem {
            exercise_id: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            difficulty: 1,
            answered,
            correct,
            answered_at: None,
        }
    }

    #[test]
    fn tag_stats_count_answered_items_per_tag() {
        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![
                item("e1", &["fractions"], true, true),
                item("e2", &["fractions", "geometry"], true, false),
                item("e3", &["geometry"], false, false),
            ],
        };
        let stats = attempt.tag_stats();
        assert_eq!(stats["fractions"], SessionTagStats { attempted: 2, correct: 1 });
        assert_eq!(stats["geometry"], SessionTagStats { attempted: 1, correct: 0 });
    }

    #[test]
    fn streaks_need_at_least_two_in_a_row() {
        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![
                item("e1", &[], true, true),
                item("e2", &[], true, true),
                item("e3", &[], true, false),
                item("e4", &[], true, true),
                item("e5", &[], true, true),
                item("e6", &[], true, true),
            ],
        };
        assert_eq!(attempt.streak_runs(), vec![2, 3]);
    }

    #[test]
    fn skipped_items_do_not_break_a_run() {
        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![
                item("e1", &[], true, true),
                item("e2", &[], false, false),
                item("e3", &[], true, true),
            ],
        };
        assert_eq!(attempt.streak_runs(), vec![2]);
        assert!(!attempt.is_completed());
    }

    #[test]
    fn comebacks_follow_incorrect_answers() {
        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![
                item("e1", &[], true, false),
                item("e2", &[], true, true),
                item("e3", &[], true, false),
                item("e4", &[], true, true),
            ],
        };
        assert_eq!(attempt.comeback_count(), 2);
    }

    #[test]
    fn correct_rate_handles_empty_sessions() {
        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![],
        };
        assert_eq!(attempt.correct_rate(), 0.0);
        assert!(!attempt.is_completed());
    }
}

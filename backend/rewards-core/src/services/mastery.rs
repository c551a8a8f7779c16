use crate::models::{MasteryEntry, MasteryState};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const CORRECT_DELTA: u32 = 8;
pub const INCORRECT_DELTA: u32 = 2;
pub const MAX_SCORE: u32 = 100;

/// Mastery changes of one answered question. Returns only the entries that
/// changed, keyed by tag, ready to merge into the rewards patch. A tag
/// listed twice on a question still counts once.
pub fn update_mastery_from_attempt(
    current: &BTreeMap<String, MasteryEntry>,
    question_tags: &[String],
    is_correct: bool,
    at: DateTime<Utc>,
) -> BTreeMap<String, MasteryEntry> {
    let mut changed: BTreeMap<String, MasteryEntry> = BTreeMap::new();
    for tag in question_tags {
        if changed.contains_key(tag) {
            continue;
        }
        let mut entry = current.get(tag).cloned().unwrap_or_default();
        entry.attempts += 1;
        if is_correct {
            entry.correct += 1;
            entry.score = (entry.score + CORRECT_DELTA).min(MAX_SCORE);
        } else {
            entry.score = (entry.score + INCORRECT_DELTA).min(MAX_SCORE);
        }
        entry.state = MasteryState::for_score(entry.score);
        entry.last_practiced_at = Some(at);
        changed.insert(tag.clone(), entry);
    }
    changed
}

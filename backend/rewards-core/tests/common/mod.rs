#![allow(dead_code)]

use quizcraft_rewards::config::EngineConfig;
use quizcraft_rewards::content::StaticContent;
use quizcraft_rewards::models::attempt::{Attempt, AttemptItem};
use quizcraft_rewards::models::{MasteryEntry, MasteryState, RewardsPatch};
use quizcraft_rewards::services::Engine;
use quizcraft_rewards::store::memory::MemoryStore;
use quizcraft_rewards::store::{RewardStore, TxnScope, WriteSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Engine over the in-memory store with the default targets.
pub fn test_engine() -> (Engine<MemoryStore>, MemoryStore) {
    test_engine_with(EngineConfig::default())
}

pub fn test_engine_with(config: EngineConfig) -> (Engine<MemoryStore>, MemoryStore) {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = MemoryStore::new();
    let world = content();
    let engine = Engine::new(config, store.clone(), world.clone(), world);
    (engine, store)
}

/// Shared content world: two subjects, three themes, four exercises per
/// math tag (the fourth one hard), plus a few readings.
pub fn content() -> Arc<StaticContent> {
    let mut content = StaticContent::new();
    content
        .add_tag("fractions", "math", "numbers", 1)
        .add_tag("decimals", "math", "numbers", 2)
        .add_tag("geometry", "math", "shapes", 3)
        .add_tag("spelling", "french", "words", 1);

    for tag in ["fractions", "decimals", "geometry"] {
        let theme = if tag == "geometry" { "shapes" } else { "numbers" };
        for i in 1..=4 {
            let difficulty = if i == 4 { 3 } else { 1 };
            content.add_exercise(&format!("{}_{}", tag, i), theme, &[tag], difficulty);
        }
    }
    content
        .add_exercise("sp_1", "words", &["spelling"], 1)
        .add_reading("read_numbers_1", "numbers", &["fractions"])
        .add_reading("read_numbers_2", "numbers", &["decimals"])
        .add_reading("read_words_1", "words", &["spelling"]);

    Arc::new(content)
}

pub fn test_uid(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub fn item(exercise_id: &str, tags: &[&str], correct: bool) -> AttemptItem {
    AttemptItem {
        exercise_id: exercise_id.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        difficulty: 1,
        answered: true,
        correct,
        answered_at: None,
    }
}

pub fn unanswered(exercise_id: &str, tags: &[&str]) -> AttemptItem {
    AttemptItem {
        exercise_id: exercise_id.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        difficulty: 1,
        answered: false,
        correct: false,
        answered_at: None,
    }
}

pub fn attempt(session_id: &str, items: Vec<AttemptItem>) -> Attempt {
    Attempt {
        session_id: session_id.to_string(),
        items,
    }
}

/// Commits a raw patch outside the engine, the way a fixture seeds state.
pub async fn seed_rewards(store: &MemoryStore, uid: &str, patch: RewardsPatch) {
    let (_, session) = store.begin(uid, &TxnScope::default()).await.unwrap();
    let mut writes = WriteSet::default();
    writes.rewards = Some(patch);
    store.commit(session, writes).await.unwrap();
}

pub fn mastery_patch(scores: &[(&str, u32)]) -> RewardsPatch {
    let mut mastery = BTreeMap::new();
    for (tag, score) in scores {
        mastery.insert(
            tag.to_string(),
            MasteryEntry {
                score: *score,
                state: MasteryState::for_score(*score),
                ..MasteryEntry::default()
            },
        );
    }
    RewardsPatch {
        mastery_by_tag: Some(mastery),
        ..RewardsPatch::default()
    }
}

use crate::metrics;
use crate::models::attempt::Attempt;
use crate::models::catalog::BADGES;
use crate::models::daily::DayStats;
use crate::models::event::{keys, EventKind, RewardEvent};
use crate::models::{BlockProgressEntry, MasteryEntry, RewardsPatch, UserRewards};
use crate::store::{run_transaction, RewardStore, TxnOutcome, TxnScope, WriteSet};
use crate::utils::retry::{retry_if, RetryConfig};
use crate::utils::time;
use serde_json::json;
use std::collections::BTreeMap;

use super::{is_conflict, leveling, mastery, RewardError};

/// Idempotent XP/coin/mastery ledger. Every award runs as one optimistic
/// transaction that checks its event marker first and writes the marker
/// together with the reward, so crashed or repeated deliveries apply at
/// most once.
pub struct RewardLedger<S> {
    store: S,
    retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct AwardOutcome {
    pub rewards: UserRewards,
    pub applied: bool,
    pub leveled_up: bool,
}

#[derive(Debug, Clone)]
pub struct MasteryOutcome {
    /// Final entries of every tag touched by this call.
    pub mastery: BTreeMap<String, MasteryEntry>,
    pub applied_items: u32,
    pub replayed_items: u32,
}

impl MasteryOutcome {
    pub fn applied(&self) -> bool {
        self.applied_items > 0
    }
}

impl<S: RewardStore> RewardLedger<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryConfig::default())
    }

    pub fn with_retry(store: S, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Applies the session's XP and coin deltas exactly once per session id.
    /// Level is recomputed from total XP inside the same transaction.
    pub async fn award_session_rewards(
        &self,
        uid: &str,
        session_id: &str,
        delta_xp: i64,
        delta_coins: i64,
    ) -> Result<AwardOutcome, RewardError> {
        if uid.is_empty() || session_id.is_empty() {
            return Err(RewardError::Validation(
                "uid and session_id must not be empty".to_string(),
            ));
        }
        if delta_xp < 0 || delta_coins < 0 {
            return Err(RewardError::Validation(format!(
                "reward deltas cannot be negative: xp={}, coins={}",
                delta_xp, delta_coins
            )));
        }
        if delta_xp == 0 && delta_coins == 0 {
            // Nothing to award; fetch without consuming the session marker.
            let rewards = self.rewards(uid).await?;
            return Ok(AwardOutcome {
                rewards,
                applied: false,
                leveled_up: false,
            });
        }

        tracing::info!(
            "Awarding session rewards: user={}, session={}, xp={}, coins={}",
            uid,
            session_id,
            delta_xp,
            delta_coins
        );

        let key = keys::session_xp(session_id);
        let scope = TxnScope::events([key.clone()]);

        let outcome = metrics::track_txn("session_xp", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    if snapshot.has_event(&key) {
                        return Ok(TxnOutcome::Skip(AwardOutcome {
                            rewards: snapshot.rewards_or_default(),
                            applied: false,
                            leveled_up: false,
                        }));
                    }

                    let now = self.store.create_timestamp();
                    let mut rewards = snapshot.rewards_or_default();
                    let level_before = rewards.level;
                    rewards.xp += delta_xp as u64;
                    rewards.coins += delta_coins as u64;
                    rewards.level = leveling::compute_level_from_xp(rewards.xp as i64).level;
                    let leveled_up = rewards.level > level_before;

                    let mut writes = WriteSet::default();
                    writes.rewards = Some(RewardsPatch {
                        xp: Some(rewards.xp),
                        level: Some(rewards.level),
                        coins: Some(rewards.coins),
                        ..RewardsPatch::default()
                    });
                    writes.record_event(
                        key.clone(),
                        RewardEvent::with_payload(
                            EventKind::SessionXp,
                            now,
                            json!({ "delta_xp": delta_xp, "delta_coins": delta_coins }),
                        ),
                    );
                    writes.add_day_stats(DayStats {
                        date_key: time::day_key_paris(now),
                        sessions: 1,
                        xp: delta_xp as u64,
                        ..DayStats::default()
                    });

                    Ok(TxnOutcome::Commit(
                        writes,
                        AwardOutcome {
                            rewards,
                            applied: true,
                            leveled_up,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied {
            metrics::record_event_applied(EventKind::SessionXp.as_str());
            if outcome.leveled_up {
                metrics::LEVEL_UPS_TOTAL.inc();
                tracing::info!(
                    "User {} leveled up to {} ({} xp)",
                    uid,
                    outcome.rewards.level,
                    outcome.rewards.xp
                );
            }
        } else {
            metrics::record_event_replayed(EventKind::SessionXp.as_str());
            tracing::info!(
                "Session {} already rewarded for user {}, skipping",
                session_id,
                uid
            );
        }
        Ok(outcome)
    }

    /// Applies mastery deltas for every answered item of the attempt, each
    /// guarded by its own `<sessionId>_<exerciseId>` marker. A partially
    /// applied crash replays cleanly: already-marked items are skipped,
    /// missing ones are applied.
    pub async fn apply_mastery_events(
        &self,
        uid: &str,
        attempt: &Attempt,
    ) -> Result<MasteryOutcome, RewardError> {
        if uid.is_empty() || attempt.session_id.is_empty() {
            return Err(RewardError::Validation(
                "uid and session_id must not be empty".to_string(),
            ));
        }

        let item_keys: Vec<String> = attempt
            .items
            .iter()
            .map(|i| keys::exercise_mastery(&attempt.session_id, &i.exercise_id))
            .collect();
        let scope = TxnScope::events(item_keys.clone());

        let outcome = metrics::track_txn("exercise_mastery", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    let now = self.store.create_timestamp();
                    let rewards = snapshot.rewards_or_default();
                    let mut view = rewards.mastery_by_tag.clone();
                    let mut touched: BTreeMap<String, MasteryEntry> = BTreeMap::new();
                    let mut blocks: BTreeMap<String, BlockProgressEntry> = BTreeMap::new();
                    let mut writes = WriteSet::default();
                    let mut applied_items = 0u32;
                    let mut applied_correct = 0u32;
                    let mut replayed_items = 0u32;

                    for (item, key) in attempt.items.iter().zip(item_keys.iter()) {
                        if !item.answered {
                            continue;
                        }
                        if snapshot.has_event(key) {
                            replayed_items += 1;
                            continue;
                        }
                        let changed =
                            mastery::update_mastery_from_attempt(&view, &item.tags, item.correct, now);
                        for (tag, entry) in changed {
                            view.insert(tag.clone(), entry.clone());
                            touched.insert(tag, entry);
                        }
                        for tag in &item.tags {
                            let mut block = blocks
                                .get(tag)
                                .cloned()
                                .or_else(|| rewards.block_progress.get(tag).cloned())
                                .unwrap_or_default();
                            block.record(item.correct, now);
                            blocks.insert(tag.clone(), block);
                        }
                        writes.record_event(
                            key.clone(),
                            RewardEvent::new(EventKind::ExerciseMastery, now),
                        );
                        applied_items += 1;
                        if item.correct {
                            applied_correct += 1;
                        }
                    }

                    if applied_items == 0 {
                        return Ok(TxnOutcome::Skip(MasteryOutcome {
                            mastery: touched,
                            applied_items,
                            replayed_items,
                        }));
                    }

                    writes.rewards = Some(RewardsPatch {
                        mastery_by_tag: Some(touched.clone()),
                        block_progress: Some(blocks),
                        ..RewardsPatch::default()
                    });
                    writes.add_day_stats(DayStats {
                        date_key: time::day_key_paris(now),
                        answered: applied_items,
                        correct: applied_correct,
                        ..DayStats::default()
                    });

                    Ok(TxnOutcome::Commit(
                        writes,
                        MasteryOutcome {
                            mastery: touched,
                            applied_items,
                            replayed_items,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied_items > 0 {
            metrics::REWARD_EVENTS_APPLIED_TOTAL
                .with_label_values(&[EventKind::ExerciseMastery.as_str()])
                .inc_by(outcome.applied_items as u64);
        }
        if outcome.replayed_items > 0 {
            metrics::REWARD_EVENTS_REPLAYED_TOTAL
                .with_label_values(&[EventKind::ExerciseMastery.as_str()])
                .inc_by(outcome.replayed_items as u64);
        }
        tracing::info!(
            "Mastery events for session {}: applied={}, replayed={}",
            attempt.session_id,
            outcome.applied_items,
            outcome.replayed_items
        );
        Ok(outcome)
    }

    /// Re-checks every badge rule against the current document and awards
    /// what is newly satisfied. Naturally idempotent: the badge set only
    /// grows, so no event marker is needed.
    pub async fn evaluate_badges(&self, uid: &str) -> Result<Vec<String>, RewardError> {
        let scope = TxnScope::default();
        let newly = metrics::track_txn("badges", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    let rewards = snapshot.rewards_or_default();
                    let newly: Vec<String> = BADGES
                        .iter()
                        .filter(|b| b.rule.satisfied_by(&rewards) && !rewards.badges.contains(b.id))
                        .map(|b| b.id.to_string())
                        .collect();
                    if newly.is_empty() {
                        return Ok(TxnOutcome::Skip(newly));
                    }

                    let mut badges = rewards.badges.clone();
                    badges.extend(newly.iter().cloned());
                    let mut writes = WriteSet::default();
                    writes.rewards = Some(RewardsPatch {
                        badges: Some(badges),
                        ..RewardsPatch::default()
                    });
                    Ok(TxnOutcome::Commit(writes, newly))
                })
                .await
            })
            .await
        })
        .await?;

        if !newly.is_empty() {
            metrics::BADGES_AWARDED_TOTAL.inc_by(newly.len() as u64);
            tracing::info!("User {} earned badges: {:?}", uid, newly);
        }
        Ok(newly)
    }

    /// Materialized rewards document, defaults for a user never seen.
    pub async fn rewards(&self, uid: &str) -> Result<UserRewards, RewardError> {
        run_transaction(&self.store, uid, &TxnScope::default(), |snapshot| {
            Ok(TxnOutcome::Skip(snapshot.rewards_or_default()))
        })
        .await
    }

    /// Day rollups for the most recent Paris days, newest first.
    pub async fn recent_day_stats(
        &self,
        uid: &str,
        days: u32,
    ) -> Result<Vec<DayStats>, RewardError> {
        Ok(self.store.recent_day_stats(uid, days).await?)
    }
}

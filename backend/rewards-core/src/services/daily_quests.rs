use crate::content::TagTaxonomy;
use crate::metrics;
use crate::models::attempt::Attempt;
use crate::models::daily::{DailyQuest, DailyState, DayStats, QuestKind};
use crate::models::event::{keys, EventKind, RewardEvent};
use crate::models::{CollectiblesPatch, RewardsPatch};
use crate::store::{run_transaction, RewardStore, TxnOutcome, TxnScope, WriteSet};
use crate::utils::retry::{retry_if, RetryConfig};
use crate::utils::time;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use super::{collectibles, is_conflict, leveling, RewardError};

pub const SESSION_QUEST_TARGET: u32 = 1;
pub const REMEDIATION_QUEST_TARGET: u32 = 3;
pub const PROGRESS_QUEST_TARGET: u32 = 5;
pub const SESSION_QUEST_XP: u32 = 10;
pub const REMEDIATION_QUEST_XP: u32 = 15;
pub const PROGRESS_QUEST_XP: u32 = 15;
/// One-time bonus for finishing the whole board.
pub const DAILY_BONUS_XP: u64 = 25;

/// Builds the day's quest board from the user's mastery picture.
///
/// Remediation targets the weakest published tag below 50, progress the
/// strongest published tag in 30..80 (excluding the remediation pick). A
/// non-empty `priority_tags` list restricts both searches. When no tag
/// qualifies the quest falls back to generic wording with no tag bound.
pub(crate) fn build_quests(
    rewards: &crate::models::UserRewards,
    taxonomy: &dyn TagTaxonomy,
    priority_tags: &[String],
) -> Vec<DailyQuest> {
    let allowed =
        |tag: &str| priority_tags.is_empty() || priority_tags.iter().any(|t| t == tag);

    let mut remediation: Option<(&str, u32, String)> = None;
    for (tag, entry) in &rewards.mastery_by_tag {
        if !allowed(tag) || entry.score >= 50 {
            continue;
        }
        let meta = match taxonomy.tag_meta(tag) {
            Some(m) => m,
            None => continue,
        };
        // Strict comparison keeps the first (lowest tag id) on score ties.
        let better = match &remediation {
            None => true,
            Some((_, score, _)) => entry.score < *score,
        };
        if better {
            remediation = Some((tag, entry.score, meta.label));
        }
    }

    let remediation_tag = remediation.as_ref().map(|(tag, _, _)| tag.to_string());
    let mut progress: Option<(&str, u32, String)> = None;
    for (tag, entry) in &rewards.mastery_by_tag {
        if !allowed(tag) || !(30..80).contains(&entry.score) {
            continue;
        }
        if remediation_tag.as_deref() == Some(tag.as_str()) {
            continue;
        }
        let meta = match taxonomy.tag_meta(tag) {
            Some(m) => m,
            None => continue,
        };
        let better = match &progress {
            None => true,
            Some((_, score, _)) => entry.score > *score,
        };
        if better {
            progress = Some((tag, entry.score, meta.label));
        }
    }

    vec![
        DailyQuest {
            kind: QuestKind::Session,
            tag: None,
            label: "Finish one quiz session".to_string(),
            target: SESSION_QUEST_TARGET,
            xp: SESSION_QUEST_XP,
            ..DailyQuest::default()
        },
        DailyQuest {
            kind: QuestKind::Remediation,
            label: match &remediation {
                Some((_, _, label)) => {
                    format!("Get {} correct answers in {}", REMEDIATION_QUEST_TARGET, label)
                }
                None => format!("Get {} correct answers anywhere", REMEDIATION_QUEST_TARGET),
            },
            tag: remediation.map(|(tag, _, _)| tag.to_string()),
            target: REMEDIATION_QUEST_TARGET,
            xp: REMEDIATION_QUEST_XP,
            ..DailyQuest::default()
        },
        DailyQuest {
            kind: QuestKind::Progress,
            label: match &progress {
                Some((_, _, label)) => {
                    format!("Get {} correct answers in {}", PROGRESS_QUEST_TARGET, label)
                }
                None => format!("Get {} correct answers anywhere", PROGRESS_QUEST_TARGET),
            },
            tag: progress.map(|(tag, _, _)| tag.to_string()),
            target: PROGRESS_QUEST_TARGET,
            xp: PROGRESS_QUEST_XP,
            ..DailyQuest::default()
        },
    ]
}

/// Moves every open quest forward from one attempt. Returns the kinds
/// completed by this call and the quest XP they grant.
pub(crate) fn advance_quests(
    state: &mut DailyState,
    attempt: &Attempt,
    now: DateTime<Utc>,
) -> (Vec<QuestKind>, u64) {
    let stats = attempt.tag_stats();
    let session_done = attempt.is_completed();
    let total_correct = attempt.correct_count();

    let mut completed = Vec::new();
    let mut xp = 0u64;
    for quest in state.quests.iter_mut() {
        if quest.is_completed() {
            continue;
        }
        let gain = match quest.kind {
            QuestKind::Session => u32::from(session_done),
            QuestKind::Remediation | QuestKind::Progress => match &quest.tag {
                Some(tag) => stats.get(tag).map(|s| s.correct).unwrap_or(0),
                None => total_correct,
            },
        };
        if gain == 0 {
            continue;
        }
        quest.progress = quest.target.min(quest.progress + gain);
        if quest.progress >= quest.target {
            quest.completed_at = Some(now);
            completed.push(quest.kind);
            xp += u64::from(quest.xp);
        }
    }
    (completed, xp)
}

#[derive(Debug, Clone)]
pub struct DailyOutcome {
    pub state: DailyState,
    pub applied: bool,
    pub completed: Vec<QuestKind>,
    pub xp_awarded: u64,
    pub leveled_up: bool,
    pub bonus_awarded: bool,
    /// Sticker granted for completing a quest, if one was still unowned.
    pub sticker: Option<String>,
}

/// Daily quest board: per-Paris-day selection, per-session progress and the
/// once-a-day completion bonus.
pub struct DailyQuestService<S> {
    store: S,
    taxonomy: Arc<dyn TagTaxonomy>,
    retry: RetryConfig,
}

impl<S: RewardStore> DailyQuestService<S> {
    pub fn new(store: S, taxonomy: Arc<dyn TagTaxonomy>) -> Self {
        Self::with_retry(store, taxonomy, RetryConfig::default())
    }

    pub fn with_retry(store: S, taxonomy: Arc<dyn TagTaxonomy>, retry: RetryConfig) -> Self {
        Self {
            store,
            taxonomy,
            retry,
        }
    }

    /// Returns today's board, regenerating it when the stored one belongs to
    /// an earlier Paris day. The previous board is superseded wholesale.
    pub async fn ensure_daily_state(
        &self,
        uid: &str,
        priority_tags: &[String],
    ) -> Result<DailyState, RewardError> {
        retry_if(self.retry.clone(), is_conflict, || async {
            run_transaction(&self.store, uid, &TxnScope::default(), |snapshot| {
                let now = self.store.create_timestamp();
                let today = time::day_key_paris(now);
                if let Some(daily) = &snapshot.daily {
                    if daily.is_for(&today) {
                        return Ok(TxnOutcome::Skip(daily.clone()));
                    }
                }

                let rewards = snapshot.rewards_or_default();
                let state = DailyState {
                    date_key: today,
                    quests: build_quests(&rewards, self.taxonomy.as_ref(), priority_tags),
                    bonus_awarded: false,
                    updated_at: Some(now),
                };
                tracing::info!(
                    "New daily quest board: user={}, date={}",
                    uid,
                    state.date_key
                );

                let mut writes = WriteSet::default();
                writes.daily = Some(state.clone());
                Ok(TxnOutcome::Commit(writes, state))
            })
            .await
        })
        .await
    }

    /// Feeds one session into the board exactly once, keyed
    /// `daily_<sessionId>`. Rolls the board over first when it is stale.
    /// Completing a quest grants its XP and a random unowned common sticker;
    /// completing the whole board grants the daily bonus at most once per
    /// Paris day, keyed `daily_bonus_<dateKey>`.
    pub async fn update_daily_progress(
        &self,
        uid: &str,
        attempt: &Attempt,
    ) -> Result<DailyOutcome, RewardError> {
        if uid.is_empty() || attempt.session_id.is_empty() {
            return Err(RewardError::Validation(
                "uid and session_id must not be empty".to_string(),
            ));
        }

        let today = time::day_key_paris(self.store.create_timestamp());
        let daily_key = keys::daily_progress(&attempt.session_id);
        let bonus_key = keys::daily_bonus(&today);
        let scope = TxnScope::events([daily_key.clone(), bonus_key.clone()]);

        let outcome = metrics::track_txn("daily_progress", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    if snapshot.has_event(&daily_key) {
                        return Ok(TxnOutcome::Skip(DailyOutcome {
                            state: snapshot.daily.clone().unwrap_or_default(),
                            applied: false,
                            completed: Vec::new(),
                            xp_awarded: 0,
                            leveled_up: false,
                            bonus_awarded: false,
                            sticker: None,
                        }));
                    }

                    let now = self.store.create_timestamp();
                    let rewards = snapshot.rewards_or_default();
                    let mut state = match &snapshot.daily {
                        Some(daily) if daily.is_for(&today) => daily.clone(),
                        _ => DailyState {
                            date_key: today.clone(),
                            quests: build_quests(&rewards, self.taxonomy.as_ref(), &[]),
                            bonus_awarded: false,
                            updated_at: Some(now),
                        },
                    };

                    let (completed, quest_xp) = advance_quests(&mut state, attempt, now);

                    let mut sticker = None;
                    if !completed.is_empty() {
                        let mut rng = rand::rng();
                        sticker =
                            collectibles::pick_common_sticker(&rewards.collectibles.owned, &mut rng)
                                .map(|c| c.id.to_string());
                    }

                    let mut bonus = false;
                    if state.all_completed()
                        && !state.bonus_awarded
                        && !snapshot.has_event(&bonus_key)
                    {
                        bonus = true;
                        state.bonus_awarded = true;
                    }
                    state.updated_at = Some(now);

                    let total_xp = quest_xp + if bonus { DAILY_BONUS_XP } else { 0 };
                    let mut patch = RewardsPatch::default();
                    let mut leveled_up = false;
                    if total_xp > 0 {
                        let new_xp = rewards.xp + total_xp;
                        let new_level = leveling::compute_level_from_xp(new_xp as i64).level;
                        leveled_up = new_level > rewards.level;
                        patch.xp = Some(new_xp);
                        patch.level = Some(new_level);
                    }
                    if let Some(id) = &sticker {
                        let mut owned = rewards.collectibles.owned.clone();
                        owned.insert(id.clone());
                        patch.collectibles = Some(CollectiblesPatch {
                            owned: Some(owned),
                            ..CollectiblesPatch::default()
                        });
                    }

                    let mut writes = WriteSet::default();
                    if !patch.is_empty() {
                        writes.rewards = Some(patch);
                    }
                    writes.daily = Some(state.clone());
                    writes.record_event(
                        daily_key.clone(),
                        RewardEvent::with_payload(
                            EventKind::DailyProgress,
                            now,
                            json!({
                                "date_key": today,
                                "completed": completed
                                    .iter()
                                    .map(|k| k.as_str())
                                    .collect::<Vec<_>>(),
                            }),
                        ),
                    );
                    if bonus {
                        writes.record_event(
                            bonus_key.clone(),
                            RewardEvent::new(EventKind::DailyBonus, now),
                        );
                    }
                    if total_xp > 0 {
                        writes.add_day_stats(DayStats {
                            date_key: today.clone(),
                            xp: total_xp,
                            ..DayStats::default()
                        });
                    }

                    Ok(TxnOutcome::Commit(
                        writes,
                        DailyOutcome {
                            state,
                            applied: true,
                            completed,
                            xp_awarded: total_xp,
                            leveled_up,
                            bonus_awarded: bonus,
                            sticker,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied {
            metrics::record_event_applied(EventKind::DailyProgress.as_str());
            for kind in &outcome.completed {
                metrics::DAILY_QUESTS_COMPLETED_TOTAL
                    .with_label_values(&[kind.as_str()])
                    .inc();
            }
            if outcome.bonus_awarded {
                metrics::DAILY_BONUSES_AWARDED_TOTAL.inc();
                tracing::info!(
                    "Daily bonus awarded: user={}, date={}",
                    uid,
                    outcome.state.date_key
                );
            }
            if outcome.leveled_up {
                metrics::LEVEL_UPS_TOTAL.inc();
            }
        } else {
            metrics::record_event_replayed(EventKind::DailyProgress.as_str());
            tracing::info!(
                "Daily progress already counted: user={}, session={}",
                uid,
                attempt.session_id
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StaticContent;
    use crate::models::attempt::AttemptItem;
    use crate::models::{MasteryEntry, MasteryState, UserRewards};
    use chrono::TimeZone;

    fn taxonomy() -> StaticContent {
        let mut content = StaticContent::new();
        content
            .add_tag("fractions", "math", "numbers", 1)
            .add_tag("geometry", "math", "shapes", 2)
            .add_tag("spelling", "french", "words", 1);
        content
    }

    fn with_scores(scores: &[(&str, u32)]) -> UserRewards {
        let mut rewards = UserRewards::new();
        for (tag, score) in scores {
            rewards.mastery_by_tag.insert(
                tag.to_string(),
                MasteryEntry {
                    score: *score,
                    state: MasteryState::for_score(*score),
                    ..MasteryEntry::default()
                },
            );
        }
        rewards
    }

    fn item(tags: &[&str], correct: bool) -> AttemptItem {
        AttemptItem {
            exercise_id: "e".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            difficulty: 1,
            answered: true,
            correct,
            answered_at: None,
        }
    }

    #[test]
    fn remediation_targets_the_weakest_tag() {
        let rewards = with_scores(&[("fractions", 40), ("geometry", 20), ("spelling", 90)]);
        let quests = build_quests(&rewards, &taxonomy(), &[]);
        let remediation = &quests[1];
        assert_eq!(remediation.kind, QuestKind::Remediation);
        assert_eq!(remediation.tag.as_deref(), Some("geometry"));
        assert_eq!(remediation.target, 3);
        assert_eq!(remediation.xp, 15);
    }

    #[test]
    fn progress_picks_strongest_mid_band_excluding_remediation() {
        // geometry 20 is remediation; fractions 45 beats spelling 35 for progress.
        let rewards = with_scores(&[("fractions", 45), ("geometry", 20), ("spelling", 35)]);
        let quests = build_quests(&rewards, &taxonomy(), &[]);
        assert_eq!(quests[1].tag.as_deref(), Some("geometry"));
        assert_eq!(quests[2].kind, QuestKind::Progress);
        assert_eq!(quests[2].tag.as_deref(), Some("fractions"));
        assert_eq!(quests[2].target, 5);
    }

    #[test]
    fn unpublished_tags_are_never_selected() {
        let rewards = with_scores(&[("mystery_tag", 10), ("fractions", 40)]);
        let quests = build_quests(&rewards, &taxonomy(), &[]);
        assert_eq!(quests[1].tag.as_deref(), Some("fractions"));
    }

    #[test]
    fn priority_list_restricts_selection() {
        let rewards = with_scores(&[("fractions", 40), ("geometry", 20)]);
        let quests =
            build_quests(&rewards, &taxonomy(), &["fractions".to_string()]);
        assert_eq!(quests[1].tag.as_deref(), Some("fractions"));
    }

    #[test]
    fn no_candidates_fall_back_to_generic_quests() {
        let rewards = with_scores(&[("fractions", 95)]);
        let quests = build_quests(&rewards, &taxonomy(), &[]);
        assert_eq!(quests.len(), 3);
        assert!(quests[1].tag.is_none());
        assert!(quests[2].tag.is_none());
        assert_eq!(quests[1].label, "Get 3 correct answers anywhere");
    }

    #[test]
    fn quests_advance_and_cap_from_one_attempt() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let rewards = with_scores(&[("geometry", 20)]);
        let mut state = DailyState {
            date_key: "2024-04-01".to_string(),
            quests: build_quests(&rewards, &taxonomy(), &[]),
            bonus_awarded: false,
            updated_at: None,
        };

        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![
                item(&["geometry"], true),
                item(&["geometry"], true),
                item(&["geometry"], true),
                item(&["geometry"], true),
            ],
        };
        let (completed, xp) = advance_quests(&mut state, &attempt, now);

        // Session finished and remediation hit 3-of-3 despite 4 correct.
        assert!(completed.contains(&QuestKind::Session));
        assert!(completed.contains(&QuestKind::Remediation));
        assert_eq!(state.quest(QuestKind::Remediation).unwrap().progress, 3);
        assert_eq!(xp, u64::from(SESSION_QUEST_XP + REMEDIATION_QUEST_XP));
    }

    #[test]
    fn completed_quests_do_not_move_again() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let rewards = with_scores(&[("geometry", 20)]);
        let mut state = DailyState {
            date_key: "2024-04-01".to_string(),
            quests: build_quests(&rewards, &taxonomy(), &[]),
            bonus_awarded: false,
            updated_at: None,
        };

        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![item(&["geometry"], true); 3],
        };
        advance_quests(&mut state, &attempt, now);
        let (completed_again, xp_again) = advance_quests(&mut state, &attempt, now);
        assert!(completed_again.is_empty());
        assert_eq!(xp_again, 0);
    }

    #[test]
    fn untagged_quest_counts_any_correct_answer() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let rewards = with_scores(&[]);
        let mut state = DailyState {
            date_key: "2024-04-01".to_string(),
            quests: build_quests(&rewards, &taxonomy(), &[]),
            bonus_awarded: false,
            updated_at: None,
        };

        let attempt = Attempt {
            session_id: "s1".to_string(),
            items: vec![item(&["spelling"], true), item(&["spelling"], true)],
        };
        advance_quests(&mut state, &attempt, now);
        assert_eq!(state.quest(QuestKind::Remediation).unwrap().progress, 2);
        assert_eq!(state.quest(QuestKind::Progress).unwrap().progress, 2);
    }
}

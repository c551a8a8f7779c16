use crate::config::EngineConfig;
use crate::content::{ContentStore, Exercise, Reading, TagTaxonomy};
use crate::metrics;
use crate::models::attempt::Attempt;
use crate::models::daily::{DailyState, DayStats};
use crate::models::{SlotType, UserRewards};
use crate::store::mongo::MongoStore;
use crate::store::{RewardStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

pub mod collectibles;
pub mod daily_quests;
pub mod ledger;
pub mod leveling;
pub mod loot;
pub mod mastery;
pub mod question_pool;
pub mod rebuild;

pub use collectibles::{CollectibleService, UnlockOutcome};
pub use daily_quests::{DailyOutcome, DailyQuestService};
pub use ledger::{AwardOutcome, MasteryOutcome, RewardLedger};
pub use loot::{LootDrop, LootParams, MalocraftService};
pub use rebuild::{RebuildOutcome, RebuildService};

#[derive(Debug, Error)]
pub enum RewardError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("validation: {0}")]
    Validation(String),
    #[error("missing content: {0}")]
    MissingContent(String),
}

impl RewardError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RewardError::Store(e) if e.is_conflict())
    }
}

/// Retry predicate shared by the optimistic entry points. Counts every
/// conflict it approves so the metric reflects observed contention.
pub(crate) fn is_conflict(e: &RewardError) -> bool {
    if e.is_conflict() {
        metrics::record_txn_conflict();
        return true;
    }
    false
}

/// Outcome of a best-effort subsystem. A failure here must never fail or
/// roll back the primary award that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect<T> {
    Applied(T),
    Skipped,
    Failed { reason: String },
}

impl<T> SideEffect<T> {
    pub fn applied(&self) -> Option<&T> {
        match self {
            SideEffect::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, SideEffect::Applied(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SideEffect::Failed { .. })
    }
}

/// One engine per process: owns the store handle and every reward service.
/// The session orchestrator calls the primary award first, then the
/// best-effort `try_*` companions, and composes their [`SideEffect`]s into
/// its response.
pub struct Engine<S: RewardStore + Clone> {
    pub config: EngineConfig,
    content: Arc<dyn ContentStore>,
    ledger: RewardLedger<S>,
    collectibles: CollectibleService<S>,
    malocraft: MalocraftService<S>,
    rebuild: RebuildService<S>,
    daily: DailyQuestService<S>,
}

impl<S: RewardStore + Clone> Engine<S> {
    pub fn new(
        config: EngineConfig,
        store: S,
        content: Arc<dyn ContentStore>,
        taxonomy: Arc<dyn TagTaxonomy>,
    ) -> Self {
        let retry = config.retry_config();
        Self {
            ledger: RewardLedger::with_retry(store.clone(), retry.clone()),
            collectibles: CollectibleService::with_retry(store.clone(), retry.clone()),
            malocraft: MalocraftService::with_retry(
                store.clone(),
                taxonomy.clone(),
                retry.clone(),
            ),
            rebuild: RebuildService::with_retry(
                store.clone(),
                taxonomy.clone(),
                config.zone_target,
                config.biome_target,
                retry.clone(),
            ),
            daily: DailyQuestService::with_retry(store, taxonomy, retry),
            content,
            config,
        }
    }

    pub fn ledger(&self) -> &RewardLedger<S> {
        &self.ledger
    }

    pub fn collectibles(&self) -> &CollectibleService<S> {
        &self.collectibles
    }

    pub fn malocraft(&self) -> &MalocraftService<S> {
        &self.malocraft
    }

    pub fn rebuild(&self) -> &RebuildService<S> {
        &self.rebuild
    }

    pub fn daily(&self) -> &DailyQuestService<S> {
        &self.daily
    }

    // Primary award path. Errors propagate to the caller.

    pub async fn award_session_rewards(
        &self,
        uid: &str,
        session_id: &str,
        delta_xp: i64,
        delta_coins: i64,
    ) -> Result<AwardOutcome, RewardError> {
        self.ledger
            .award_session_rewards(uid, session_id, delta_xp, delta_coins)
            .await
    }

    pub async fn apply_mastery_events(
        &self,
        uid: &str,
        attempt: &Attempt,
    ) -> Result<MasteryOutcome, RewardError> {
        self.ledger.apply_mastery_events(uid, attempt).await
    }

    pub async fn rewards(&self, uid: &str) -> Result<UserRewards, RewardError> {
        self.ledger.rewards(uid).await
    }

    pub async fn recent_day_stats(
        &self,
        uid: &str,
        days: u32,
    ) -> Result<Vec<DayStats>, RewardError> {
        self.ledger.recent_day_stats(uid, days).await
    }

    pub async fn ensure_daily_state(
        &self,
        uid: &str,
        priority_tags: &[String],
    ) -> Result<DailyState, RewardError> {
        self.daily.ensure_daily_state(uid, priority_tags).await
    }

    pub async fn unlock_collectible(
        &self,
        uid: &str,
        collectible_id: &str,
        event_id: &str,
    ) -> Result<UnlockOutcome, RewardError> {
        self.collectibles
            .unlock_collectible(uid, collectible_id, event_id)
            .await
    }

    pub async fn purchase_cosmetic(
        &self,
        uid: &str,
        cosmetic_id: &str,
    ) -> Result<UserRewards, RewardError> {
        self.collectibles.purchase_cosmetic(uid, cosmetic_id).await
    }

    pub async fn equip_cosmetic(
        &self,
        uid: &str,
        slot: SlotType,
        cosmetic_id: &str,
    ) -> Result<(), RewardError> {
        self.collectibles.equip_cosmetic(uid, slot, cosmetic_id).await
    }

    pub async fn equip_avatar(&self, uid: &str, collectible_id: &str) -> Result<(), RewardError> {
        self.collectibles.equip_avatar(uid, collectible_id).await
    }

    // Best-effort companions. Failures are logged and reported as data.

    pub async fn try_award_malocraft_loot(
        &self,
        uid: &str,
        params: &LootParams,
    ) -> SideEffect<Option<LootDrop>> {
        match self.malocraft.award_malocraft_loot(uid, params).await {
            Ok(outcome) if outcome.applied => SideEffect::Applied(outcome.drop),
            Ok(_) => SideEffect::Skipped,
            Err(e) => {
                tracing::warn!("Malocraft loot failed for user {}: {}", uid, e);
                SideEffect::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn try_evaluate_badges(&self, uid: &str) -> SideEffect<Vec<String>> {
        match self.ledger.evaluate_badges(uid).await {
            Ok(newly) if !newly.is_empty() => SideEffect::Applied(newly),
            Ok(_) => SideEffect::Skipped,
            Err(e) => {
                tracing::warn!("Badge evaluation failed for user {}: {}", uid, e);
                SideEffect::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn try_update_daily_progress(
        &self,
        uid: &str,
        attempt: &Attempt,
    ) -> SideEffect<DailyOutcome> {
        match self.daily.update_daily_progress(uid, attempt).await {
            Ok(outcome) if outcome.applied => SideEffect::Applied(outcome),
            Ok(_) => SideEffect::Skipped,
            Err(e) => {
                tracing::warn!("Daily progress sync failed for user {}: {}", uid, e);
                SideEffect::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn apply_zone_rebuild(
        &self,
        uid: &str,
        session_id: &str,
        subject: &str,
        theme: &str,
        stats: &std::collections::BTreeMap<String, crate::models::attempt::SessionTagStats>,
    ) -> Result<RebuildOutcome, RewardError> {
        self.rebuild
            .apply_zone_rebuild(uid, session_id, subject, theme, stats)
            .await
    }

    pub async fn apply_biome_rebuild(
        &self,
        uid: &str,
        session_id: &str,
        subject: &str,
        stats: &std::collections::BTreeMap<String, crate::models::attempt::SessionTagStats>,
    ) -> Result<RebuildOutcome, RewardError> {
        self.rebuild
            .apply_biome_rebuild(uid, session_id, subject, stats)
            .await
    }

    // Content selection. Pure of user state, so no transaction is involved.

    pub fn select_rebuild_zone_questions(
        &self,
        zone_tags: &[String],
        desired_count: usize,
        allow_harder: bool,
    ) -> Vec<Exercise> {
        let mut rng = rand::rng();
        question_pool::select_rebuild_zone_questions(
            self.content.as_ref(),
            zone_tags,
            desired_count,
            allow_harder,
            &mut rng,
        )
    }

    pub fn select_zone_readings(&self, theme: &str, desired_count: usize) -> Vec<Reading> {
        let mut rng = rand::rng();
        question_pool::select_zone_readings(self.content.as_ref(), theme, desired_count, &mut rng)
    }
}

impl Engine<MongoStore> {
    /// Connects to MongoDB and builds the production engine.
    pub async fn connect(
        config: EngineConfig,
        content: Arc<dyn ContentStore>,
        taxonomy: Arc<dyn TagTaxonomy>,
    ) -> Result<Self, RewardError> {
        tracing::info!(
            "Connecting to MongoDB database {}...",
            config.mongo_database
        );
        let store = MongoStore::connect(&config.mongo_uri, &config.mongo_database).await?;
        store.ensure_indexes().await?;
        tracing::info!("MongoDB connection established successfully");
        Ok(Self::new(config, store, content, taxonomy))
    }
}

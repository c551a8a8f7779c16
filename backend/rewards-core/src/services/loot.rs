use crate::content::TagTaxonomy;
use crate::metrics;
use crate::models::catalog::{self, LootItem, LootKind, Rarity, BIOME_MILESTONES};
use crate::models::event::{keys, EventKind, RewardEvent};
use crate::models::{CollectiblesPatch, MalocraftPatch, MasteryState, RewardsPatch, UserRewards};
use crate::store::{run_transaction, RewardStore, TxnOutcome, TxnScope, WriteSet};
use crate::utils::retry::{retry_if, RetryConfig};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::collectibles::MAX_ROLL_ATTEMPTS;
use super::{is_conflict, RewardError};

/// Minimum session XP for a standard loot roll.
pub const LOOT_XP_GATE: i64 = 10;
/// Minimum accuracy for a standard loot roll.
pub const LOOT_ACCURACY_GATE: f64 = 0.5;
/// Accuracy from which the boosted rarity table applies.
pub const BOOST_ACCURACY: f64 = 0.8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpeditionKind {
    Mine,
    Build,
    Craft,
}

impl ExpeditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpeditionKind::Mine => "mine",
            ExpeditionKind::Build => "build",
            ExpeditionKind::Craft => "craft",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LootParams {
    pub session_id: String,
    /// Subject the expedition ran in, e.g. "math".
    pub biome: String,
    pub expedition: ExpeditionKind,
    pub delta_xp: i64,
    pub correct_rate: f64,
    pub leveled_up: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LootDrop {
    pub loot_id: String,
    pub label: String,
    pub rarity: Rarity,
    pub kind: LootKind,
    /// Set when the drop is a biome milestone trophy.
    pub milestone: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LootOutcome {
    pub applied: bool,
    /// The roll ran but the session did not qualify.
    pub gated: bool,
    pub drop: Option<LootDrop>,
}

fn roll_rarity(boosted: bool, rng: &mut impl Rng) -> Rarity {
    let (common, rare) = if boosted {
        (Rarity::Common.boosted_weight(), Rarity::Rare.boosted_weight())
    } else {
        (Rarity::Common.weight(), Rarity::Rare.weight())
    };
    let draw: f64 = rng.random();
    if draw < common {
        Rarity::Common
    } else if draw < common + rare {
        Rarity::Rare
    } else {
        Rarity::Epic
    }
}

/// Rolls one unowned loot item, same bucket-then-fallback shape as the
/// collectible roll. `None` once everything is owned.
pub fn roll_loot(
    owned: &BTreeSet<String>,
    boosted: bool,
    rng: &mut impl Rng,
) -> Option<&'static LootItem> {
    for _ in 0..MAX_ROLL_ATTEMPTS {
        let rarity = roll_rarity(boosted, rng);
        let pool: Vec<&'static LootItem> = catalog::LOOT_ITEMS
            .iter()
            .filter(|l| l.rarity == rarity && !owned.contains(l.id))
            .collect();
        if let Some(pick) = pool.choose(rng) {
            return Some(pick);
        }
    }
    let commons: Vec<&'static LootItem> = catalog::LOOT_ITEMS
        .iter()
        .filter(|l| l.rarity == Rarity::Common && !owned.contains(l.id))
        .collect();
    commons.choose(rng).copied()
}

/// Mastered tags whose curriculum subject is `biome`. Unpublished tags do
/// not count.
pub(crate) fn mastered_in_biome(
    rewards: &UserRewards,
    taxonomy: &dyn TagTaxonomy,
    biome: &str,
) -> u32 {
    rewards
        .mastery_by_tag
        .iter()
        .filter(|(tag, entry)| {
            entry.state == MasteryState::Mastered
                && taxonomy
                    .tag_meta(tag)
                    .map(|m| m.subject == biome)
                    .unwrap_or(false)
        })
        .count() as u32
}

/// Lowest crossed milestone threshold not yet awarded, if any. A session
/// awards at most one trophy, so a large mastery jump walks the remaining
/// rungs on subsequent sessions instead of skipping them.
pub(crate) fn next_milestone(mastered: u32, already_awarded: u32) -> Option<u32> {
    BIOME_MILESTONES
        .iter()
        .find(|t| mastered >= **t && **t > already_awarded)
        .copied()
}

/// Malocraft expedition loot: milestone trophies first, otherwise a gated
/// random drop. One roll per session, marker `malocraftLoot:<sessionId>`.
pub struct MalocraftService<S> {
    store: S,
    taxonomy: Arc<dyn TagTaxonomy>,
    retry: RetryConfig,
}

impl<S: RewardStore> MalocraftService<S> {
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

    pub async fn award_malocraft_loot(
        &self,
        uid: &str,
        params: &LootParams,
    ) -> Result<LootOutcome, RewardError> {
        if uid.is_empty() || params.session_id.is_empty() || params.biome.is_empty() {
            return Err(RewardError::Validation(
                "uid, session_id and biome must not be empty".to_string(),
            ));
        }
        if !params.correct_rate.is_finite() || !(0.0..=1.0).contains(&params.correct_rate) {
            return Err(RewardError::Validation(format!(
                "correct_rate out of range: {}",
                params.correct_rate
            )));
        }

        let key = keys::malocraft_loot(&params.session_id);
        let scope = TxnScope::events([key.clone()]);

        let outcome = metrics::track_txn("malocraft_loot", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    if snapshot.has_event(&key) {
                        return Ok(TxnOutcome::Skip(LootOutcome {
                            applied: false,
                            gated: false,
                            drop: None,
                        }));
                    }

                    let now = self.store.create_timestamp();
                    let rewards = snapshot.rewards_or_default();
                    let mastered =
                        mastered_in_biome(&rewards, self.taxonomy.as_ref(), &params.biome);
                    let already = rewards
                        .malocraft
                        .biome_milestones
                        .get(&params.biome)
                        .copied()
                        .unwrap_or(0);

                    if let Some(milestone) = next_milestone(mastered, already) {
                        let trophy = catalog::trophy_id(&params.biome, milestone);
                        let rarity = catalog::trophy_rarity(milestone);
                        let mut owned = rewards.malocraft.owned_loot_ids.clone();
                        owned.insert(trophy.clone());

                        let mut writes = WriteSet::default();
                        writes.rewards = Some(RewardsPatch {
                            malocraft: Some(MalocraftPatch {
                                owned_loot_ids: Some(owned),
                                biome_milestones: Some(BTreeMap::from([(
                                    params.biome.clone(),
                                    milestone,
                                )])),
                                ..MalocraftPatch::default()
                            }),
                            ..RewardsPatch::default()
                        });
                        writes.record_event(
                            key.clone(),
                            RewardEvent::with_payload(
                                EventKind::MalocraftLoot,
                                now,
                                json!({ "milestone": milestone, "loot_id": trophy }),
                            ),
                        );

                        let drop = LootDrop {
                            loot_id: trophy,
                            label: format!("Trophy of {}", params.biome),
                            rarity,
                            kind: LootKind::Trophy,
                            milestone: Some(milestone),
                        };
                        return Ok(TxnOutcome::Commit(
                            writes,
                            LootOutcome {
                                applied: true,
                                gated: false,
                                drop: Some(drop),
                            },
                        ));
                    }

                    if params.delta_xp < LOOT_XP_GATE && params.correct_rate < LOOT_ACCURACY_GATE {
                        return Ok(TxnOutcome::Skip(LootOutcome {
                            applied: false,
                            gated: true,
                            drop: None,
                        }));
                    }

                    let boosted = params.correct_rate >= BOOST_ACCURACY
                        || params.leveled_up
                        || params.expedition == ExpeditionKind::Craft;
                    let mut rng = rand::rng();
                    let rolled = roll_loot(&rewards.malocraft.owned_loot_ids, boosted, &mut rng);

                    let mut writes = WriteSet::default();
                    let mut patch = RewardsPatch::default();
                    if let Some(item) = rolled {
                        let mut owned = rewards.malocraft.owned_loot_ids.clone();
                        owned.insert(item.id.to_string());
                        patch.malocraft = Some(MalocraftPatch {
                            owned_loot_ids: Some(owned),
                            ..MalocraftPatch::default()
                        });
                        if item.kind == LootKind::Avatar {
                            let mut collected = rewards.collectibles.owned.clone();
                            collected.insert(item.id.to_string());
                            patch.collectibles = Some(CollectiblesPatch {
                                owned: Some(collected),
                                ..CollectiblesPatch::default()
                            });
                        }
                        writes.rewards = Some(patch);
                    }
                    writes.record_event(
                        key.clone(),
                        RewardEvent::with_payload(
                            EventKind::MalocraftLoot,
                            now,
                            json!({
                                "boosted": boosted,
                                "loot_id": rolled.map(|l| l.id),
                            }),
                        ),
                    );

                    let drop = rolled.map(|item| LootDrop {
                        loot_id: item.id.to_string(),
                        label: item.label.to_string(),
                        rarity: item.rarity,
                        kind: item.kind,
                        milestone: None,
                    });
                    Ok(TxnOutcome::Commit(
                        writes,
                        LootOutcome {
                            applied: true,
                            gated: false,
                            drop,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied {
            metrics::record_event_applied(EventKind::MalocraftLoot.as_str());
            if let Some(drop) = &outcome.drop {
                metrics::LOOT_AWARDED_TOTAL
                    .with_label_values(&[drop.rarity.as_str()])
                    .inc();
                tracing::info!(
                    "Malocraft loot for user {}: session={}, loot={}, rarity={}",
                    uid,
                    params.session_id,
                    drop.loot_id,
                    drop.rarity.as_str()
                );
            } else {
                tracing::info!(
                    "Malocraft roll came up empty for user {}: session={}",
                    uid,
                    params.session_id
                );
            }
        } else if outcome.gated {
            tracing::info!(
                "Session below loot gate for user {}: session={}, xp={}, accuracy={:.2}",
                uid,
                params.session_id,
                params.delta_xp,
                params.correct_rate
            );
        } else {
            metrics::record_event_replayed(EventKind::MalocraftLoot.as_str());
        }
        Ok(outcome)
    }

    /// Equips an owned avatar-kind loot item in the malocraft world.
    pub async fn equip_malocraft_avatar(
        &self,
        uid: &str,
        loot_id: &str,
    ) -> Result<(), RewardError> {
        let item = catalog::loot_item(loot_id)
            .ok_or_else(|| RewardError::Validation(format!("unknown loot item: {}", loot_id)))?;
        if item.kind != LootKind::Avatar {
            return Err(RewardError::Validation(format!(
                "loot item is not an avatar: {}",
                loot_id
            )));
        }

        retry_if(self.retry.clone(), is_conflict, || async {
            run_transaction(&self.store, uid, &TxnScope::default(), |snapshot| {
                let rewards = snapshot.rewards_or_default();
                if !rewards.malocraft.owned_loot_ids.contains(loot_id) {
                    return Err(RewardError::Validation(format!(
                        "loot item not owned: {}",
                        loot_id
                    )));
                }
                if rewards.malocraft.equipped_avatar_id.as_deref() == Some(loot_id) {
                    return Ok(TxnOutcome::Skip(()));
                }

                let mut writes = WriteSet::default();
                writes.rewards = Some(RewardsPatch {
                    malocraft: Some(MalocraftPatch {
                        equipped_avatar_id: Some(loot_id.to_string()),
                        ..MalocraftPatch::default()
                    }),
                    ..RewardsPatch::default()
                });
                Ok(TxnOutcome::Commit(writes, ()))
            })
            .await
        })
        .await
    }
}

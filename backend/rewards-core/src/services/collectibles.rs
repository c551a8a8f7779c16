use crate::metrics;
use crate::models::catalog::{self, Collectible, CollectibleKind, LootKind, Rarity};
use crate::models::event::{keys, EventKind, RewardEvent};
use crate::models::{CollectiblesPatch, RewardsPatch, SlotType, UserRewards};
use crate::store::{run_transaction, RewardStore, TxnOutcome, TxnScope, WriteSet};
use crate::utils::retry::{retry_if, RetryConfig};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use super::{is_conflict, RewardError};

/// Rarity bucket draws before falling back to any unowned common.
pub const MAX_ROLL_ATTEMPTS: usize = 4;

fn roll_rarity(rng: &mut impl Rng) -> Rarity {
    let draw: f64 = rng.random();
    let mut cut = Rarity::Common.weight();
    if draw < cut {
        return Rarity::Common;
    }
    cut += Rarity::Rare.weight();
    if draw < cut {
        return Rarity::Rare;
    }
    Rarity::Epic
}

/// Rolls one collectible the user does not own yet. Up to
/// [`MAX_ROLL_ATTEMPTS`] weighted rarity draws, each trying to pick an
/// unowned item of the drawn rarity, then any unowned common. `None` once
/// the whole catalog is owned.
pub fn roll_collectible(
    owned: &BTreeSet<String>,
    rng: &mut impl Rng,
) -> Option<&'static Collectible> {
    for _ in 0..MAX_ROLL_ATTEMPTS {
        let rarity = roll_rarity(rng);
        let pool: Vec<&'static Collectible> = catalog::COLLECTIBLES
            .iter()
            .filter(|c| c.rarity == rarity && !owned.contains(c.id))
            .collect();
        if let Some(pick) = pool.choose(rng) {
            return Some(pick);
        }
    }
    let commons: Vec<&'static Collectible> = catalog::COLLECTIBLES
        .iter()
        .filter(|c| c.rarity == Rarity::Common && !owned.contains(c.id))
        .collect();
    commons.choose(rng).copied()
}

/// Random unowned common sticker, for quest completion rewards.
pub fn pick_common_sticker(
    owned: &BTreeSet<String>,
    rng: &mut impl Rng,
) -> Option<&'static Collectible> {
    let stickers: Vec<&'static Collectible> = catalog::COLLECTIBLES
        .iter()
        .filter(|c| {
            c.kind == CollectibleKind::Sticker
                && c.rarity == Rarity::Common
                && !owned.contains(c.id)
        })
        .collect();
    stickers.choose(rng).copied()
}

#[derive(Debug, Clone)]
pub struct UnlockOutcome {
    pub collectible_id: String,
    pub applied: bool,
    /// The unlock also became the player's first equipped avatar.
    pub equipped_avatar: bool,
}

/// Collectible ownership and the cosmetics shop.
pub struct CollectibleService<S> {
    store: S,
    retry: RetryConfig,
}

impl<S: RewardStore> CollectibleService<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryConfig::default())
    }

    pub fn with_retry(store: S, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Grants a collectible exactly once per `(collectible, event)` pair.
    /// The first avatar-kind unlock is auto-equipped.
    pub async fn unlock_collectible(
        &self,
        uid: &str,
        collectible_id: &str,
        event_id: &str,
    ) -> Result<UnlockOutcome, RewardError> {
        let collectible = catalog::collectible(collectible_id).ok_or_else(|| {
            RewardError::Validation(format!("unknown collectible: {}", collectible_id))
        })?;
        if event_id.is_empty() {
            return Err(RewardError::Validation("event_id must not be empty".to_string()));
        }

        let key = keys::collectible_unlock(collectible_id, event_id);
        let scope = TxnScope::events([key.clone()]);

        let outcome = metrics::track_txn("collectible_unlock", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    let rewards = snapshot.rewards_or_default();
                    if snapshot.has_event(&key) || rewards.collectibles.owned.contains(collectible_id)
                    {
                        return Ok(TxnOutcome::Skip(UnlockOutcome {
                            collectible_id: collectible_id.to_string(),
                            applied: false,
                            equipped_avatar: false,
                        }));
                    }

                    let now = self.store.create_timestamp();
                    let mut owned = rewards.collectibles.owned.clone();
                    owned.insert(collectible_id.to_string());
                    let equip_avatar = collectible.kind == CollectibleKind::Avatar
                        && rewards.collectibles.equipped_avatar_id.is_none();

                    let mut writes = WriteSet::default();
                    writes.rewards = Some(RewardsPatch {
                        collectibles: Some(CollectiblesPatch {
                            owned: Some(owned),
                            equipped_avatar_id: equip_avatar
                                .then(|| collectible_id.to_string()),
                        }),
                        ..RewardsPatch::default()
                    });
                    writes.record_event(
                        key.clone(),
                        RewardEvent::with_payload(
                            EventKind::CollectibleUnlock,
                            now,
                            json!({ "collectible_id": collectible_id }),
                        ),
                    );

                    Ok(TxnOutcome::Commit(
                        writes,
                        UnlockOutcome {
                            collectible_id: collectible_id.to_string(),
                            applied: true,
                            equipped_avatar: equip_avatar,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied {
            metrics::record_event_applied(EventKind::CollectibleUnlock.as_str());
            metrics::COLLECTIBLES_AWARDED_TOTAL
                .with_label_values(&[collectible.rarity.as_str()])
                .inc();
            tracing::info!(
                "Unlocked collectible for user {}: id={}, rarity={}",
                uid,
                collectible_id,
                collectible.rarity.as_str()
            );
        } else {
            metrics::record_event_replayed(EventKind::CollectibleUnlock.as_str());
        }
        Ok(outcome)
    }

    /// Buys a cosmetic from the catalog with coins. Unknown ids, repeat
    /// purchases and short balances fail validation before any write.
    pub async fn purchase_cosmetic(
        &self,
        uid: &str,
        cosmetic_id: &str,
    ) -> Result<UserRewards, RewardError> {
        let cosmetic = catalog::cosmetic(cosmetic_id).ok_or_else(|| {
            RewardError::Validation(format!("unknown cosmetic: {}", cosmetic_id))
        })?;

        let rewards = retry_if(self.retry.clone(), is_conflict, || async {
            run_transaction(&self.store, uid, &TxnScope::default(), |snapshot| {
                let mut rewards = snapshot.rewards_or_default();
                if rewards.owned_cosmetics.get(cosmetic_id).copied().unwrap_or(false) {
                    return Err(RewardError::Validation(format!(
                        "cosmetic already owned: {}",
                        cosmetic_id
                    )));
                }
                if rewards.coins < cosmetic.price {
                    return Err(RewardError::Validation(format!(
                        "insufficient coins for {}: have {}, need {}",
                        cosmetic_id, rewards.coins, cosmetic.price
                    )));
                }

                rewards.coins -= cosmetic.price;
                rewards.owned_cosmetics.insert(cosmetic_id.to_string(), true);

                let mut writes = WriteSet::default();
                writes.rewards = Some(RewardsPatch {
                    coins: Some(rewards.coins),
                    owned_cosmetics: Some(BTreeMap::from([(cosmetic_id.to_string(), true)])),
                    ..RewardsPatch::default()
                });
                Ok(TxnOutcome::Commit(writes, rewards))
            })
            .await
        })
        .await?;

        tracing::info!(
            "Cosmetic purchased: user={}, id={}, price={}, coins_left={}",
            uid,
            cosmetic_id,
            cosmetic.price,
            rewards.coins
        );
        Ok(rewards)
    }

    /// Equips an owned cosmetic into its slot. The slot must match the
    /// catalog entry.
    pub async fn equip_cosmetic(
        &self,
        uid: &str,
        slot: SlotType,
        cosmetic_id: &str,
    ) -> Result<(), RewardError> {
        let cosmetic = catalog::cosmetic(cosmetic_id).ok_or_else(|| {
            RewardError::Validation(format!("unknown cosmetic: {}", cosmetic_id))
        })?;
        if cosmetic.slot != slot {
            return Err(RewardError::Validation(format!(
                "cosmetic {} goes in slot {}, not {}",
                cosmetic_id,
                cosmetic.slot.as_str(),
                slot.as_str()
            )));
        }

        retry_if(self.retry.clone(), is_conflict, || async {
            run_transaction(&self.store, uid, &TxnScope::default(), |snapshot| {
                let rewards = snapshot.rewards_or_default();
                if !rewards.owned_cosmetics.get(cosmetic_id).copied().unwrap_or(false) {
                    return Err(RewardError::Validation(format!(
                        "cosmetic not owned: {}",
                        cosmetic_id
                    )));
                }
                if rewards.equipped_cosmetics.get(&slot).map(String::as_str)
                    == Some(cosmetic_id)
                {
                    return Ok(TxnOutcome::Skip(()));
                }

                let mut writes = WriteSet::default();
                writes.rewards = Some(RewardsPatch {
                    equipped_cosmetics: Some(BTreeMap::from([(
                        slot,
                        cosmetic_id.to_string(),
                    )])),
                    ..RewardsPatch::default()
                });
                Ok(TxnOutcome::Commit(writes, ()))
            })
            .await
        })
        .await
    }

    /// Equips an owned avatar collectible (including avatar-kind loot, which
    /// lands in the same ownership set).
    pub async fn equip_avatar(&self, uid: &str, collectible_id: &str) -> Result<(), RewardError> {
        let is_avatar = catalog::collectible(collectible_id)
            .map(|c| c.kind == CollectibleKind::Avatar)
            .or_else(|| catalog::loot_item(collectible_id).map(|l| l.kind == LootKind::Avatar))
            .unwrap_or(false);
        if !is_avatar {
            return Err(RewardError::Validation(format!(
                "not an avatar: {}",
                collectible_id
            )));
        }

        retry_if(self.retry.clone(), is_conflict, || async {
            run_transaction(&self.store, uid, &TxnScope::default(), |snapshot| {
                let rewards = snapshot.rewards_or_default();
                if !rewards.collectibles.owned.contains(collectible_id) {
                    return Err(RewardError::Validation(format!(
                        "avatar not owned: {}",
                        collectible_id
                    )));
                }
                if rewards.collectibles.equipped_avatar_id.as_deref() == Some(collectible_id) {
                    return Ok(TxnOutcome::Skip(()));
                }

                let mut writes = WriteSet::default();
                writes.rewards = Some(RewardsPatch {
                    collectibles: Some(CollectiblesPatch {
                        equipped_avatar_id: Some(collectible_id.to_string()),
                        ..CollectiblesPatch::default()
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod attempt;
pub mod catalog;
pub mod daily;
pub mod event;

/// Per-user rewards document. Every field is optional on the wire so a
/// document written by partial patches still deserializes; missing fields
/// fall back to the defaults of a fresh player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserRewards {
    pub xp: u64,
    pub level: u32,
    pub coins: u64,
    pub badges: BTreeSet<String>,
    pub mastery_by_tag: BTreeMap<String, MasteryEntry>,
    pub collectibles: CollectibleState,
    pub malocraft: MalocraftState,
    pub zone_rebuild_progress: BTreeMap<String, RebuildEntry>,
    pub biome_rebuild_progress: BTreeMap<String, RebuildEntry>,
    pub owned_cosmetics: BTreeMap<String, bool>,
    pub equipped_cosmetics: BTreeMap<SlotType, String>,
    pub block_progress: BTreeMap<String, BlockProgressEntry>,
}

impl Default for UserRewards {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            coins: 0,
            badges: BTreeSet::new(),
            mastery_by_tag: BTreeMap::new(),
            collectibles: CollectibleState::default(),
            malocraft: MalocraftState::default(),
            zone_rebuild_progress: BTreeMap::new(),
            biome_rebuild_progress: BTreeMap::new(),
            owned_cosmetics: BTreeMap::new(),
            equipped_cosmetics: BTreeMap::new(),
            block_progress: BTreeMap::new(),
        }
    }
}

impl UserRewards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags currently in the mastered band.
    pub fn mastered_tag_count(&self) -> u32 {
        self.mastery_by_tag
            .values()
            .filter(|m| m.state == MasteryState::Mastered)
            .count() as u32
    }

    pub fn rebuilt_zone_count(&self) -> u32 {
        self.zone_rebuild_progress
            .values()
            .filter(|z| z.rebuilt_at.is_some())
            .count() as u32
    }

    pub fn rebuilt_biome_count(&self) -> u32 {
        self.biome_rebuild_progress
            .values()
            .filter(|b| b.rebuilt_at.is_some())
            .count() as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MasteryEntry {
    pub score: u32,
    pub state: MasteryState,
    pub attempts: u32,
    pub correct: u32,
    pub last_practiced_at: Option<DateTime<Utc>>,
}

impl Default for MasteryEntry {
    fn default() -> Self {
        Self {
            score: 0,
            state: MasteryState::Discovering,
            attempts: 0,
            correct: 0,
            last_practiced_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MasteryState {
    Discovering,
    Progressing,
    Mastered,
}

impl MasteryState {
    pub fn for_score(score: u32) -> Self {
        match score {
            0..=49 => MasteryState::Discovering,
            50..=79 => MasteryState::Progressing,
            _ => MasteryState::Mastered,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryState::Discovering => "discovering",
            MasteryState::Progressing => "progressing",
            MasteryState::Mastered => "mastered",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectibleState {
    pub owned: BTreeSet<String>,
    pub equipped_avatar_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MalocraftState {
    pub owned_loot_ids: BTreeSet<String>,
    /// Highest milestone threshold already rewarded, per biome.
    pub biome_milestones: BTreeMap<String, u32>,
    pub equipped_avatar_id: Option<String>,
}

/// Rebuild progress of one zone or biome. `rebuilt_at` is one-way: once set
/// it never clears, even if targets later change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RebuildEntry {
    pub correct_count: u32,
    pub target: u32,
    pub rebuilt_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for RebuildEntry {
    fn default() -> Self {
        Self {
            correct_count: 0,
            target: 0,
            rebuilt_at: None,
            updated_at: None,
        }
    }
}

impl RebuildEntry {
    pub fn is_rebuilt(&self) -> bool {
        self.rebuilt_at.is_some()
    }
}

/// Per-tag attempt rollup, updated alongside mastery. The success rate is
/// recomputed from the stored rate and attempt count, so the entry stays two
/// numbers wide no matter how long the history grows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlockProgressEntry {
    pub attempts: u32,
    pub success_rate: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BlockProgressEntry {
    /// Folds one more attempt into the rollup.
    pub fn record(&mut self, correct: bool, at: DateTime<Utc>) {
        let prior_correct = (self.success_rate * f64::from(self.attempts)).round();
        let correct_total = prior_correct + if correct { 1.0 } else { 0.0 };
        self.attempts += 1;
        self.success_rate = correct_total / f64::from(self.attempts);
        self.updated_at = Some(at);
    }
}

/// Cosmetic slot on the player avatar. Serialized as a plain string so it
/// can key the equipped-cosmetics map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Hat,
    Outfit,
    Background,
    Frame,
}

impl SlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotType::Hat => "hat",
            SlotType::Outfit => "outfit",
            SlotType::Background => "background",
            SlotType::Frame => "frame",
        }
    }
}

/// Partial update of a rewards document with merge semantics: scalars
/// overwrite, map fields merge key-by-key, set fields replace with the
/// union the caller computed inside the transaction, omitted fields are
/// left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RewardsPatch {
    pub xp: Option<u64>,
    pub level: Option<u32>,
    pub coins: Option<u64>,
    pub badges: Option<BTreeSet<String>>,
    pub mastery_by_tag: Option<BTreeMap<String, MasteryEntry>>,
    pub collectibles: Option<CollectiblesPatch>,
    pub malocraft: Option<MalocraftPatch>,
    pub zone_rebuild_progress: Option<BTreeMap<String, RebuildEntry>>,
    pub biome_rebuild_progress: Option<BTreeMap<String, RebuildEntry>>,
    pub owned_cosmetics: Option<BTreeMap<String, bool>>,
    pub equipped_cosmetics: Option<BTreeMap<SlotType, String>>,
    pub block_progress: Option<BTreeMap<String, BlockProgressEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectiblesPatch {
    pub owned: Option<BTreeSet<String>>,
    pub equipped_avatar_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MalocraftPatch {
    pub owned_loot_ids: Option<BTreeSet<String>>,
    pub biome_milestones: Option<BTreeMap<String, u32>>,
    pub equipped_avatar_id: Option<String>,
}

impl RewardsPatch {
    pub fn is_empty(&self) -> bool {
        self == &RewardsPatch::default()
    }

    /// Applies the patch to an in-memory document. The store bindings follow
    /// the exact same semantics (the Mongo binding translates each set field
    /// into a dotted-path `$set`).
    pub fn apply_to(&self, rewards: &mut UserRewards) {
        if let Some(xp) = self.xp {
            rewards.xp = xp;
        }
        if let Some(level) = self.level {
            rewards.level = level;
        }
        if let Some(coins) = self.coins {
            rewards.coins = coins;
        }
        if let Some(badges) = &self.badges {
            rewards.badges = badges.clone();
        }
        if let Some(mastery) = &self.mastery_by_tag {
            for (tag, entry) in mastery {
                rewards.mastery_by_tag.insert(tag.clone(), entry.clone());
            }
        }
        if let Some(collectibles) = &self.collectibles {
            if let Some(owned) = &collectibles.owned {
                rewards.collectibles.owned = owned.clone();
            }
            if let Some(avatar) = &collectibles.equipped_avatar_id {
                rewards.collectibles.equipped_avatar_id = Some(avatar.clone());
            }
        }
        if let Some(malocraft) = &self.malocraft {
            if let Some(owned) = &malocraft.owned_loot_ids {
                rewards.malocraft.owned_loot_ids = owned.clone();
            }
            if let Some(milestones) = &malocraft.biome_milestones {
                for (biome, tier) in milestones {
                    rewards.malocraft.biome_milestones.insert(biome.clone(), *tier);
                }
            }
            if let Some(avatar) = &malocraft.equipped_avatar_id {
                rewards.malocraft.equipped_avatar_id = Some(avatar.clone());
            }
        }
        if let Some(zones) = &self.zone_rebuild_progress {
            for (key, entry) in zones {
                rewards.zone_rebuild_progress.insert(key.clone(), entry.clone());
            }
        }
        if let Some(biomes) = &self.biome_rebuild_progress {
            for (key, entry) in biomes {
                rewards.biome_rebuild_progress.insert(key.clone(), entry.clone());
            }
        }
        if let Some(cosmetics) = &self.owned_cosmetics {
            for (id, owned) in cosmetics {
                rewards.owned_cosmetics.insert(id.clone(), *owned);
            }
        }
        if let Some(equipped) = &self.equipped_cosmetics {
            for (slot, id) in equipped {
                rewards.equipped_cosmetics.insert(*slot, id.clone());
            }
        }
        if let Some(blocks) = &self.block_progress {
            for (tag, entry) in blocks {
                rewards.block_progress.insert(tag.clone(), entry.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_overwrites_scalars_and_keeps_siblings() {
        let mut rewards = UserRewards::new();
        rewards.coins = 40;
        rewards.badges.insert("first_steps".to_string());

        let patch = RewardsPatch {
            xp: Some(120),
            level: Some(2),
            ..RewardsPatch::default()
        };
        patch.apply_to(&mut rewards);

        assert_eq!(rewards.xp, 120);
        assert_eq!(rewards.level, 2);
        assert_eq!(rewards.coins, 40);
        assert!(rewards.badges.contains("first_steps"));
    }

    #[test]
    fn map_fields_merge_key_by_key() {
        let mut rewards = UserRewards::new();
        rewards.mastery_by_tag.insert(
            "fractions".to_string(),
            MasteryEntry {
                score: 42,
                ..MasteryEntry::default()
            },
        );

        let mut patched = BTreeMap::new();
        patched.insert(
            "geometry".to_string(),
            MasteryEntry {
                score: 8,
                ..MasteryEntry::default()
            },
        );
        let patch = RewardsPatch {
            mastery_by_tag: Some(patched),
            ..RewardsPatch::default()
        };
        patch.apply_to(&mut rewards);

        assert_eq!(rewards.mastery_by_tag.len(), 2);
        assert_eq!(rewards.mastery_by_tag["fractions"].score, 42);
        assert_eq!(rewards.mastery_by_tag["geometry"].score, 8);
    }

    #[test]
    fn nested_patch_touches_only_set_fields() {
        let mut rewards = UserRewards::new();
        rewards.malocraft.owned_loot_ids.insert("gear_pickaxe".to_string());
        rewards.malocraft.equipped_avatar_id = Some("avatar_miner".to_string());

        let patch = RewardsPatch {
            malocraft: Some(MalocraftPatch {
                biome_milestones: Some(BTreeMap::from([("forest".to_string(), 3)])),
                ..MalocraftPatch::default()
            }),
            ..RewardsPatch::default()
        };
        patch.apply_to(&mut rewards);

        assert!(rewards.malocraft.owned_loot_ids.contains("gear_pickaxe"));
        assert_eq!(
            rewards.malocraft.equipped_avatar_id.as_deref(),
            Some("avatar_miner")
        );
        assert_eq!(rewards.malocraft.biome_milestones["forest"], 3);
    }

    #[test]
    fn partial_document_deserializes_with_defaults() {
        let rewards: UserRewards = serde_json::from_str(r#"{"xp": 24, "coins": 10}"#).unwrap();
        assert_eq!(rewards.xp, 24);
        assert_eq!(rewards.coins, 10);
        assert_eq!(rewards.level, 1);
        assert!(rewards.mastery_by_tag.is_empty());
    }

    #[test]
    fn block_progress_rollup_tracks_success_rate() {
        let now = chrono::Utc::now();
        let mut entry = BlockProgressEntry::default();
        entry.record(true, now);
        entry.record(true, now);
        entry.record(false, now);
        assert_eq!(entry.attempts, 3);
        assert!((entry.success_rate - 2.0 / 3.0).abs() < 1e-9);
        entry.record(true, now);
        assert_eq!(entry.attempts, 4);
        assert!((entry.success_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn mastery_bands() {
        assert_eq!(MasteryState::for_score(0), MasteryState::Discovering);
        assert_eq!(MasteryState::for_score(49), MasteryState::Discovering);
        assert_eq!(MasteryState::for_score(50), MasteryState::Progressing);
        assert_eq!(MasteryState::for_score(79), MasteryState::Progressing);
        assert_eq!(MasteryState::for_score(80), MasteryState::Mastered);
        assert_eq!(MasteryState::for_score(100), MasteryState::Mastered);
    }
}

use super::UserRewards;
use serde::{Deserialize, Serialize};

use super::SlotType;

/// Drop rarity for collectibles and malocraft loot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
        }
    }

    /// Base draw weight for collectible rolls.
    pub fn weight(&self) -> f64 {
        match self {
            Rarity::Common => 0.80,
            Rarity::Rare => 0.18,
            Rarity::Epic => 0.02,
        }
    }

    /// Boosted weight used by malocraft loot drops for strong sessions.
    pub fn boosted_weight(&self) -> f64 {
        match self {
            Rarity::Common => 0.55,
            Rarity::Rare => 0.35,
            Rarity::Epic => 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectibleKind {
    Avatar,
    Sticker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collectible {
    pub id: &'static str,
    pub label: &'static str,
    pub rarity: Rarity,
    pub kind: CollectibleKind,
}

pub const COLLECTIBLES: &[Collectible] = &[
    Collectible { id: "avatar_fox", label: "Foxy", rarity: Rarity::Common, kind: CollectibleKind::Avatar },
    Collectible { id: "avatar_owl", label: "Professor Owl", rarity: Rarity::Common, kind: CollectibleKind::Avatar },
    Collectible { id: "sticker_star", label: "Gold Star", rarity: Rarity::Common, kind: CollectibleKind::Sticker },
    Collectible { id: "sticker_rocket", label: "Rocket", rarity: Rarity::Common, kind: CollectibleKind::Sticker },
    Collectible { id: "sticker_rainbow", label: "Rainbow", rarity: Rarity::Common, kind: CollectibleKind::Sticker },
    Collectible { id: "sticker_trophy", label: "Little Trophy", rarity: Rarity::Common, kind: CollectibleKind::Sticker },
    Collectible { id: "avatar_dragonet", label: "Dragonet", rarity: Rarity::Rare, kind: CollectibleKind::Avatar },
    Collectible { id: "avatar_robot", label: "Quizbot", rarity: Rarity::Rare, kind: CollectibleKind::Avatar },
    Collectible { id: "sticker_comet", label: "Comet", rarity: Rarity::Rare, kind: CollectibleKind::Sticker },
    Collectible { id: "sticker_crown", label: "Crown", rarity: Rarity::Rare, kind: CollectibleKind::Sticker },
    Collectible { id: "avatar_phoenix", label: "Phoenix", rarity: Rarity::Epic, kind: CollectibleKind::Avatar },
    Collectible { id: "sticker_galaxy", label: "Galaxy", rarity: Rarity::Epic, kind: CollectibleKind::Sticker },
];

pub fn collectible(id: &str) -> Option<&'static Collectible> {
    COLLECTIBLES.iter().find(|c| c.id == id)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LootKind {
    Trophy,
    Gear,
    Avatar,
    Decor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LootItem {
    pub id: &'static str,
    pub label: &'static str,
    pub rarity: Rarity,
    pub kind: LootKind,
}

pub const LOOT_ITEMS: &[LootItem] = &[
    LootItem { id: "gear_pickaxe", label: "Sturdy Pickaxe", rarity: Rarity::Common, kind: LootKind::Gear },
    LootItem { id: "gear_lantern", label: "Miner's Lantern", rarity: Rarity::Common, kind: LootKind::Gear },
    LootItem { id: "decor_flower_pot", label: "Flower Pot", rarity: Rarity::Common, kind: LootKind::Decor },
    LootItem { id: "decor_banner", label: "Village Banner", rarity: Rarity::Common, kind: LootKind::Decor },
    LootItem { id: "gear_enchanted_shovel", label: "Enchanted Shovel", rarity: Rarity::Rare, kind: LootKind::Gear },
    LootItem { id: "decor_fountain", label: "Stone Fountain", rarity: Rarity::Rare, kind: LootKind::Decor },
    LootItem { id: "avatar_golem", label: "Friendly Golem", rarity: Rarity::Rare, kind: LootKind::Avatar },
    LootItem { id: "avatar_ender_cat", label: "Ender Cat", rarity: Rarity::Epic, kind: LootKind::Avatar },
    LootItem { id: "decor_aurora_beacon", label: "Aurora Beacon", rarity: Rarity::Epic, kind: LootKind::Decor },
];

pub fn loot_item(id: &str) -> Option<&'static LootItem> {
    LOOT_ITEMS.iter().find(|l| l.id == id)
}

/// Biome rebuild milestones that award a trophy, in ascending order.
pub const BIOME_MILESTONES: [u32; 3] = [3, 6, 10];

pub fn trophy_id(biome: &str, milestone: u32) -> String {
    format!("trophy_{}_{}", biome, milestone)
}

pub fn trophy_rarity(milestone: u32) -> Rarity {
    match milestone {
        0..=3 => Rarity::Common,
        4..=6 => Rarity::Rare,
        _ => Rarity::Epic,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cosmetic {
    pub id: &'static str,
    pub label: &'static str,
    pub slot: SlotType,
    pub price: u64,
}

pub const COSMETICS: &[Cosmetic] = &[
    Cosmetic { id: "hat_wizard", label: "Wizard Hat", slot: SlotType::Hat, price: 40 },
    Cosmetic { id: "hat_crown", label: "Quiz Crown", slot: SlotType::Hat, price: 120 },
    Cosmetic { id: "outfit_explorer", label: "Explorer Outfit", slot: SlotType::Outfit, price: 60 },
    Cosmetic { id: "outfit_scholar", label: "Scholar Robe", slot: SlotType::Outfit, price: 90 },
    Cosmetic { id: "background_meadow", label: "Meadow", slot: SlotType::Background, price: 30 },
    Cosmetic { id: "background_observatory", label: "Observatory", slot: SlotType::Background, price: 110 },
    Cosmetic { id: "frame_wooden", label: "Wooden Frame", slot: SlotType::Frame, price: 25 },
    Cosmetic { id: "frame_golden", label: "Golden Frame", slot: SlotType::Frame, price: 150 },
];

pub fn cosmetic(id: &str) -> Option<&'static Cosmetic> {
    COSMETICS.iter().find(|c| c.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub id: &'static str,
    pub label: &'static str,
    pub rule: BadgeRule,
}

/// Badge rules are evaluated against the rewards document alone, so the
/// whole set can be re-checked inside any transaction that already holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeRule {
    LevelReached(u32),
    MasteredTags(u32),
    ZonesRebuilt(u32),
    BiomesRebuilt(u32),
    CollectiblesOwned(u32),
    LootOwned(u32),
}

impl BadgeRule {
    pub fn satisfied_by(&self, rewards: &UserRewards) -> bool {
        match *self {
            BadgeRule::LevelReached(n) => rewards.level >= n,
            BadgeRule::MasteredTags(n) => rewards.mastered_tag_count() >= n,
            BadgeRule::ZonesRebuilt(n) => rewards.rebuilt_zone_count() >= n,
            BadgeRule::BiomesRebuilt(n) => rewards.rebuilt_biome_count() >= n,
            BadgeRule::CollectiblesOwned(n) => rewards.collectibles.owned.len() as u32 >= n,
            BadgeRule::LootOwned(n) => rewards.malocraft.owned_loot_ids.len() as u32 >= n,
        }
    }
}

pub const BADGES: &[Badge] = &[
    Badge { id: "first_steps", label: "First Steps", rule: BadgeRule::LevelReached(2) },
    Badge { id: "rising_star", label: "Rising Star", rule: BadgeRule::LevelReached(5) },
    Badge { id: "quiz_veteran", label: "Quiz Veteran", rule: BadgeRule::LevelReached(10) },
    Badge { id: "scholar", label: "Scholar", rule: BadgeRule::MasteredTags(3) },
    Badge { id: "sage", label: "Sage", rule: BadgeRule::MasteredTags(10) },
    Badge { id: "builder", label: "Builder", rule: BadgeRule::ZonesRebuilt(1) },
    Badge { id: "architect", label: "Architect", rule: BadgeRule::ZonesRebuilt(5) },
    Badge { id: "world_healer", label: "World Healer", rule: BadgeRule::BiomesRebuilt(1) },
    Badge { id: "collector", label: "Collector", rule: BadgeRule::CollectiblesOwned(5) },
    Badge { id: "treasure_hunter", label: "Treasure Hunter", rule: BadgeRule::LootOwned(5) },
];

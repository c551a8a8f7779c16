//! Reward engine for the quiz platform. Applies session XP, tag mastery,
//! collectible and loot drops, rebuild progress and daily quests exactly
//! once per session on top of optimistic per-user transactions.

#![allow(dead_code)]

pub mod config;
pub mod content;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::EngineConfig;
pub use services::{Engine, RewardError, SideEffect};

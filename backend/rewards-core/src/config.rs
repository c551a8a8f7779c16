use crate::utils::retry::RetryConfig;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Correct answers needed to rebuild one zone.
    pub zone_target: u32,
    /// Correct answers needed to rebuild a whole biome.
    pub biome_target: u32,
    pub retry_max_attempts: usize,
    pub retry_base_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "quizcraft".to_string(),
            zone_target: 35,
            biome_target: 100,
            retry_max_attempts: 5,
            retry_base_backoff_ms: 20,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env_name = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env_name)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = EngineConfig::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let zone_target = settings
            .get_int("rewards.zone_target")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.zone_target);

        let biome_target = settings
            .get_int("rewards.biome_target")
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.biome_target);

        let retry_max_attempts = settings
            .get_int("rewards.retry_max_attempts")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(defaults.retry_max_attempts);

        let retry_base_backoff_ms = settings
            .get_int("rewards.retry_base_backoff_ms")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(defaults.retry_base_backoff_ms);

        Ok(EngineConfig {
            mongo_uri,
            mongo_database,
            zone_target,
            biome_target,
            retry_max_attempts,
            retry_base_backoff_ms,
        })
    }

    /// Retry tuning for conflict-bounded transaction loops.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_backoff: Duration::from_millis(self.retry_base_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_falls_back_to_defaults() {
        env::remove_var("APP_REWARDS__ZONE_TARGET");
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.zone_target, 35);
        assert_eq!(config.biome_target, 100);
        assert_eq!(config.retry_max_attempts, 5);
    }

    #[test]
    #[serial]
    fn env_overrides_win() {
        env::set_var("APP_REWARDS__ZONE_TARGET", "20");
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.zone_target, 20);
        env::remove_var("APP_REWARDS__ZONE_TARGET");
    }

    #[test]
    fn retry_config_carries_tuning() {
        let config = EngineConfig {
            retry_max_attempts: 3,
            retry_base_backoff_ms: 7,
            ..EngineConfig::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.base_backoff, Duration::from_millis(7));
    }
}

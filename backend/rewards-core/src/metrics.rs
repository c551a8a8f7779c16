use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // Ledger metrics
    pub static ref REWARD_EVENTS_APPLIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reward_events_applied_total",
        "Reward events applied for the first time",
        &["consumer"]
    )
    .unwrap();

    pub static ref REWARD_EVENTS_REPLAYED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reward_events_replayed_total",
        "Reward events skipped because their marker already existed",
        &["consumer"]
    )
    .unwrap();

    pub static ref TXN_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        "reward_txn_conflicts_total",
        "Optimistic transaction commits that lost a race"
    )
    .unwrap();

    pub static ref TXN_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "reward_txn_duration_seconds",
        "Reward transaction duration in seconds, retries included",
        &["consumer"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    // Progression metrics
    pub static ref LEVEL_UPS_TOTAL: IntCounter = register_int_counter!(
        "reward_level_ups_total",
        "Level-ups granted by session awards"
    )
    .unwrap();

    pub static ref BADGES_AWARDED_TOTAL: IntCounter = register_int_counter!(
        "reward_badges_awarded_total",
        "Badges newly awarded"
    )
    .unwrap();

    pub static ref COLLECTIBLES_AWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reward_collectibles_awarded_total",
        "Collectibles unlocked",
        &["rarity"]
    )
    .unwrap();

    pub static ref LOOT_AWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reward_loot_awarded_total",
        "Malocraft loot drops, trophies included",
        &["rarity"]
    )
    .unwrap();

    pub static ref ZONES_REBUILT_TOTAL: IntCounter = register_int_counter!(
        "reward_zones_rebuilt_total",
        "Zones whose rebuild target was reached"
    )
    .unwrap();

    pub static ref BIOMES_REBUILT_TOTAL: IntCounter = register_int_counter!(
        "reward_biomes_rebuilt_total",
        "Biomes whose rebuild target was reached"
    )
    .unwrap();

    pub static ref DAILY_QUESTS_COMPLETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reward_daily_quests_completed_total",
        "Daily quests completed",
        &["kind"]
    )
    .unwrap();

    pub static ref DAILY_BONUSES_AWARDED_TOTAL: IntCounter = register_int_counter!(
        "reward_daily_bonuses_awarded_total",
        "All-quests-done daily bonuses awarded"
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

pub fn record_event_applied(consumer: &str) {
    REWARD_EVENTS_APPLIED_TOTAL
        .with_label_values(&[consumer])
        .inc();
}

pub fn record_event_replayed(consumer: &str) {
    REWARD_EVENTS_REPLAYED_TOTAL
        .with_label_values(&[consumer])
        .inc();
}

pub fn record_txn_conflict() {
    TXN_CONFLICTS_TOTAL.inc();
}

/// Helper: time a reward transaction, retries included
pub async fn track_txn<F, T>(consumer: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    TXN_DURATION_SECONDS
        .with_label_values(&[consumer])
        .observe(start.elapsed().as_secs_f64());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // Just verify that all metrics are properly registered
        let _ = REWARD_EVENTS_APPLIED_TOTAL
            .with_label_values(&["session_xp"])
            .get();
        let _ = TXN_CONFLICTS_TOTAL.get();
    }

    #[test]
    fn test_render_metrics() {
        REWARD_EVENTS_APPLIED_TOTAL
            .with_label_values(&["session_xp"])
            .inc();

        let result = render_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("reward_events_applied_total"));
    }
}

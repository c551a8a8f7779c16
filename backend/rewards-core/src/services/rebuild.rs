use crate::content::{zone_key, TagTaxonomy};
use crate::metrics;
use crate::models::attempt::SessionTagStats;
use crate::models::event::{keys, EventKind, RewardEvent};
use crate::models::{RebuildEntry, RewardsPatch};
use crate::store::{run_transaction, RewardStore, TxnOutcome, TxnScope, WriteSet};
use crate::utils::retry::{retry_if, RetryConfig};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{is_conflict, RewardError};

#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    /// Zone key (`subject::theme`) or biome subject.
    pub key: String,
    pub entry: RebuildEntry,
    pub applied: bool,
    /// This contribution reached the target for the first time.
    pub newly_rebuilt: bool,
}

/// Applies `delta` correct answers to a rebuild entry, capping at the target
/// and stamping `rebuilt_at` exactly once. Returns whether the cap was
/// reached by this very contribution.
fn advance(entry: &mut RebuildEntry, delta: u32, now: DateTime<Utc>) -> bool {
    entry.correct_count = entry.target.min(entry.correct_count + delta);
    entry.updated_at = Some(now);
    let newly_rebuilt =
        entry.rebuilt_at.is_none() && entry.target > 0 && entry.correct_count >= entry.target;
    if newly_rebuilt {
        entry.rebuilt_at = Some(now);
    }
    newly_rebuilt
}

/// World-map rebuild progress: each zone (subject + theme) and each biome
/// (subject) accumulates correct answers until its target, once per session.
pub struct RebuildService<S> {
    store: S,
    taxonomy: Arc<dyn TagTaxonomy>,
    zone_target: u32,
    biome_target: u32,
    retry: RetryConfig,
}

impl<S: RewardStore> RebuildService<S> {
    pub fn new(store: S, taxonomy: Arc<dyn TagTaxonomy>, zone_target: u32, biome_target: u32) -> Self {
        Self::with_retry(store, taxonomy, zone_target, biome_target, RetryConfig::default())
    }

    pub fn with_retry(
        store: S,
        taxonomy: Arc<dyn TagTaxonomy>,
        zone_target: u32,
        biome_target: u32,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            taxonomy,
            zone_target,
            biome_target,
            retry,
        }
    }

    fn zone_correct(&self, stats: &BTreeMap<String, SessionTagStats>, subject: &str, theme: &str) -> u32 {
        stats
            .iter()
            .filter(|(tag, _)| {
                self.taxonomy
                    .tag_meta(tag)
                    .map(|m| m.subject == subject && m.theme == theme)
                    .unwrap_or(false)
            })
            .map(|(_, s)| s.correct)
            .sum()
    }

    fn biome_correct(&self, stats: &BTreeMap<String, SessionTagStats>, subject: &str) -> u32 {
        stats
            .iter()
            .filter(|(tag, _)| {
                self.taxonomy
                    .tag_meta(tag)
                    .map(|m| m.subject == subject)
                    .unwrap_or(false)
            })
            .map(|(_, s)| s.correct)
            .sum()
    }

    /// Contributes the session's correct answers in this zone exactly once,
    /// keyed `zone_rebuild_<zoneKey>_<sessionId>`.
    pub async fn apply_zone_rebuild(
        &self,
        uid: &str,
        session_id: &str,
        subject: &str,
        theme: &str,
        stats: &BTreeMap<String, SessionTagStats>,
    ) -> Result<RebuildOutcome, RewardError> {
        if uid.is_empty() || session_id.is_empty() || subject.is_empty() || theme.is_empty() {
            return Err(RewardError::Validation(
                "uid, session_id, subject and theme must not be empty".to_string(),
            ));
        }

        let zkey = zone_key(subject, theme);
        let key = keys::zone_rebuild(&zkey, session_id);
        let scope = TxnScope::events([key.clone()]);

        let outcome = metrics::track_txn("zone_rebuild", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    let rewards = snapshot.rewards_or_default();
                    let mut entry = rewards
                        .zone_rebuild_progress
                        .get(&zkey)
                        .cloned()
                        .unwrap_or(RebuildEntry {
                            target: self.zone_target,
                            ..RebuildEntry::default()
                        });

                    if snapshot.has_event(&key) {
                        return Ok(TxnOutcome::Skip(RebuildOutcome {
                            key: zkey.clone(),
                            entry,
                            applied: false,
                            newly_rebuilt: false,
                        }));
                    }

                    let delta = self.zone_correct(stats, subject, theme);
                    if delta == 0 {
                        return Ok(TxnOutcome::Skip(RebuildOutcome {
                            key: zkey.clone(),
                            entry,
                            applied: false,
                            newly_rebuilt: false,
                        }));
                    }

                    let now = self.store.create_timestamp();
                    let newly_rebuilt = advance(&mut entry, delta, now);

                    let mut writes = WriteSet::default();
                    writes.rewards = Some(RewardsPatch {
                        zone_rebuild_progress: Some(BTreeMap::from([(
                            zkey.clone(),
                            entry.clone(),
                        )])),
                        ..RewardsPatch::default()
                    });
                    writes.record_event(
                        key.clone(),
                        RewardEvent::with_payload(
                            EventKind::ZoneRebuild,
                            now,
                            json!({ "zone": zkey, "delta": delta }),
                        ),
                    );

                    Ok(TxnOutcome::Commit(
                        writes,
                        RebuildOutcome {
                            key: zkey.clone(),
                            entry,
                            applied: true,
                            newly_rebuilt,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied {
            metrics::record_event_applied(EventKind::ZoneRebuild.as_str());
            if outcome.newly_rebuilt {
                metrics::ZONES_REBUILT_TOTAL.inc();
                tracing::info!("Zone rebuilt: user={}, zone={}", uid, outcome.key);
            }
        } else {
            metrics::record_event_replayed(EventKind::ZoneRebuild.as_str());
        }
        Ok(outcome)
    }

    /// Biome-level counterpart, keyed `biome_rebuild_<subject>_<sessionId>`.
    /// Tags from other subjects contribute nothing.
    pub async fn apply_biome_rebuild(
        &self,
        uid: &str,
        session_id: &str,
        subject: &str,
        stats: &BTreeMap<String, SessionTagStats>,
    ) -> Result<RebuildOutcome, RewardError> {
        if uid.is_empty() || session_id.is_empty() || subject.is_empty() {
            return Err(RewardError::Validation(
                "uid, session_id and subject must not be empty".to_string(),
            ));
        }

        let key = keys::biome_rebuild(subject, session_id);
        let scope = TxnScope::events([key.clone()]);

        let outcome = metrics::track_txn("biome_rebuild", async {
            retry_if(self.retry.clone(), is_conflict, || async {
                run_transaction(&self.store, uid, &scope, |snapshot| {
                    let rewards = snapshot.rewards_or_default();
                    let mut entry = rewards
                        .biome_rebuild_progress
                        .get(subject)
                        .cloned()
                        .unwrap_or(RebuildEntry {
                            target: self.biome_target,
                            ..RebuildEntry::default()
                        });

                    if snapshot.has_event(&key) {
                        return Ok(TxnOutcome::Skip(RebuildOutcome {
                            key: subject.to_string(),
                            entry,
                            applied: false,
                            newly_rebuilt: false,
                        }));
                    }

                    let delta = self.biome_correct(stats, subject);
                    if delta == 0 {
                        return Ok(TxnOutcome::Skip(RebuildOutcome {
                            key: subject.to_string(),
                            entry,
                            applied: false,
                            newly_rebuilt: false,
                        }));
                    }

                    let now = self.store.create_timestamp();
                    let newly_rebuilt = advance(&mut entry, delta, now);

                    let mut writes = WriteSet::default();
                    writes.rewards = Some(RewardsPatch {
                        biome_rebuild_progress: Some(BTreeMap::from([(
                            subject.to_string(),
                            entry.clone(),
                        )])),
                        ..RewardsPatch::default()
                    });
                    writes.record_event(
                        key.clone(),
                        RewardEvent::with_payload(
                            EventKind::BiomeRebuild,
                            now,
                            json!({ "biome": subject, "delta": delta }),
                        ),
                    );

                    Ok(TxnOutcome::Commit(
                        writes,
                        RebuildOutcome {
                            key: subject.to_string(),
                            entry,
                            applied: true,
                            newly_rebuilt,
                        },
                    ))
                })
                .await
            })
            .await
        })
        .await?;

        if outcome.applied {
            metrics::record_event_applied(EventKind::BiomeRebuild.as_str());
            if outcome.newly_rebuilt {
                metrics::BIOMES_REBUILT_TOTAL.inc();
                tracing::info!("Biome rebuilt: user={}, biome={}", uid, outcome.key);
            }
        } else {
            metrics::record_event_replayed(EventKind::BiomeRebuild.as_str());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn advance_caps_at_target_and_stamps_once() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let mut entry = RebuildEntry {
            correct_count: 30,
            target: 35,
            ..RebuildEntry::default()
        };

        assert!(advance(&mut entry, 10, now));
        assert_eq!(entry.correct_count, 35);
        assert_eq!(entry.rebuilt_at, Some(now));

        let later = Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap();
        assert!(!advance(&mut entry, 5, later));
        assert_eq!(entry.correct_count, 35);
        assert_eq!(entry.rebuilt_at, Some(now));
        assert_eq!(entry.updated_at, Some(later));
    }

    #[test]
    fn advance_below_target_does_not_stamp() {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let mut entry = RebuildEntry {
            target: 35,
            ..RebuildEntry::default()
        };
        assert!(!advance(&mut entry, 12, now));
        assert_eq!(entry.correct_count, 12);
        assert!(entry.rebuilt_at.is_none());
    }
}

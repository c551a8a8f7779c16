use super::{RewardStore, StoreError, TxnScope, UserSnapshot, WriteSet};
use crate::models::daily::{DailyState, DayStats};
use crate::models::event::RewardEvent;
use crate::models::UserRewards;
use crate::utils::time;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process store with the same optimistic semantics as the Mongo
/// binding: every user carries a version counter, `begin` snapshots it and
/// `commit` fails with `Conflict` when the counter moved.
///
/// Tests drive it directly; it also backs local development without a
/// database. The clock can be frozen and conflicts can be injected to
/// exercise retry paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserSlab>,
    forced_conflicts: u32,
    frozen_now: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct UserSlab {
    version: u64,
    rewards: Option<UserRewards>,
    daily: Option<DailyState>,
    events: BTreeMap<String, RewardEvent>,
    day_stats: BTreeMap<String, DayStats>,
}

pub struct MemorySession {
    uid: String,
    version: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins `create_timestamp` to a fixed instant.
    pub fn freeze_now(&self, at: DateTime<Utc>) {
        self.lock().frozen_now = Some(at);
    }

    /// Makes the next `n` commits fail with `Conflict` regardless of
    /// versions.
    pub fn inject_conflicts(&self, n: u32) {
        self.lock().forced_conflicts = n;
    }

    pub fn rewards_of(&self, uid: &str) -> Option<UserRewards> {
        self.lock().users.get(uid).and_then(|u| u.rewards.clone())
    }

    pub fn daily_of(&self, uid: &str) -> Option<DailyState> {
        self.lock().users.get(uid).and_then(|u| u.daily.clone())
    }

    pub fn has_event(&self, uid: &str, key: &str) -> bool {
        self.lock()
            .users
            .get(uid)
            .map(|u| u.events.contains_key(key))
            .unwrap_or(false)
    }

    pub fn event_count(&self, uid: &str) -> usize {
        self.lock().users.get(uid).map(|u| u.events.len()).unwrap_or(0)
    }

    pub fn version_of(&self, uid: &str) -> u64 {
        self.lock().users.get(uid).map(|u| u.version).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic mid-mutation only happens in tests; recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    type Session = MemorySession;

    async fn begin(
        &self,
        uid: &str,
        scope: &TxnScope,
    ) -> Result<(UserSnapshot, Self::Session), StoreError> {
        let inner = self.lock();
        let (version, snapshot) = match inner.users.get(uid) {
            Some(slab) => {
                let mut events = BTreeMap::new();
                for key in &scope.event_keys {
                    if let Some(event) = slab.events.get(key) {
                        events.insert(key.clone(), event.clone());
                    }
                }
                (
                    slab.version,
                    UserSnapshot {
                        rewards: slab.rewards.clone(),
                        daily: slab.daily.clone(),
                        events,
                    },
                )
            }
            None => (0, UserSnapshot::default()),
        };
        Ok((
            snapshot,
            MemorySession {
                uid: uid.to_string(),
                version,
            },
        ))
    }

    async fn commit(&self, session: Self::Session, writes: WriteSet) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            return Err(StoreError::Conflict);
        }

        let slab = inner.users.entry(session.uid.clone()).or_default();
        if slab.version != session.version {
            return Err(StoreError::Conflict);
        }
        for (key, _) in &writes.events {
            if slab.events.contains_key(key) {
                return Err(StoreError::Conflict);
            }
        }

        if let Some(patch) = &writes.rewards {
            let mut rewards = slab.rewards.take().unwrap_or_default();
            patch.apply_to(&mut rewards);
            slab.rewards = Some(rewards);
        }
        if let Some(daily) = writes.daily {
            slab.daily = Some(daily);
        }
        for (key, event) in writes.events {
            slab.events.insert(key, event);
        }
        for stats in writes.day_stats {
            let entry = slab
                .day_stats
                .entry(stats.date_key.clone())
                .or_insert_with(|| DayStats {
                    date_key: stats.date_key.clone(),
                    ..DayStats::default()
                });
            entry.sessions += stats.sessions;
            entry.answered += stats.answered;
            entry.correct += stats.correct;
            entry.xp += stats.xp;
        }

        slab.version += 1;
        Ok(())
    }

    async fn abort(&self, _session: Self::Session) -> Result<(), StoreError> {
        Ok(())
    }

    fn create_timestamp(&self) -> DateTime<Utc> {
        self.lock().frozen_now.unwrap_or_else(Utc::now)
    }

    async fn recent_day_stats(&self, uid: &str, days: u32) -> Result<Vec<DayStats>, StoreError> {
        let keys = time::day_keys_back(self.create_timestamp(), days);
        let inner = self.lock();
        let Some(slab) = inner.users.get(uid) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| slab.day_stats.get(key).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{EventKind, RewardEvent};
    use crate::models::RewardsPatch;
    use chrono::TimeZone;

    fn event(store: &MemoryStore) -> RewardEvent {
        RewardEvent::new(EventKind::SessionXp, store.create_timestamp())
    }

    #[tokio::test]
    async fn commit_bumps_version_and_applies_patch() {
        let store = MemoryStore::new();
        let scope = TxnScope::default();

        let (snapshot, session) = store.begin("u1", &scope).await.unwrap();
        assert!(snapshot.rewards.is_none());

        let mut writes = WriteSet::default();
        writes.rewards = Some(RewardsPatch {
            xp: Some(24),
            ..RewardsPatch::default()
        });
        store.commit(session, writes).await.unwrap();

        assert_eq!(store.version_of("u1"), 1);
        assert_eq!(store.rewards_of("u1").unwrap().xp, 24);
    }

    #[tokio::test]
    async fn stale_session_conflicts() {
        let store = MemoryStore::new();
        let scope = TxnScope::default();

        let (_, stale) = store.begin("u1", &scope).await.unwrap();
        let (_, fresh) = store.begin("u1", &scope).await.unwrap();

        let mut writes = WriteSet::default();
        writes.rewards = Some(RewardsPatch {
            coins: Some(5),
            ..RewardsPatch::default()
        });
        store.commit(fresh, writes.clone()).await.unwrap();

        let err = store.commit(stale, writes).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn duplicate_event_key_conflicts() {
        let store = MemoryStore::new();
        let scope = TxnScope::events(["s1"]);

        let (_, s1) = store.begin("u1", &scope).await.unwrap();
        let mut writes = WriteSet::default();
        writes.record_event("s1", event(&store));
        store.commit(s1, writes.clone()).await.unwrap();

        let (snapshot, s2) = store.begin("u1", &scope).await.unwrap();
        assert!(snapshot.has_event("s1"));
        let err = store.commit(s2, writes).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn injected_conflicts_fire_before_real_commit() {
        let store = MemoryStore::new();
        store.inject_conflicts(1);
        let (_, session) = store.begin("u1", &TxnScope::default()).await.unwrap();
        let mut writes = WriteSet::default();
        writes.rewards = Some(RewardsPatch {
            xp: Some(1),
            ..RewardsPatch::default()
        });
        let err = store.commit(session, writes.clone()).await.unwrap_err();
        assert!(err.is_conflict());

        let (_, session) = store.begin("u1", &TxnScope::default()).await.unwrap();
        store.commit(session, writes).await.unwrap();
        assert_eq!(store.rewards_of("u1").unwrap().xp, 1);
    }

    #[tokio::test]
    async fn day_stats_accumulate_per_day() {
        let store = MemoryStore::new();
        store.freeze_now(Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap());

        for _ in 0..2 {
            let (_, session) = store.begin("u1", &TxnScope::default()).await.unwrap();
            let mut writes = WriteSet::default();
            writes.add_day_stats(DayStats {
                date_key: "2024-04-01".to_string(),
                sessions: 1,
                answered: 4,
                correct: 3,
                xp: 20,
            });
            store.commit(session, writes).await.unwrap();
        }

        let stats = store.recent_day_stats("u1", 7).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].sessions, 2);
        assert_eq!(stats[0].xp, 40);
    }
}

use crate::models::daily::{DailyState, DayStats};
use crate::models::event::RewardEvent;
use crate::models::{RewardsPatch, UserRewards};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod memory;
pub mod mongo;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer touched the user's documents between begin and commit.
    /// Safe to retry with a fresh transaction.
    #[error("transaction conflict")]
    Conflict,
    /// A stored document cannot be interpreted. Retrying cannot help.
    #[error("corrupt document: {0}")]
    Corrupt(String),
    /// The backend failed or is unreachable.
    #[error("store backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

/// Event keys a transaction wants resolved into its snapshot. Rewards and
/// daily documents are always read; events are read per key because the
/// collection grows without bound.
#[derive(Debug, Clone, Default)]
pub struct TxnScope {
    pub event_keys: Vec<String>,
}

impl TxnScope {
    pub fn events<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// Consistent view of one user's documents at transaction start. `None`
/// means the document does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct UserSnapshot {
    pub rewards: Option<UserRewards>,
    pub daily: Option<DailyState>,
    pub events: BTreeMap<String, RewardEvent>,
}

impl UserSnapshot {
    pub fn rewards_or_default(&self) -> UserRewards {
        self.rewards.clone().unwrap_or_default()
    }

    pub fn has_event(&self, key: &str) -> bool {
        self.events.contains_key(key)
    }
}

/// Writes buffered by a transaction body, committed atomically or not at
/// all. Events are insert-only; day stats are increments.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    pub rewards: Option<RewardsPatch>,
    pub daily: Option<DailyState>,
    pub events: Vec<(String, RewardEvent)>,
    pub day_stats: Vec<DayStats>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.rewards.is_none()
            && self.daily.is_none()
            && self.events.is_empty()
            && self.day_stats.is_empty()
    }

    pub fn record_event<K: Into<String>>(&mut self, key: K, event: RewardEvent) {
        self.events.push((key.into(), event));
    }

    pub fn add_day_stats(&mut self, stats: DayStats) {
        self.day_stats.push(stats);
    }
}

/// Transactional storage of per-user reward documents.
///
/// Implementations give `begin` snapshot isolation against commits of other
/// transactions on the same user, and fail `commit` with
/// [`StoreError::Conflict`] when a concurrent commit won the race. Retry
/// policy belongs to the caller; the store never loops on its own.
#[async_trait]
pub trait RewardStore: Send + Sync {
    type Session: Send;

    async fn begin(
        &self,
        uid: &str,
        scope: &TxnScope,
    ) -> Result<(UserSnapshot, Self::Session), StoreError>;

    async fn commit(&self, session: Self::Session, writes: WriteSet) -> Result<(), StoreError>;

    async fn abort(&self, session: Self::Session) -> Result<(), StoreError>;

    /// Timestamp recorded on writes of the current transaction.
    fn create_timestamp(&self) -> DateTime<Utc>;

    /// Day rollups for the most recent Paris days, newest first. Days
    /// without activity are simply absent.
    async fn recent_day_stats(&self, uid: &str, days: u32) -> Result<Vec<DayStats>, StoreError>;
}

/// What a transaction body decided: persist the buffered writes, or drop
/// them because the work was already applied (or there is nothing to do).
pub enum TxnOutcome<T> {
    Commit(WriteSet, T),
    Skip(T),
}

/// One optimistic attempt: begin, run the body against the snapshot, then
/// commit or abort. Conflicts surface as [`StoreError::Conflict`] for the
/// caller's retry loop.
pub async fn run_transaction<S, T, E, F>(
    store: &S,
    uid: &str,
    scope: &TxnScope,
    body: F,
) -> Result<T, E>
where
    S: RewardStore,
    E: From<StoreError>,
    F: FnOnce(&UserSnapshot) -> Result<TxnOutcome<T>, E>,
{
    let (snapshot, session) = store.begin(uid, scope).await.map_err(E::from)?;
    match body(&snapshot) {
        Ok(TxnOutcome::Commit(writes, value)) => {
            store.commit(session, writes).await.map_err(E::from)?;
            Ok(value)
        }
        Ok(TxnOutcome::Skip(value)) => {
            store.abort(session).await.map_err(E::from)?;
            Ok(value)
        }
        Err(e) => {
            // The body already failed; a failing abort must not mask it.
            let _ = store.abort(session).await;
            Err(e)
        }
    }
}

use super::{RewardStore, StoreError, TxnScope, UserSnapshot, WriteSet};
use crate::models::daily::{DailyState, DayStats};
use crate::models::event::RewardEvent;
use crate::models::{RewardsPatch, UserRewards};
use crate::utils::time;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, Document};
use mongodb::error::{
    ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use mongodb::options::IndexOptions;
use mongodb::{Client, ClientSession, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const REWARDS_COLLECTION: &str = "rewards";
const DAILY_COLLECTION: &str = "daily";
const EVENTS_COLLECTION: &str = "reward_events";
const STATS_DAYS_COLLECTION: &str = "stats_days";

/// Mongo binding of the reward store. One multi-document transaction per
/// `begin`/`commit` pair; write conflicts between concurrent transactions
/// surface with the transient-transaction label and map to
/// [`StoreError::Conflict`].
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

pub struct MongoSession {
    session: ClientSession,
    uid: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RewardsDoc {
    #[serde(rename = "_id")]
    uid: String,
    #[serde(default)]
    rewards: UserRewards,
}

#[derive(Debug, Serialize, Deserialize)]
struct DailyDoc {
    #[serde(rename = "_id")]
    uid: String,
    daily: DailyState,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventDoc {
    /// `"{uid}:{key}"`; the unique `_id` is what makes replays collide.
    #[serde(rename = "_id")]
    id: String,
    uid: String,
    key: String,
    event: RewardEvent,
}

#[derive(Debug, Serialize, Deserialize)]
struct DayStatsDoc {
    #[serde(rename = "_id")]
    id: String,
    uid: String,
    #[serde(default)]
    stats: DayStats,
}

fn event_doc_id(uid: &str, key: &str) -> String {
    format!("{}:{}", uid, key)
}

fn day_stats_doc_id(uid: &str, date_key: &str) -> String {
    format!("{}:{}", uid, date_key)
}

fn map_mongo_err(e: mongodb::error::Error) -> StoreError {
    if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        StoreError::Conflict
    } else {
        StoreError::Backend(e.to_string())
    }
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

fn bson_value<T: Serialize>(value: &T) -> Result<Bson, StoreError> {
    to_bson(value).map_err(|e| StoreError::Corrupt(format!("bson encode: {}", e)))
}

/// Map keys become path segments of `$set`, so a dot would silently change
/// the write target.
fn checked_key(key: &str) -> Result<&str, StoreError> {
    if key.contains('.') || key.contains('$') {
        return Err(StoreError::Corrupt(format!("unsafe map key: {}", key)));
    }
    Ok(key)
}

/// Translates a patch into dotted-path `$set` entries, preserving the merge
/// semantics of [`RewardsPatch::apply_to`]: untouched fields never appear in
/// the update, map entries address their own key.
fn rewards_update_doc(patch: &RewardsPatch) -> Result<Document, StoreError> {
    let mut set = Document::new();
    if let Some(xp) = patch.xp {
        set.insert("rewards.xp", xp as i64);
    }
    if let Some(level) = patch.level {
        set.insert("rewards.level", i64::from(level));
    }
    if let Some(coins) = patch.coins {
        set.insert("rewards.coins", coins as i64);
    }
    if let Some(badges) = &patch.badges {
        set.insert("rewards.badges", bson_value(badges)?);
    }
    if let Some(mastery) = &patch.mastery_by_tag {
        for (tag, entry) in mastery {
            set.insert(
                format!("rewards.mastery_by_tag.{}", checked_key(tag)?),
                bson_value(entry)?,
            );
        }
    }
    if let Some(collectibles) = &patch.collectibles {
        if let Some(owned) = &collectibles.owned {
            set.insert("rewards.collectibles.owned", bson_value(owned)?);
        }
        if let Some(avatar) = &collectibles.equipped_avatar_id {
            set.insert("rewards.collectibles.equipped_avatar_id", avatar.clone());
        }
    }
    if let Some(malocraft) = &patch.malocraft {
        if let Some(owned) = &malocraft.owned_loot_ids {
            set.insert("rewards.malocraft.owned_loot_ids", bson_value(owned)?);
        }
        if let Some(milestones) = &malocraft.biome_milestones {
            for (biome, tier) in milestones {
                set.insert(
                    format!("rewards.malocraft.biome_milestones.{}", checked_key(biome)?),
                    i64::from(*tier),
                );
            }
        }
        if let Some(avatar) = &malocraft.equipped_avatar_id {
            set.insert("rewards.malocraft.equipped_avatar_id", avatar.clone());
        }
    }
    if let Some(zones) = &patch.zone_rebuild_progress {
        for (key, entry) in zones {
            set.insert(
                format!("rewards.zone_rebuild_progress.{}", checked_key(key)?),
                bson_value(entry)?,
            );
        }
    }
    if let Some(biomes) = &patch.biome_rebuild_progress {
        for (key, entry) in biomes {
            set.insert(
                format!("rewards.biome_rebuild_progress.{}", checked_key(key)?),
                bson_value(entry)?,
            );
        }
    }
    if let Some(cosmetics) = &patch.owned_cosmetics {
        for (id, owned) in cosmetics {
            set.insert(
                format!("rewards.owned_cosmetics.{}", checked_key(id)?),
                *owned,
            );
        }
    }
    if let Some(equipped) = &patch.equipped_cosmetics {
        for (slot, id) in equipped {
            set.insert(
                format!("rewards.equipped_cosmetics.{}", slot.as_str()),
                id.clone(),
            );
        }
    }
    if let Some(blocks) = &patch.block_progress {
        for (tag, entry) in blocks {
            set.insert(
                format!("rewards.block_progress.{}", checked_key(tag)?),
                bson_value(entry)?,
            );
        }
    }
    Ok(set)
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Backend(format!("mongo connect: {}", e)))?;
        Ok(Self::with_database(client.database(database)))
    }

    pub fn with_database(db: Database) -> Self {
        Self { db }
    }

    /// Secondary indexes; `_id` already guards uniqueness of events and
    /// day stats. Safe to call on every startup.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.db
            .collection::<DayStatsDoc>(STATS_DAYS_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "uid": 1, "stats.date_key": -1 })
                    .options(IndexOptions::builder().build())
                    .build(),
            )
            .await
            .map_err(map_mongo_err)?;
        self.db
            .collection::<EventDoc>(EVENTS_COLLECTION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "uid": 1 })
                    .build(),
            )
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }
}

#[async_trait]
impl RewardStore for MongoStore {
    type Session = MongoSession;

    async fn begin(
        &self,
        uid: &str,
        scope: &TxnScope,
    ) -> Result<(UserSnapshot, Self::Session), StoreError> {
        let mut session = self
            .db
            .client()
            .start_session()
            .await
            .map_err(map_mongo_err)?;
        session.start_transaction().await.map_err(map_mongo_err)?;

        let rewards = self
            .db
            .collection::<RewardsDoc>(REWARDS_COLLECTION)
            .find_one(doc! { "_id": uid })
            .session(&mut session)
            .await
            .map_err(map_mongo_err)?
            .map(|d| d.rewards);

        let daily = self
            .db
            .collection::<DailyDoc>(DAILY_COLLECTION)
            .find_one(doc! { "_id": uid })
            .session(&mut session)
            .await
            .map_err(map_mongo_err)?
            .map(|d| d.daily);

        let mut events = BTreeMap::new();
        let event_collection = self.db.collection::<EventDoc>(EVENTS_COLLECTION);
        for key in &scope.event_keys {
            let found = event_collection
                .find_one(doc! { "_id": event_doc_id(uid, key) })
                .session(&mut session)
                .await
                .map_err(map_mongo_err)?;
            if let Some(found) = found {
                events.insert(key.clone(), found.event);
            }
        }

        Ok((
            UserSnapshot {
                rewards,
                daily,
                events,
            },
            MongoSession {
                session,
                uid: uid.to_string(),
            },
        ))
    }

    async fn commit(&self, session: Self::Session, writes: WriteSet) -> Result<(), StoreError> {
        let MongoSession { mut session, uid } = session;

        if let Some(patch) = &writes.rewards {
            let set = rewards_update_doc(patch)?;
            if !set.is_empty() {
                self.db
                    .collection::<RewardsDoc>(REWARDS_COLLECTION)
                    .update_one(doc! { "_id": &uid }, doc! { "$set": set })
                    .upsert(true)
                    .session(&mut session)
                    .await
                    .map_err(map_mongo_err)?;
            }
        }

        if let Some(daily) = &writes.daily {
            let replacement = DailyDoc {
                uid: uid.clone(),
                daily: daily.clone(),
            };
            self.db
                .collection::<DailyDoc>(DAILY_COLLECTION)
                .replace_one(doc! { "_id": &uid }, &replacement)
                .upsert(true)
                .session(&mut session)
                .await
                .map_err(map_mongo_err)?;
        }

        for (key, event) in &writes.events {
            let event_doc = EventDoc {
                id: event_doc_id(&uid, key),
                uid: uid.clone(),
                key: key.clone(),
                event: event.clone(),
            };
            self.db
                .collection::<EventDoc>(EVENTS_COLLECTION)
                .insert_one(&event_doc)
                .session(&mut session)
                .await
                .map_err(|e| {
                    if is_duplicate_key(&e) {
                        StoreError::Conflict
                    } else {
                        map_mongo_err(e)
                    }
                })?;
        }

        for stats in &writes.day_stats {
            self.db
                .collection::<DayStatsDoc>(STATS_DAYS_COLLECTION)
                .update_one(
                    doc! { "_id": day_stats_doc_id(&uid, &stats.date_key) },
                    doc! {
                        "$inc": {
                            "stats.sessions": i64::from(stats.sessions),
                            "stats.answered": i64::from(stats.answered),
                            "stats.correct": i64::from(stats.correct),
                            "stats.xp": stats.xp as i64,
                        },
                        "$set": {
                            "uid": &uid,
                            "stats.date_key": &stats.date_key,
                        },
                    },
                )
                .upsert(true)
                .session(&mut session)
                .await
                .map_err(map_mongo_err)?;
        }

        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(()),
                Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => {
                    tracing::warn!("commit outcome unknown, retrying commit");
                }
                Err(e) => return Err(map_mongo_err(e)),
            }
        }
    }

    async fn abort(&self, session: Self::Session) -> Result<(), StoreError> {
        let MongoSession { mut session, .. } = session;
        session.abort_transaction().await.map_err(map_mongo_err)
    }

    fn create_timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn recent_day_stats(&self, uid: &str, days: u32) -> Result<Vec<DayStats>, StoreError> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let keys = time::day_keys_back(Utc::now(), days);
        // ISO day keys sort lexicographically, so a string range works.
        let oldest = keys.last().cloned().unwrap_or_default();
        let cursor = self
            .db
            .collection::<DayStatsDoc>(STATS_DAYS_COLLECTION)
            .find(doc! { "uid": uid, "stats.date_key": { "$gte": oldest } })
            .sort(doc! { "stats.date_key": -1 })
            .limit(i64::from(days))
            .await
            .map_err(map_mongo_err)?;
        let docs: Vec<DayStatsDoc> = cursor.try_collect().await.map_err(map_mongo_err)?;
        Ok(docs.into_iter().map(|d| d.stats).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MalocraftPatch, MasteryEntry, RewardsPatch};

    #[test]
    fn update_doc_uses_dotted_paths_per_key() {
        let mut mastery = BTreeMap::new();
        mastery.insert("fractions".to_string(), MasteryEntry::default());
        let patch = RewardsPatch {
            xp: Some(24),
            mastery_by_tag: Some(mastery),
            malocraft: Some(MalocraftPatch {
                biome_milestones: Some(BTreeMap::from([("forest".to_string(), 6)])),
                ..MalocraftPatch::default()
            }),
            ..RewardsPatch::default()
        };

        let set = rewards_update_doc(&patch).unwrap();
        assert_eq!(set.get_i64("rewards.xp").unwrap(), 24);
        assert!(set.contains_key("rewards.mastery_by_tag.fractions"));
        assert_eq!(
            set.get_i64("rewards.malocraft.biome_milestones.forest").unwrap(),
            6
        );
        assert!(!set.contains_key("rewards.coins"));
    }

    #[test]
    fn dotted_map_keys_are_rejected() {
        let patch = RewardsPatch {
            zone_rebuild_progress: Some(BTreeMap::from([(
                "math.fractions".to_string(),
                crate::models::RebuildEntry::default(),
            )])),
            ..RewardsPatch::default()
        };
        let err = rewards_update_doc(&patch).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn document_ids_scope_by_user() {
        assert_eq!(event_doc_id("u1", "malocraftLoot:s1"), "u1:malocraftLoot:s1");
        assert_eq!(day_stats_doc_id("u1", "2024-04-01"), "u1:2024-04-01");
    }

    #[test]
    fn empty_patch_produces_empty_update() {
        let set = rewards_update_doc(&RewardsPatch::default()).unwrap();
        assert!(set.is_empty());
    }
}

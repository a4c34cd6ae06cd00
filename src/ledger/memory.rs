use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{Actor, ActorType, DeliverySide, LedgerRecord};
use super::store::ActivityStore;
use crate::error::{AppError, AppResult};

/// In-memory store backing the unit and failure-injection tests. Mirrors the
/// Postgres implementation's contract, including the open-record uniqueness
/// check on insert.
#[derive(Default)]
pub struct MemoryActivityStore {
    actors: Arc<RwLock<HashMap<Uuid, Actor>>>,
    records: Arc<RwLock<HashMap<Uuid, LedgerRecord>>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn actor_by_id(&self, id: Uuid) -> AppResult<Option<Actor>> {
        Ok(self.actors.read().await.get(&id).cloned())
    }

    async fn actor_by_phone(
        &self,
        actor_type: ActorType,
        phone: &str,
    ) -> AppResult<Option<Actor>> {
        Ok(self
            .actors
            .read()
            .await
            .values()
            .find(|a| {
                a.actor_type == actor_type && !a.deleted && a.phone_num.as_deref() == Some(phone)
            })
            .cloned())
    }

    async fn active_actors(&self, actor_type: ActorType) -> AppResult<Vec<Actor>> {
        let mut actors: Vec<Actor> = self
            .actors
            .read()
            .await
            .values()
            .filter(|a| a.actor_type == actor_type && !a.deleted)
            .cloned()
            .collect();
        actors.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(actors)
    }

    async fn insert_actor(&self, actor: &Actor) -> AppResult<()> {
        self.actors.write().await.insert(actor.id, actor.clone());
        Ok(())
    }

    async fn record_by_id(&self, id: Uuid) -> AppResult<Option<LedgerRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn open_record_in_window(
        &self,
        actor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Option<LedgerRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| {
                r.actor_id == actor_id
                    && !r.day_finished
                    && r.business_day >= start
                    && r.business_day < end
            })
            .cloned())
    }

    async fn latest_record(&self, actor_id: Uuid) -> AppResult<Option<LedgerRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.actor_id == actor_id)
            .max_by_key(|r| (r.business_day, r.created_at))
            .cloned())
    }

    async fn insert_record(&self, record: &LedgerRecord) -> AppResult<()> {
        let mut records = self.records.write().await;
        let duplicate = records.values().any(|r| {
            r.actor_id == record.actor_id
                && r.business_day == record.business_day
                && !r.day_finished
        });
        if duplicate {
            return Err(AppError::Conflict(format!(
                "open record for actor {} on {} already exists",
                record.actor_id, record.business_day
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_record(&self, record: &LedgerRecord) -> AppResult<()> {
        let mut records = self.records.write().await;
        let stored = records
            .get(&record.id)
            .ok_or_else(|| AppError::NotFound(format!("record {}", record.id)))?;
        if stored.version != record.version {
            return Err(AppError::Conflict(format!(
                "record {} was modified concurrently",
                record.id
            )));
        }
        let mut updated = record.clone();
        updated.version += 1;
        records.insert(record.id, updated);
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> AppResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn records_for_actor(
        &self,
        actor_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<LedgerRecord>> {
        let mut records: Vec<LedgerRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.actor_id == actor_id && since.map_or(true, |s| r.business_day >= s))
            .cloned()
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse(r.business_day));
        Ok(records)
    }

    async fn records_in_window(
        &self,
        actor_type: ActorType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<LedgerRecord>> {
        let mut records: Vec<LedgerRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                r.body.actor_type() == actor_type
                    && r.business_day >= start
                    && r.business_day < end
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn record_with_delivery(
        &self,
        side: DeliverySide,
        delivery_id: Uuid,
    ) -> AppResult<Option<LedgerRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| {
                r.events_on(side)
                    .map_or(false, |events| events.iter().any(|e| e.delivery_id == delivery_id))
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::{ActivityBody, ActorSettings};

    fn courier() -> Actor {
        let now = Utc::now();
        Actor {
            id: Uuid::new_v4(),
            actor_type: ActorType::Courier,
            full_name: "Courier One".to_string(),
            phone_num: Some("+998900000001".to_string()),
            deleted: false,
            settings: ActorSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_record_enforces_open_day_uniqueness() {
        let store = MemoryActivityStore::new();
        let actor = courier();
        store.insert_actor(&actor).await.unwrap();

        let now = Utc::now();
        let day = now;
        let first = LedgerRecord::new_for_day(&actor, day, None, now);
        store.insert_record(&first).await.unwrap();

        let second = LedgerRecord::new_for_day(&actor, day, None, now);
        let err = store.insert_record(&second).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Finishing the first record supersedes it; a fresh one may be
        // inserted for the same business day.
        let mut finished = first.clone();
        finished.day_finished = true;
        store.update_record(&finished).await.unwrap();
        store.insert_record(&second).await.unwrap();
    }

    #[tokio::test]
    async fn stale_version_update_is_a_conflict() {
        let store = MemoryActivityStore::new();
        let actor = courier();
        let now = Utc::now();
        let record = LedgerRecord::new_for_day(&actor, now, None, now);
        store.insert_record(&record).await.unwrap();

        // first writer wins and bumps the stored version
        store.update_record(&record).await.unwrap();

        // second writer still holds version 0
        let err = store.update_record(&record).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let fresh = store.record_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(fresh.version, 1);
        store.update_record(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn phone_lookup_ignores_deleted_actors() {
        let store = MemoryActivityStore::new();
        let mut actor = courier();
        actor.deleted = true;
        store.insert_actor(&actor).await.unwrap();

        let found = store
            .actor_by_phone(ActorType::Courier, "+998900000001")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn latest_record_orders_by_business_day() {
        let store = MemoryActivityStore::new();
        let actor = courier();
        let now = Utc::now();

        let old = LedgerRecord::new_for_day(&actor, now - chrono::Duration::days(2), None, now);
        store.insert_record(&old).await.unwrap();
        let recent =
            LedgerRecord::new_for_day(&actor, now - chrono::Duration::days(1), Some(&old), now);
        store.insert_record(&recent).await.unwrap();

        let latest = store.latest_record(actor.id).await.unwrap().unwrap();
        assert_eq!(latest.id, recent.id);
        assert!(matches!(latest.body, ActivityBody::Courier(_)));
    }
}

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::business_day::BusinessDayClock;
use crate::cache::ActivityCache;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{Actor, ActorType, ActivityPatch, LedgerRecord};
use crate::ledger::ActivityStore;

/// Lazily materializes "today's" ledger record for an actor, carrying
/// forward unconsumed balances from the latest prior record.
pub struct RolloverEngine {
    store: Arc<dyn ActivityStore>,
    cache: ActivityCache,
    clock: BusinessDayClock,
}

impl RolloverEngine {
    pub fn new(store: Arc<dyn ActivityStore>, cache: ActivityCache, clock: BusinessDayClock) -> Self {
        Self { store, cache, clock }
    }

    pub fn clock(&self) -> &BusinessDayClock {
        &self.clock
    }

    /// Resolve an actor path segment: exact id match first, then the phone
    /// number as the natural key.
    pub async fn resolve_actor(&self, actor_type: ActorType, key: &str) -> AppResult<Actor> {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::InvalidArgument("empty actor identifier".to_string()));
        }

        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(actor) = self.store.actor_by_id(id).await? {
                if actor.actor_type == actor_type && !actor.deleted {
                    return Ok(actor);
                }
            }
        }

        if let Some(actor) = self.store.actor_by_phone(actor_type, key).await? {
            return Ok(actor);
        }

        Err(AppError::NotFound(format!("{} {}", actor_type, key)))
    }

    pub async fn get_or_create_today(&self, actor: &Actor) -> AppResult<LedgerRecord> {
        self.get_or_create_at(actor, Utc::now()).await
    }

    /// `get_or_create_today` against an explicit reference instant
    pub async fn get_or_create_at(
        &self,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerRecord> {
        self.cache
            .get_or_load(actor.id, now, || self.load_or_create(actor, now))
            .await
    }

    async fn load_or_create(&self, actor: &Actor, now: DateTime<Utc>) -> AppResult<LedgerRecord> {
        let (day_start, day_end) = self.clock.current_window(now);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_materialize(actor, day_start, day_end, now).await {
                Ok(record) => return Ok(record),
                Err(AppError::Conflict(_)) => {
                    // Lost the creation race; the winner's record is persisted.
                    debug!(
                        "concurrent rollover for actor {}, re-fetching day {}",
                        actor.id, day_start
                    );
                    if let Some(record) = self
                        .store
                        .open_record_in_window(actor.id, day_start, day_end)
                        .await?
                    {
                        return Ok(record);
                    }
                    if attempt >= 3 {
                        return Err(AppError::Internal(format!(
                            "rollover for actor {} keeps conflicting without a visible record",
                            actor.id
                        )));
                    }
                }
                // Idempotent creation path: one retry on transient failure.
                Err(e) if e.is_transient() && attempt < 2 => {
                    warn!("transient store failure during rollover, retrying: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_materialize(
        &self,
        actor: &Actor,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<LedgerRecord> {
        if let Some(record) = self
            .store
            .open_record_in_window(actor.id, day_start, day_end)
            .await?
        {
            return Ok(record);
        }

        let prior = self.store.latest_record(actor.id).await?;
        let record = LedgerRecord::new_for_day(actor, day_start, prior.as_ref(), now);
        self.store.insert_record(&record).await?;
        info!(
            "materialized {} ledger record {} for business day {}",
            actor.actor_type, record.id, day_start
        );
        Ok(record)
    }

    /// Apply a validated per-type patch to a record. A concurrent write in
    /// between shows up as a version conflict; the patch is re-applied to the
    /// fresh record.
    pub async fn update_record(
        &self,
        record_id: Uuid,
        patch: ActivityPatch,
    ) -> AppResult<LedgerRecord> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut record = self
                .store
                .record_by_id(record_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("record {}", record_id)))?;
            record.apply_patch(patch.clone(), Utc::now())?;
            match self.store.update_record(&record).await {
                Ok(()) => {
                    record.version += 1;
                    self.cache.put(record.clone()).await;
                    return Ok(record);
                }
                Err(AppError::Conflict(_)) if attempt < 3 => {
                    debug!("concurrent write to record {}, re-applying patch", record_id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn delete_record(&self, record_id: Uuid) -> AppResult<()> {
        let record = self
            .store
            .record_by_id(record_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("record {}", record_id)))?;
        self.store.delete_record(record_id).await?;
        self.cache.invalidate(record.actor_id).await;
        Ok(())
    }

    pub async fn list_records(&self, actor: &Actor) -> AppResult<Vec<LedgerRecord>> {
        self.store.records_for_actor(actor.id, None).await
    }

    pub async fn last_30_days(&self, actor: &Actor) -> AppResult<Vec<LedgerRecord>> {
        let since = Utc::now() - Duration::days(30);
        self.store.records_for_actor(actor.id, Some(since)).await
    }

    /// All records of an actor type for the business day labelled by `date`
    pub async fn records_for_date(
        &self,
        actor_type: ActorType,
        date: NaiveDate,
    ) -> AppResult<Vec<LedgerRecord>> {
        let start = self.clock.cutover_on(date);
        let (_, end) = self.clock.window(start);
        self.store.records_in_window(actor_type, start, end).await
    }
}

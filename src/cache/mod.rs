use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::business_day::BusinessDayClock;
use crate::error::AppResult;
use crate::ledger::models::LedgerRecord;

/// In-memory cache of each actor's "today" ledger snapshot.
///
/// Entries expire at the business-day cutover rather than after a fixed
/// duration: a snapshot is fresh only while "now" still maps to the business
/// day it was computed for. The store stays the source of truth; the cache
/// never turns a read into an error.
#[derive(Clone)]
pub struct ActivityCache {
    entries: Arc<RwLock<HashMap<Uuid, LedgerRecord>>>,
    clock: BusinessDayClock,
}

impl ActivityCache {
    pub fn new(clock: BusinessDayClock) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Cached snapshot for the actor if it still belongs to the current
    /// business day and has not been closed.
    pub async fn get_fresh(&self, actor_id: Uuid, now: DateTime<Utc>) -> Option<LedgerRecord> {
        let entries = self.entries.read().await;
        let entry = entries.get(&actor_id)?;
        if entry.business_day == self.clock.day_start(now) && !entry.day_finished {
            debug!("activity cache hit for actor {}", actor_id);
            Some(entry.clone())
        } else {
            debug!("activity cache stale for actor {}", actor_id);
            None
        }
    }

    /// Read-through: serve the fresh snapshot or fall through to the loader
    /// and remember its result.
    pub async fn get_or_load<F, Fut>(
        &self,
        actor_id: Uuid,
        now: DateTime<Utc>,
        loader: F,
    ) -> AppResult<LedgerRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<LedgerRecord>>,
    {
        if let Some(record) = self.get_fresh(actor_id, now).await {
            return Ok(record);
        }
        let record = loader().await?;
        self.put(record.clone()).await;
        Ok(record)
    }

    /// Write-through: installed after every successful record write so no
    /// stale snapshot stays observable.
    pub async fn put(&self, record: LedgerRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(record.actor_id, record);
    }

    pub async fn invalidate(&self, actor_id: Uuid) {
        let mut entries = self.entries.write().await;
        entries.remove(&actor_id);
    }
}

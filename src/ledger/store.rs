use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{Actor, ActorType, DeliverySide, LedgerRecord};
use crate::error::AppResult;

/// The ledger-record store: the single source of truth for actors and their
/// daily activity documents. The cache is always subordinate to it.
///
/// Implementations must treat `insert_record` as the uniqueness gate for the
/// `(actor_id, business_day)` natural key and report a duplicate open record
/// as `AppError::Conflict`, which callers recover from by re-fetching.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    // Actors

    async fn actor_by_id(&self, id: Uuid) -> AppResult<Option<Actor>>;

    async fn actor_by_phone(&self, actor_type: ActorType, phone: &str)
        -> AppResult<Option<Actor>>;

    /// Non-deleted actors of a type, for the rollover sweep
    async fn active_actors(&self, actor_type: ActorType) -> AppResult<Vec<Actor>>;

    async fn insert_actor(&self, actor: &Actor) -> AppResult<()>;

    // Ledger records

    async fn record_by_id(&self, id: Uuid) -> AppResult<Option<LedgerRecord>>;

    /// The open (not `day_finished`) record of an actor within `[start, end)`
    async fn open_record_in_window(
        &self,
        actor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Option<LedgerRecord>>;

    /// Most recent record of an actor by business day, regardless of
    /// `day_finished`
    async fn latest_record(&self, actor_id: Uuid) -> AppResult<Option<LedgerRecord>>;

    /// Insert a fresh record; `Conflict` when an open record for the same
    /// `(actor_id, business_day)` already exists
    async fn insert_record(&self, record: &LedgerRecord) -> AppResult<()>;

    /// Persist a full updated record. The write only lands when
    /// `record.version` matches the stored row, which then increments its
    /// version; a stale version is `Conflict` (callers re-read and re-apply),
    /// an unknown id is `NotFound`.
    async fn update_record(&self, record: &LedgerRecord) -> AppResult<()>;

    async fn delete_record(&self, id: Uuid) -> AppResult<bool>;

    /// All records of an actor, newest first, optionally bounded below
    async fn records_for_actor(
        &self,
        actor_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<LedgerRecord>>;

    /// All records of an actor type whose business day falls in `[start, end)`
    async fn records_in_window(
        &self,
        actor_type: ActorType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<LedgerRecord>>;

    /// The record embedding a delivery event copy on the given side
    async fn record_with_delivery(
        &self,
        side: DeliverySide,
        delivery_id: Uuid,
    ) -> AppResult<Option<LedgerRecord>>;
}

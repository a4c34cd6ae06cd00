use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::{Actor, ActorType, DeliverySide, LedgerRecord};
use super::store::ActivityStore;
use crate::error::{AppError, AppResult};

const ACTOR_COLUMNS: &str =
    "id, actor_type, full_name, phone_num, deleted, settings, created_at, updated_at";
const RECORD_COLUMNS: &str =
    "id, actor_id, business_day, day_finished, version, body, created_at, updated_at";

/// Postgres-backed ledger store. Activity bodies are stored as JSONB
/// documents; a partial unique index on `(actor_id, business_day)` over open
/// records enforces the natural key.
pub struct PgActivityStore {
    pool: PgPool,
}

impl PgActivityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn actor_from_row(row: &PgRow) -> AppResult<Actor> {
        let actor_type: String = row.try_get("actor_type").map_err(map_db_err)?;
        let settings: serde_json::Value = row.try_get("settings").map_err(map_db_err)?;
        Ok(Actor {
            id: row.try_get("id").map_err(map_db_err)?,
            actor_type: ActorType::parse(&actor_type)?,
            full_name: row.try_get("full_name").map_err(map_db_err)?,
            phone_num: row.try_get("phone_num").map_err(map_db_err)?,
            deleted: row.try_get("deleted").map_err(map_db_err)?,
            settings: serde_json::from_value(settings)
                .map_err(|e| AppError::Internal(format!("corrupt actor settings: {}", e)))?,
            created_at: row.try_get("created_at").map_err(map_db_err)?,
            updated_at: row.try_get("updated_at").map_err(map_db_err)?,
        })
    }

    fn record_from_row(row: &PgRow) -> AppResult<LedgerRecord> {
        let body: serde_json::Value = row.try_get("body").map_err(map_db_err)?;
        Ok(LedgerRecord {
            id: row.try_get("id").map_err(map_db_err)?,
            actor_id: row.try_get("actor_id").map_err(map_db_err)?,
            business_day: row.try_get("business_day").map_err(map_db_err)?,
            day_finished: row.try_get("day_finished").map_err(map_db_err)?,
            version: row.try_get("version").map_err(map_db_err)?,
            body: serde_json::from_value(body)
                .map_err(|e| AppError::Internal(format!("corrupt activity body: {}", e)))?,
            created_at: row.try_get("created_at").map_err(map_db_err)?,
            updated_at: row.try_get("updated_at").map_err(map_db_err)?,
        })
    }
}

/// Classify driver errors into the application taxonomy. Unique violations
/// become `Conflict` (recovered by re-fetch); transient pool/transport
/// failures become `Unavailable`.
fn map_db_err(error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            AppError::Conflict(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut => AppError::Unavailable("database pool timed out".to_string()),
        sqlx::Error::Io(e) => AppError::Unavailable(format!("database I/O error: {}", e)),
        _ => AppError::Database(error),
    }
}

#[async_trait]
impl ActivityStore for PgActivityStore {
    async fn actor_by_id(&self, id: Uuid) -> AppResult<Option<Actor>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM actors WHERE id = $1",
            ACTOR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        row.as_ref().map(Self::actor_from_row).transpose()
    }

    async fn actor_by_phone(
        &self,
        actor_type: ActorType,
        phone: &str,
    ) -> AppResult<Option<Actor>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM actors WHERE actor_type = $1 AND phone_num = $2 AND deleted = FALSE",
            ACTOR_COLUMNS
        ))
        .bind(actor_type.as_str())
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        row.as_ref().map(Self::actor_from_row).transpose()
    }

    async fn active_actors(&self, actor_type: ActorType) -> AppResult<Vec<Actor>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM actors WHERE actor_type = $1 AND deleted = FALSE ORDER BY full_name",
            ACTOR_COLUMNS
        ))
        .bind(actor_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.iter().map(Self::actor_from_row).collect()
    }

    async fn insert_actor(&self, actor: &Actor) -> AppResult<()> {
        let settings = serde_json::to_value(&actor.settings)
            .map_err(|e| AppError::Internal(format!("serialize actor settings: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO actors (id, actor_type, full_name, phone_num, deleted, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(actor.id)
        .bind(actor.actor_type.as_str())
        .bind(&actor.full_name)
        .bind(&actor.phone_num)
        .bind(actor.deleted)
        .bind(settings)
        .bind(actor.created_at)
        .bind(actor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(())
    }

    async fn record_by_id(&self, id: Uuid) -> AppResult<Option<LedgerRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_records WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn open_record_in_window(
        &self,
        actor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Option<LedgerRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger_records
            WHERE actor_id = $1 AND business_day >= $2 AND business_day < $3
              AND day_finished = FALSE
            LIMIT 1
            "#,
            RECORD_COLUMNS
        ))
        .bind(actor_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn latest_record(&self, actor_id: Uuid) -> AppResult<Option<LedgerRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger_records
            WHERE actor_id = $1
            ORDER BY business_day DESC, created_at DESC
            LIMIT 1
            "#,
            RECORD_COLUMNS
        ))
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn insert_record(&self, record: &LedgerRecord) -> AppResult<()> {
        let body = serde_json::to_value(&record.body)
            .map_err(|e| AppError::Internal(format!("serialize activity body: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO ledger_records
                (id, actor_id, actor_type, business_day, day_finished, version, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.actor_id)
        .bind(record.body.actor_type().as_str())
        .bind(record.business_day)
        .bind(record.day_finished)
        .bind(record.version)
        .bind(body)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        Ok(())
    }

    async fn update_record(&self, record: &LedgerRecord) -> AppResult<()> {
        let body = serde_json::to_value(&record.body)
            .map_err(|e| AppError::Internal(format!("serialize activity body: {}", e)))?;
        // Optimistic write: only the version that was read may be replaced.
        // A stale writer re-reads and re-applies its mutation on Conflict.
        let result = sqlx::query(
            r#"
            UPDATE ledger_records
            SET day_finished = $2, body = $3, updated_at = $4, version = version + 1
            WHERE id = $1 AND version = $5
            "#,
        )
        .bind(record.id)
        .bind(record.day_finished)
        .bind(body)
        .bind(record.updated_at)
        .bind(record.version)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return match self.record_by_id(record.id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "record {} was modified concurrently",
                    record.id
                ))),
                None => Err(AppError::NotFound(format!("record {}", record.id))),
            };
        }
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM ledger_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn records_for_actor(
        &self,
        actor_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger_records
            WHERE actor_id = $1 AND ($2::timestamptz IS NULL OR business_day >= $2)
            ORDER BY business_day DESC
            "#,
            RECORD_COLUMNS
        ))
        .bind(actor_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn records_in_window(
        &self,
        actor_type: ActorType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger_records
            WHERE actor_type = $1 AND business_day >= $2 AND business_day < $3
            ORDER BY created_at
            "#,
            RECORD_COLUMNS
        ))
        .bind(actor_type.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn record_with_delivery(
        &self,
        side: DeliverySide,
        delivery_id: Uuid,
    ) -> AppResult<Option<LedgerRecord>> {
        // The warehouse body carries an `accepted` list too; the actor_type
        // filter keeps this lookup on the delivery's own ledgers.
        let (actor_type, list_key) = match side {
            DeliverySide::Buyer => (ActorType::Buyer, "accepted"),
            DeliverySide::Courier => (ActorType::Courier, "delivered_to"),
        };
        let probe = serde_json::json!([{ "delivery_id": delivery_id }]);
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_records WHERE actor_type = $1 AND body -> $2 @> $3 LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(actor_type.as_str())
        .bind(list_key)
        .bind(probe)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }
}

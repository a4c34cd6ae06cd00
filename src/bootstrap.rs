use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    api::AppState,
    cache::ActivityCache,
    config::Config,
    delivery::DeliveryReconciler,
    error::AppResult,
    ledger::{ActivityStore, PgActivityStore},
    rollover::{RolloverEngine, RolloverSweep},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("initializing application components");

    let pool = initialize_database(&config.database_url, config.max_connections).await?;
    let store: Arc<dyn ActivityStore> = Arc::new(PgActivityStore::new(pool));

    let clock = config
        .clock()
        .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
    info!(
        "business day cutover at {:02}:00 {}",
        config.cutover_hour, config.timezone
    );

    let cache = ActivityCache::new(clock);
    let rollover = Arc::new(RolloverEngine::new(store.clone(), cache.clone(), clock));
    let reconciler = Arc::new(DeliveryReconciler::new(
        store.clone(),
        cache,
        rollover.clone(),
    ));

    RolloverSweep::new(rollover.clone(), store).start();
    info!("rollover sweep scheduled");

    Ok(AppState {
        rollover,
        reconciler,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("connecting to database");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| crate::error::AppError::Config(format!("migration failed: {}", e)))?;

    info!("database initialized");
    Ok(pool)
}

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::ledger::models::ActorType;
use crate::ledger::ActivityStore;

use super::engine::RolloverEngine;

const LEDGER_ACTOR_TYPES: [ActorType; 4] = [
    ActorType::Buyer,
    ActorType::Courier,
    ActorType::Warehouse,
    ActorType::Importer,
];

/// Background sweep that materializes the new day's record for every active
/// actor shortly after the cutover, so reports do not wait for each actor's
/// first request. Rollover stays lazy and exactly-once; the sweep only walks
/// the same `get_or_create` path eagerly.
pub struct RolloverSweep {
    engine: Arc<RolloverEngine>,
    store: Arc<dyn ActivityStore>,
}

impl RolloverSweep {
    pub fn new(engine: Arc<RolloverEngine>, store: Arc<dyn ActivityStore>) -> Self {
        Self { engine, store }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("rollover sweep started");
            loop {
                let now = Utc::now();
                let (_, next_cutover) = self.engine.clock().current_window(now);
                let wait = (next_cutover - now).num_seconds().max(1) as u64;
                info!("next rollover sweep at {}", next_cutover);
                sleep(Duration::from_secs(wait)).await;
                self.run_once().await;
            }
        })
    }

    /// One sweep pass. Per-actor failures are logged and skipped; the lazy
    /// path materializes any record the sweep missed.
    pub async fn run_once(&self) -> usize {
        let mut materialized = 0;
        for actor_type in LEDGER_ACTOR_TYPES {
            let actors = match self.store.active_actors(actor_type).await {
                Ok(actors) => actors,
                Err(e) => {
                    error!("rollover sweep could not list {} actors: {}", actor_type, e);
                    continue;
                }
            };
            for actor in actors {
                match self.engine.get_or_create_today(&actor).await {
                    Ok(_) => materialized += 1,
                    Err(e) => {
                        warn!(
                            "rollover sweep skipped {} actor {}: {}",
                            actor_type, actor.id, e
                        );
                    }
                }
            }
        }
        info!("rollover sweep materialized {} records", materialized);
        materialized
    }
}

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handlers::{
    activities_by_date, create_delivery, delete_activity, get_delivery, get_todays_activity,
    health_check, list_activities, list_last_30_days, update_activity, update_delivery,
};
use crate::api::AppState;

pub fn create_app(state: AppState) -> Router {
    info!("setting up HTTP routes");

    Router::new()
        .route("/health", get(health_check))
        // daily activity, keyed by actor type and id-or-phone
        .route(
            "/:actor_type/activity/today/:actor_key",
            get(get_todays_activity),
        )
        .route("/:actor_type/activity/:actor_key/all", get(list_activities))
        .route(
            "/:actor_type/activity/:actor_key/last30days",
            get(list_last_30_days),
        )
        .route("/:actor_type/activity/date/:date", get(activities_by_date))
        .route(
            "/:actor_type/activity/record/:record_id",
            put(update_activity).delete(delete_activity),
        )
        // deliveries, recorded on both ledgers
        .route("/delivery", post(create_delivery))
        .route("/delivery/:delivery_id", get(get_delivery))
        .route("/delivery/:delivery_id", put(update_delivery))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("server listening on {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}

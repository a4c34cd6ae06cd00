use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

/// Returned by record deletion
#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

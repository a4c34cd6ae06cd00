use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::ledger::models::DeliveryEvent;

/// One requested delivery line. A missing price is filled from the buyer's
/// per-category price map during reconciliation.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeliveryLineRequest {
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDeliveryRequest {
    /// Courier id or phone number
    #[validate(length(min = 1))]
    pub courier: String,
    /// Buyer id or phone number
    #[validate(length(min = 1))]
    pub buyer: String,
    /// Emptiness is checked in the reconciler
    #[validate]
    pub eggs: Vec<DeliveryLineRequest>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub payment: Option<Decimal>,
}

/// Correction of an existing delivery. Omitted fields keep their recorded
/// values.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct DeliveryPatch {
    #[validate]
    pub eggs: Option<Vec<DeliveryLineRequest>>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub payment: Option<Decimal>,
}

/// Both ledger copies of one delivery
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryView {
    pub delivery_id: Uuid,
    pub courier_record_id: Uuid,
    pub buyer_record_id: Uuid,
    pub courier_event: DeliveryEvent,
    pub buyer_event: DeliveryEvent,
}

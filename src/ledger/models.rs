use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Actor kinds participating in the supply chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Buyer,
    Courier,
    Warehouse,
    Importer,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Buyer => "buyer",
            ActorType::Courier => "courier",
            ActorType::Warehouse => "warehouse",
            ActorType::Importer => "importer",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "buyer" => Ok(ActorType::Buyer),
            "courier" => Ok(ActorType::Courier),
            "warehouse" => Ok(ActorType::Warehouse),
            "importer" => Ok(ActorType::Importer),
            other => Err(AppError::InvalidArgument(format!(
                "unknown actor type: {}",
                other
            ))),
        }
    }

}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-category price override with optional expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowedCategory {
    pub category: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub base_price: Decimal,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub custom_price: Option<Decimal>,
    #[serde(default)]
    pub price_expiration: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Domain-specific actor settings; buyers use the price/whitelist fields,
/// other actor types leave the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorSettings {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub debt_limit: Option<Decimal>,
    #[serde(default)]
    pub allowed_categories: Vec<AllowedCategory>,
}

impl ActorSettings {
    /// Effective price per category: the custom price while it has not
    /// expired, the base price otherwise. Inactive entries are excluded.
    pub fn default_prices(&self, now: DateTime<Utc>) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for entry in &self.allowed_categories {
            if !entry.active {
                continue;
            }
            let custom_valid = entry.custom_price.is_some()
                && entry.price_expiration.map_or(true, |exp| exp > now);
            let price = if custom_valid {
                entry.custom_price.unwrap_or(entry.base_price)
            } else {
                entry.base_price
            };
            prices.insert(entry.category.clone(), price);
        }
        prices
    }
}

/// A supply-chain actor: buyer, courier, the warehouse singleton, or importer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub actor_type: ActorType,
    pub full_name: String,
    pub phone_num: Option<String>,
    pub deleted: bool,
    #[serde(default)]
    pub settings: ActorSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Actor {
    pub fn summary(&self) -> ActorSummary {
        ActorSummary {
            id: self.id,
            full_name: self.full_name.clone(),
            phone_num: self.phone_num.clone(),
        }
    }
}

/// Denormalized counterparty snapshot embedded in delivery events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSummary {
    pub id: Uuid,
    pub full_name: String,
    pub phone_num: Option<String>,
}

/// One item line of a delivery: eggs of a category at a unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EggLine {
    pub category: String,
    pub amount: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

impl EggLine {
    pub fn value(&self) -> Decimal {
        self.price * Decimal::from(self.amount)
    }
}

pub fn lines_value(lines: &[EggLine]) -> Decimal {
    lines.iter().map(EggLine::value).sum()
}

/// One physical handoff, embedded twice: under the courier's `delivered_to`
/// and the buyer's `accepted`, joined by `delivery_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub delivery_id: Uuid,
    pub counterparty: ActorSummary,
    pub eggs: Vec<EggLine>,
    #[serde(with = "rust_decimal::serde::float")]
    pub payment: Decimal,
    /// Buyer debt resulting from this event
    #[serde(with = "rust_decimal::serde::float")]
    pub debt: Decimal,
    pub time: DateTime<Utc>,
}

impl DeliveryEvent {
    pub fn lines_value(&self) -> Decimal {
        lines_value(&self.eggs)
    }
}

/// Which ledger a delivery event copy lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySide {
    Buyer,
    Courier,
}

/// Buyer daily activity. `debt` and `price` carry forward; `accepted` resets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerActivity {
    #[serde(with = "rust_decimal::serde::float")]
    pub debt: Decimal,
    #[serde(default)]
    pub price: HashMap<String, Decimal>,
    #[serde(default)]
    pub accepted: Vec<DeliveryEvent>,
}

/// Courier daily activity. `current` stock and `money` carry forward;
/// `by_morning` snapshots the prior `current`; everything else resets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierActivity {
    #[serde(default)]
    pub by_morning: HashMap<String, i64>,
    #[serde(default)]
    pub current: HashMap<String, i64>,
    #[serde(default)]
    pub broken: HashMap<String, i64>,
    #[serde(with = "rust_decimal::serde::float")]
    pub money: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub earnings: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub expenses: Decimal,
    #[serde(default)]
    pub accepted_today: bool,
    #[serde(default)]
    pub delivered_to: Vec<DeliveryEvent>,
}

/// Warehouse daily activity (one singleton warehouse actor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseActivity {
    #[serde(default)]
    pub by_morning: HashMap<String, i64>,
    #[serde(default)]
    pub current: HashMap<String, i64>,
    /// Operator-submitted end-of-day remainder
    #[serde(default)]
    pub remained: HashMap<String, i64>,
    #[serde(default)]
    pub broken: HashMap<String, i64>,
    #[serde(default)]
    pub deficit: HashMap<String, i64>,
    #[serde(default)]
    pub accepted: Vec<DeliveryEvent>,
    #[serde(default)]
    pub distributed_to: Vec<DeliveryEvent>,
}

/// Importer daily activity: intake registered per category. Nothing carries
/// forward; each day starts from an empty intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterActivity {
    #[serde(default)]
    pub intake: HashMap<String, i64>,
}

/// Per-actor-type activity payload of a ledger record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActivityBody {
    Buyer(BuyerActivity),
    Courier(CourierActivity),
    Warehouse(WarehouseActivity),
    Importer(ImporterActivity),
}

impl ActivityBody {
    pub fn actor_type(&self) -> ActorType {
        match self {
            ActivityBody::Buyer(_) => ActorType::Buyer,
            ActivityBody::Courier(_) => ActorType::Courier,
            ActivityBody::Warehouse(_) => ActorType::Warehouse,
            ActivityBody::Importer(_) => ActorType::Importer,
        }
    }

    /// Baseline for an actor with no prior record
    pub fn zero_baseline(actor: &Actor, now: DateTime<Utc>) -> Self {
        match actor.actor_type {
            ActorType::Buyer => ActivityBody::Buyer(BuyerActivity {
                debt: Decimal::ZERO,
                price: actor.settings.default_prices(now),
                accepted: Vec::new(),
            }),
            ActorType::Courier => ActivityBody::Courier(CourierActivity {
                by_morning: HashMap::new(),
                current: HashMap::new(),
                broken: HashMap::new(),
                money: Decimal::ZERO,
                earnings: Decimal::ZERO,
                expenses: Decimal::ZERO,
                accepted_today: false,
                delivered_to: Vec::new(),
            }),
            ActorType::Warehouse => ActivityBody::Warehouse(WarehouseActivity {
                by_morning: HashMap::new(),
                current: HashMap::new(),
                remained: HashMap::new(),
                broken: HashMap::new(),
                deficit: HashMap::new(),
                accepted: Vec::new(),
                distributed_to: Vec::new(),
            }),
            ActorType::Importer => ActivityBody::Importer(ImporterActivity {
                intake: HashMap::new(),
            }),
        }
    }

    /// New-day payload derived from this one: carried balances copied,
    /// per-day deltas reset. The per-field carry/reset assignment is the
    /// canonical model; historical variants that carried `payment` or reset
    /// `debt` are deliberately not reproduced.
    pub fn rolled_over(&self) -> Self {
        match self {
            ActivityBody::Buyer(b) => ActivityBody::Buyer(BuyerActivity {
                debt: b.debt,
                price: b.price.clone(),
                accepted: Vec::new(),
            }),
            ActivityBody::Courier(c) => ActivityBody::Courier(CourierActivity {
                by_morning: c.current.clone(),
                current: c.current.clone(),
                broken: HashMap::new(),
                money: c.money,
                earnings: Decimal::ZERO,
                expenses: Decimal::ZERO,
                accepted_today: false,
                delivered_to: Vec::new(),
            }),
            ActivityBody::Warehouse(w) => ActivityBody::Warehouse(WarehouseActivity {
                by_morning: w.current.clone(),
                current: w.current.clone(),
                remained: HashMap::new(),
                broken: HashMap::new(),
                deficit: HashMap::new(),
                accepted: Vec::new(),
                distributed_to: Vec::new(),
            }),
            // intake is a per-day delta, nothing carries
            ActivityBody::Importer(_) => ActivityBody::Importer(ImporterActivity {
                intake: HashMap::new(),
            }),
        }
    }

    pub fn as_buyer_mut(&mut self) -> Option<&mut BuyerActivity> {
        match self {
            ActivityBody::Buyer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_courier_mut(&mut self) -> Option<&mut CourierActivity> {
        match self {
            ActivityBody::Courier(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_buyer(&self) -> Option<&BuyerActivity> {
        match self {
            ActivityBody::Buyer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_courier(&self) -> Option<&CourierActivity> {
        match self {
            ActivityBody::Courier(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_importer(&self) -> Option<&ImporterActivity> {
        match self {
            ActivityBody::Importer(i) => Some(i),
            _ => None,
        }
    }
}

/// The per-actor, per-business-day activity document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: Uuid,
    pub actor_id: Uuid,
    /// Cutover-normalized start instant; with `actor_id` the natural key
    pub business_day: DateTime<Utc>,
    /// Terminal flag: a finished record is superseded by a fresh one on the
    /// next access
    pub day_finished: bool,
    /// Write counter for optimistic concurrency; the store only persists an
    /// update whose version matches the stored row
    #[serde(default)]
    pub version: i64,
    #[serde(flatten)]
    pub body: ActivityBody,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Materialize the record for `business_day`, carrying forward from
    /// `prior` when present.
    pub fn new_for_day(
        actor: &Actor,
        business_day: DateTime<Utc>,
        prior: Option<&LedgerRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let body = match prior {
            Some(p) => p.body.rolled_over(),
            None => ActivityBody::zero_baseline(actor, now),
        };
        Self {
            id: Uuid::new_v4(),
            actor_id: actor.id,
            business_day,
            day_finished: false,
            version: 0,
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a validated per-type patch. Delivery event lists are owned by
    /// the reconciler and are not patchable here.
    pub fn apply_patch(&mut self, patch: ActivityPatch, now: DateTime<Utc>) -> AppResult<()> {
        if self.day_finished {
            return Err(AppError::InvalidArgument(format!(
                "record {} is closed for its business day",
                self.id
            )));
        }
        match (&mut self.body, patch) {
            (ActivityBody::Buyer(b), ActivityPatch::Buyer(p)) => {
                if let Some(debt) = p.debt {
                    b.debt = debt;
                }
                if let Some(price) = p.price {
                    b.price = price;
                }
                if let Some(finished) = p.day_finished {
                    self.day_finished = finished;
                }
            }
            (ActivityBody::Courier(c), ActivityPatch::Courier(p)) => {
                if let Some(m) = p.by_morning {
                    c.by_morning = m;
                }
                if let Some(m) = p.current {
                    c.current = m;
                }
                if let Some(m) = p.broken {
                    c.broken = m;
                }
                if let Some(v) = p.money {
                    c.money = v;
                }
                if let Some(v) = p.earnings {
                    c.earnings = v;
                }
                if let Some(v) = p.expenses {
                    c.expenses = v;
                }
                if let Some(v) = p.accepted_today {
                    c.accepted_today = v;
                }
                if let Some(finished) = p.day_finished {
                    self.day_finished = finished;
                }
            }
            (ActivityBody::Warehouse(w), ActivityPatch::Warehouse(p)) => {
                if let Some(m) = p.by_morning {
                    w.by_morning = m;
                }
                if let Some(m) = p.current {
                    w.current = m;
                }
                if let Some(m) = p.remained {
                    w.remained = m;
                }
                if let Some(m) = p.broken {
                    w.broken = m;
                }
                if let Some(m) = p.deficit {
                    w.deficit = m;
                }
                if let Some(finished) = p.day_finished {
                    self.day_finished = finished;
                }
            }
            (ActivityBody::Importer(i), ActivityPatch::Importer(p)) => {
                if let Some(m) = p.intake {
                    i.intake = m;
                }
                if let Some(finished) = p.day_finished {
                    self.day_finished = finished;
                }
            }
            (body, patch) => {
                return Err(AppError::InvalidArgument(format!(
                    "patch for {} does not match {} record",
                    patch.actor_type(),
                    body.actor_type()
                )));
            }
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn events_on(&self, side: DeliverySide) -> Option<&Vec<DeliveryEvent>> {
        match (&self.body, side) {
            (ActivityBody::Buyer(b), DeliverySide::Buyer) => Some(&b.accepted),
            (ActivityBody::Courier(c), DeliverySide::Courier) => Some(&c.delivered_to),
            _ => None,
        }
    }
}

/// Validated per-type record patches for the update endpoint
#[derive(Debug, Clone)]
pub enum ActivityPatch {
    Buyer(BuyerActivityPatch),
    Courier(CourierActivityPatch),
    Warehouse(WarehouseActivityPatch),
    Importer(ImporterActivityPatch),
}

impl ActivityPatch {
    pub fn actor_type(&self) -> ActorType {
        match self {
            ActivityPatch::Buyer(_) => ActorType::Buyer,
            ActivityPatch::Courier(_) => ActorType::Courier,
            ActivityPatch::Warehouse(_) => ActorType::Warehouse,
            ActivityPatch::Importer(_) => ActorType::Importer,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuyerActivityPatch {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub debt: Option<Decimal>,
    pub price: Option<HashMap<String, Decimal>>,
    pub day_finished: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierActivityPatch {
    pub by_morning: Option<HashMap<String, i64>>,
    pub current: Option<HashMap<String, i64>>,
    pub broken: Option<HashMap<String, i64>>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub money: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub earnings: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub expenses: Option<Decimal>,
    pub accepted_today: Option<bool>,
    pub day_finished: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarehouseActivityPatch {
    pub by_morning: Option<HashMap<String, i64>>,
    pub current: Option<HashMap<String, i64>>,
    pub remained: Option<HashMap<String, i64>>,
    pub broken: Option<HashMap<String, i64>>,
    pub deficit: Option<HashMap<String, i64>>,
    pub day_finished: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImporterActivityPatch {
    pub intake: Option<HashMap<String, i64>>,
    pub day_finished: Option<bool>,
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::ActivityCache;
use crate::error::{AppError, AppResult, DeliveryError};
use crate::ledger::models::{
    lines_value, ActivityBody, ActorType, DeliveryEvent, DeliverySide, EggLine, LedgerRecord,
};
use crate::ledger::ActivityStore;
use crate::rollover::RolloverEngine;

use super::models::{CreateDeliveryRequest, DeliveryLineRequest, DeliveryPatch, DeliveryView};

const MAX_WRITE_ATTEMPTS: usize = 3;

/// Records each delivery on both ledgers it touches: the courier's
/// `delivered_to` list and the buyer's `accepted` list, joined by a shared
/// delivery id.
///
/// Writes go buyer-first. A courier-side failure triggers a compensating
/// buyer write and always surfaces as `PartialFailure`; a delivery found on
/// one ledger only is reported as a consistency error and never auto-healed.
pub struct DeliveryReconciler {
    store: Arc<dyn ActivityStore>,
    cache: ActivityCache,
    rollover: Arc<RolloverEngine>,
}

impl DeliveryReconciler {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        cache: ActivityCache,
        rollover: Arc<RolloverEngine>,
    ) -> Self {
        Self {
            store,
            cache,
            rollover,
        }
    }

    pub async fn record_delivery(&self, request: CreateDeliveryRequest) -> AppResult<DeliveryView> {
        self.record_delivery_at(request, Utc::now()).await
    }

    pub(crate) async fn record_delivery_at(
        &self,
        request: CreateDeliveryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<DeliveryView> {
        let courier = self
            .rollover
            .resolve_actor(ActorType::Courier, &request.courier)
            .await?;
        let buyer = self
            .rollover
            .resolve_actor(ActorType::Buyer, &request.buyer)
            .await?;

        let mut buyer_record = self.rollover.get_or_create_at(&buyer, now).await?;
        let mut courier_record = self.rollover.get_or_create_at(&courier, now).await?;

        if request.eggs.is_empty() {
            return Err(AppError::InvalidArgument(
                "delivery must carry at least one egg line".to_string(),
            ));
        }
        let payment = request.payment.unwrap_or(Decimal::ZERO);
        if payment < Decimal::ZERO {
            return Err(AppError::InvalidArgument(
                "payment must not be negative".to_string(),
            ));
        }

        let prices = match &buyer_record.body {
            ActivityBody::Buyer(b) => b.price.clone(),
            _ => HashMap::new(),
        };
        let lines = resolve_lines(&request.eggs, &prices)?;
        let value = lines_value(&lines);
        let delivery_id = Uuid::new_v4();
        let debt_delta = value - payment;

        // Buyer side first: the side that moves money owed.
        self.write_versioned(&mut buyer_record, |record| {
            let body = record
                .body
                .as_buyer_mut()
                .ok_or_else(|| AppError::Internal(format!("record {} is not a buyer record", record.id)))?;
            body.debt += debt_delta;
            body.accepted.push(DeliveryEvent {
                delivery_id,
                counterparty: courier.summary(),
                eggs: lines.clone(),
                payment,
                debt: body.debt,
                time: now,
            });
            record.updated_at = now;
            Ok(())
        })
        .await?;
        let buyer_event = find_event(&buyer_record, DeliverySide::Buyer, delivery_id)?;

        // Courier side: stock and cash.
        let courier_write = self
            .write_versioned(&mut courier_record, |record| {
                let body = record.body.as_courier_mut().ok_or_else(|| {
                    AppError::Internal(format!("record {} is not a courier record", record.id))
                })?;
                for line in &lines {
                    *body.current.entry(line.category.clone()).or_insert(0) -= line.amount;
                }
                body.money += payment;
                body.delivered_to.push(DeliveryEvent {
                    counterparty: buyer.summary(),
                    ..buyer_event.clone()
                });
                record.updated_at = now;
                Ok(())
            })
            .await;

        if let Err(cause) = courier_write {
            let rolled_back = self
                .undo_buyer_create(buyer_record.id, delivery_id, debt_delta, now)
                .await;
            self.cache.invalidate(buyer.id).await;
            self.cache.invalidate(courier.id).await;
            return Err(DeliveryError::PartialFailure {
                delivery_id,
                committed_side: "buyer",
                rolled_back,
                detail: cause.to_string(),
            }
            .into());
        }
        let courier_event = find_event(&courier_record, DeliverySide::Courier, delivery_id)?;

        self.cache.put(buyer_record.clone()).await;
        self.cache.put(courier_record.clone()).await;
        info!(
            "recorded delivery {} from courier {} to buyer {}",
            delivery_id, courier.id, buyer.id
        );

        Ok(DeliveryView {
            delivery_id,
            courier_record_id: courier_record.id,
            buyer_record_id: buyer_record.id,
            courier_event,
            buyer_event,
        })
    }

    /// Read-modify-write under optimistic concurrency: a version conflict
    /// means another request landed first, so the record is re-read and the
    /// mutation re-applied to the fresh copy. Transient store failures are
    /// not retried here.
    async fn write_versioned<F>(&self, record: &mut LedgerRecord, mutate: F) -> AppResult<()>
    where
        F: Fn(&mut LedgerRecord) -> AppResult<()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            mutate(record)?;
            match self.store.update_record(record).await {
                Ok(()) => {
                    record.version += 1;
                    return Ok(());
                }
                Err(AppError::Conflict(_)) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!("concurrent write to record {}, re-applying", record.id);
                    *record = self
                        .store
                        .record_by_id(record.id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("record {}", record.id)))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Compensating delete of the buyer-side event after a courier-side
    /// failure. Returns whether the compensation itself succeeded.
    async fn undo_buyer_create(
        &self,
        buyer_record_id: Uuid,
        delivery_id: Uuid,
        debt_delta: Decimal,
        now: DateTime<Utc>,
    ) -> bool {
        let result: AppResult<()> = async {
            let mut record = self
                .store
                .record_by_id(buyer_record_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("record {}", buyer_record_id)))?;
            self.write_versioned(&mut record, |record| {
                let body = record.body.as_buyer_mut().ok_or_else(|| {
                    AppError::Internal(format!("record {} is not a buyer record", record.id))
                })?;
                let before = body.accepted.len();
                body.accepted.retain(|e| e.delivery_id != delivery_id);
                if body.accepted.len() < before {
                    body.debt -= debt_delta;
                }
                record.updated_at = now;
                Ok(())
            })
            .await
        }
        .await;

        match result {
            Ok(()) => {
                warn!("rolled back buyer side of delivery {}", delivery_id);
                true
            }
            Err(e) => {
                error!(
                    "could not roll back buyer side of delivery {}: {}",
                    delivery_id, e
                );
                false
            }
        }
    }

    /// Both ledger copies of a delivery, or the precise way they disagree.
    pub async fn get_delivery(&self, delivery_id: Uuid) -> AppResult<DeliveryView> {
        let (buyer_record, courier_record) = self.both_sides(delivery_id).await?;
        let buyer_event = find_event(&buyer_record, DeliverySide::Buyer, delivery_id)?;
        let courier_event = find_event(&courier_record, DeliverySide::Courier, delivery_id)?;
        Ok(DeliveryView {
            delivery_id,
            courier_record_id: courier_record.id,
            buyer_record_id: buyer_record.id,
            courier_event,
            buyer_event,
        })
    }

    pub async fn update_delivery(
        &self,
        delivery_id: Uuid,
        patch: DeliveryPatch,
    ) -> AppResult<DeliveryView> {
        self.update_delivery_at(delivery_id, patch, Utc::now()).await
    }

    pub(crate) async fn update_delivery_at(
        &self,
        delivery_id: Uuid,
        patch: DeliveryPatch,
        now: DateTime<Utc>,
    ) -> AppResult<DeliveryView> {
        let (mut buyer_record, mut courier_record) = self.both_sides(delivery_id).await?;
        // A finished record has already handed its balances to a successor;
        // rewriting it would desynchronize the carried balance.
        if buyer_record.day_finished || courier_record.day_finished {
            return Err(AppError::InvalidArgument(format!(
                "delivery {} belongs to a record closed for its business day",
                delivery_id
            )));
        }
        let old_buyer_event = find_event(&buyer_record, DeliverySide::Buyer, delivery_id)?;

        let prices = match &buyer_record.body {
            ActivityBody::Buyer(b) => b.price.clone(),
            _ => HashMap::new(),
        };
        let new_lines = match &patch.eggs {
            Some(lines) if lines.is_empty() => {
                return Err(AppError::InvalidArgument(
                    "delivery must carry at least one egg line".to_string(),
                ))
            }
            Some(lines) => resolve_lines(lines, &prices)?,
            None => old_buyer_event.eggs.clone(),
        };
        let new_payment = patch.payment.unwrap_or(old_buyer_event.payment);
        if new_payment < Decimal::ZERO {
            return Err(AppError::InvalidArgument(
                "payment must not be negative".to_string(),
            ));
        }

        let old_value = old_buyer_event.lines_value();
        let new_value = lines_value(&new_lines);
        let debt_delta = (new_value - new_payment) - (old_value - old_buyer_event.payment);
        let payment_delta = new_payment - old_buyer_event.payment;

        // Buyer side first, mirroring creation.
        self.write_versioned(&mut buyer_record, |record| {
            let body = record
                .body
                .as_buyer_mut()
                .ok_or_else(|| AppError::Internal(format!("record {} is not a buyer record", record.id)))?;
            body.debt += debt_delta;
            let event = body
                .accepted
                .iter_mut()
                .find(|e| e.delivery_id == delivery_id)
                .ok_or_else(|| AppError::Internal(format!("delivery {} vanished mid-update", delivery_id)))?;
            event.eggs = new_lines.clone();
            event.payment = new_payment;
            event.debt += debt_delta;
            record.updated_at = now;
            Ok(())
        })
        .await?;
        let buyer_event = find_event(&buyer_record, DeliverySide::Buyer, delivery_id)?;

        let courier_write = self
            .write_versioned(&mut courier_record, |record| {
                let body = record.body.as_courier_mut().ok_or_else(|| {
                    AppError::Internal(format!("record {} is not a courier record", record.id))
                })?;
                for line in &old_buyer_event.eggs {
                    *body.current.entry(line.category.clone()).or_insert(0) += line.amount;
                }
                for line in &new_lines {
                    *body.current.entry(line.category.clone()).or_insert(0) -= line.amount;
                }
                body.money += payment_delta;
                let event = body
                    .delivered_to
                    .iter_mut()
                    .find(|e| e.delivery_id == delivery_id)
                    .ok_or_else(|| AppError::Internal(format!("delivery {} vanished mid-update", delivery_id)))?;
                event.eggs = new_lines.clone();
                event.payment = new_payment;
                event.debt += debt_delta;
                record.updated_at = now;
                Ok(())
            })
            .await;

        if let Err(cause) = courier_write {
            let rolled_back = self
                .undo_buyer_update(buyer_record.id, delivery_id, &old_buyer_event, debt_delta, now)
                .await;
            self.cache.invalidate(buyer_record.actor_id).await;
            self.cache.invalidate(courier_record.actor_id).await;
            return Err(DeliveryError::PartialFailure {
                delivery_id,
                committed_side: "buyer",
                rolled_back,
                detail: cause.to_string(),
            }
            .into());
        }
        let courier_event = find_event(&courier_record, DeliverySide::Courier, delivery_id)?;

        self.cache.put(buyer_record.clone()).await;
        self.cache.put(courier_record.clone()).await;
        info!("updated delivery {}", delivery_id);

        Ok(DeliveryView {
            delivery_id,
            courier_record_id: courier_record.id,
            buyer_record_id: buyer_record.id,
            courier_event,
            buyer_event,
        })
    }

    async fn undo_buyer_update(
        &self,
        buyer_record_id: Uuid,
        delivery_id: Uuid,
        old_event: &DeliveryEvent,
        debt_delta: Decimal,
        now: DateTime<Utc>,
    ) -> bool {
        let result: AppResult<()> = async {
            let mut record = self
                .store
                .record_by_id(buyer_record_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("record {}", buyer_record_id)))?;
            self.write_versioned(&mut record, |record| {
                let body = record.body.as_buyer_mut().ok_or_else(|| {
                    AppError::Internal(format!("record {} is not a buyer record", record.id))
                })?;
                if let Some(event) = body
                    .accepted
                    .iter_mut()
                    .find(|e| e.delivery_id == delivery_id)
                {
                    if *event != *old_event {
                        *event = old_event.clone();
                        body.debt -= debt_delta;
                    }
                }
                record.updated_at = now;
                Ok(())
            })
            .await
        }
        .await;

        match result {
            Ok(()) => {
                warn!("rolled back buyer side of delivery update {}", delivery_id);
                true
            }
            Err(e) => {
                error!(
                    "could not roll back buyer side of delivery update {}: {}",
                    delivery_id, e
                );
                false
            }
        }
    }

    /// Look a delivery up on both ledgers. A one-sided hit is a consistency
    /// error surfaced to the operator, not repaired.
    async fn both_sides(&self, delivery_id: Uuid) -> AppResult<(LedgerRecord, LedgerRecord)> {
        let buyer_record = self
            .store
            .record_with_delivery(DeliverySide::Buyer, delivery_id)
            .await?;
        let courier_record = self
            .store
            .record_with_delivery(DeliverySide::Courier, delivery_id)
            .await?;
        match (buyer_record, courier_record) {
            (Some(b), Some(c)) => Ok((b, c)),
            (None, None) => Err(DeliveryError::NotFound { delivery_id }.into()),
            (Some(_), None) => Err(DeliveryError::OneSided {
                delivery_id,
                present_side: "buyer",
            }
            .into()),
            (None, Some(_)) => Err(DeliveryError::OneSided {
                delivery_id,
                present_side: "courier",
            }
            .into()),
        }
    }
}

fn find_event(
    record: &LedgerRecord,
    side: DeliverySide,
    delivery_id: Uuid,
) -> AppResult<DeliveryEvent> {
    record
        .events_on(side)
        .and_then(|events| events.iter().find(|e| e.delivery_id == delivery_id))
        .cloned()
        .ok_or_else(|| {
            AppError::Internal(format!(
                "record {} matched delivery {} but carries no such event",
                record.id, delivery_id
            ))
        })
}

fn resolve_lines(
    requested: &[DeliveryLineRequest],
    prices: &HashMap<String, Decimal>,
) -> AppResult<Vec<EggLine>> {
    requested
        .iter()
        .map(|line| {
            if line.amount <= 0 {
                return Err(AppError::InvalidArgument(format!(
                    "amount for category {} must be positive",
                    line.category
                )));
            }
            let price = match line.price {
                Some(p) if p >= Decimal::ZERO => p,
                Some(_) => {
                    return Err(AppError::InvalidArgument(format!(
                        "price for category {} must not be negative",
                        line.category
                    )))
                }
                None => *prices.get(&line.category).ok_or_else(|| {
                    AppError::InvalidArgument(format!(
                        "no price on file for category {}",
                        line.category
                    ))
                })?,
            };
            Ok(EggLine {
                category: line.category.clone(),
                amount: line.amount,
                price,
            })
        })
        .collect()
}

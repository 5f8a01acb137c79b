//! Settlement Queue Projection.
//!
//! Two read models under one cursor set: shipments that are delivered and
//! waiting for a settlement, and company-paid expenses that still carry a
//! deductible balance. The settlement service reads candidate ids from here,
//! then rehydrates the authoritative aggregates before building a draft.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use haulbooks_core::{Money, TenantId};
use haulbooks_dispatch::{ShipmentEvent, ShipmentId};
use haulbooks_events::EventEnvelope;
use haulbooks_pay::{ExpenseCategory, PayeeId};
use haulbooks_settlement::{ExpenseEvent, ExpenseId, PaidBy};

use crate::projections::SequenceCursors;
use crate::read_model::TenantStore;
use crate::services::SettlementWorklist;

/// Read model: one shipment's position in the settlement queue.
///
/// A shipment enters at dispatch, becomes settleable at delivery (when its
/// pay snapshot is frozen), and leaves when it is cancelled, deleted, or
/// attached to a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedShipment {
    pub shipment_id: ShipmentId,
    pub payee_id: PayeeId,
    pub delivered_at: Option<DateTime<Utc>>,
    pub gross_pay: Money,
    pub assigned: bool,
}

/// Read model: one expense's undrawn balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenExpense {
    pub expense_id: ExpenseId,
    pub payee_id: Option<PayeeId>,
    pub shipment_id: Option<ShipmentId>,
    pub category: ExpenseCategory,
    pub paid_by: PaidBy,
    pub amount: Money,
    pub remaining: Money,
}

#[derive(Debug, Error)]
pub enum SettlementQueueProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Settlement queue projection over shipment and expense streams.
#[derive(Debug)]
pub struct SettlementQueueProjection<Q, X>
where
    Q: TenantStore<ShipmentId, QueuedShipment>,
    X: TenantStore<ExpenseId, OpenExpense>,
{
    shipments: Q,
    expenses: X,
    cursors: SequenceCursors,
}

impl<Q, X> SettlementQueueProjection<Q, X>
where
    Q: TenantStore<ShipmentId, QueuedShipment>,
    X: TenantStore<ExpenseId, OpenExpense>,
{
    pub fn new(shipments: Q, expenses: X) -> Self {
        Self {
            shipments,
            expenses,
            cursors: SequenceCursors::default(),
        }
    }

    pub fn shipment(&self, tenant_id: TenantId, shipment_id: &ShipmentId) -> Option<QueuedShipment> {
        self.shipments.get(tenant_id, shipment_id)
    }

    pub fn expense(&self, tenant_id: TenantId, expense_id: &ExpenseId) -> Option<OpenExpense> {
        self.expenses.get(tenant_id, expense_id)
    }

    /// Shipments ready to settle for one payee: delivered and not yet
    /// attached to a settlement.
    pub fn queue_for_payee(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<QueuedShipment> {
        self.shipments
            .list(tenant_id)
            .into_iter()
            .filter(|q| q.payee_id == payee_id && q.delivered_at.is_some() && !q.assigned)
            .collect()
    }

    /// Company-paid expenses with a deductible balance left for this payee,
    /// either pinned to the payee directly or riding on one of the payee's
    /// queued shipments.
    pub fn open_expenses_for_payee(
        &self,
        tenant_id: TenantId,
        payee_id: PayeeId,
    ) -> Vec<OpenExpense> {
        let queued: Vec<ShipmentId> = self
            .queue_for_payee(tenant_id, payee_id)
            .into_iter()
            .map(|q| q.shipment_id)
            .collect();

        self.expenses
            .list(tenant_id)
            .into_iter()
            .filter(|x| {
                if x.remaining <= Money::ZERO || x.paid_by != PaidBy::Company {
                    return false;
                }
                match x.shipment_id {
                    Some(shipment_id) => {
                        queued.contains(&shipment_id)
                            && x.payee_id.is_none_or(|p| p == payee_id)
                    }
                    None => x.payee_id == Some(payee_id),
                }
            })
            .collect()
    }

    /// Every payee with at least one settleable shipment, in a stable order.
    pub fn payees_with_work(&self, tenant_id: TenantId) -> Vec<PayeeId> {
        let mut payees: Vec<PayeeId> = self
            .shipments
            .list(tenant_id)
            .into_iter()
            .filter(|q| q.delivered_at.is_some() && !q.assigned)
            .map(|q| q.payee_id)
            .collect();
        payees.sort_by_key(|p| *p.0.as_uuid().as_bytes());
        payees.dedup();
        payees
    }

    /// Apply one envelope from the bus.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SettlementQueueProjectionError> {
        let aggregate_type = envelope.aggregate_type();
        if aggregate_type != "shipment" && aggregate_type != "expense" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursors.last(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(SettlementQueueProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(SettlementQueueProjectionError::NonMonotonicSequence { last, found: seq });
        }

        if aggregate_type == "shipment" {
            self.apply_shipment_event(envelope)?;
        } else {
            self.apply_expense_event(envelope)?;
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn apply_shipment_event(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SettlementQueueProjectionError> {
        let tenant_id = envelope.tenant_id();
        let event: ShipmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SettlementQueueProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, shipment_id) = match &event {
            ShipmentEvent::ShipmentCreated(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::FinancialsUpdated(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ShipmentDispatched(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ShipmentInTransit(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ShipmentDelivered(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ShipmentCompleted(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ShipmentCancelled(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::DocumentVerified(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::AdjustmentRequested(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::AdjustmentApproved(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::AdjustmentRejected(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::AssignedToSettlement(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ReleasedFromSettlement(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::InvoiceRecorded(e) => (e.tenant_id, e.shipment_id),
            ShipmentEvent::ShipmentDeleted(e) => (e.tenant_id, e.shipment_id),
        };
        if event_tenant != tenant_id {
            return Err(SettlementQueueProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if shipment_id.0 != envelope.aggregate_id() {
            return Err(SettlementQueueProjectionError::TenantIsolation(
                "event shipment_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            ShipmentEvent::ShipmentDispatched(e) => {
                let record = QueuedShipment {
                    shipment_id: e.shipment_id,
                    payee_id: e.payee_id,
                    delivered_at: None,
                    gross_pay: Money::ZERO,
                    assigned: false,
                };
                self.shipments.upsert(tenant_id, e.shipment_id, record);
            }
            ShipmentEvent::ShipmentDelivered(e) => {
                if let Some(mut record) = self.shipments.get(tenant_id, &e.shipment_id) {
                    record.delivered_at = Some(e.occurred_at);
                    record.gross_pay = e.payee_snapshot.total_gross;
                    self.shipments.upsert(tenant_id, e.shipment_id, record);
                }
            }
            ShipmentEvent::AdjustmentApproved(e) => {
                if let Some(mut record) = self.shipments.get(tenant_id, &e.shipment_id) {
                    record.gross_pay = e.payee_snapshot.total_gross;
                    self.shipments.upsert(tenant_id, e.shipment_id, record);
                }
            }
            ShipmentEvent::AssignedToSettlement(e) => {
                if let Some(mut record) = self.shipments.get(tenant_id, &e.shipment_id) {
                    record.assigned = true;
                    self.shipments.upsert(tenant_id, e.shipment_id, record);
                }
            }
            ShipmentEvent::ReleasedFromSettlement(e) => {
                if let Some(mut record) = self.shipments.get(tenant_id, &e.shipment_id) {
                    record.assigned = false;
                    self.shipments.upsert(tenant_id, e.shipment_id, record);
                }
            }
            ShipmentEvent::ShipmentCancelled(e) => {
                self.shipments.remove(tenant_id, &e.shipment_id);
            }
            ShipmentEvent::ShipmentDeleted(e) => {
                self.shipments.remove(tenant_id, &e.shipment_id);
            }
            // Creation, transit, documents, invoicing and the adjustment
            // paper trail do not move the queue.
            _ => {}
        }

        Ok(())
    }

    fn apply_expense_event(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), SettlementQueueProjectionError> {
        let tenant_id = envelope.tenant_id();
        let event: ExpenseEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| SettlementQueueProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, expense_id) = match &event {
            ExpenseEvent::ExpenseRecorded(e) => (e.tenant_id, e.expense_id),
            ExpenseEvent::ExpenseConsumed(e) => (e.tenant_id, e.expense_id),
            ExpenseEvent::ExpenseDrawReleased(e) => (e.tenant_id, e.expense_id),
        };
        if event_tenant != tenant_id {
            return Err(SettlementQueueProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if expense_id.0 != envelope.aggregate_id() {
            return Err(SettlementQueueProjectionError::TenantIsolation(
                "event expense_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            ExpenseEvent::ExpenseRecorded(e) => {
                let record = OpenExpense {
                    expense_id: e.expense_id,
                    payee_id: e.payee_id,
                    shipment_id: e.shipment_id,
                    category: e.category,
                    paid_by: e.paid_by,
                    amount: e.amount,
                    remaining: e.amount,
                };
                self.expenses.upsert(tenant_id, e.expense_id, record);
            }
            ExpenseEvent::ExpenseConsumed(e) => {
                if let Some(mut record) = self.expenses.get(tenant_id, &e.expense_id) {
                    record.remaining = e.remaining_after;
                    self.expenses.upsert(tenant_id, e.expense_id, record);
                }
            }
            ExpenseEvent::ExpenseDrawReleased(e) => {
                if let Some(mut record) = self.expenses.get(tenant_id, &e.expense_id) {
                    record.remaining = e.remaining_after;
                    self.expenses.upsert(tenant_id, e.expense_id, record);
                }
            }
        }

        Ok(())
    }

    /// Rebuild both read models from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), SettlementQueueProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.shipments.clear_tenant(t);
                self.expenses.clear_tenant(t);
                self.cursors.clear_tenant(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

impl<Q, X> SettlementWorklist for SettlementQueueProjection<Q, X>
where
    Q: TenantStore<ShipmentId, QueuedShipment>,
    X: TenantStore<ExpenseId, OpenExpense>,
{
    fn settleable_shipments(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<ShipmentId> {
        self.queue_for_payee(tenant_id, payee_id)
            .into_iter()
            .map(|q| q.shipment_id)
            .collect()
    }

    fn open_expenses(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<ExpenseId> {
        self.open_expenses_for_payee(tenant_id, payee_id)
            .into_iter()
            .map(|x| x.expense_id)
            .collect()
    }

    fn payees_with_work(&self, tenant_id: TenantId) -> Vec<PayeeId> {
        SettlementQueueProjection::payees_with_work(self, tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use uuid::Uuid;

    use haulbooks_core::{AggregateId, UserId};
    use haulbooks_dispatch::{
        AssignedToSettlement, ReleasedFromSettlement, ShipmentCancelled, ShipmentDelivered,
        ShipmentDispatched,
    };
    use haulbooks_pay::PaySnapshot;
    use haulbooks_settlement::{ExpenseConsumed, ExpenseDrawReleased, ExpenseRecorded};

    use crate::read_model::InMemoryTenantStore;

    use super::*;

    type TestProjection = SettlementQueueProjection<
        Arc<InMemoryTenantStore<ShipmentId, QueuedShipment>>,
        Arc<InMemoryTenantStore<ExpenseId, OpenExpense>>,
    >;

    fn projection() -> TestProjection {
        SettlementQueueProjection::new(
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(InMemoryTenantStore::new()),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 10, 12, 0, 0).unwrap()
    }

    fn shipment_envelope(
        tenant_id: TenantId,
        shipment_id: ShipmentId,
        seq: u64,
        event: &ShipmentEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            UserId::new(),
            shipment_id.0,
            "shipment".to_string(),
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn expense_envelope(
        tenant_id: TenantId,
        expense_id: ExpenseId,
        seq: u64,
        event: &ExpenseEvent,
    ) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            UserId::new(),
            expense_id.0,
            "expense".to_string(),
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn dispatched(tenant_id: TenantId, shipment_id: ShipmentId, payee_id: PayeeId) -> ShipmentEvent {
        ShipmentEvent::ShipmentDispatched(ShipmentDispatched {
            tenant_id,
            shipment_id,
            payee_id,
            dispatcher_id: None,
            occurred_at: now(),
        })
    }

    fn delivered(tenant_id: TenantId, shipment_id: ShipmentId, gross: Money) -> ShipmentEvent {
        ShipmentEvent::ShipmentDelivered(ShipmentDelivered {
            tenant_id,
            shipment_id,
            driver_pay_terms: None,
            dispatcher_pay_terms: None,
            payee_snapshot: PaySnapshot {
                base_pay: gross,
                accessorial_pay: Money::ZERO,
                total_gross: gross,
                warning: None,
            },
            dispatcher_commission: Money::ZERO,
            occurred_at: now(),
        })
    }

    fn recorded(
        tenant_id: TenantId,
        expense_id: ExpenseId,
        payee_id: Option<PayeeId>,
        shipment_id: Option<ShipmentId>,
        paid_by: PaidBy,
        amount: Money,
    ) -> ExpenseEvent {
        ExpenseEvent::ExpenseRecorded(ExpenseRecorded {
            tenant_id,
            expense_id,
            payee_id,
            shipment_id,
            category: ExpenseCategory::Fuel,
            paid_by,
            amount,
            incurred_at: now(),
            occurred_at: now(),
        })
    }

    fn consumed(
        tenant_id: TenantId,
        expense_id: ExpenseId,
        amount: Money,
        remaining_after: Money,
    ) -> ExpenseEvent {
        ExpenseEvent::ExpenseConsumed(ExpenseConsumed {
            tenant_id,
            expense_id,
            settlement_id: AggregateId::new(),
            amount,
            remaining_after,
            occurred_at: now(),
        })
    }

    fn deliver_shipment(
        proj: &TestProjection,
        tenant: TenantId,
        shipment: ShipmentId,
        payee: PayeeId,
        gross: Money,
    ) {
        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            2,
            &dispatched(tenant, shipment, payee),
        ))
        .unwrap();
        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            3,
            &delivered(tenant, shipment, gross),
        ))
        .unwrap();
    }

    #[test]
    fn dispatched_shipments_wait_for_delivery() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();
        let shipment = ShipmentId::new(AggregateId::new());

        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            2,
            &dispatched(tenant, shipment, payee),
        ))
        .unwrap();
        assert!(proj.queue_for_payee(tenant, payee).is_empty());

        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            3,
            &delivered(tenant, shipment, Money::from_dollars(1_200)),
        ))
        .unwrap();

        let queue = proj.queue_for_payee(tenant, payee);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].shipment_id, shipment);
        assert_eq!(queue[0].gross_pay, Money::from_dollars(1_200));
    }

    #[test]
    fn approved_adjustments_reprice_the_queued_shipment() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();
        let shipment = ShipmentId::new(AggregateId::new());
        deliver_shipment(&proj, tenant, shipment, payee, Money::from_dollars(1_200));

        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            4,
            &ShipmentEvent::AdjustmentApproved(haulbooks_dispatch::AdjustmentApproved {
                tenant_id: tenant,
                shipment_id: shipment,
                adjustment_id: haulbooks_dispatch::AdjustmentId::new(AggregateId::new()),
                approved_by: UserId::new(),
                reason: "detention added after delivery".to_string(),
                base_rate: Money::from_dollars(2_600),
                miles: 900,
                accessorials: vec![],
                payee_snapshot: PaySnapshot {
                    base_pay: Money::from_dollars(1_450),
                    accessorial_pay: Money::ZERO,
                    total_gross: Money::from_dollars(1_450),
                    warning: None,
                },
                dispatcher_commission: Money::ZERO,
                log_entries: vec![],
                occurred_at: now(),
            }),
        ))
        .unwrap();

        let queue = proj.queue_for_payee(tenant, payee);
        assert_eq!(queue[0].gross_pay, Money::from_dollars(1_450));
    }

    #[test]
    fn assignment_hides_a_shipment_and_release_restores_it() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();
        let shipment = ShipmentId::new(AggregateId::new());
        let settlement = AggregateId::new();
        deliver_shipment(&proj, tenant, shipment, payee, Money::from_dollars(900));

        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            4,
            &ShipmentEvent::AssignedToSettlement(AssignedToSettlement {
                tenant_id: tenant,
                shipment_id: shipment,
                settlement_id: settlement,
                occurred_at: now(),
            }),
        ))
        .unwrap();
        assert!(proj.queue_for_payee(tenant, payee).is_empty());
        assert!(proj.payees_with_work(tenant).is_empty());

        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            5,
            &ShipmentEvent::ReleasedFromSettlement(ReleasedFromSettlement {
                tenant_id: tenant,
                shipment_id: shipment,
                settlement_id: settlement,
                occurred_at: now(),
            }),
        ))
        .unwrap();
        assert_eq!(proj.queue_for_payee(tenant, payee).len(), 1);
        assert_eq!(proj.payees_with_work(tenant), vec![payee]);
    }

    #[test]
    fn cancelled_shipments_leave_the_queue_for_good() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();
        let shipment = ShipmentId::new(AggregateId::new());
        deliver_shipment(&proj, tenant, shipment, payee, Money::from_dollars(900));

        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            4,
            &ShipmentEvent::ShipmentCancelled(ShipmentCancelled {
                tenant_id: tenant,
                shipment_id: shipment,
                reason: Some("broker pulled the load".to_string()),
                occurred_at: now(),
            }),
        ))
        .unwrap();

        assert!(proj.queue_for_payee(tenant, payee).is_empty());
        assert!(proj.shipment(tenant, &shipment).is_none());
    }

    #[test]
    fn draws_shrink_an_expense_until_it_closes() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();
        let expense = ExpenseId(AggregateId::new());

        proj.apply_envelope(&expense_envelope(
            tenant,
            expense,
            1,
            &recorded(
                tenant,
                expense,
                Some(payee),
                None,
                PaidBy::Company,
                Money::from_dollars(500),
            ),
        ))
        .unwrap();
        assert_eq!(proj.open_expenses_for_payee(tenant, payee).len(), 1);

        proj.apply_envelope(&expense_envelope(
            tenant,
            expense,
            2,
            &consumed(
                tenant,
                expense,
                Money::from_dollars(300),
                Money::from_dollars(200),
            ),
        ))
        .unwrap();
        let open = proj.open_expenses_for_payee(tenant, payee);
        assert_eq!(open[0].remaining, Money::from_dollars(200));

        proj.apply_envelope(&expense_envelope(
            tenant,
            expense,
            3,
            &consumed(tenant, expense, Money::from_dollars(200), Money::ZERO),
        ))
        .unwrap();
        assert!(proj.open_expenses_for_payee(tenant, payee).is_empty());

        // Voiding the settlement hands the balance back.
        proj.apply_envelope(&expense_envelope(
            tenant,
            expense,
            4,
            &ExpenseEvent::ExpenseDrawReleased(ExpenseDrawReleased {
                tenant_id: tenant,
                expense_id: expense,
                settlement_id: AggregateId::new(),
                amount: Money::from_dollars(200),
                remaining_after: Money::from_dollars(200),
                occurred_at: now(),
            }),
        ))
        .unwrap();
        assert_eq!(proj.open_expenses_for_payee(tenant, payee).len(), 1);
    }

    #[test]
    fn only_company_paid_expenses_are_deductible() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();

        for paid_by in [PaidBy::Payee, PaidBy::TrackedOnly] {
            let expense = ExpenseId(AggregateId::new());
            proj.apply_envelope(&expense_envelope(
                tenant,
                expense,
                1,
                &recorded(
                    tenant,
                    expense,
                    Some(payee),
                    None,
                    paid_by,
                    Money::from_dollars(150),
                ),
            ))
            .unwrap();
        }

        assert!(proj.open_expenses_for_payee(tenant, payee).is_empty());
    }

    #[test]
    fn shipment_pinned_expenses_follow_their_shipment() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee = PayeeId::new();
        let shipment = ShipmentId::new(AggregateId::new());
        let expense = ExpenseId(AggregateId::new());

        // Fuel advance on a specific load, payee left open.
        proj.apply_envelope(&expense_envelope(
            tenant,
            expense,
            1,
            &recorded(
                tenant,
                expense,
                None,
                Some(shipment),
                PaidBy::Company,
                Money::from_dollars(250),
            ),
        ))
        .unwrap();
        assert!(proj.open_expenses_for_payee(tenant, payee).is_empty());

        deliver_shipment(&proj, tenant, shipment, payee, Money::from_dollars(900));
        assert_eq!(proj.open_expenses_for_payee(tenant, payee).len(), 1);

        // Once the shipment is on a settlement the expense goes with it.
        proj.apply_envelope(&shipment_envelope(
            tenant,
            shipment,
            4,
            &ShipmentEvent::AssignedToSettlement(AssignedToSettlement {
                tenant_id: tenant,
                shipment_id: shipment,
                settlement_id: AggregateId::new(),
                occurred_at: now(),
            }),
        ))
        .unwrap();
        assert!(proj.open_expenses_for_payee(tenant, payee).is_empty());
    }

    #[test]
    fn worklist_reports_ids_per_payee() {
        let proj = projection();
        let tenant = TenantId::new();
        let payee_a = PayeeId::new();
        let payee_b = PayeeId::new();
        let shipment_a = ShipmentId::new(AggregateId::new());
        let shipment_b = ShipmentId::new(AggregateId::new());
        let expense = ExpenseId(AggregateId::new());

        deliver_shipment(&proj, tenant, shipment_a, payee_a, Money::from_dollars(800));
        deliver_shipment(&proj, tenant, shipment_b, payee_b, Money::from_dollars(700));
        proj.apply_envelope(&expense_envelope(
            tenant,
            expense,
            1,
            &recorded(
                tenant,
                expense,
                Some(payee_a),
                None,
                PaidBy::Company,
                Money::from_dollars(100),
            ),
        ))
        .unwrap();

        let worklist: &dyn SettlementWorklist = &proj;
        assert_eq!(worklist.settleable_shipments(tenant, payee_a), vec![shipment_a]);
        assert_eq!(worklist.open_expenses(tenant, payee_a), vec![expense]);
        assert!(worklist.open_expenses(tenant, payee_b).is_empty());
        assert_eq!(worklist.payees_with_work(tenant).len(), 2);
    }
}

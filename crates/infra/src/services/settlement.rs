//! Settlement generation, payment, and void.
//!
//! Generating a settlement is the system's widest transaction: open the
//! settlement, stamp `settlement_id` onto every included shipment, and draw
//! down every included expense, all in one `append_batch`. The shipment's
//! `settlement_id` is the single-writer lock for settlement membership: a
//! concurrent run over a shared shipment loses the version check, the whole
//! batch rolls back, and the retry re-selects against fresh state.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use haulbooks_audit::{AuditLogEntry, AuditSnapshot, AuditedEvent};
use haulbooks_core::{ActorContext, Aggregate, AggregateId, ExpectedVersion, TenantId};
use haulbooks_dispatch::{
    AssignToSettlement, ReleaseFromSettlement, Shipment, ShipmentCommand, ShipmentEvent,
    ShipmentId,
};
use haulbooks_events::{EventBus, EventEnvelope};
use haulbooks_numbering::{CounterKind, DocumentNumber};
use haulbooks_pay::{DeductionPreferences, PayeeId};
use haulbooks_settlement::{
    ConsumeForSettlement, Expense, ExpenseCommand, ExpenseEvent, ExpenseId, MarkPaid,
    OpenSettlement, ReleaseDraw, Settlement, SettlementCommand, SettlementId, SettlementPeriod,
    VoidSettlement, build_settlement,
};

use crate::audit_log::AuditLog;
use crate::dispatcher::{CommandDispatcher, DispatchError, load_aggregate, to_uncommitted};
use crate::event_store::{EventStore, StreamAppend};
use crate::sequence::{CounterStore, SequenceGenerator};
use crate::services::{ProfileDirectory, ServiceError};

/// Candidate feed for settlement generation.
///
/// Implemented by the settlement-queue projection. The worklist only names
/// candidates; the service rehydrates the authoritative aggregates and the
/// pure builder makes the actual selection, so a stale read model costs a
/// retry, never a wrong settlement.
pub trait SettlementWorklist: Send + Sync {
    /// Delivered-but-unsettled shipments for one payee.
    fn settleable_shipments(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<ShipmentId>;

    /// Company-paid expenses with remaining balance that may concern the
    /// payee, floating ones included.
    fn open_expenses(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<ExpenseId>;

    /// Every payee with at least one settleable shipment.
    fn payees_with_work(&self, tenant_id: TenantId) -> Vec<PayeeId>;
}

impl<W: SettlementWorklist + ?Sized> SettlementWorklist for std::sync::Arc<W> {
    fn settleable_shipments(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<ShipmentId> {
        (**self).settleable_shipments(tenant_id, payee_id)
    }

    fn open_expenses(&self, tenant_id: TenantId, payee_id: PayeeId) -> Vec<ExpenseId> {
        (**self).open_expenses(tenant_id, payee_id)
    }

    fn payees_with_work(&self, tenant_id: TenantId) -> Vec<PayeeId> {
        (**self).payees_with_work(tenant_id)
    }
}

/// Result of a bulk generation run across a tenant's payees.
#[derive(Debug, Default)]
pub struct BulkSettlementOutcome {
    pub generated: Vec<(PayeeId, SettlementId)>,
    /// Payees whose generation failed, with the error text. One payee
    /// failing never stops the rest of the run.
    pub skipped: Vec<(PayeeId, String)>,
    /// Whether the run stopped early on the cancellation flag. Settlements
    /// already generated stand.
    pub cancelled: bool,
}

/// Generates, pays, and voids settlements.
#[derive(Debug)]
pub struct SettlementService<S, B, L, C, P, W> {
    dispatcher: CommandDispatcher<S, B, L>,
    sequences: SequenceGenerator<C>,
    profiles: P,
    worklist: W,
}

impl<S, B, L, C, P, W> SettlementService<S, B, L, C, P, W>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: AuditLog,
    C: CounterStore,
    P: ProfileDirectory,
    W: SettlementWorklist,
{
    pub fn new(
        dispatcher: CommandDispatcher<S, B, L>,
        sequences: SequenceGenerator<C>,
        profiles: P,
        worklist: W,
    ) -> Self {
        Self {
            dispatcher,
            sequences,
            profiles,
            worklist,
        }
    }

    /// Generate one payee's settlement for a period.
    ///
    /// Selection is by rule, not manual pick: the builder takes every
    /// settleable shipment of the payee in the period and every open
    /// company-paid expense that concerns them, floating expenses included.
    /// The `SET-…` number is minted once; a retry after a lost race keeps it.
    pub fn generate(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        payee_id: PayeeId,
        period: SettlementPeriod,
        occurred_at: DateTime<Utc>,
    ) -> Result<SettlementId, ServiceError> {
        let settlement_id = SettlementId::new(AggregateId::new());
        let mut number: Option<DocumentNumber> = None;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.try_generate(
                tenant_id,
                actor,
                payee_id,
                period,
                settlement_id,
                &mut number,
                occurred_at,
            );
            match outcome {
                Err(ServiceError::Dispatch(DispatchError::Concurrency(_)))
                    if self.dispatcher.retry.should_retry(attempt) =>
                {
                    let delay = self.dispatcher.retry.delay_for_attempt(attempt);
                    warn!(%payee_id, attempt, ?delay, "settlement batch lost a race, retrying");
                    std::thread::sleep(delay);
                }
                outcome => return outcome,
            }
        }
    }

    fn try_generate(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        payee_id: PayeeId,
        period: SettlementPeriod,
        settlement_id: SettlementId,
        number: &mut Option<DocumentNumber>,
        occurred_at: DateTime<Utc>,
    ) -> Result<SettlementId, ServiceError> {
        let (shipments, shipment_versions) = self.load_shipments(
            tenant_id,
            self.worklist.settleable_shipments(tenant_id, payee_id),
        )?;
        let (expenses, expense_versions) =
            self.load_expenses(tenant_id, self.worklist.open_expenses(tenant_id, payee_id))?;

        // A payee without a profile on file still settles; with nothing
        // configured every company-paid category is deductible.
        let prefs = self
            .profiles
            .profile(tenant_id, payee_id)
            .map(|p| p.deductions().clone())
            .unwrap_or_else(DeductionPreferences::all);

        let draft = build_settlement(payee_id, period, &shipments, &expenses, &prefs)?;

        // Minted only once a draft exists, so a doomed request burns nothing.
        let number = match number {
            Some(n) => n.clone(),
            None => {
                let minted = self.sequences.next_number(
                    tenant_id,
                    CounterKind::Settlement,
                    occurred_at.year(),
                )?;
                *number = Some(minted.clone());
                minted
            }
        };

        let mut settlement = Settlement::empty(settlement_id);
        let settlement_events =
            settlement.handle(&SettlementCommand::OpenSettlement(OpenSettlement {
                tenant_id,
                settlement_id,
                number: number.clone(),
                draft: draft.clone(),
                occurred_at,
            }))?;

        let mut batches = vec![StreamAppend::new(
            ExpectedVersion::Exact(0),
            to_uncommitted(
                tenant_id,
                actor,
                settlement_id.0,
                Settlement::entity_type(),
                &settlement_events,
            )?,
        )];

        let mut shipment_writes: Vec<(Shipment, JsonValue, Vec<ShipmentEvent>)> = Vec::new();
        for (shipment, version) in shipments.into_iter().zip(shipment_versions) {
            if !draft.shipment_ids.contains(&shipment.id_typed()) {
                continue;
            }
            let before = shipment.snapshot();
            let events =
                shipment.handle(&ShipmentCommand::AssignToSettlement(AssignToSettlement {
                    tenant_id,
                    shipment_id: shipment.id_typed(),
                    settlement_id: settlement_id.0,
                    occurred_at,
                }))?;
            batches.push(StreamAppend::new(
                ExpectedVersion::Exact(version),
                to_uncommitted(
                    tenant_id,
                    actor,
                    shipment.id_typed().0,
                    Shipment::entity_type(),
                    &events,
                )?,
            ));
            shipment_writes.push((shipment, before, events));
        }

        let mut expense_writes: Vec<(Expense, JsonValue, Vec<ExpenseEvent>)> = Vec::new();
        for (expense, version) in expenses.into_iter().zip(expense_versions) {
            let Some(line) = draft.lines.iter().find(|l| l.expense_id == expense.id_typed())
            else {
                continue;
            };
            let before = expense.snapshot();
            let events =
                expense.handle(&ExpenseCommand::ConsumeForSettlement(ConsumeForSettlement {
                    tenant_id,
                    expense_id: expense.id_typed(),
                    settlement_id: settlement_id.0,
                    amount: line.amount,
                    occurred_at,
                }))?;
            batches.push(StreamAppend::new(
                ExpectedVersion::Exact(version),
                to_uncommitted(
                    tenant_id,
                    actor,
                    expense.id_typed().0,
                    Expense::entity_type(),
                    &events,
                )?,
            ));
            expense_writes.push((expense, before, events));
        }

        let committed = self.dispatcher.store.append_batch(batches)?;

        for event in &settlement_events {
            settlement.apply(event);
        }
        self.dispatcher.audit.append(AuditLogEntry::new(
            tenant_id,
            actor.actor_id,
            Settlement::entity_type(),
            settlement_id.0,
            settlement_events[0].audit_action(),
            None,
            Some(settlement.snapshot()),
            None,
            occurred_at,
        ))?;
        for (mut shipment, before, events) in shipment_writes {
            for event in &events {
                shipment.apply(event);
            }
            self.dispatcher.audit.append(AuditLogEntry::new(
                tenant_id,
                actor.actor_id,
                Shipment::entity_type(),
                shipment.id_typed().0,
                events[0].audit_action(),
                Some(before),
                Some(shipment.snapshot()),
                None,
                occurred_at,
            ))?;
        }
        for (mut expense, before, events) in expense_writes {
            for event in &events {
                expense.apply(event);
            }
            self.dispatcher.audit.append(AuditLogEntry::new(
                tenant_id,
                actor.actor_id,
                Expense::entity_type(),
                expense.id_typed().0,
                events[0].audit_action(),
                Some(before),
                Some(expense.snapshot()),
                None,
                occurred_at,
            ))?;
        }

        self.dispatcher.publish_all(&committed)?;

        info!(
            %payee_id,
            settlement = %number,
            shipments = draft.shipment_ids.len(),
            deductions = draft.lines.len(),
            "settlement generated"
        );
        Ok(settlement_id)
    }

    /// Mark a draft settlement paid. Single-stream; the dispatcher handles
    /// retry and audit.
    pub fn mark_paid(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        settlement_id: SettlementId,
        paid_at: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.dispatcher
            .dispatch(
                tenant_id,
                actor,
                settlement_id.0,
                &SettlementCommand::MarkPaid(MarkPaid {
                    tenant_id,
                    settlement_id,
                    paid_at,
                    occurred_at,
                }),
                |id| Settlement::empty(SettlementId::new(id)),
            )
            .map(|_| ())
            .map_err(ServiceError::from)
    }

    /// Void a draft settlement, releasing its shipments back into the queue
    /// and restoring every expense draw, atomically with the void itself.
    pub fn void(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        settlement_id: SettlementId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome =
                self.try_void(tenant_id, actor, settlement_id, reason.clone(), occurred_at);
            match outcome {
                Err(ServiceError::Dispatch(DispatchError::Concurrency(_)))
                    if self.dispatcher.retry.should_retry(attempt) =>
                {
                    let delay = self.dispatcher.retry.delay_for_attempt(attempt);
                    warn!(%settlement_id, attempt, ?delay, "void batch lost a race, retrying");
                    std::thread::sleep(delay);
                }
                outcome => return outcome,
            }
        }
    }

    fn try_void(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        settlement_id: SettlementId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let (mut settlement, settlement_version) =
            load_aggregate(&self.dispatcher.store, tenant_id, settlement_id.0, |id| {
                Settlement::empty(SettlementId::new(id))
            })?;
        let settlement_before = settlement.snapshot();

        let settlement_events =
            settlement.handle(&SettlementCommand::VoidSettlement(VoidSettlement {
                tenant_id,
                settlement_id,
                reason,
                occurred_at,
            }))?;

        let mut batches = vec![StreamAppend::new(
            ExpectedVersion::Exact(settlement_version),
            to_uncommitted(
                tenant_id,
                actor,
                settlement_id.0,
                Settlement::entity_type(),
                &settlement_events,
            )?,
        )];

        let mut shipment_writes: Vec<(Shipment, JsonValue, Vec<ShipmentEvent>)> = Vec::new();
        for shipment_id in settlement.shipment_ids().to_vec() {
            let (shipment, version) =
                load_aggregate(&self.dispatcher.store, tenant_id, shipment_id.0, |id| {
                    Shipment::empty(ShipmentId::new(id))
                })?;
            let before = shipment.snapshot();
            let events = shipment.handle(&ShipmentCommand::ReleaseFromSettlement(
                ReleaseFromSettlement {
                    tenant_id,
                    shipment_id,
                    occurred_at,
                },
            ))?;
            batches.push(StreamAppend::new(
                ExpectedVersion::Exact(version),
                to_uncommitted(
                    tenant_id,
                    actor,
                    shipment_id.0,
                    Shipment::entity_type(),
                    &events,
                )?,
            ));
            shipment_writes.push((shipment, before, events));
        }

        let mut expense_writes: Vec<(Expense, JsonValue, Vec<ExpenseEvent>)> = Vec::new();
        for line in settlement.lines().to_vec() {
            let (expense, version) =
                load_aggregate(&self.dispatcher.store, tenant_id, line.expense_id.0, |id| {
                    Expense::empty(ExpenseId::new(id))
                })?;
            let before = expense.snapshot();
            let events = expense.handle(&ExpenseCommand::ReleaseDraw(ReleaseDraw {
                tenant_id,
                expense_id: line.expense_id,
                settlement_id: settlement_id.0,
                occurred_at,
            }))?;
            batches.push(StreamAppend::new(
                ExpectedVersion::Exact(version),
                to_uncommitted(
                    tenant_id,
                    actor,
                    line.expense_id.0,
                    Expense::entity_type(),
                    &events,
                )?,
            ));
            expense_writes.push((expense, before, events));
        }

        let committed = self.dispatcher.store.append_batch(batches)?;

        for event in &settlement_events {
            settlement.apply(event);
        }
        self.dispatcher.audit.append(AuditLogEntry::new(
            tenant_id,
            actor.actor_id,
            Settlement::entity_type(),
            settlement_id.0,
            settlement_events[0].audit_action(),
            Some(settlement_before),
            Some(settlement.snapshot()),
            settlement_events.iter().find_map(|e| e.audit_reason()).map(str::to_string),
            occurred_at,
        ))?;
        for (mut shipment, before, events) in shipment_writes {
            for event in &events {
                shipment.apply(event);
            }
            self.dispatcher.audit.append(AuditLogEntry::new(
                tenant_id,
                actor.actor_id,
                Shipment::entity_type(),
                shipment.id_typed().0,
                events[0].audit_action(),
                Some(before),
                Some(shipment.snapshot()),
                None,
                occurred_at,
            ))?;
        }
        for (mut expense, before, events) in expense_writes {
            for event in &events {
                expense.apply(event);
            }
            self.dispatcher.audit.append(AuditLogEntry::new(
                tenant_id,
                actor.actor_id,
                Expense::entity_type(),
                expense.id_typed().0,
                events[0].audit_action(),
                Some(before),
                Some(expense.snapshot()),
                None,
                occurred_at,
            ))?;
        }

        self.dispatcher.publish_all(&committed)?;
        Ok(())
    }

    /// Generate settlements for every payee with settleable work.
    ///
    /// The cancellation flag is honored between per-payee transactions, never
    /// within one: what was generated before cancellation stands.
    pub fn generate_for_payees(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        period: SettlementPeriod,
        occurred_at: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> BulkSettlementOutcome {
        let mut outcome = BulkSettlementOutcome::default();

        for payee_id in self.worklist.payees_with_work(tenant_id) {
            if cancel.load(Ordering::SeqCst) {
                outcome.cancelled = true;
                break;
            }
            match self.generate(tenant_id, actor, payee_id, period, occurred_at) {
                Ok(settlement_id) => outcome.generated.push((payee_id, settlement_id)),
                Err(err) => {
                    warn!(%payee_id, error = %err, "bulk settlement run skipped a payee");
                    outcome.skipped.push((payee_id, err.to_string()));
                }
            }
        }

        outcome
    }

    fn load_shipments(
        &self,
        tenant_id: TenantId,
        ids: Vec<ShipmentId>,
    ) -> Result<(Vec<Shipment>, Vec<u64>), ServiceError> {
        let mut shipments = Vec::with_capacity(ids.len());
        let mut versions = Vec::with_capacity(ids.len());
        for id in ids {
            let (shipment, version) =
                load_aggregate(&self.dispatcher.store, tenant_id, id.0, |id| {
                    Shipment::empty(ShipmentId::new(id))
                })?;
            shipments.push(shipment);
            versions.push(version);
        }
        Ok((shipments, versions))
    }

    fn load_expenses(
        &self,
        tenant_id: TenantId,
        ids: Vec<ExpenseId>,
    ) -> Result<(Vec<Expense>, Vec<u64>), ServiceError> {
        let mut expenses = Vec::with_capacity(ids.len());
        let mut versions = Vec::with_capacity(ids.len());
        for id in ids {
            let (expense, version) =
                load_aggregate(&self.dispatcher.store, tenant_id, id.0, |id| {
                    Expense::empty(ExpenseId::new(id))
                })?;
            expenses.push(expense);
            versions.push(version);
        }
        Ok((expenses, versions))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};
    use std::thread;

    use chrono::{TimeZone, Utc};

    use haulbooks_core::{DomainError, Money, Role, UserId};
    use haulbooks_dispatch::{CreateShipment, DispatchShipment, MarkDelivered};
    use haulbooks_events::InMemoryEventBus;
    use haulbooks_pay::{ExpenseCategory, PayType};
    use haulbooks_settlement::{PaidBy, RecordExpense, SettlementStatus};

    use crate::audit_log::InMemoryAuditLog;
    use crate::event_store::InMemoryEventStore;
    use crate::services::InMemoryProfileDirectory;

    use super::*;

    /// Hand-fed worklist; production wires the settlement-queue projection.
    #[derive(Default)]
    struct FakeWorklist {
        shipments: RwLock<Vec<(PayeeId, ShipmentId)>>,
        expenses: RwLock<Vec<(PayeeId, ExpenseId)>>,
    }

    impl FakeWorklist {
        fn add_shipment(&self, payee_id: PayeeId, shipment_id: ShipmentId) {
            self.shipments.write().unwrap().push((payee_id, shipment_id));
        }

        fn add_expense(&self, payee_id: PayeeId, expense_id: ExpenseId) {
            self.expenses.write().unwrap().push((payee_id, expense_id));
        }
    }

    impl SettlementWorklist for FakeWorklist {
        fn settleable_shipments(&self, _tenant_id: TenantId, payee_id: PayeeId) -> Vec<ShipmentId> {
            self.shipments
                .read()
                .unwrap()
                .iter()
                .filter(|(p, _)| *p == payee_id)
                .map(|(_, s)| *s)
                .collect()
        }

        fn open_expenses(&self, _tenant_id: TenantId, payee_id: PayeeId) -> Vec<ExpenseId> {
            self.expenses
                .read()
                .unwrap()
                .iter()
                .filter(|(p, _)| *p == payee_id)
                .map(|(_, x)| *x)
                .collect()
        }

        fn payees_with_work(&self, _tenant_id: TenantId) -> Vec<PayeeId> {
            let mut payees: Vec<PayeeId> = self
                .shipments
                .read()
                .unwrap()
                .iter()
                .map(|(p, _)| *p)
                .collect();
            payees.dedup();
            payees
        }
    }

    type TestService = SettlementService<
        Arc<InMemoryEventStore>,
        InMemoryEventBus<EventEnvelope<JsonValue>>,
        Arc<InMemoryAuditLog>,
        crate::sequence::InMemoryCounterStore,
        Arc<InMemoryProfileDirectory>,
        Arc<FakeWorklist>,
    >;

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        worklist: Arc<FakeWorklist>,
        service: TestService,
        tenant: TenantId,
        actor: ActorContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEventStore::new());
        let worklist = Arc::new(FakeWorklist::default());
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&store),
            InMemoryEventBus::new(),
            Arc::new(InMemoryAuditLog::new()),
        );
        Fixture {
            store: Arc::clone(&store),
            worklist: Arc::clone(&worklist),
            service: SettlementService::new(
                dispatcher,
                SequenceGenerator::new(crate::sequence::InMemoryCounterStore::new()),
                Arc::new(InMemoryProfileDirectory::new()),
                worklist,
            ),
            tenant: TenantId::new(),
            actor: ActorContext::new(UserId::new(), Role::Accountant),
        }
    }

    fn june_tenth() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).single().unwrap()
    }

    fn june_first_half() -> SettlementPeriod {
        SettlementPeriod {
            start: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 15, 23, 59, 59).single().unwrap(),
        }
    }

    /// Flat-rate terms make the gross exactly `gross`.
    fn delivered_shipment(fx: &Fixture, payee_id: PayeeId, gross: Money) -> ShipmentId {
        let shipment_id = ShipmentId::new(AggregateId::new());
        let commands = [
            ShipmentCommand::CreateShipment(CreateShipment {
                tenant_id: fx.tenant,
                shipment_id,
                base_rate: gross,
                miles: 500,
                accessorials: vec![],
                occurred_at: june_tenth(),
            }),
            ShipmentCommand::DispatchShipment(DispatchShipment {
                tenant_id: fx.tenant,
                shipment_id,
                payee_id,
                dispatcher_id: None,
                occurred_at: june_tenth(),
            }),
            ShipmentCommand::MarkDelivered(MarkDelivered {
                tenant_id: fx.tenant,
                shipment_id,
                driver_pay_terms: Some(PayType::FlatRate { amount: gross }),
                dispatcher_pay_terms: None,
                occurred_at: june_tenth(),
            }),
        ];
        for command in &commands {
            fx.service
                .dispatcher
                .dispatch(fx.tenant, fx.actor, shipment_id.0, command, |id| {
                    Shipment::empty(ShipmentId::new(id))
                })
                .unwrap();
        }
        fx.worklist.add_shipment(payee_id, shipment_id);
        shipment_id
    }

    fn floating_expense(fx: &Fixture, payee_id: PayeeId, amount: Money) -> ExpenseId {
        let expense_id = ExpenseId::new(AggregateId::new());
        fx.service
            .dispatcher
            .dispatch(
                fx.tenant,
                fx.actor,
                expense_id.0,
                &ExpenseCommand::RecordExpense(RecordExpense {
                    tenant_id: fx.tenant,
                    expense_id,
                    payee_id: Some(payee_id),
                    shipment_id: None,
                    category: ExpenseCategory::Fuel,
                    paid_by: PaidBy::Company,
                    amount,
                    incurred_at: june_tenth(),
                    occurred_at: june_tenth(),
                }),
                |id| Expense::empty(ExpenseId::new(id)),
            )
            .unwrap();
        fx.worklist.add_expense(payee_id, expense_id);
        expense_id
    }

    fn loaded_shipment(fx: &Fixture, shipment_id: ShipmentId) -> Shipment {
        load_aggregate(&fx.store, fx.tenant, shipment_id.0, |id| {
            Shipment::empty(ShipmentId::new(id))
        })
        .unwrap()
        .0
    }

    fn loaded_expense(fx: &Fixture, expense_id: ExpenseId) -> Expense {
        load_aggregate(&fx.store, fx.tenant, expense_id.0, |id| {
            Expense::empty(ExpenseId::new(id))
        })
        .unwrap()
        .0
    }

    fn loaded_settlement(fx: &Fixture, settlement_id: SettlementId) -> Settlement {
        load_aggregate(&fx.store, fx.tenant, settlement_id.0, |id| {
            Settlement::empty(SettlementId::new(id))
        })
        .unwrap()
        .0
    }

    #[test]
    fn floating_expense_is_deducted_without_manual_selection() {
        let fx = fixture();
        let payee_id = PayeeId::new();
        let shipment_id = delivered_shipment(&fx, payee_id, Money::from_dollars(3_000));
        let expense_id = floating_expense(&fx, payee_id, Money::from_dollars(2_000));

        let settlement_id = fx
            .service
            .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            .unwrap();

        let settlement = loaded_settlement(&fx, settlement_id);
        assert_eq!(settlement.number().unwrap().to_string(), "SET-2025-1001");
        assert_eq!(settlement.gross_pay(), Money::from_dollars(3_000));
        assert_eq!(settlement.total_deductions(), Money::from_dollars(2_000));
        assert_eq!(settlement.net_pay(), Money::from_dollars(1_000));

        // The whole batch landed: shipment owned, expense fully drawn.
        assert_eq!(
            loaded_shipment(&fx, shipment_id).settlement_id(),
            Some(settlement_id.0)
        );
        assert_eq!(loaded_expense(&fx, expense_id).remaining(), Money::ZERO);
    }

    #[test]
    fn second_generation_finds_nothing_left_to_settle() {
        let fx = fixture();
        let payee_id = PayeeId::new();
        delivered_shipment(&fx, payee_id, Money::from_dollars(1_500));

        fx.service
            .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            .unwrap();
        // The worklist is stale on purpose; rehydration sees the assignment.
        let err = fx
            .service
            .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Dispatch(DispatchError::Rejected(DomainError::Validation(_)))
        ));
    }

    #[test]
    fn concurrent_generation_settles_each_shipment_exactly_once() {
        let fx = Arc::new(fixture());
        let payee_id = PayeeId::new();
        let shipment_id = delivered_shipment(&fx, payee_id, Money::from_dollars(2_000));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let fx = Arc::clone(&fx);
            handles.push(thread::spawn(move || {
                fx.service
                    .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            }));
        }
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(winners, 1, "exactly one generation may own the shipment");

        let winning_id = outcomes.into_iter().find_map(Result::ok).unwrap();
        assert_eq!(
            loaded_shipment(&fx, shipment_id).settlement_id(),
            Some(winning_id.0)
        );
    }

    #[test]
    fn void_returns_shipments_and_draws_to_the_pool() {
        let fx = fixture();
        let payee_id = PayeeId::new();
        let shipment_id = delivered_shipment(&fx, payee_id, Money::from_dollars(3_000));
        let expense_id = floating_expense(&fx, payee_id, Money::from_dollars(500));

        let settlement_id = fx
            .service
            .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            .unwrap();
        fx.service
            .void(
                fx.tenant,
                fx.actor,
                settlement_id,
                Some("wrong period".to_string()),
                june_tenth(),
            )
            .unwrap();

        assert_eq!(
            loaded_settlement(&fx, settlement_id).status(),
            SettlementStatus::Void
        );
        let shipment = loaded_shipment(&fx, shipment_id);
        assert!(shipment.settlement_id().is_none());
        assert!(shipment.is_settleable());
        assert_eq!(
            loaded_expense(&fx, expense_id).remaining(),
            Money::from_dollars(500)
        );
    }

    #[test]
    fn paid_settlements_cannot_be_voided() {
        let fx = fixture();
        let payee_id = PayeeId::new();
        delivered_shipment(&fx, payee_id, Money::from_dollars(1_000));

        let settlement_id = fx
            .service
            .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            .unwrap();
        fx.service
            .mark_paid(fx.tenant, fx.actor, settlement_id, june_tenth(), june_tenth())
            .unwrap();

        let err = fx
            .service
            .void(fx.tenant, fx.actor, settlement_id, None, june_tenth())
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Dispatch(DispatchError::Rejected(DomainError::InvariantViolation(_)))
        ));
    }

    #[test]
    fn bulk_run_covers_every_payee_and_reports_failures() {
        let fx = fixture();
        let paid_payee = PayeeId::new();
        let late_payee = PayeeId::new();
        delivered_shipment(&fx, paid_payee, Money::from_dollars(2_000));
        // This payee's only shipment delivered outside the period.
        let late_shipment = ShipmentId::new(AggregateId::new());
        let late_at = Utc.with_ymd_and_hms(2025, 6, 20, 8, 0, 0).single().unwrap();
        for command in [
            ShipmentCommand::CreateShipment(CreateShipment {
                tenant_id: fx.tenant,
                shipment_id: late_shipment,
                base_rate: Money::from_dollars(900),
                miles: 100,
                accessorials: vec![],
                occurred_at: late_at,
            }),
            ShipmentCommand::DispatchShipment(DispatchShipment {
                tenant_id: fx.tenant,
                shipment_id: late_shipment,
                payee_id: late_payee,
                dispatcher_id: None,
                occurred_at: late_at,
            }),
            ShipmentCommand::MarkDelivered(MarkDelivered {
                tenant_id: fx.tenant,
                shipment_id: late_shipment,
                driver_pay_terms: Some(PayType::FlatRate {
                    amount: Money::from_dollars(900),
                }),
                dispatcher_pay_terms: None,
                occurred_at: late_at,
            }),
        ] {
            fx.service
                .dispatcher
                .dispatch(fx.tenant, fx.actor, late_shipment.0, &command, |id| {
                    Shipment::empty(ShipmentId::new(id))
                })
                .unwrap();
        }
        fx.worklist.add_shipment(late_payee, late_shipment);

        let outcome = fx.service.generate_for_payees(
            fx.tenant,
            fx.actor,
            june_first_half(),
            june_tenth(),
            &AtomicBool::new(false),
        );

        assert!(!outcome.cancelled);
        assert_eq!(outcome.generated.len(), 1);
        assert_eq!(outcome.generated[0].0, paid_payee);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, late_payee);
    }

    #[test]
    fn bulk_run_honors_cancellation_between_payees() {
        let fx = fixture();
        let payee_id = PayeeId::new();
        delivered_shipment(&fx, payee_id, Money::from_dollars(2_000));

        let cancel = AtomicBool::new(true);
        let outcome = fx.service.generate_for_payees(
            fx.tenant,
            fx.actor,
            june_first_half(),
            june_tenth(),
            &cancel,
        );

        assert!(outcome.cancelled);
        assert!(outcome.generated.is_empty());
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn generated_settlement_audits_every_touched_aggregate() {
        let fx = fixture();
        let payee_id = PayeeId::new();
        let shipment_id = delivered_shipment(&fx, payee_id, Money::from_dollars(3_000));
        let expense_id = floating_expense(&fx, payee_id, Money::from_dollars(400));

        let settlement_id = fx
            .service
            .generate(fx.tenant, fx.actor, payee_id, june_first_half(), june_tenth())
            .unwrap();

        let audit = &fx.service.dispatcher.audit;
        assert_eq!(
            audit
                .by_entity(fx.tenant, "settlement", settlement_id.0)
                .unwrap()
                .len(),
            1
        );
        // create + dispatch + deliver + assign
        assert_eq!(
            audit
                .by_entity(fx.tenant, "shipment", shipment_id.0)
                .unwrap()
                .len(),
            4
        );
        // record + draw
        assert_eq!(
            audit
                .by_entity(fx.tenant, "expense", expense_id.0)
                .unwrap()
                .len(),
            2
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use haulbooks_audit::{AuditAction, AuditSnapshot, AuditedEvent};
use haulbooks_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Money, TenantId,
};
use haulbooks_dispatch::ShipmentId;
use haulbooks_events::Event;
use haulbooks_pay::{ExpenseCategory, PayeeId};

/// Expense identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(pub AggregateId);

impl ExpenseId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Who fronted the money. Only Company-paid expenses are deductible from a
/// payee's settlement; the other two are bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidBy {
    Company,
    Payee,
    TrackedOnly,
}

/// One settlement's claim against this expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDraw {
    pub settlement_id: AggregateId,
    pub amount: Money,
}

/// Aggregate root: Expense.
///
/// An expense without a `shipment_id` is *floating*: it follows the payee and
/// keeps surfacing in every settlement generated for them until its remaining
/// balance is drawn down to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expense {
    id: ExpenseId,
    tenant_id: Option<TenantId>,
    payee_id: Option<PayeeId>,
    shipment_id: Option<ShipmentId>,
    category: ExpenseCategory,
    paid_by: PaidBy,
    amount: Money,
    remaining: Money,
    draws: Vec<ExpenseDraw>,
    incurred_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Expense {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ExpenseId) -> Self {
        Self {
            id,
            tenant_id: None,
            payee_id: None,
            shipment_id: None,
            category: ExpenseCategory::Other,
            paid_by: PaidBy::TrackedOnly,
            amount: Money::ZERO,
            remaining: Money::ZERO,
            draws: Vec::new(),
            incurred_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ExpenseId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn payee_id(&self) -> Option<PayeeId> {
        self.payee_id
    }

    pub fn shipment_id(&self) -> Option<ShipmentId> {
        self.shipment_id
    }

    pub fn category(&self) -> ExpenseCategory {
        self.category
    }

    pub fn paid_by(&self) -> PaidBy {
        self.paid_by
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn remaining(&self) -> Money {
        self.remaining
    }

    pub fn draws(&self) -> &[ExpenseDraw] {
        &self.draws
    }

    pub fn incurred_at(&self) -> Option<DateTime<Utc>> {
        self.incurred_at
    }

    pub fn is_floating(&self) -> bool {
        self.shipment_id.is_none()
    }

    /// Whether a settlement run should still consider this expense.
    pub fn is_open(&self) -> bool {
        self.created && !self.remaining.is_zero()
    }
}

impl AggregateRoot for Expense {
    type Id = ExpenseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordExpense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpense {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub payee_id: Option<PayeeId>,
    pub shipment_id: Option<ShipmentId>,
    pub category: ExpenseCategory,
    pub paid_by: PaidBy,
    pub amount: Money,
    pub incurred_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConsumeForSettlement. One draw per settlement; the amount was
/// capped at the remaining balance by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeForSettlement {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub settlement_id: AggregateId,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseDraw. Issued when the drawing settlement is voided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDraw {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseCommand {
    RecordExpense(RecordExpense),
    ConsumeForSettlement(ConsumeForSettlement),
    ReleaseDraw(ReleaseDraw),
}

/// Event: ExpenseRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecorded {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub payee_id: Option<PayeeId>,
    pub shipment_id: Option<ShipmentId>,
    pub category: ExpenseCategory,
    pub paid_by: PaidBy,
    pub amount: Money,
    pub incurred_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseConsumed. Carries the balance after the draw so replay is a
/// plain assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseConsumed {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub settlement_id: AggregateId,
    pub amount: Money,
    pub remaining_after: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ExpenseDrawReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDrawReleased {
    pub tenant_id: TenantId,
    pub expense_id: ExpenseId,
    pub settlement_id: AggregateId,
    pub amount: Money,
    pub remaining_after: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpenseEvent {
    ExpenseRecorded(ExpenseRecorded),
    ExpenseConsumed(ExpenseConsumed),
    ExpenseDrawReleased(ExpenseDrawReleased),
}

impl Event for ExpenseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ExpenseEvent::ExpenseRecorded(_) => "settlement.expense.recorded",
            ExpenseEvent::ExpenseConsumed(_) => "settlement.expense.consumed",
            ExpenseEvent::ExpenseDrawReleased(_) => "settlement.expense.draw_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ExpenseEvent::ExpenseRecorded(e) => e.occurred_at,
            ExpenseEvent::ExpenseConsumed(e) => e.occurred_at,
            ExpenseEvent::ExpenseDrawReleased(e) => e.occurred_at,
        }
    }
}

impl AuditedEvent for ExpenseEvent {
    fn audit_action(&self) -> AuditAction {
        match self {
            ExpenseEvent::ExpenseRecorded(_) => AuditAction::Create,
            ExpenseEvent::ExpenseConsumed(_) | ExpenseEvent::ExpenseDrawReleased(_) => {
                AuditAction::Update
            }
        }
    }
}

impl AuditSnapshot for Expense {
    fn entity_type() -> &'static str {
        "expense"
    }

    fn snapshot(&self) -> JsonValue {
        serde_json::json!({
            "payee_id": self.payee_id,
            "shipment_id": self.shipment_id,
            "category": self.category,
            "paid_by": self.paid_by,
            "amount": self.amount,
            "remaining": self.remaining,
            "draw_count": self.draws.len(),
        })
    }
}

impl Aggregate for Expense {
    type Command = ExpenseCommand;
    type Event = ExpenseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ExpenseEvent::ExpenseRecorded(e) => {
                self.id = e.expense_id;
                self.tenant_id = Some(e.tenant_id);
                self.payee_id = e.payee_id;
                self.shipment_id = e.shipment_id;
                self.category = e.category;
                self.paid_by = e.paid_by;
                self.amount = e.amount;
                self.remaining = e.amount;
                self.draws.clear();
                self.incurred_at = Some(e.incurred_at);
                self.created = true;
            }
            ExpenseEvent::ExpenseConsumed(e) => {
                self.remaining = e.remaining_after;
                self.draws.push(ExpenseDraw {
                    settlement_id: e.settlement_id,
                    amount: e.amount,
                });
            }
            ExpenseEvent::ExpenseDrawReleased(e) => {
                self.remaining = e.remaining_after;
                self.draws.retain(|d| d.settlement_id != e.settlement_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ExpenseCommand::RecordExpense(cmd) => self.handle_record(cmd),
            ExpenseCommand::ConsumeForSettlement(cmd) => self.handle_consume(cmd),
            ExpenseCommand::ReleaseDraw(cmd) => self.handle_release(cmd),
        }
    }
}

impl Expense {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_expense_id(&self, expense_id: ExpenseId) -> Result<(), DomainError> {
        if self.id != expense_id {
            return Err(DomainError::invariant("expense_id mismatch"));
        }
        Ok(())
    }

    fn handle_record(&self, cmd: &RecordExpense) -> Result<Vec<ExpenseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("expense already exists"));
        }

        if cmd.amount.is_zero() || cmd.amount.is_negative() {
            return Err(DomainError::validation("amount must be positive"));
        }
        if cmd.shipment_id.is_none()
            && cmd.paid_by == PaidBy::Company
            && cmd.payee_id.is_none()
        {
            return Err(DomainError::validation(
                "a floating company-paid expense must name a payee",
            ));
        }

        Ok(vec![ExpenseEvent::ExpenseRecorded(ExpenseRecorded {
            tenant_id: cmd.tenant_id,
            expense_id: cmd.expense_id,
            payee_id: cmd.payee_id,
            shipment_id: cmd.shipment_id,
            category: cmd.category,
            paid_by: cmd.paid_by,
            amount: cmd.amount,
            incurred_at: cmd.incurred_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_consume(
        &self,
        cmd: &ConsumeForSettlement,
    ) -> Result<Vec<ExpenseEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_expense_id(cmd.expense_id)?;

        if cmd.amount.is_zero() || cmd.amount.is_negative() {
            return Err(DomainError::validation("draw amount must be positive"));
        }
        if self
            .draws
            .iter()
            .any(|d| d.settlement_id == cmd.settlement_id)
        {
            return Err(DomainError::conflict(
                "expense already drawn for this settlement",
            ));
        }
        if cmd.amount > self.remaining {
            return Err(DomainError::invariant("draw exceeds remaining balance"));
        }

        let remaining_after = self.remaining.checked_sub(cmd.amount)?;

        Ok(vec![ExpenseEvent::ExpenseConsumed(ExpenseConsumed {
            tenant_id: cmd.tenant_id,
            expense_id: cmd.expense_id,
            settlement_id: cmd.settlement_id,
            amount: cmd.amount,
            remaining_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseDraw) -> Result<Vec<ExpenseEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_expense_id(cmd.expense_id)?;

        let Some(draw) = self
            .draws
            .iter()
            .find(|d| d.settlement_id == cmd.settlement_id)
        else {
            return Err(DomainError::invariant(
                "no draw recorded for this settlement",
            ));
        };

        let remaining_after = self.remaining.checked_add(draw.amount)?;

        Ok(vec![ExpenseEvent::ExpenseDrawReleased(ExpenseDrawReleased {
            tenant_id: cmd.tenant_id,
            expense_id: cmd.expense_id,
            settlement_id: cmd.settlement_id,
            amount: draw.amount,
            remaining_after,
            occurred_at: cmd.occurred_at,
        })])
    }
}

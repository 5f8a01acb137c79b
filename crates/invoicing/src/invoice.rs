use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use haulbooks_audit::{AuditAction, AuditSnapshot, AuditedEvent};
use haulbooks_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId,
};
use haulbooks_dispatch::ShipmentId;
use haulbooks_events::Event;
use haulbooks_numbering::DocumentNumber;

/// Invoice identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Invoice status. Always derived from payment state and the clock via
/// [`Invoice::status`]; never stored, so it cannot drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Check,
    Ach,
    Wire,
    Card,
    Other,
}

/// One received payment. The list on the invoice is append-only; there is
/// no edit or remove operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_at: DateTime<Utc>,
}

/// Aggregate root: Invoice.
///
/// Billed against a delivered shipment. Collection is tracked as a payment
/// history, with a 1% rounding tolerance on both the paid threshold and the
/// overpayment cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    tenant_id: Option<TenantId>,
    number: Option<DocumentNumber>,
    shipment_id: Option<ShipmentId>,
    amount: Money,
    due_date: Option<DateTime<Utc>>,
    payments: Vec<Payment>,
    paid: Money,
    voided: bool,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: None,
            shipment_id: None,
            amount: Money::ZERO,
            due_date: None,
            payments: Vec::new(),
            paid: Money::ZERO,
            voided: false,
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn shipment_id(&self) -> Option<ShipmentId> {
        self.shipment_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn due_date(&self) -> Option<DateTime<Utc>> {
        self.due_date
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn paid_amount(&self) -> Money {
        self.paid
    }

    pub fn outstanding(&self) -> Money {
        self.amount.sub_floor_zero(self.paid)
    }

    pub fn is_voided(&self) -> bool {
        self.voided
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Derive the status as of the given instant.
    ///
    /// Paid wins at 99% of the amount or better, a nonzero balance below
    /// that is Partial even when past due, and an untouched invoice is
    /// Overdue once `due_date` has passed.
    pub fn status(&self, as_of: DateTime<Utc>) -> InvoiceStatus {
        derive_status(self.amount, self.paid, self.due_date, self.voided, as_of)
    }
}

/// Status derivation shared by the aggregate and the receivables read model.
pub fn derive_status(
    amount: Money,
    paid: Money,
    due_date: Option<DateTime<Utc>>,
    voided: bool,
    as_of: DateTime<Utc>,
) -> InvoiceStatus {
    if voided {
        return InvoiceStatus::Void;
    }
    let paid = paid.cents() as i128;
    let amount = amount.cents() as i128;
    if amount > 0 && paid * 100 >= amount * 99 {
        return InvoiceStatus::Paid;
    }
    if paid > 0 {
        return InvoiceStatus::Partial;
    }
    if due_date.is_some_and(|due| due < as_of) {
        return InvoiceStatus::Overdue;
    }
    InvoiceStatus::Pending
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice. The number was minted through the sequence
/// generator before this command is handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub number: DocumentNumber,
    pub shipment_id: ShipmentId,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteInvoice. Refused once any payment references the invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    ApplyPayment(ApplyPayment),
    VoidInvoice(VoidInvoice),
    DeleteInvoice(DeleteInvoice),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub number: DocumentNumber,
    pub shipment_id: ShipmentId,
    pub amount: Money,
    pub due_date: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentApplied. Carries the resolved running total so replay
/// never re-derives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplied {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub received_at: DateTime<Utc>,
    pub new_paid_total: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceVoided {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDeleted {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentApplied(PaymentApplied),
    InvoiceVoided(InvoiceVoided),
    InvoiceDeleted(InvoiceDeleted),
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "invoicing.invoice.issued",
            InvoiceEvent::PaymentApplied(_) => "invoicing.invoice.payment_applied",
            InvoiceEvent::InvoiceVoided(_) => "invoicing.invoice.voided",
            InvoiceEvent::InvoiceDeleted(_) => "invoicing.invoice.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentApplied(e) => e.occurred_at,
            InvoiceEvent::InvoiceVoided(e) => e.occurred_at,
            InvoiceEvent::InvoiceDeleted(e) => e.occurred_at,
        }
    }
}

impl AuditedEvent for InvoiceEvent {
    fn audit_action(&self) -> AuditAction {
        match self {
            InvoiceEvent::InvoiceIssued(_) => AuditAction::Create,
            InvoiceEvent::PaymentApplied(_) => AuditAction::Update,
            InvoiceEvent::InvoiceVoided(_) => AuditAction::StatusChange,
            InvoiceEvent::InvoiceDeleted(_) => AuditAction::Delete,
        }
    }

    fn audit_reason(&self) -> Option<&str> {
        match self {
            InvoiceEvent::InvoiceVoided(e) => e.reason.as_deref(),
            _ => None,
        }
    }
}

impl AuditSnapshot for Invoice {
    fn entity_type() -> &'static str {
        "invoice"
    }

    fn snapshot(&self) -> JsonValue {
        serde_json::json!({
            "number": self.number.as_ref().map(|n| n.to_string()),
            "shipment_id": self.shipment_id,
            "amount": self.amount,
            "paid": self.paid,
            "outstanding": self.outstanding(),
            "payment_count": self.payments.len(),
            "due_date": self.due_date,
            "voided": self.voided,
            "deleted": self.deleted,
        })
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = Some(e.number.clone());
                self.shipment_id = Some(e.shipment_id);
                self.amount = e.amount;
                self.due_date = Some(e.due_date);
                self.payments = Vec::new();
                self.paid = Money::ZERO;
                self.voided = false;
                self.created = true;
            }
            InvoiceEvent::PaymentApplied(e) => {
                self.payments.push(Payment {
                    amount: e.amount,
                    method: e.method,
                    received_at: e.received_at,
                });
                self.paid = e.new_paid_total;
            }
            InvoiceEvent::InvoiceVoided(_) => {
                self.voided = true;
            }
            InvoiceEvent::InvoiceDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::ApplyPayment(cmd) => self.handle_apply_payment(cmd),
            InvoiceCommand::VoidInvoice(cmd) => self.handle_void(cmd),
            InvoiceCommand::DeleteInvoice(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Invoice {
    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("invoice already exists"));
        }

        if cmd.amount.cents() <= 0 {
            return Err(DomainError::validation("invoice amount must be positive"));
        }

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            number: cmd.number.clone(),
            shipment_id: cmd.shipment_id,
            amount: cmd.amount,
            due_date: cmd.due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_payment(&self, cmd: &ApplyPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.voided {
            return Err(DomainError::invariant(
                "cannot apply a payment to a void invoice",
            ));
        }
        if cmd.amount.cents() <= 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let new_paid_total = self.paid.checked_add(cmd.amount)?;
        // 1% rounding tolerance on the cap; anything beyond is an
        // overpayment and the payment list stays untouched.
        if (new_paid_total.cents() as i128) * 100 > (self.amount.cents() as i128) * 101 {
            return Err(DomainError::overpayment(cmd.amount, self.outstanding()));
        }

        Ok(vec![InvoiceEvent::PaymentApplied(PaymentApplied {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            amount: cmd.amount,
            method: cmd.method,
            received_at: cmd.received_at,
            new_paid_total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if self.voided {
            return Err(DomainError::conflict("invoice is already void"));
        }

        Ok(vec![InvoiceEvent::InvoiceVoided(InvoiceVoided {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if !self.payments.is_empty() {
            return Err(DomainError::linked("invoice", "payment"));
        }

        Ok(vec![InvoiceEvent::InvoiceDeleted(InvoiceDeleted {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

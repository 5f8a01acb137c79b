use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use haulbooks_audit::{AuditAction, AuditSnapshot, AuditedEvent};
use haulbooks_core::{
    ActorContext, Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Money,
    TenantId, UserId,
};
use haulbooks_events::Event;
use haulbooks_numbering::DocumentNumber;
use haulbooks_pay::{PayInputs, PaySnapshot, PayType, PayeeId, compute_commission, compute_pay};

use crate::adjustment::{
    Adjustment, AdjustmentId, AdjustmentLogEntry, AdjustmentPatch, AdjustmentPolicy,
    AdjustmentStatus,
};

/// Shipment identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub AggregateId);

impl ShipmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Shipment status lifecycle. `Cancelled` is reachable from any state before
/// `Delivered`; delivery locks the financials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Available,
    Dispatched,
    InTransit,
    Delivered,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorialKind {
    Detention,
    Layover,
    Other,
}

/// How an accessorial charge is priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorialCharge {
    Hourly { hours: u32, rate: Money },
    Flat { amount: Money },
}

/// One accessorial line on a shipment (detention, layover, ...). Charges pass
/// through to the payee at 100% regardless of pay type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessorial {
    pub kind: AccessorialKind,
    pub charge: AccessorialCharge,
}

impl Accessorial {
    pub fn amount(&self) -> DomainResult<Money> {
        match self.charge {
            AccessorialCharge::Hourly { hours, rate } => rate.checked_mul(hours),
            AccessorialCharge::Flat { amount } => Ok(amount),
        }
    }
}

/// Documents whose verified arrival gates downstream steps. Proof of delivery
/// gates invoicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    ProofOfDelivery,
    RateConfirmation,
    Other,
}

/// Link to the invoice minted for this shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLink {
    pub invoice_id: AggregateId,
    pub number: DocumentNumber,
}

/// Aggregate root: Shipment.
///
/// Carries the money-bearing facts of one load. Before delivery the financial
/// fields are freely editable; at delivery the pay calculator runs once, its
/// result and the pay terms it used are frozen, and every later financial
/// change must travel through the adjustment workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    id: ShipmentId,
    tenant_id: Option<TenantId>,
    status: ShipmentStatus,
    base_rate: Money,
    miles: u32,
    accessorials: Vec<Accessorial>,
    payee_id: Option<PayeeId>,
    dispatcher_id: Option<PayeeId>,
    driver_pay_terms: Option<PayType>,
    dispatcher_pay_terms: Option<PayType>,
    payee_snapshot: Option<PaySnapshot>,
    dispatcher_commission: Option<Money>,
    locked_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    adjustments: Vec<Adjustment>,
    adjustment_log: Vec<AdjustmentLogEntry>,
    settlement_id: Option<AggregateId>,
    invoice: Option<InvoiceLink>,
    verified_documents: Vec<DocumentKind>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Shipment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ShipmentId) -> Self {
        Self {
            id,
            tenant_id: None,
            status: ShipmentStatus::Available,
            base_rate: Money::ZERO,
            miles: 0,
            accessorials: Vec::new(),
            payee_id: None,
            dispatcher_id: None,
            driver_pay_terms: None,
            dispatcher_pay_terms: None,
            payee_snapshot: None,
            dispatcher_commission: None,
            locked_at: None,
            delivered_at: None,
            adjustments: Vec::new(),
            adjustment_log: Vec::new(),
            settlement_id: None,
            invoice: None,
            verified_documents: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ShipmentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn base_rate(&self) -> Money {
        self.base_rate
    }

    pub fn miles(&self) -> u32 {
        self.miles
    }

    pub fn accessorials(&self) -> &[Accessorial] {
        &self.accessorials
    }

    pub fn payee_id(&self) -> Option<PayeeId> {
        self.payee_id
    }

    pub fn dispatcher_id(&self) -> Option<PayeeId> {
        self.dispatcher_id
    }

    pub fn payee_snapshot(&self) -> Option<&PaySnapshot> {
        self.payee_snapshot.as_ref()
    }

    pub fn dispatcher_commission(&self) -> Option<Money> {
        self.dispatcher_commission
    }

    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }

    pub fn adjustment_log(&self) -> &[AdjustmentLogEntry] {
        &self.adjustment_log
    }

    pub fn settlement_id(&self) -> Option<AggregateId> {
        self.settlement_id
    }

    pub fn invoice(&self) -> Option<&InvoiceLink> {
        self.invoice.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    pub fn has_verified(&self, kind: DocumentKind) -> bool {
        self.verified_documents.contains(&kind)
    }

    /// Whether a settlement run may pick this shipment up.
    pub fn is_settleable(&self) -> bool {
        !self.deleted
            && matches!(
                self.status,
                ShipmentStatus::Delivered | ShipmentStatus::Completed
            )
            && self.settlement_id.is_none()
    }

    /// Customer-facing total: base rate plus accessorial charges.
    pub fn grand_total(&self) -> DomainResult<Money> {
        self.base_rate.checked_add(accessorial_total(&self.accessorials)?)
    }

    pub fn pay_inputs(&self) -> DomainResult<PayInputs> {
        Ok(PayInputs {
            base_rate: self.base_rate,
            accessorial_total: accessorial_total(&self.accessorials)?,
            miles: self.miles,
        })
    }
}

impl AggregateRoot for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub base_rate: Money,
    pub miles: u32,
    pub accessorials: Vec<Accessorial>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateFinancials. Direct edit of the money-bearing fields;
/// rejected with `ShipmentLocked` once the shipment is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFinancials {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub base_rate: Option<Money>,
    pub miles: Option<u32>,
    pub accessorials: Option<Vec<Accessorial>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchShipment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub payee_id: PayeeId,
    pub dispatcher_id: Option<PayeeId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkInTransit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkInTransit {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered.
///
/// Carries the pay terms resolved from the driver's and dispatcher's profiles
/// at delivery time (`None` when a profile is absent or malformed). The
/// handler runs the pay calculator once and the result freezes onto the
/// shipment together with the terms, so later profile edits never reach a
/// delivered load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub driver_pay_terms: Option<PayType>,
    pub dispatcher_pay_terms: Option<PayType>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCompleted {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelShipment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDocumentVerified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDocumentVerified {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub kind: DocumentKind,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RequestAdjustment. The only sanctioned path to a locked
/// shipment's financial fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAdjustment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub adjustment_id: AdjustmentId,
    pub actor: ActorContext,
    pub patch: AdjustmentPatch,
    pub reason: String,
    pub policy: AdjustmentPolicy,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveAdjustment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub adjustment_id: AdjustmentId,
    pub actor: ActorContext,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectAdjustment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub adjustment_id: AdjustmentId,
    pub actor: ActorContext,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignToSettlement. The `settlement_id` field is the
/// single-writer lock; assigning an already-assigned shipment conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignToSettlement {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseFromSettlement. Issued when a settlement is voided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFromSettlement {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordInvoice. Gated on a verified proof of delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInvoice {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub invoice_id: AggregateId,
    pub number: DocumentNumber,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteShipment. Refused while a settlement or invoice points at
/// the shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteShipment {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    CreateShipment(CreateShipment),
    UpdateFinancials(UpdateFinancials),
    DispatchShipment(DispatchShipment),
    MarkInTransit(MarkInTransit),
    MarkDelivered(MarkDelivered),
    MarkCompleted(MarkCompleted),
    CancelShipment(CancelShipment),
    RecordDocumentVerified(RecordDocumentVerified),
    RequestAdjustment(RequestAdjustment),
    ApproveAdjustment(ApproveAdjustment),
    RejectAdjustment(RejectAdjustment),
    AssignToSettlement(AssignToSettlement),
    ReleaseFromSettlement(ReleaseFromSettlement),
    RecordInvoice(RecordInvoice),
    DeleteShipment(DeleteShipment),
}

/// Event: ShipmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCreated {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub base_rate: Money,
    pub miles: u32,
    pub accessorials: Vec<Accessorial>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FinancialsUpdated. Carries the resolved new values, not the patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialsUpdated {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub base_rate: Money,
    pub miles: u32,
    pub accessorials: Vec<Accessorial>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDispatched {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub payee_id: PayeeId,
    pub dispatcher_id: Option<PayeeId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentInTransit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentInTransit {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentDelivered. The lock event: carries the frozen pay snapshot,
/// the commission, and the pay terms both were computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDelivered {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub driver_pay_terms: Option<PayType>,
    pub dispatcher_pay_terms: Option<PayType>,
    pub payee_snapshot: PaySnapshot,
    pub dispatcher_commission: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCompleted {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentCancelled {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentVerified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVerified {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub kind: DocumentKind,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequested {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub adjustment_id: AdjustmentId,
    pub requested_by: UserId,
    pub patch: AdjustmentPatch,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentApproved. Carries the patched financials, the recomputed
/// frozen pay, and one log entry per field that actually changed, so that
/// `apply` stays a pure state write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentApproved {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub adjustment_id: AdjustmentId,
    pub approved_by: UserId,
    pub reason: String,
    pub base_rate: Money,
    pub miles: u32,
    pub accessorials: Vec<Accessorial>,
    pub payee_snapshot: PaySnapshot,
    pub dispatcher_commission: Money,
    pub log_entries: Vec<AdjustmentLogEntry>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRejected {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub adjustment_id: AdjustmentId,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AssignedToSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedToSettlement {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReleasedFromSettlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedFromSettlement {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub settlement_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecorded {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub invoice_id: AggregateId,
    pub number: DocumentNumber,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDeleted {
    pub tenant_id: TenantId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentEvent {
    ShipmentCreated(ShipmentCreated),
    FinancialsUpdated(FinancialsUpdated),
    ShipmentDispatched(ShipmentDispatched),
    ShipmentInTransit(ShipmentInTransit),
    ShipmentDelivered(ShipmentDelivered),
    ShipmentCompleted(ShipmentCompleted),
    ShipmentCancelled(ShipmentCancelled),
    DocumentVerified(DocumentVerified),
    AdjustmentRequested(AdjustmentRequested),
    AdjustmentApproved(AdjustmentApproved),
    AdjustmentRejected(AdjustmentRejected),
    AssignedToSettlement(AssignedToSettlement),
    ReleasedFromSettlement(ReleasedFromSettlement),
    InvoiceRecorded(InvoiceRecorded),
    ShipmentDeleted(ShipmentDeleted),
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentCreated(_) => "dispatch.shipment.created",
            ShipmentEvent::FinancialsUpdated(_) => "dispatch.shipment.financials_updated",
            ShipmentEvent::ShipmentDispatched(_) => "dispatch.shipment.dispatched",
            ShipmentEvent::ShipmentInTransit(_) => "dispatch.shipment.in_transit",
            ShipmentEvent::ShipmentDelivered(_) => "dispatch.shipment.delivered",
            ShipmentEvent::ShipmentCompleted(_) => "dispatch.shipment.completed",
            ShipmentEvent::ShipmentCancelled(_) => "dispatch.shipment.cancelled",
            ShipmentEvent::DocumentVerified(_) => "dispatch.shipment.document_verified",
            ShipmentEvent::AdjustmentRequested(_) => "dispatch.shipment.adjustment_requested",
            ShipmentEvent::AdjustmentApproved(_) => "dispatch.shipment.adjustment_approved",
            ShipmentEvent::AdjustmentRejected(_) => "dispatch.shipment.adjustment_rejected",
            ShipmentEvent::AssignedToSettlement(_) => "dispatch.shipment.assigned_to_settlement",
            ShipmentEvent::ReleasedFromSettlement(_) => {
                "dispatch.shipment.released_from_settlement"
            }
            ShipmentEvent::InvoiceRecorded(_) => "dispatch.shipment.invoice_recorded",
            ShipmentEvent::ShipmentDeleted(_) => "dispatch.shipment.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::ShipmentCreated(e) => e.occurred_at,
            ShipmentEvent::FinancialsUpdated(e) => e.occurred_at,
            ShipmentEvent::ShipmentDispatched(e) => e.occurred_at,
            ShipmentEvent::ShipmentInTransit(e) => e.occurred_at,
            ShipmentEvent::ShipmentDelivered(e) => e.occurred_at,
            ShipmentEvent::ShipmentCompleted(e) => e.occurred_at,
            ShipmentEvent::ShipmentCancelled(e) => e.occurred_at,
            ShipmentEvent::DocumentVerified(e) => e.occurred_at,
            ShipmentEvent::AdjustmentRequested(e) => e.occurred_at,
            ShipmentEvent::AdjustmentApproved(e) => e.occurred_at,
            ShipmentEvent::AdjustmentRejected(e) => e.occurred_at,
            ShipmentEvent::AssignedToSettlement(e) => e.occurred_at,
            ShipmentEvent::ReleasedFromSettlement(e) => e.occurred_at,
            ShipmentEvent::InvoiceRecorded(e) => e.occurred_at,
            ShipmentEvent::ShipmentDeleted(e) => e.occurred_at,
        }
    }
}

impl AuditedEvent for ShipmentEvent {
    fn audit_action(&self) -> AuditAction {
        match self {
            ShipmentEvent::ShipmentCreated(_) => AuditAction::Create,
            ShipmentEvent::FinancialsUpdated(_)
            | ShipmentEvent::DocumentVerified(_)
            | ShipmentEvent::AssignedToSettlement(_)
            | ShipmentEvent::ReleasedFromSettlement(_)
            | ShipmentEvent::InvoiceRecorded(_) => AuditAction::Update,
            ShipmentEvent::ShipmentDispatched(_)
            | ShipmentEvent::ShipmentInTransit(_)
            | ShipmentEvent::ShipmentDelivered(_)
            | ShipmentEvent::ShipmentCompleted(_)
            | ShipmentEvent::ShipmentCancelled(_) => AuditAction::StatusChange,
            ShipmentEvent::AdjustmentRequested(_)
            | ShipmentEvent::AdjustmentApproved(_)
            | ShipmentEvent::AdjustmentRejected(_) => AuditAction::Adjustment,
            ShipmentEvent::ShipmentDeleted(_) => AuditAction::Delete,
        }
    }

    fn audit_reason(&self) -> Option<&str> {
        match self {
            ShipmentEvent::ShipmentCancelled(e) => e.reason.as_deref(),
            ShipmentEvent::AdjustmentRequested(e) => Some(&e.reason),
            ShipmentEvent::AdjustmentApproved(e) => Some(&e.reason),
            _ => None,
        }
    }
}

impl AuditSnapshot for Shipment {
    fn entity_type() -> &'static str {
        "shipment"
    }

    fn snapshot(&self) -> JsonValue {
        serde_json::json!({
            "status": self.status,
            "base_rate": self.base_rate,
            "miles": self.miles,
            "accessorial_total": accessorial_total(&self.accessorials).ok(),
            "grand_total": self.grand_total().ok(),
            "payee_id": self.payee_id,
            "dispatcher_id": self.dispatcher_id,
            "total_gross": self.payee_snapshot.as_ref().map(|s| s.total_gross),
            "dispatcher_commission": self.dispatcher_commission,
            "locked_at": self.locked_at,
            "settlement_id": self.settlement_id,
            "invoice_number": self.invoice.as_ref().map(|link| link.number.to_string()),
            "adjustment_count": self.adjustment_log.len(),
            "deleted": self.deleted,
        })
    }
}

impl Aggregate for Shipment {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::ShipmentCreated(e) => {
                self.id = e.shipment_id;
                self.tenant_id = Some(e.tenant_id);
                self.status = ShipmentStatus::Available;
                self.base_rate = e.base_rate;
                self.miles = e.miles;
                self.accessorials = e.accessorials.clone();
                self.adjustments.clear();
                self.adjustment_log.clear();
                self.verified_documents.clear();
                self.created = true;
            }
            ShipmentEvent::FinancialsUpdated(e) => {
                self.base_rate = e.base_rate;
                self.miles = e.miles;
                self.accessorials = e.accessorials.clone();
            }
            ShipmentEvent::ShipmentDispatched(e) => {
                self.payee_id = Some(e.payee_id);
                self.dispatcher_id = e.dispatcher_id;
                self.status = ShipmentStatus::Dispatched;
            }
            ShipmentEvent::ShipmentInTransit(_) => {
                self.status = ShipmentStatus::InTransit;
            }
            ShipmentEvent::ShipmentDelivered(e) => {
                self.status = ShipmentStatus::Delivered;
                self.driver_pay_terms = e.driver_pay_terms.clone();
                self.dispatcher_pay_terms = e.dispatcher_pay_terms.clone();
                self.payee_snapshot = Some(e.payee_snapshot.clone());
                self.dispatcher_commission = Some(e.dispatcher_commission);
                self.locked_at = Some(e.occurred_at);
                self.delivered_at = Some(e.occurred_at);
            }
            ShipmentEvent::ShipmentCompleted(_) => {
                self.status = ShipmentStatus::Completed;
            }
            ShipmentEvent::ShipmentCancelled(_) => {
                self.status = ShipmentStatus::Cancelled;
            }
            ShipmentEvent::DocumentVerified(e) => {
                if !self.verified_documents.contains(&e.kind) {
                    self.verified_documents.push(e.kind);
                }
            }
            ShipmentEvent::AdjustmentRequested(e) => {
                self.adjustments.push(Adjustment {
                    id: e.adjustment_id,
                    status: AdjustmentStatus::Pending,
                    patch: e.patch.clone(),
                    reason: e.reason.clone(),
                    created_by: e.requested_by,
                    approved_by: None,
                    requested_at: e.occurred_at,
                    resolved_at: None,
                });
            }
            ShipmentEvent::AdjustmentApproved(e) => {
                if let Some(adjustment) = self
                    .adjustments
                    .iter_mut()
                    .find(|a| a.id == e.adjustment_id)
                {
                    adjustment.status = AdjustmentStatus::Approved;
                    adjustment.approved_by = Some(e.approved_by);
                    adjustment.resolved_at = Some(e.occurred_at);
                }
                self.base_rate = e.base_rate;
                self.miles = e.miles;
                self.accessorials = e.accessorials.clone();
                self.payee_snapshot = Some(e.payee_snapshot.clone());
                self.dispatcher_commission = Some(e.dispatcher_commission);
                self.adjustment_log.extend(e.log_entries.iter().cloned());
            }
            ShipmentEvent::AdjustmentRejected(e) => {
                if let Some(adjustment) = self
                    .adjustments
                    .iter_mut()
                    .find(|a| a.id == e.adjustment_id)
                {
                    adjustment.status = AdjustmentStatus::Rejected;
                    adjustment.resolved_at = Some(e.occurred_at);
                }
            }
            ShipmentEvent::AssignedToSettlement(e) => {
                self.settlement_id = Some(e.settlement_id);
            }
            ShipmentEvent::ReleasedFromSettlement(_) => {
                self.settlement_id = None;
            }
            ShipmentEvent::InvoiceRecorded(e) => {
                self.invoice = Some(InvoiceLink {
                    invoice_id: e.invoice_id,
                    number: e.number.clone(),
                });
            }
            ShipmentEvent::ShipmentDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::CreateShipment(cmd) => self.handle_create(cmd),
            ShipmentCommand::UpdateFinancials(cmd) => self.handle_update_financials(cmd),
            ShipmentCommand::DispatchShipment(cmd) => self.handle_dispatch(cmd),
            ShipmentCommand::MarkInTransit(cmd) => self.handle_mark_in_transit(cmd),
            ShipmentCommand::MarkDelivered(cmd) => self.handle_mark_delivered(cmd),
            ShipmentCommand::MarkCompleted(cmd) => self.handle_mark_completed(cmd),
            ShipmentCommand::CancelShipment(cmd) => self.handle_cancel(cmd),
            ShipmentCommand::RecordDocumentVerified(cmd) => self.handle_document_verified(cmd),
            ShipmentCommand::RequestAdjustment(cmd) => self.handle_request_adjustment(cmd),
            ShipmentCommand::ApproveAdjustment(cmd) => self.handle_approve_adjustment(cmd),
            ShipmentCommand::RejectAdjustment(cmd) => self.handle_reject_adjustment(cmd),
            ShipmentCommand::AssignToSettlement(cmd) => self.handle_assign_to_settlement(cmd),
            ShipmentCommand::ReleaseFromSettlement(cmd) => {
                self.handle_release_from_settlement(cmd)
            }
            ShipmentCommand::RecordInvoice(cmd) => self.handle_record_invoice(cmd),
            ShipmentCommand::DeleteShipment(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Shipment {
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

    fn ensure_shipment_id(&self, shipment_id: ShipmentId) -> Result<(), DomainError> {
        if self.id != shipment_id {
            return Err(DomainError::invariant("shipment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("shipment already exists"));
        }

        if cmd.base_rate.is_negative() {
            return Err(DomainError::validation("base_rate must not be negative"));
        }
        validate_accessorials(&cmd.accessorials)?;
        cmd.base_rate
            .checked_add(accessorial_total(&cmd.accessorials)?)?;

        Ok(vec![ShipmentEvent::ShipmentCreated(ShipmentCreated {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            base_rate: cmd.base_rate,
            miles: cmd.miles,
            accessorials: cmd.accessorials.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_financials(
        &self,
        cmd: &UpdateFinancials,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if cmd.base_rate.is_none() && cmd.miles.is_none() && cmd.accessorials.is_none() {
            return Err(DomainError::validation("no financial fields to update"));
        }

        if self.status == ShipmentStatus::Cancelled {
            return Err(DomainError::invariant(
                "cancelled shipments cannot be edited",
            ));
        }

        if self.is_locked() {
            let field = if cmd.base_rate.is_some() {
                "base_rate"
            } else if cmd.miles.is_some() {
                "miles"
            } else {
                "accessorials"
            };
            return Err(DomainError::locked(field));
        }

        if let Some(base_rate) = cmd.base_rate {
            if base_rate.is_negative() {
                return Err(DomainError::validation("base_rate must not be negative"));
            }
        }
        if let Some(accessorials) = &cmd.accessorials {
            validate_accessorials(accessorials)?;
        }

        let base_rate = cmd.base_rate.unwrap_or(self.base_rate);
        let miles = cmd.miles.unwrap_or(self.miles);
        let accessorials = cmd
            .accessorials
            .clone()
            .unwrap_or_else(|| self.accessorials.clone());
        base_rate.checked_add(accessorial_total(&accessorials)?)?;

        Ok(vec![ShipmentEvent::FinancialsUpdated(FinancialsUpdated {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            base_rate,
            miles,
            accessorials,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispatch(&self, cmd: &DispatchShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if self.status != ShipmentStatus::Available {
            return Err(DomainError::invariant(
                "only available shipments can be dispatched",
            ));
        }

        Ok(vec![ShipmentEvent::ShipmentDispatched(ShipmentDispatched {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            payee_id: cmd.payee_id,
            dispatcher_id: cmd.dispatcher_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_in_transit(
        &self,
        cmd: &MarkInTransit,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if self.status != ShipmentStatus::Dispatched {
            return Err(DomainError::invariant(
                "only dispatched shipments can go in transit",
            ));
        }

        Ok(vec![ShipmentEvent::ShipmentInTransit(ShipmentInTransit {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_delivered(
        &self,
        cmd: &MarkDelivered,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if !matches!(
            self.status,
            ShipmentStatus::Dispatched | ShipmentStatus::InTransit
        ) {
            return Err(DomainError::invariant(
                "only dispatched or in-transit shipments can be delivered",
            ));
        }

        let inputs = self.pay_inputs()?;
        let payee_snapshot = compute_pay(cmd.driver_pay_terms.as_ref(), &inputs)?;
        let dispatcher_commission = compute_commission(cmd.dispatcher_pay_terms.as_ref(), &inputs)?;

        Ok(vec![ShipmentEvent::ShipmentDelivered(ShipmentDelivered {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            driver_pay_terms: cmd.driver_pay_terms.clone(),
            dispatcher_pay_terms: cmd.dispatcher_pay_terms.clone(),
            payee_snapshot,
            dispatcher_commission,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_completed(
        &self,
        cmd: &MarkCompleted,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if self.status != ShipmentStatus::Delivered {
            return Err(DomainError::invariant(
                "only delivered shipments can be completed",
            ));
        }

        Ok(vec![ShipmentEvent::ShipmentCompleted(ShipmentCompleted {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if self.status == ShipmentStatus::Cancelled {
            return Err(DomainError::conflict("shipment is already cancelled"));
        }
        if self.is_locked() {
            return Err(DomainError::invariant(
                "delivered shipments cannot be cancelled",
            ));
        }

        Ok(vec![ShipmentEvent::ShipmentCancelled(ShipmentCancelled {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_document_verified(
        &self,
        cmd: &RecordDocumentVerified,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if self.status == ShipmentStatus::Cancelled {
            return Err(DomainError::invariant(
                "cancelled shipments cannot be edited",
            ));
        }
        if self.has_verified(cmd.kind) {
            return Err(DomainError::conflict("document already verified"));
        }

        Ok(vec![ShipmentEvent::DocumentVerified(DocumentVerified {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            kind: cmd.kind,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_request_adjustment(
        &self,
        cmd: &RequestAdjustment,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if !self.is_locked() {
            return Err(DomainError::invariant(
                "shipment is not locked; edit financial fields directly",
            ));
        }

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason is required"));
        }
        if cmd.patch.is_empty() {
            return Err(DomainError::validation(
                "adjustment patch must change at least one field",
            ));
        }
        if let Some(base_rate) = cmd.patch.base_rate {
            if base_rate.is_negative() {
                return Err(DomainError::validation("base_rate must not be negative"));
            }
        }
        if let Some(accessorials) = &cmd.patch.accessorials {
            validate_accessorials(accessorials)?;
        }
        if self.adjustments.iter().any(|a| a.id == cmd.adjustment_id) {
            return Err(DomainError::conflict("adjustment id already used"));
        }

        let requested = AdjustmentRequested {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            adjustment_id: cmd.adjustment_id,
            requested_by: cmd.actor.actor_id,
            patch: cmd.patch.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        };

        match cmd.policy {
            AdjustmentPolicy::RequireApproval => {
                Ok(vec![ShipmentEvent::AdjustmentRequested(requested)])
            }
            AdjustmentPolicy::AutoApprove => {
                let approved = self.approval_event(
                    cmd.tenant_id,
                    cmd.adjustment_id,
                    &cmd.patch,
                    cmd.reason.clone(),
                    cmd.actor.actor_id,
                    cmd.occurred_at,
                )?;
                Ok(vec![
                    ShipmentEvent::AdjustmentRequested(requested),
                    ShipmentEvent::AdjustmentApproved(approved),
                ])
            }
        }
    }

    fn handle_approve_adjustment(
        &self,
        cmd: &ApproveAdjustment,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if !cmd.actor.role.can_approve_adjustments() {
            return Err(DomainError::Unauthorized);
        }

        let adjustment = self
            .adjustments
            .iter()
            .find(|a| a.id == cmd.adjustment_id)
            .ok_or_else(DomainError::not_found)?;
        if !adjustment.is_pending() {
            return Err(DomainError::conflict("adjustment is already resolved"));
        }

        let approved = self.approval_event(
            cmd.tenant_id,
            adjustment.id,
            &adjustment.patch,
            adjustment.reason.clone(),
            cmd.actor.actor_id,
            cmd.occurred_at,
        )?;

        Ok(vec![ShipmentEvent::AdjustmentApproved(approved)])
    }

    fn handle_reject_adjustment(
        &self,
        cmd: &RejectAdjustment,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if !cmd.actor.role.can_approve_adjustments() {
            return Err(DomainError::Unauthorized);
        }

        let adjustment = self
            .adjustments
            .iter()
            .find(|a| a.id == cmd.adjustment_id)
            .ok_or_else(DomainError::not_found)?;
        if !adjustment.is_pending() {
            return Err(DomainError::conflict("adjustment is already resolved"));
        }

        Ok(vec![ShipmentEvent::AdjustmentRejected(AdjustmentRejected {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            adjustment_id: cmd.adjustment_id,
            rejected_by: cmd.actor.actor_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_to_settlement(
        &self,
        cmd: &AssignToSettlement,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if !matches!(
            self.status,
            ShipmentStatus::Delivered | ShipmentStatus::Completed
        ) {
            return Err(DomainError::invariant(
                "only delivered or completed shipments can be settled",
            ));
        }
        if self.settlement_id.is_some() {
            return Err(DomainError::conflict(
                "shipment is already assigned to a settlement",
            ));
        }

        Ok(vec![ShipmentEvent::AssignedToSettlement(
            AssignedToSettlement {
                tenant_id: cmd.tenant_id,
                shipment_id: cmd.shipment_id,
                settlement_id: cmd.settlement_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_release_from_settlement(
        &self,
        cmd: &ReleaseFromSettlement,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        let Some(settlement_id) = self.settlement_id else {
            return Err(DomainError::invariant(
                "shipment is not assigned to a settlement",
            ));
        };

        Ok(vec![ShipmentEvent::ReleasedFromSettlement(
            ReleasedFromSettlement {
                tenant_id: cmd.tenant_id,
                shipment_id: cmd.shipment_id,
                settlement_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_record_invoice(
        &self,
        cmd: &RecordInvoice,
    ) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if !self.is_locked() {
            return Err(DomainError::invariant(
                "only delivered shipments can be invoiced",
            ));
        }
        if !self.has_verified(DocumentKind::ProofOfDelivery) {
            return Err(DomainError::invariant(
                "proof of delivery is not verified",
            ));
        }
        if self.invoice.is_some() {
            return Err(DomainError::conflict("shipment is already invoiced"));
        }

        Ok(vec![ShipmentEvent::InvoiceRecorded(InvoiceRecorded {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            invoice_id: cmd.invoice_id,
            number: cmd.number.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_active()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_shipment_id(cmd.shipment_id)?;

        if self.settlement_id.is_some() {
            return Err(DomainError::linked("shipment", "settlement"));
        }
        if self.invoice.is_some() {
            return Err(DomainError::linked("shipment", "invoice"));
        }

        Ok(vec![ShipmentEvent::ShipmentDeleted(ShipmentDeleted {
            tenant_id: cmd.tenant_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Recompute the frozen pay from the frozen terms and the patched
    /// financials, and collect one log entry per field that actually changes.
    fn approval_event(
        &self,
        tenant_id: TenantId,
        adjustment_id: AdjustmentId,
        patch: &AdjustmentPatch,
        reason: String,
        approved_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<AdjustmentApproved, DomainError> {
        let base_rate = patch.base_rate.unwrap_or(self.base_rate);
        let miles = patch.miles.unwrap_or(self.miles);
        let accessorials = patch
            .accessorials
            .clone()
            .unwrap_or_else(|| self.accessorials.clone());

        let inputs = PayInputs {
            base_rate,
            accessorial_total: accessorial_total(&accessorials)?,
            miles,
        };
        let payee_snapshot = compute_pay(self.driver_pay_terms.as_ref(), &inputs)?;
        let dispatcher_commission = compute_commission(self.dispatcher_pay_terms.as_ref(), &inputs)?;

        let mut log_entries = Vec::new();
        if base_rate != self.base_rate {
            log_entries.push(AdjustmentLogEntry {
                adjustment_id,
                field: "base_rate".to_string(),
                old_value: to_json(&self.base_rate),
                new_value: to_json(&base_rate),
                actor_id: approved_by,
                reason: reason.clone(),
                occurred_at,
            });
        }
        if miles != self.miles {
            log_entries.push(AdjustmentLogEntry {
                adjustment_id,
                field: "miles".to_string(),
                old_value: to_json(&self.miles),
                new_value: to_json(&miles),
                actor_id: approved_by,
                reason: reason.clone(),
                occurred_at,
            });
        }
        if accessorials != self.accessorials {
            log_entries.push(AdjustmentLogEntry {
                adjustment_id,
                field: "accessorials".to_string(),
                old_value: to_json(&self.accessorials),
                new_value: to_json(&accessorials),
                actor_id: approved_by,
                reason: reason.clone(),
                occurred_at,
            });
        }

        Ok(AdjustmentApproved {
            tenant_id,
            shipment_id: self.id,
            adjustment_id,
            approved_by,
            reason,
            base_rate,
            miles,
            accessorials,
            payee_snapshot,
            dispatcher_commission,
            log_entries,
            occurred_at,
        })
    }
}

fn accessorial_total(items: &[Accessorial]) -> DomainResult<Money> {
    let mut total = Money::ZERO;
    for item in items {
        total = total.checked_add(item.amount()?)?;
    }
    Ok(total)
}

fn validate_accessorials(items: &[Accessorial]) -> DomainResult<()> {
    for item in items {
        let negative = match item.charge {
            AccessorialCharge::Hourly { rate, .. } => rate.is_negative(),
            AccessorialCharge::Flat { amount } => amount.is_negative(),
        };
        if negative {
            return Err(DomainError::validation(
                "accessorial amounts must not be negative",
            ));
        }
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use haulbooks_audit::{AuditAction, AuditSnapshot, AuditedEvent};
use haulbooks_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Money, TenantId,
};
use haulbooks_dispatch::ShipmentId;
use haulbooks_events::Event;
use haulbooks_numbering::DocumentNumber;
use haulbooks_pay::{ExpenseCategory, PayeeId};

use crate::builder::SettlementDraft;
use crate::expense::ExpenseId;

/// Settlement identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub AggregateId);

impl SettlementId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SettlementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Draft,
    Paid,
    Void,
}

/// Both ends are inclusive, matching how pay periods are quoted to drivers
/// ("the 1st through the 15th").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SettlementPeriod {
    pub fn validate(&self) -> DomainResult<()> {
        if self.start > self.end {
            return Err(DomainError::validation("period start is after its end"));
        }
        Ok(())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// One deduction applied by a settlement: which expense it draws on, and how
/// much of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementLine {
    pub expense_id: ExpenseId,
    pub category: ExpenseCategory,
    pub amount: Money,
}

/// Aggregate root: Settlement.
///
/// A paystub-like statement for one payee and one period: the gross pay of
/// the settled shipments minus the expense draws, with any shortfall carried
/// as payee debt instead of a negative net.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    id: SettlementId,
    tenant_id: Option<TenantId>,
    payee_id: Option<PayeeId>,
    number: Option<DocumentNumber>,
    period: Option<SettlementPeriod>,
    shipment_ids: Vec<ShipmentId>,
    lines: Vec<SettlementLine>,
    gross_pay: Money,
    deductions_by_category: BTreeMap<ExpenseCategory, Money>,
    total_deductions: Money,
    net_pay: Money,
    payee_debt: Money,
    status: SettlementStatus,
    paid_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Settlement {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SettlementId) -> Self {
        Self {
            id,
            tenant_id: None,
            payee_id: None,
            number: None,
            period: None,
            shipment_ids: Vec::new(),
            lines: Vec::new(),
            gross_pay: Money::ZERO,
            deductions_by_category: BTreeMap::new(),
            total_deductions: Money::ZERO,
            net_pay: Money::ZERO,
            payee_debt: Money::ZERO,
            status: SettlementStatus::Draft,
            paid_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SettlementId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn payee_id(&self) -> Option<PayeeId> {
        self.payee_id
    }

    pub fn number(&self) -> Option<&DocumentNumber> {
        self.number.as_ref()
    }

    pub fn period(&self) -> Option<SettlementPeriod> {
        self.period
    }

    pub fn shipment_ids(&self) -> &[ShipmentId] {
        &self.shipment_ids
    }

    pub fn lines(&self) -> &[SettlementLine] {
        &self.lines
    }

    pub fn gross_pay(&self) -> Money {
        self.gross_pay
    }

    pub fn deductions_by_category(&self) -> &BTreeMap<ExpenseCategory, Money> {
        &self.deductions_by_category
    }

    pub fn total_deductions(&self) -> Money {
        self.total_deductions
    }

    pub fn net_pay(&self) -> Money {
        self.net_pay
    }

    pub fn payee_debt(&self) -> Money {
        self.payee_debt
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    /// Flat view used by year-to-date aggregation and projections.
    pub fn summary(&self) -> SettlementSummary {
        SettlementSummary {
            payee_id: self.payee_id,
            status: self.status,
            paid_at: self.paid_at,
            gross_pay: self.gross_pay,
            total_deductions: self.total_deductions,
            net_pay: self.net_pay,
        }
    }
}

/// The slice of a settlement that YTD math needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub payee_id: Option<PayeeId>,
    pub status: SettlementStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub gross_pay: Money,
    pub total_deductions: Money,
    pub net_pay: Money,
}

impl SettlementSummary {
    /// Whether this settlement counts toward the given year's paid totals.
    pub fn counts_for_year(&self, year: i32) -> bool {
        self.status == SettlementStatus::Paid
            && self.paid_at.is_some_and(|at| at.year() == year)
    }
}

impl AggregateRoot for Settlement {
    type Id = SettlementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenSettlement. The draft comes from
/// [`crate::builder::build_settlement`]; the number was minted beforehand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub number: DocumentNumber,
    pub draft: SettlementDraft,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub paid_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VoidSettlement. Paid settlements are immutable history and stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidSettlement {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementCommand {
    OpenSettlement(OpenSettlement),
    MarkPaid(MarkPaid),
    VoidSettlement(VoidSettlement),
}

/// Event: SettlementOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOpened {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub number: DocumentNumber,
    pub draft: SettlementDraft,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementMarkedPaid. Carries the payee and the frozen totals so
/// earnings readers never have to load the rest of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementMarkedPaid {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub payee_id: PayeeId,
    pub gross_pay: Money,
    pub total_deductions: Money,
    pub net_pay: Money,
    pub paid_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettlementVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementVoided {
    pub tenant_id: TenantId,
    pub settlement_id: SettlementId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementEvent {
    SettlementOpened(SettlementOpened),
    SettlementMarkedPaid(SettlementMarkedPaid),
    SettlementVoided(SettlementVoided),
}

impl Event for SettlementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettlementEvent::SettlementOpened(_) => "settlement.settlement.opened",
            SettlementEvent::SettlementMarkedPaid(_) => "settlement.settlement.marked_paid",
            SettlementEvent::SettlementVoided(_) => "settlement.settlement.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettlementEvent::SettlementOpened(e) => e.occurred_at,
            SettlementEvent::SettlementMarkedPaid(e) => e.occurred_at,
            SettlementEvent::SettlementVoided(e) => e.occurred_at,
        }
    }
}

impl AuditedEvent for SettlementEvent {
    fn audit_action(&self) -> AuditAction {
        match self {
            SettlementEvent::SettlementOpened(_) => AuditAction::Create,
            SettlementEvent::SettlementMarkedPaid(_) | SettlementEvent::SettlementVoided(_) => {
                AuditAction::StatusChange
            }
        }
    }

    fn audit_reason(&self) -> Option<&str> {
        match self {
            SettlementEvent::SettlementVoided(e) => e.reason.as_deref(),
            _ => None,
        }
    }
}

impl AuditSnapshot for Settlement {
    fn entity_type() -> &'static str {
        "settlement"
    }

    fn snapshot(&self) -> JsonValue {
        serde_json::json!({
            "status": self.status,
            "payee_id": self.payee_id,
            "number": self.number.as_ref().map(|n| n.to_string()),
            "shipment_count": self.shipment_ids.len(),
            "gross_pay": self.gross_pay,
            "total_deductions": self.total_deductions,
            "net_pay": self.net_pay,
            "payee_debt": self.payee_debt,
            "paid_at": self.paid_at,
        })
    }
}

impl Aggregate for Settlement {
    type Command = SettlementCommand;
    type Event = SettlementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettlementEvent::SettlementOpened(e) => {
                self.id = e.settlement_id;
                self.tenant_id = Some(e.tenant_id);
                self.payee_id = Some(e.draft.payee_id);
                self.number = Some(e.number.clone());
                self.period = Some(e.draft.period);
                self.shipment_ids = e.draft.shipment_ids.clone();
                self.lines = e.draft.lines.clone();
                self.gross_pay = e.draft.gross_pay;
                self.deductions_by_category = e.draft.deductions_by_category.clone();
                self.total_deductions = e.draft.total_deductions;
                self.net_pay = e.draft.net_pay;
                self.payee_debt = e.draft.payee_debt;
                self.status = SettlementStatus::Draft;
                self.paid_at = None;
                self.created = true;
            }
            SettlementEvent::SettlementMarkedPaid(e) => {
                self.status = SettlementStatus::Paid;
                self.paid_at = Some(e.paid_at);
            }
            SettlementEvent::SettlementVoided(_) => {
                self.status = SettlementStatus::Void;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettlementCommand::OpenSettlement(cmd) => self.handle_open(cmd),
            SettlementCommand::MarkPaid(cmd) => self.handle_mark_paid(cmd),
            SettlementCommand::VoidSettlement(cmd) => self.handle_void(cmd),
        }
    }
}

impl Settlement {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_settlement_id(&self, settlement_id: SettlementId) -> Result<(), DomainError> {
        if self.id != settlement_id {
            return Err(DomainError::invariant("settlement_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("settlement already exists"));
        }

        cmd.draft.period.validate()?;
        if cmd.draft.shipment_ids.is_empty() {
            return Err(DomainError::validation(
                "settlement must include at least one shipment",
            ));
        }
        cmd.draft.verify_totals()?;

        Ok(vec![SettlementEvent::SettlementOpened(SettlementOpened {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            number: cmd.number.clone(),
            draft: cmd.draft.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_paid(&self, cmd: &MarkPaid) -> Result<Vec<SettlementEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_settlement_id(cmd.settlement_id)?;

        if self.status != SettlementStatus::Draft {
            return Err(DomainError::invariant(
                "only draft settlements can be marked paid",
            ));
        }

        let payee_id = self
            .payee_id
            .ok_or_else(|| DomainError::invariant("draft settlement is missing its payee"))?;

        Ok(vec![SettlementEvent::SettlementMarkedPaid(
            SettlementMarkedPaid {
                tenant_id: cmd.tenant_id,
                settlement_id: cmd.settlement_id,
                payee_id,
                gross_pay: self.gross_pay,
                total_deductions: self.total_deductions,
                net_pay: self.net_pay,
                paid_at: cmd.paid_at,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_void(&self, cmd: &VoidSettlement) -> Result<Vec<SettlementEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_settlement_id(cmd.settlement_id)?;

        match self.status {
            SettlementStatus::Draft => {}
            SettlementStatus::Paid => {
                return Err(DomainError::invariant(
                    "paid settlements are immutable and cannot be voided",
                ));
            }
            SettlementStatus::Void => {
                return Err(DomainError::conflict("settlement is already void"));
            }
        }

        Ok(vec![SettlementEvent::SettlementVoided(SettlementVoided {
            tenant_id: cmd.tenant_id,
            settlement_id: cmd.settlement_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_settlement_id() -> SettlementId {
        SettlementId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_period() -> SettlementPeriod {
        SettlementPeriod {
            start: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap(),
            end: Utc.with_ymd_and_hms(2025, 6, 15, 23, 59, 59).single().unwrap(),
        }
    }

    fn test_number() -> DocumentNumber {
        "SET-2025-1007".parse().unwrap()
    }

    fn test_draft() -> SettlementDraft {
        let mut deductions = BTreeMap::new();
        deductions.insert(ExpenseCategory::Fuel, Money::from_dollars(1108));
        SettlementDraft {
            payee_id: PayeeId::new(),
            period: test_period(),
            shipment_ids: vec![ShipmentId::new(AggregateId::new())],
            lines: vec![SettlementLine {
                expense_id: ExpenseId::new(AggregateId::new()),
                category: ExpenseCategory::Fuel,
                amount: Money::from_dollars(1108),
            }],
            gross_pay: Money::from_dollars(500),
            deductions_by_category: deductions,
            total_deductions: Money::from_dollars(1108),
            net_pay: Money::ZERO,
            payee_debt: Money::from_dollars(608),
        }
    }

    fn opened_settlement() -> (Settlement, TenantId, SettlementId) {
        let tenant_id = test_tenant_id();
        let settlement_id = test_settlement_id();
        let mut settlement = Settlement::empty(settlement_id);

        let events = settlement
            .handle(&SettlementCommand::OpenSettlement(OpenSettlement {
                tenant_id,
                settlement_id,
                number: test_number(),
                draft: test_draft(),
                occurred_at: test_time(),
            }))
            .unwrap();
        for event in &events {
            settlement.apply(event);
        }

        (settlement, tenant_id, settlement_id)
    }

    #[test]
    fn open_settlement_stores_the_draft_as_a_draft() {
        let (settlement, _, _) = opened_settlement();

        assert_eq!(settlement.status(), SettlementStatus::Draft);
        assert_eq!(settlement.gross_pay(), Money::from_dollars(500));
        assert_eq!(settlement.total_deductions(), Money::from_dollars(1108));
        assert_eq!(settlement.net_pay(), Money::ZERO);
        assert_eq!(settlement.payee_debt(), Money::from_dollars(608));
        assert_eq!(settlement.number().unwrap().to_string(), "SET-2025-1007");
        assert!(settlement.paid_at().is_none());
    }

    #[test]
    fn inconsistent_totals_are_rejected_at_open() {
        let settlement_id = test_settlement_id();
        let settlement = Settlement::empty(settlement_id);
        let mut draft = test_draft();
        draft.net_pay = Money::from_dollars(9000);

        let err = settlement
            .handle(&SettlementCommand::OpenSettlement(OpenSettlement {
                tenant_id: test_tenant_id(),
                settlement_id,
                number: test_number(),
                draft,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn mark_paid_sets_the_payment_timestamp() {
        let (mut settlement, tenant_id, settlement_id) = opened_settlement();
        let paid_at = test_time();

        let events = settlement
            .handle(&SettlementCommand::MarkPaid(MarkPaid {
                tenant_id,
                settlement_id,
                paid_at,
                occurred_at: test_time(),
            }))
            .unwrap();

        match &events[0] {
            SettlementEvent::SettlementMarkedPaid(e) => {
                assert_eq!(e.payee_id, settlement.payee_id().unwrap());
                assert_eq!(e.gross_pay, Money::from_dollars(500));
                assert_eq!(e.total_deductions, Money::from_dollars(1108));
                assert_eq!(e.net_pay, Money::ZERO);
            }
            _ => panic!("Expected SettlementMarkedPaid"),
        }

        settlement.apply(&events[0]);
        assert_eq!(settlement.status(), SettlementStatus::Paid);
        assert_eq!(settlement.paid_at(), Some(paid_at));
    }

    #[test]
    fn only_draft_settlements_can_be_marked_paid() {
        let (mut settlement, tenant_id, settlement_id) = opened_settlement();

        let cmd = MarkPaid {
            tenant_id,
            settlement_id,
            paid_at: test_time(),
            occurred_at: test_time(),
        };
        let events = settlement
            .handle(&SettlementCommand::MarkPaid(cmd.clone()))
            .unwrap();
        settlement.apply(&events[0]);

        let err = settlement
            .handle(&SettlementCommand::MarkPaid(cmd))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg)
                if msg.contains("only draft settlements can be marked paid") => {}
            _ => panic!("Expected InvariantViolation for double payment"),
        }
    }

    #[test]
    fn paid_settlements_cannot_be_voided() {
        let (mut settlement, tenant_id, settlement_id) = opened_settlement();

        let events = settlement
            .handle(&SettlementCommand::MarkPaid(MarkPaid {
                tenant_id,
                settlement_id,
                paid_at: test_time(),
                occurred_at: test_time(),
            }))
            .unwrap();
        settlement.apply(&events[0]);

        let err = settlement
            .handle(&SettlementCommand::VoidSettlement(VoidSettlement {
                tenant_id,
                settlement_id,
                reason: Some("duplicate run".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) if msg.contains("immutable") => {}
            _ => panic!("Expected InvariantViolation for voiding a paid settlement"),
        }
    }

    #[test]
    fn void_draft_settlement() {
        let (mut settlement, tenant_id, settlement_id) = opened_settlement();

        let events = settlement
            .handle(&SettlementCommand::VoidSettlement(VoidSettlement {
                tenant_id,
                settlement_id,
                reason: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        settlement.apply(&events[0]);
        assert_eq!(settlement.status(), SettlementStatus::Void);

        let summary = settlement.summary();
        assert!(!summary.counts_for_year(2025));
    }

    #[test]
    fn paid_summary_counts_only_in_its_payment_year() {
        let (mut settlement, tenant_id, settlement_id) = opened_settlement();

        let paid_at = Utc.with_ymd_and_hms(2025, 6, 20, 12, 0, 0).single().unwrap();
        let events = settlement
            .handle(&SettlementCommand::MarkPaid(MarkPaid {
                tenant_id,
                settlement_id,
                paid_at,
                occurred_at: test_time(),
            }))
            .unwrap();
        settlement.apply(&events[0]);

        let summary = settlement.summary();
        assert!(summary.counts_for_year(2025));
        assert!(!summary.counts_for_year(2024));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (settlement, tenant_id, settlement_id) = opened_settlement();
        let initial_version = settlement.version();

        let cmd = SettlementCommand::MarkPaid(MarkPaid {
            tenant_id,
            settlement_id,
            paid_at: test_time(),
            occurred_at: test_time(),
        });
        let events1 = settlement.handle(&cmd).unwrap();
        let events2 = settlement.handle(&cmd).unwrap();

        assert_eq!(settlement.version(), initial_version);
        assert_eq!(settlement.status(), SettlementStatus::Draft);
        assert_eq!(events1, events2);
    }

    #[test]
    fn apply_is_deterministic() {
        let tenant_id = test_tenant_id();
        let settlement_id = test_settlement_id();
        let opened = SettlementEvent::SettlementOpened(SettlementOpened {
            tenant_id,
            settlement_id,
            number: test_number(),
            draft: test_draft(),
            occurred_at: test_time(),
        });
        let paid = SettlementEvent::SettlementMarkedPaid(SettlementMarkedPaid {
            tenant_id,
            settlement_id,
            payee_id: PayeeId::new(),
            gross_pay: Money::from_dollars(500),
            total_deductions: Money::from_dollars(1108),
            net_pay: Money::ZERO,
            paid_at: test_time(),
            occurred_at: test_time(),
        });

        let mut a = Settlement::empty(settlement_id);
        a.apply(&opened);
        a.apply(&paid);

        let mut b = Settlement::empty(settlement_id);
        b.apply(&opened);
        b.apply(&paid);

        assert_eq!(a, b);
        assert_eq!(a.version(), 2);
    }
}

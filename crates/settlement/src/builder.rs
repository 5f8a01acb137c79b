use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use haulbooks_core::{DomainError, DomainResult, Money};
use haulbooks_dispatch::{Shipment, ShipmentId};
use haulbooks_pay::{DeductionPreferences, ExpenseCategory, PayeeId};

use crate::expense::{Expense, PaidBy};
use crate::settlement::{SettlementLine, SettlementPeriod};

/// Fully computed settlement contents, ready for `OpenSettlement`.
///
/// The draft is a value: building one touches nothing. The service layer
/// turns it into an opened settlement plus the matching expense draws and
/// shipment assignments in a single atomic append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDraft {
    pub payee_id: PayeeId,
    pub period: SettlementPeriod,
    pub shipment_ids: Vec<ShipmentId>,
    pub lines: Vec<SettlementLine>,
    pub gross_pay: Money,
    pub deductions_by_category: BTreeMap<ExpenseCategory, Money>,
    pub total_deductions: Money,
    pub net_pay: Money,
    pub payee_debt: Money,
}

impl SettlementDraft {
    /// Cross-check the redundant totals against each other. A draft that was
    /// produced by [`build_settlement`] always passes; one assembled or
    /// patched by hand may not.
    pub fn verify_totals(&self) -> DomainResult<()> {
        let line_total = Money::sum(self.lines.iter().map(|line| line.amount))?;
        if line_total != self.total_deductions {
            return Err(DomainError::invariant(
                "settlement lines do not add up to total deductions",
            ));
        }

        let category_total = Money::sum(self.deductions_by_category.values().copied())?;
        if category_total != self.total_deductions {
            return Err(DomainError::invariant(
                "category breakdown does not add up to total deductions",
            ));
        }

        if self.net_pay != self.gross_pay.sub_floor_zero(self.total_deductions) {
            return Err(DomainError::invariant(
                "net pay does not equal gross pay minus deductions",
            ));
        }
        if self.payee_debt != self.total_deductions.sub_floor_zero(self.gross_pay) {
            return Err(DomainError::invariant(
                "payee debt does not equal the deduction shortfall",
            ));
        }

        Ok(())
    }
}

/// Assemble a settlement draft for one payee over one period.
///
/// Shipments are selected by the settleable test (delivered or completed,
/// not deleted, not already on a settlement), payee and delivery date.
/// Expenses then attach by rule, never by manual selection: per-shipment
/// expenses follow their shipment, and every open floating company-paid
/// expense for the payee rides along until fully consumed. Deductions in
/// excess of gross become payee debt; net pay never goes negative.
pub fn build_settlement(
    payee_id: PayeeId,
    period: SettlementPeriod,
    shipments: &[Shipment],
    expenses: &[Expense],
    prefs: &DeductionPreferences,
) -> DomainResult<SettlementDraft> {
    period.validate()?;

    let selected: Vec<&Shipment> = shipments
        .iter()
        .filter(|shipment| in_scope(shipment, payee_id, period))
        .collect();
    if selected.is_empty() {
        return Err(DomainError::validation(
            "no settleable shipments for this payee in the period",
        ));
    }
    let shipment_ids: Vec<ShipmentId> = selected.iter().map(|s| s.id_typed()).collect();

    let mut gross_pay = Money::ZERO;
    for shipment in &selected {
        let snapshot = shipment.payee_snapshot().ok_or_else(|| {
            DomainError::invariant("settleable shipment is missing its pay snapshot")
        })?;
        gross_pay = gross_pay.checked_add(snapshot.total_gross)?;
    }

    let mut lines = Vec::new();
    let mut deductions_by_category: BTreeMap<ExpenseCategory, Money> = BTreeMap::new();
    let mut total_deductions = Money::ZERO;
    for expense in expenses {
        if !deductible(expense, payee_id, &shipment_ids, prefs) {
            continue;
        }
        // Draw as much as is still owed, never more than remains.
        let draw = expense.amount().min(expense.remaining());
        lines.push(SettlementLine {
            expense_id: expense.id_typed(),
            category: expense.category(),
            amount: draw,
        });
        let slot = deductions_by_category
            .entry(expense.category())
            .or_insert(Money::ZERO);
        *slot = slot.checked_add(draw)?;
        total_deductions = total_deductions.checked_add(draw)?;
    }

    Ok(SettlementDraft {
        payee_id,
        period,
        shipment_ids,
        lines,
        gross_pay,
        deductions_by_category,
        total_deductions,
        net_pay: gross_pay.sub_floor_zero(total_deductions),
        payee_debt: total_deductions.sub_floor_zero(gross_pay),
    })
}

fn in_scope(shipment: &Shipment, payee_id: PayeeId, period: SettlementPeriod) -> bool {
    shipment.is_settleable()
        && shipment.payee_id() == Some(payee_id)
        && shipment
            .delivered_at()
            .is_some_and(|at| period.contains(at))
}

fn deductible(
    expense: &Expense,
    payee_id: PayeeId,
    shipment_ids: &[ShipmentId],
    prefs: &DeductionPreferences,
) -> bool {
    if !expense.is_open()
        || expense.paid_by() != PaidBy::Company
        || !prefs.allows(expense.category())
    {
        return false;
    }
    match expense.shipment_id() {
        Some(shipment_id) => {
            shipment_ids.contains(&shipment_id)
                && expense.payee_id().is_none_or(|p| p == payee_id)
        }
        None => expense.payee_id() == Some(payee_id),
    }
}

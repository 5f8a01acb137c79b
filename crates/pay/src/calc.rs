//! The pay calculator.
//!
//! `compute_pay` is the single authority on gross pay. It runs when a
//! shipment is delivered and the returned snapshot is frozen onto the
//! shipment; adjustments recompute it explicitly from the frozen pay terms,
//! nothing recomputes it implicitly.

use serde::{Deserialize, Serialize};

use haulbooks_core::{DomainResult, Money};

use crate::profile::PayType;

/// Financial inputs taken from a shipment at calculation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayInputs {
    pub base_rate: Money,
    pub accessorial_total: Money,
    pub miles: u32,
}

impl PayInputs {
    /// Customer-facing total: base rate plus accessorial charges.
    pub fn grand_total(&self) -> DomainResult<Money> {
        self.base_rate.checked_add(self.accessorial_total)
    }
}

/// Warning carried inside a frozen snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayWarning {
    /// The payee had no usable pay profile at calculation time. Pay is zero
    /// and the snapshot is flagged for repair; there is no fallback rate.
    MissingPayProfile,
}

/// The frozen result of one pay calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaySnapshot {
    pub base_pay: Money,
    pub accessorial_pay: Money,
    pub total_gross: Money,
    pub warning: Option<PayWarning>,
}

impl PaySnapshot {
    fn missing_profile() -> Self {
        Self {
            base_pay: Money::ZERO,
            accessorial_pay: Money::ZERO,
            total_gross: Money::ZERO,
            warning: Some(PayWarning::MissingPayProfile),
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.warning.is_some()
    }
}

/// Compute a payee's gross pay for one shipment.
///
/// - `Percentage`: percent of the base rate.
/// - `PerMile`: rate times loaded miles.
/// - `FlatRate`: the configured amount.
///
/// Accessorial charges (detention, layover, ...) pass through to the payee at
/// 100% regardless of pay type. `None` pay terms (absent or malformed
/// profile, resolved by [`crate::PayProfile::usable_pay_type`]) yield a
/// zero-pay snapshot flagged `MissingPayProfile` - computation proceeds, the
/// shipment stays settleable, and the flag survives in the frozen snapshot.
pub fn compute_pay(pay_type: Option<&PayType>, inputs: &PayInputs) -> DomainResult<PaySnapshot> {
    let Some(pay_type) = pay_type else {
        return Ok(PaySnapshot::missing_profile());
    };

    let base_pay = base_component(pay_type, inputs)?;
    let accessorial_pay = inputs.accessorial_total;
    let total_gross = base_pay.checked_add(accessorial_pay)?;

    Ok(PaySnapshot {
        base_pay,
        accessorial_pay,
        total_gross,
        warning: None,
    })
}

/// Compute a dispatcher's commission for one shipment.
///
/// Commission is earned on the base rate only; accessorial charges never feed
/// it. No pay terms means no commission.
pub fn compute_commission(pay_type: Option<&PayType>, inputs: &PayInputs) -> DomainResult<Money> {
    match pay_type {
        Some(t) => base_component(t, inputs),
        None => Ok(Money::ZERO),
    }
}

/// What the company keeps on a shipment after paying the driver and the
/// dispatcher. Signed; a misconfigured rate sheet can push it negative and
/// that is worth surfacing, not clamping.
pub fn company_revenue(
    grand_total: Money,
    total_gross: Money,
    commission: Money,
) -> DomainResult<Money> {
    grand_total.checked_sub(total_gross)?.checked_sub(commission)
}

fn base_component(pay_type: &PayType, inputs: &PayInputs) -> DomainResult<Money> {
    match pay_type {
        PayType::Percentage { percent } => inputs.base_rate.percent(*percent),
        PayType::PerMile { rate } => rate.checked_mul(inputs.miles),
        PayType::FlatRate { amount } => Ok(*amount),
    }
}

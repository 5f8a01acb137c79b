//! Payee pay profiles.

use core::str::FromStr;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use haulbooks_core::{AggregateId, DomainError, DomainResult, Money};

/// Identifier of a payee (a driver or a dispatcher being paid).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayeeId(pub AggregateId);

impl PayeeId {
    pub fn new() -> Self {
        Self(AggregateId::new())
    }
}

impl Default for PayeeId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PayeeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<AggregateId> for PayeeId {
    fn from(id: AggregateId) -> Self {
        Self(id)
    }
}

impl FromStr for PayeeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregateId::from_str(s).map(Self)
    }
}

/// Expense categories recognized by deduction preferences and settlement
/// line items.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Fuel,
    Advance,
    Insurance,
    Equipment,
    DispatchFee,
    Other,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 6] = [
        ExpenseCategory::Fuel,
        ExpenseCategory::Advance,
        ExpenseCategory::Insurance,
        ExpenseCategory::Equipment,
        ExpenseCategory::DispatchFee,
        ExpenseCategory::Other,
    ];
}

/// Which expense categories are company-deductible for a payee.
///
/// Categories not listed are tracked but never deducted from this payee's
/// settlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionPreferences {
    deductible: BTreeSet<ExpenseCategory>,
}

impl DeductionPreferences {
    pub fn all() -> Self {
        Self {
            deductible: ExpenseCategory::ALL.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            deductible: BTreeSet::new(),
        }
    }

    pub fn only<I: IntoIterator<Item = ExpenseCategory>>(categories: I) -> Self {
        Self {
            deductible: categories.into_iter().collect(),
        }
    }

    pub fn allows(&self, category: ExpenseCategory) -> bool {
        self.deductible.contains(&category)
    }
}

impl Default for DeductionPreferences {
    fn default() -> Self {
        Self::all()
    }
}

/// How a payee earns on a shipment. Exactly one of these applies; call sites
/// dispatch on the type once, here, and nowhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayType {
    /// Percentage of the shipment's base rate (0..=100, whole percents).
    Percentage { percent: u8 },
    /// Rate per loaded mile.
    PerMile { rate: Money },
    /// Flat amount per shipment.
    FlatRate { amount: Money },
}

impl PayType {
    fn validate(&self) -> DomainResult<()> {
        match self {
            PayType::Percentage { percent } => {
                if *percent > 100 {
                    return Err(DomainError::validation(format!(
                        "percentage pay must be between 0 and 100, got {percent}"
                    )));
                }
            }
            PayType::PerMile { rate } => {
                if rate.is_negative() {
                    return Err(DomainError::validation("per-mile rate cannot be negative"));
                }
            }
            PayType::FlatRate { amount } => {
                if amount.is_negative() {
                    return Err(DomainError::validation("flat rate cannot be negative"));
                }
            }
        }
        Ok(())
    }
}

/// A payee's pay configuration.
///
/// Profiles are written by admin edits and read everywhere else; nothing in
/// the settlement core rewrites them. Stored profiles can still be malformed
/// (hand-edited data, older validation rules), so consumers re-validate and
/// treat a malformed profile exactly like a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayProfile {
    pay_type: PayType,
    deductions: DeductionPreferences,
}

impl PayProfile {
    pub fn new(pay_type: PayType, deductions: DeductionPreferences) -> DomainResult<Self> {
        pay_type.validate()?;
        Ok(Self {
            pay_type,
            deductions,
        })
    }

    pub fn pay_type(&self) -> &PayType {
        &self.pay_type
    }

    pub fn deductions(&self) -> &DeductionPreferences {
        &self.deductions
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.pay_type.validate()
    }

    /// The pay type if this profile passes re-validation, `None` otherwise.
    ///
    /// This is the resolution step callers run before freezing pay terms onto
    /// a shipment: a malformed stored profile resolves to `None` and is
    /// treated exactly like a missing one.
    pub fn usable_pay_type(&self) -> Option<&PayType> {
        self.validate().ok().map(|()| &self.pay_type)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use haulbooks_core::{DomainResult, Money};

use crate::invoice::Invoice;

/// Receivables age buckets, by days past the due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingBucket {
    Current,
    Days31To60,
    Days61To90,
    Over90,
}

/// Classify an outstanding balance by how long it has been past due.
///
/// A balance at or below zero belongs to no bucket. A balance that is not
/// yet due counts as Current.
pub fn age_bucket(
    due_date: DateTime<Utc>,
    outstanding: Money,
    as_of: DateTime<Utc>,
) -> Option<AgingBucket> {
    if outstanding.cents() <= 0 {
        return None;
    }
    let days_past_due = (as_of - due_date).num_days();
    Some(match days_past_due {
        ..=30 => AgingBucket::Current,
        31..=60 => AgingBucket::Days31To60,
        61..=90 => AgingBucket::Days61To90,
        _ => AgingBucket::Over90,
    })
}

/// Outstanding receivables totaled per age bucket, as of one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingReport {
    pub as_of: DateTime<Utc>,
    pub current: Money,
    pub days_31_to_60: Money,
    pub days_61_to_90: Money,
    pub over_90: Money,
}

impl AgingReport {
    /// Total the open balances of the given invoices into buckets. Void and
    /// deleted invoices are not receivables and never appear.
    pub fn build(invoices: &[Invoice], as_of: DateTime<Utc>) -> DomainResult<Self> {
        Self::build_from_balances(
            invoices.iter().filter_map(|invoice| {
                if invoice.is_voided() || invoice.is_deleted() {
                    return None;
                }
                invoice.due_date().map(|due| (due, invoice.outstanding()))
            }),
            as_of,
        )
    }

    /// Total `(due_date, outstanding)` pairs into buckets. Read models that
    /// track balances without full invoice state report through this.
    pub fn build_from_balances(
        balances: impl IntoIterator<Item = (DateTime<Utc>, Money)>,
        as_of: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let mut report = Self {
            as_of,
            current: Money::ZERO,
            days_31_to_60: Money::ZERO,
            days_61_to_90: Money::ZERO,
            over_90: Money::ZERO,
        };

        for (due_date, outstanding) in balances {
            let Some(bucket) = age_bucket(due_date, outstanding, as_of) else {
                continue;
            };
            let slot = match bucket {
                AgingBucket::Current => &mut report.current,
                AgingBucket::Days31To60 => &mut report.days_31_to_60,
                AgingBucket::Days61To90 => &mut report.days_61_to_90,
                AgingBucket::Over90 => &mut report.over_90,
            };
            *slot = slot.checked_add(outstanding)?;
        }

        Ok(report)
    }

    pub fn total_outstanding(&self) -> DomainResult<Money> {
        Money::sum([
            self.current,
            self.days_31_to_60,
            self.days_61_to_90,
            self.over_90,
        ])
    }
}

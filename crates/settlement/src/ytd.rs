use serde::{Deserialize, Serialize};

use haulbooks_core::{DomainResult, Money};

use crate::settlement::SettlementSummary;

/// Running totals over a payee's paid settlements for one calendar year.
///
/// Draft and void settlements contribute nothing: money counts when it is
/// paid out, not when a statement is drafted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct YtdTotals {
    pub settlements: u32,
    pub gross_pay: Money,
    pub total_deductions: Money,
    pub net_pay: Money,
}

pub fn ytd_totals(summaries: &[SettlementSummary], year: i32) -> DomainResult<YtdTotals> {
    let mut totals = YtdTotals::default();
    for summary in summaries {
        if !summary.counts_for_year(year) {
            continue;
        }
        totals.settlements += 1;
        totals.gross_pay = totals.gross_pay.checked_add(summary.gross_pay)?;
        totals.total_deductions = totals
            .total_deductions
            .checked_add(summary.total_deductions)?;
        totals.net_pay = totals.net_pay.checked_add(summary.net_pay)?;
    }
    Ok(totals)
}

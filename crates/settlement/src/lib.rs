//! Settlement domain module (event-sourced).
//!
//! Driver settlements: expense tracking with per-settlement draws, the pure
//! builder that selects shipments and attaches deductions by rule, the
//! settlement aggregate itself, and year-to-date paid totals. Pure
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod builder;
pub mod expense;
pub mod settlement;
pub mod ytd;

pub use builder::{SettlementDraft, build_settlement};
pub use expense::{
    ConsumeForSettlement, Expense, ExpenseCommand, ExpenseConsumed, ExpenseDraw,
    ExpenseDrawReleased, ExpenseEvent, ExpenseId, ExpenseRecorded, PaidBy, RecordExpense,
    ReleaseDraw,
};
pub use settlement::{
    MarkPaid, OpenSettlement, Settlement, SettlementCommand, SettlementEvent, SettlementId,
    SettlementLine, SettlementMarkedPaid, SettlementOpened, SettlementPeriod, SettlementStatus,
    SettlementSummary, SettlementVoided, VoidSettlement,
};
pub use ytd::{YtdTotals, ytd_totals};

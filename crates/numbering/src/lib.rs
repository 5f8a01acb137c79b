//! Document numbering: human-facing, gap-tolerant, strictly unique numbers
//! for invoices and settlements.
//!
//! The value objects live here; the atomic counter increment that mints them
//! is an infrastructure concern.

pub mod counter;
pub mod number;

pub use counter::{CounterKey, CounterKind, DEFAULT_COUNTER_SEED};
pub use number::DocumentNumber;

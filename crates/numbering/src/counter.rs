//! Counter identity for document numbering.

use serde::{Deserialize, Serialize};

use haulbooks_core::TenantId;

/// Default counter seed. The first number minted from a fresh counter is
/// `seed + 1` (a counter seeded at 1000 yields 1001, 1002, ...).
pub const DEFAULT_COUNTER_SEED: u64 = 1000;

/// The kind of document a counter numbers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    Invoice,
    Settlement,
}

impl CounterKind {
    pub fn prefix(self) -> &'static str {
        match self {
            CounterKind::Invoice => "INV",
            CounterKind::Settlement => "SET",
        }
    }
}

/// Identity of one counter: `(tenant, kind, year)`.
///
/// Counters are created lazily on first use, incremented exactly once per
/// successful mint, and never decremented or reused. A new year starts a
/// fresh counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    pub tenant_id: TenantId,
    pub kind: CounterKind,
    pub year: i32,
}

impl CounterKey {
    pub fn new(tenant_id: TenantId, kind: CounterKind, year: i32) -> Self {
        Self {
            tenant_id,
            kind,
            year,
        }
    }
}

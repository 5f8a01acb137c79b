//! Read-side projections fed by the event bus.
//!
//! Every projection here follows the same discipline:
//!
//! - **cursor-guarded**: a per-stream sequence cursor makes redelivered
//!   events a no-op and turns a gap into an error instead of silent drift
//! - **tenant-isolated**: the event's own tenant and aggregate must match the
//!   envelope before anything is read from it
//! - **rebuildable**: wipe the affected tenants and replay the log in stream
//!   order; the result is identical to having followed the bus live

pub mod payee_earnings;
pub mod receivables;
pub mod settlement_queue;

pub use payee_earnings::{PayeeEarnings, PayeeEarningsProjection, PayeeEarningsProjectionError};
pub use receivables::{ReceivableRecord, ReceivablesProjection, ReceivablesProjectionError};
pub use settlement_queue::{
    OpenExpense, QueuedShipment, SettlementQueueProjection, SettlementQueueProjectionError,
};

use std::collections::HashMap;
use std::sync::RwLock;

use haulbooks_core::{AggregateId, TenantId};

/// Per-stream sequence cursors. Streams the projection has never seen start
/// at zero, which the guard treats as "accept any entry point".
#[derive(Debug, Default)]
pub(crate) struct SequenceCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl SequenceCursors {
    pub(crate) fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(cursors) => *cursors.get(&(tenant_id, aggregate_id)).unwrap_or(&0),
            Err(_) => 0,
        }
    }

    pub(crate) fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert((tenant_id, aggregate_id), seq);
        }
    }

    pub(crate) fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

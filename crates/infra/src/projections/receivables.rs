//! Receivables Projection.
//!
//! Per-invoice balance records for the accounts receivable view: what each
//! invoice is worth, what has been collected against it, and the aging
//! report over everything still open.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use haulbooks_core::{DomainResult, Money, TenantId};
use haulbooks_dispatch::ShipmentId;
use haulbooks_events::EventEnvelope;
use haulbooks_invoicing::{AgingReport, InvoiceEvent, InvoiceId, InvoiceStatus, derive_status};
use haulbooks_numbering::DocumentNumber;

use crate::projections::SequenceCursors;
use crate::read_model::TenantStore;

/// Read model: one invoice's receivable position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivableRecord {
    pub invoice_id: InvoiceId,
    pub shipment_id: ShipmentId,
    pub number: DocumentNumber,
    pub amount: Money,
    pub paid: Money,
    pub due_date: DateTime<Utc>,
    pub voided: bool,
}

impl ReceivableRecord {
    pub fn outstanding(&self) -> Money {
        self.amount.sub_floor_zero(self.paid)
    }

    pub fn status(&self, as_of: DateTime<Utc>) -> InvoiceStatus {
        derive_status(self.amount, self.paid, Some(self.due_date), self.voided, as_of)
    }
}

#[derive(Debug, Error)]
pub enum ReceivablesProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Receivables projection keyed by invoice.
#[derive(Debug)]
pub struct ReceivablesProjection<S>
where
    S: TenantStore<InvoiceId, ReceivableRecord>,
{
    store: S,
    cursors: SequenceCursors,
}

impl<S> ReceivablesProjection<S>
where
    S: TenantStore<InvoiceId, ReceivableRecord>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: SequenceCursors::default(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<ReceivableRecord> {
        self.store.get(tenant_id, invoice_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ReceivableRecord> {
        self.store.list(tenant_id)
    }

    /// Invoices still owed money as of the given instant: everything that is
    /// not paid off and not void.
    pub fn open(&self, tenant_id: TenantId, as_of: DateTime<Utc>) -> Vec<ReceivableRecord> {
        self.store
            .list(tenant_id)
            .into_iter()
            .filter(|r| !matches!(r.status(as_of), InvoiceStatus::Paid | InvoiceStatus::Void))
            .collect()
    }

    /// Aging report over the open balances.
    pub fn aging(&self, tenant_id: TenantId, as_of: DateTime<Utc>) -> DomainResult<AgingReport> {
        AgingReport::build_from_balances(
            self.open(tenant_id, as_of)
                .into_iter()
                .map(|r| (r.due_date, r.outstanding())),
            as_of,
        )
    }

    /// Apply one envelope from the bus.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReceivablesProjectionError> {
        if envelope.aggregate_type() != "invoice" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursors.last(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(ReceivablesProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ReceivablesProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ReceivablesProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, invoice_id) = match &event {
            InvoiceEvent::InvoiceIssued(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::PaymentApplied(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceVoided(e) => (e.tenant_id, e.invoice_id),
            InvoiceEvent::InvoiceDeleted(e) => (e.tenant_id, e.invoice_id),
        };
        if event_tenant != tenant_id {
            return Err(ReceivablesProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if invoice_id.0 != aggregate_id {
            return Err(ReceivablesProjectionError::TenantIsolation(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                let record = ReceivableRecord {
                    invoice_id: e.invoice_id,
                    shipment_id: e.shipment_id,
                    number: e.number,
                    amount: e.amount,
                    paid: Money::ZERO,
                    due_date: e.due_date,
                    voided: false,
                };
                self.store.upsert(tenant_id, e.invoice_id, record);
            }
            InvoiceEvent::PaymentApplied(e) => {
                if let Some(mut record) = self.store.get(tenant_id, &e.invoice_id) {
                    record.paid = e.new_paid_total;
                    self.store.upsert(tenant_id, e.invoice_id, record);
                }
            }
            InvoiceEvent::InvoiceVoided(e) => {
                if let Some(mut record) = self.store.get(tenant_id, &e.invoice_id) {
                    record.voided = true;
                    self.store.upsert(tenant_id, e.invoice_id, record);
                }
            }
            InvoiceEvent::InvoiceDeleted(e) => {
                self.store.remove(tenant_id, &e.invoice_id);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ReceivablesProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
            tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
            tenants.dedup();
            for t in tenants {
                self.store.clear_tenant(t);
                self.cursors.clear_tenant(t);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

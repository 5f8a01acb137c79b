//! Payee Earnings Projection.
//!
//! Year-to-date paid totals per payee, bucketed by the year the settlement
//! was paid. Draft and void settlements contribute nothing; the projection
//! listens only for `SettlementMarkedPaid`, which carries the frozen totals.

use chrono::Datelike;
use serde_json::Value as JsonValue;
use thiserror::Error;

use haulbooks_core::{DomainError, TenantId};
use haulbooks_events::EventEnvelope;
use haulbooks_pay::PayeeId;
use haulbooks_settlement::{SettlementEvent, YtdTotals};

use crate::projections::SequenceCursors;
use crate::read_model::TenantStore;

/// Read model: one payee's paid totals for one calendar year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayeeEarnings {
    pub payee_id: PayeeId,
    pub year: i32,
    pub totals: YtdTotals,
}

#[derive(Debug, Error)]
pub enum PayeeEarningsProjectionError {
    #[error("failed to deserialize settlement event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("earnings accumulation failed: {0}")]
    Accumulate(#[from] DomainError),
}

/// Earnings projection keyed `(payee, year)`.
#[derive(Debug)]
pub struct PayeeEarningsProjection<S>
where
    S: TenantStore<(PayeeId, i32), PayeeEarnings>,
{
    store: S,
    cursors: SequenceCursors,
}

impl<S> PayeeEarningsProjection<S>
where
    S: TenantStore<(PayeeId, i32), PayeeEarnings>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: SequenceCursors::default(),
        }
    }

    /// Paid totals for one payee and year. Payees with no paid settlements
    /// report zeroes.
    pub fn for_payee(&self, tenant_id: TenantId, payee_id: PayeeId, year: i32) -> YtdTotals {
        self.store
            .get(tenant_id, &(payee_id, year))
            .map(|e| e.totals)
            .unwrap_or_default()
    }

    /// Every `(payee, year)` bucket for a tenant.
    pub fn list(&self, tenant_id: TenantId) -> Vec<PayeeEarnings> {
        self.store.list(tenant_id)
    }

    /// Apply one envelope from the bus.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PayeeEarningsProjectionError> {
        if envelope.aggregate_type() != "settlement" {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursors.last(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(PayeeEarningsProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(PayeeEarningsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: SettlementEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PayeeEarningsProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, settlement_id) = match &event {
            SettlementEvent::SettlementOpened(e) => (e.tenant_id, e.settlement_id),
            SettlementEvent::SettlementMarkedPaid(e) => (e.tenant_id, e.settlement_id),
            SettlementEvent::SettlementVoided(e) => (e.tenant_id, e.settlement_id),
        };
        if event_tenant != tenant_id {
            return Err(PayeeEarningsProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if settlement_id.0 != aggregate_id {
            return Err(PayeeEarningsProjectionError::TenantIsolation(
                "event settlement_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let SettlementEvent::SettlementMarkedPaid(e) = event {
            let year = e.paid_at.year();
            let key = (e.payee_id, year);

            let mut earnings = self.store.get(tenant_id, &key).unwrap_or(PayeeEarnings {
                payee_id: e.payee_id,
                year,
                totals: YtdTotals::default(),
            });
            earnings.totals.settlements += 1;
            earnings.totals.gross_pay = earnings.totals.gross_pay.checked_add(e.gross_pay)?;
            earnings.totals.total_deductions = earnings
                .totals
                .total_deductions
                .checked_add(e.total_deductions)?;
            earnings.totals.net_pay = earnings.totals.net_pay.checked_add(e.net_pay)?;

            self.store.upsert(tenant_id, key, earnings);
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), PayeeEarningsProjectionError> {
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

//! Invoice minting.
//!
//! Issuing an invoice touches two streams: the invoice itself comes into
//! existence, and the shipment records the link so it can refuse deletion and
//! a second invoice. Both go into one atomic batch; the document number is
//! minted beforehand, so a rejected or abandoned mint leaves a gap in the
//! sequence. Gaps are acceptable, duplicates are not.

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value as JsonValue;
use tracing::warn;

use haulbooks_audit::{AuditLogEntry, AuditSnapshot, AuditedEvent};
use haulbooks_core::{
    ActorContext, Aggregate, AggregateId, ExpectedVersion, TenantId,
};
use haulbooks_dispatch::{RecordInvoice, Shipment, ShipmentCommand, ShipmentId};
use haulbooks_events::{EventBus, EventEnvelope};
use haulbooks_invoicing::{Invoice, InvoiceCommand, InvoiceId, IssueInvoice};
use haulbooks_numbering::{CounterKind, DocumentNumber};

use crate::audit_log::AuditLog;
use crate::dispatcher::{CommandDispatcher, DispatchError, load_aggregate, to_uncommitted};
use crate::event_store::{EventStore, StreamAppend};
use crate::sequence::{CounterStore, SequenceGenerator};
use crate::services::ServiceError;

/// What a successful mint hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedInvoice {
    pub invoice_id: InvoiceId,
    pub number: DocumentNumber,
}

/// Issues invoices for delivered shipments with a verified proof of delivery.
#[derive(Debug)]
pub struct InvoicingService<S, B, L, C> {
    dispatcher: CommandDispatcher<S, B, L>,
    sequences: SequenceGenerator<C>,
}

impl<S, B, L, C> InvoicingService<S, B, L, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: AuditLog,
    C: CounterStore,
{
    pub fn new(dispatcher: CommandDispatcher<S, B, L>, sequences: SequenceGenerator<C>) -> Self {
        Self {
            dispatcher,
            sequences,
        }
    }

    /// Mint an invoice for one shipment.
    ///
    /// The shipment must be delivered with a verified proof of delivery and
    /// not already invoiced; the invoice amount is the shipment's grand
    /// total. The `INV-{year}-{seq}` number comes from the minting clock's
    /// year.
    pub fn mint_invoice(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        shipment_id: ShipmentId,
        due_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<MintedInvoice, ServiceError> {
        let number =
            self.sequences
                .next_number(tenant_id, CounterKind::Invoice, occurred_at.year())?;
        let invoice_id = InvoiceId::new(AggregateId::new());

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.try_mint(
                tenant_id,
                actor,
                shipment_id,
                invoice_id,
                &number,
                due_date,
                occurred_at,
            );
            match outcome {
                Err(ServiceError::Dispatch(DispatchError::Concurrency(_)))
                    if self.dispatcher.retry.should_retry(attempt) =>
                {
                    let delay = self.dispatcher.retry.delay_for_attempt(attempt);
                    warn!(%shipment_id, attempt, ?delay, "invoice mint lost a race, retrying");
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
                Ok(()) => {
                    return Ok(MintedInvoice { invoice_id, number });
                }
            }
        }
    }

    fn try_mint(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        shipment_id: ShipmentId,
        invoice_id: InvoiceId,
        number: &DocumentNumber,
        due_date: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let (mut shipment, shipment_version) =
            load_aggregate(&self.dispatcher.store, tenant_id, shipment_id.0, |id| {
                Shipment::empty(ShipmentId::new(id))
            })?;
        let amount = shipment.grand_total()?;
        let shipment_before = shipment.snapshot();

        let record = ShipmentCommand::RecordInvoice(RecordInvoice {
            tenant_id,
            shipment_id,
            invoice_id: invoice_id.0,
            number: number.clone(),
            occurred_at,
        });
        let shipment_events = shipment.handle(&record)?;

        let (mut invoice, invoice_version) =
            load_aggregate(&self.dispatcher.store, tenant_id, invoice_id.0, |id| {
                Invoice::empty(InvoiceId::new(id))
            })?;
        let issue = InvoiceCommand::IssueInvoice(IssueInvoice {
            tenant_id,
            invoice_id,
            number: number.clone(),
            shipment_id,
            amount,
            due_date,
            occurred_at,
        });
        let invoice_events = invoice.handle(&issue)?;

        let committed = self.dispatcher.store.append_batch(vec![
            StreamAppend::new(
                ExpectedVersion::Exact(shipment_version),
                to_uncommitted(
                    tenant_id,
                    actor,
                    shipment_id.0,
                    Shipment::entity_type(),
                    &shipment_events,
                )?,
            ),
            StreamAppend::new(
                ExpectedVersion::Exact(invoice_version),
                to_uncommitted(
                    tenant_id,
                    actor,
                    invoice_id.0,
                    Invoice::entity_type(),
                    &invoice_events,
                )?,
            ),
        ])?;

        for event in &shipment_events {
            shipment.apply(event);
        }
        for event in &invoice_events {
            invoice.apply(event);
        }

        self.dispatcher.audit.append(AuditLogEntry::new(
            tenant_id,
            actor.actor_id,
            Shipment::entity_type(),
            shipment_id.0,
            shipment_events[0].audit_action(),
            Some(shipment_before),
            Some(shipment.snapshot()),
            None,
            occurred_at,
        ))?;
        self.dispatcher.audit.append(AuditLogEntry::new(
            tenant_id,
            actor.actor_id,
            Invoice::entity_type(),
            invoice_id.0,
            invoice_events[0].audit_action(),
            None,
            Some(invoice.snapshot()),
            None,
            occurred_at,
        ))?;

        self.dispatcher.publish_all(&committed)?;

        Ok(())
    }
}

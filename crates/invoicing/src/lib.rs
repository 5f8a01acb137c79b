//! Invoicing domain module (event-sourced).
//!
//! This crate contains business rules for invoices and accounts receivable,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Invoice status is derived from the payment history and the
//! clock; aging buckets classify what is still owed.

pub mod aging;
pub mod invoice;

pub use aging::{AgingBucket, AgingReport, age_bucket};
pub use invoice::{
    ApplyPayment, DeleteInvoice, Invoice, InvoiceCommand, InvoiceDeleted, InvoiceEvent, InvoiceId,
    InvoiceIssued, InvoiceStatus, InvoiceVoided, IssueInvoice, Payment, PaymentApplied,
    PaymentMethod, VoidInvoice, derive_status,
};

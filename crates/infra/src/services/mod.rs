//! Application services.
//!
//! The command dispatcher covers single-aggregate writes. These services own
//! the flows that need more than that: resolving pay terms at the moment of
//! delivery, minting document numbers, and committing several streams in one
//! atomic batch.

pub mod delivery;
pub mod invoicing;
pub mod settlement;

pub use delivery::{DeliveryService, InMemoryProfileDirectory, ProfileDirectory};
pub use invoicing::InvoicingService;
pub use settlement::{BulkSettlementOutcome, SettlementService, SettlementWorklist};

use thiserror::Error;

use haulbooks_core::DomainError;

use crate::audit_log::AuditLogError;
use crate::dispatcher::DispatchError;
use crate::event_store::EventStoreError;
use crate::sequence::SequenceError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        ServiceError::Dispatch(DispatchError::Rejected(err))
    }
}

impl From<EventStoreError> for ServiceError {
    fn from(err: EventStoreError) -> Self {
        ServiceError::Dispatch(err.into())
    }
}

impl From<AuditLogError> for ServiceError {
    fn from(err: AuditLogError) -> Self {
        ServiceError::Dispatch(DispatchError::Audit(err))
    }
}

//! Domain error model.

use thiserror::Error;

use crate::money::Money;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns (storage conflicts after
/// retries, sequence exhaustion) belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    /// A financial field on a delivered shipment was written directly.
    ///
    /// Once a shipment locks at delivery, financial fields change only through
    /// the adjustment workflow.
    #[error("shipment is locked: `{field}` can only change through an approved adjustment")]
    ShipmentLocked { field: String },

    /// A payment would push an invoice past its balance (beyond the rounding
    /// tolerance). The payment is rejected, never recorded.
    #[error("payment of {attempted} exceeds the outstanding balance of {outstanding}")]
    Overpayment {
        attempted: Money,
        outstanding: Money,
    },

    /// Deletion refused because another record references this one. Nothing is
    /// cascaded.
    #[error("cannot delete {entity}: referenced by {linked_to}")]
    LinkedEntityExists { entity: String, linked_to: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn locked(field: impl Into<String>) -> Self {
        Self::ShipmentLocked {
            field: field.into(),
        }
    }

    pub fn overpayment(attempted: Money, outstanding: Money) -> Self {
        Self::Overpayment {
            attempted,
            outstanding,
        }
    }

    pub fn linked(entity: impl Into<String>, linked_to: impl Into<String>) -> Self {
        Self::LinkedEntityExists {
            entity: entity.into(),
            linked_to: linked_to.into(),
        }
    }
}

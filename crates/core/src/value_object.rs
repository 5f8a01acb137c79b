//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

/// Marker trait for value objects.
///
/// Value objects are domain objects that are **immutable** and **compared by value**.
/// They represent concepts where identity doesn't matter - only the values matter.
///
/// ## Value Object vs Entity
///
/// - **Value Object**: No identity (two value objects with same values are equal)
/// - **Entity**: Has identity (two entities with same ID are the same entity)
///
/// Example:
/// - `Money::from_cents(315_000)` is a value object
/// - `Shipment { id: ShipmentId(...), .. }` is an entity
///
/// ## Immutability
///
/// Value objects should be **immutable** - once created, they don't change. To "modify"
/// a value object, create a new one with the new values. The frozen pay snapshot on a
/// delivered shipment relies on this: the snapshot never changes in place, a recompute
/// replaces it wholesale (and only through the adjustment workflow).
///
/// ## Design Constraints
///
/// The trait requires:
/// - **Clone**: Value objects should be cheap to copy (they're values, not references)
/// - **PartialEq**: Value objects are compared by their attribute values
/// - **Debug**: Value objects should be debuggable (helpful for logging, testing)
///
/// ## Usage Pattern
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct DocumentNumber { prefix: String, year: i32, value: u64 }
///
/// impl ValueObject for DocumentNumber {}
///
/// // Two numbers with the same parts are the same number
/// assert_eq!(
///     DocumentNumber::parse("INV-2025-1001")?,
///     DocumentNumber::parse("INV-2025-1001")?,
/// );
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

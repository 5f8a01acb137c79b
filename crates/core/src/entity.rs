//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Sub-records that live inside an aggregate (an adjustment on a shipment, a
/// payment on an invoice) implement this; the aggregate root itself implements
/// [`crate::AggregateRoot`].
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

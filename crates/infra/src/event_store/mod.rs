//! Append-only event store boundary.
//!
//! Defines the storage abstraction for tenant-scoped event streams, including
//! the multi-stream atomic append that cross-aggregate flows depend on.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

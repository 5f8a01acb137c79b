//! Infrastructure layer: event store, command dispatch, document numbering,
//! audit log, orchestration services, and read-side projections.
//!
//! Everything here is generic over trait seams (`EventStore`, `AuditLog`,
//! `CounterStore`, `TenantStore`) with in-memory implementations; a real
//! backend plugs in behind the same traits without touching the domain or
//! service code.

pub mod audit_log;
pub mod dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod sequence;
pub mod services;
pub mod workers;

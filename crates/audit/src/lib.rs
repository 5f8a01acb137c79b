//! Audit-trail record types and snapshot diffing.
//!
//! Writing the entry is the command dispatcher's job, not the caller's: an
//! audit record is a mandatory side effect of every committed mutation, one
//! entry per user action. This crate holds the shared vocabulary the
//! dispatcher and the domain crates meet at.

pub mod diff;
pub mod entry;

pub use diff::diff_snapshots;
pub use entry::{AuditAction, AuditLogEntry, AuditSnapshot, AuditedEvent, FieldChange};

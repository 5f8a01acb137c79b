//! Audit log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use haulbooks_core::{AggregateId, TenantId, UserId};

/// What kind of change an audit entry records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    StatusChange,
    Adjustment,
}

/// One field that changed between the before and after snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
}

/// One committed mutation, attributed and snapshotted.
///
/// Entries are append-only; no API updates or deletes them. Batched
/// sub-changes from a single user action share one entry, with the
/// combined diff in `changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub actor_id: UserId,
    pub entity_type: String,
    pub entity_id: AggregateId,
    pub action: AuditAction,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub changes: Vec<FieldChange>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditLogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        actor_id: UserId,
        entity_type: impl Into<String>,
        entity_id: AggregateId,
        action: AuditAction,
        before: Option<JsonValue>,
        after: Option<JsonValue>,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let changes = crate::diff::diff_snapshots(before.as_ref(), after.as_ref());
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            actor_id,
            entity_type: entity_type.into(),
            entity_id,
            action,
            before,
            after,
            changes,
            reason,
            occurred_at,
        }
    }
}

/// Implemented by domain event enums so the dispatcher can classify the
/// command it just committed and pick up a mutation reason when one exists.
pub trait AuditedEvent {
    fn audit_action(&self) -> AuditAction;

    fn audit_reason(&self) -> Option<&str> {
        None
    }
}

/// Implemented by aggregates that feed before/after snapshots into the trail.
pub trait AuditSnapshot {
    /// Stable entity type name, e.g. `"shipment"`.
    fn entity_type() -> &'static str;

    /// JSON snapshot of the current state. Shallow fields become the diff
    /// vocabulary, so keep the top level flat where it matters.
    fn snapshot(&self) -> JsonValue;
}

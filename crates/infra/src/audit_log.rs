//! Audit trail storage.
//!
//! The dispatcher appends here after every committed mutation; the queries
//! serve the per-entity history view and period reviews. Entries are
//! append-only, so the store exposes no update or delete.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use haulbooks_audit::AuditLogEntry;
use haulbooks_core::{AggregateId, TenantId};

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("audit storage failure: {0}")]
    Storage(String),
}

/// Tenant-scoped, append-only audit trail.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: AuditLogEntry) -> Result<(), AuditLogError>;

    /// Every entry for one entity, oldest first.
    fn by_entity(
        &self,
        tenant_id: TenantId,
        entity_type: &str,
        entity_id: AggregateId,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError>;

    /// Every entry whose `occurred_at` falls in `[from, to]`, oldest first.
    fn in_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError>;
}

impl<L> AuditLog for Arc<L>
where
    L: AuditLog + ?Sized,
{
    fn append(&self, entry: AuditLogEntry) -> Result<(), AuditLogError> {
        (**self).append(entry)
    }

    fn by_entity(
        &self,
        tenant_id: TenantId,
        entity_type: &str,
        entity_id: AggregateId,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        (**self).by_entity(tenant_id, entity_type, entity_id)
    }

    fn in_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        (**self).in_range(tenant_id, from, to)
    }
}

/// In-memory audit log partitioned by tenant, insertion-ordered.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<HashMap<TenantId, Vec<AuditLogEntry>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, entry: AuditLogEntry) -> Result<(), AuditLogError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditLogError::Storage("audit log lock poisoned".to_string()))?;
        entries.entry(entry.tenant_id).or_default().push(entry);
        Ok(())
    }

    fn by_entity(
        &self,
        tenant_id: TenantId,
        entity_type: &str,
        entity_id: AggregateId,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AuditLogError::Storage("audit log lock poisoned".to_string()))?;
        Ok(entries
            .get(&tenant_id)
            .map(|tenant_entries| {
                tenant_entries
                    .iter()
                    .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn in_range(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AuditLogError::Storage("audit log lock poisoned".to_string()))?;
        Ok(entries
            .get(&tenant_id)
            .map(|tenant_entries| {
                tenant_entries
                    .iter()
                    .filter(|e| e.occurred_at >= from && e.occurred_at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

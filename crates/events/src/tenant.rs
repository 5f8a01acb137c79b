use haulbooks_core::TenantId;

use crate::EventEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// This trait marks types that have an associated tenant ID, enabling
/// tenant-aware processing in infrastructure components (workers, projections).
///
/// ## Use Cases
///
/// - **Worker pinning**: a projection worker can be pinned to one tenant so it
///   only processes that tenant's events (defense in depth)
/// - **Message filtering**: filter messages by tenant in subscription loops
/// - **Tenant validation**: ensure messages belong to the expected tenant
///
/// `EventEnvelope` implements this trait; other message types can implement it
/// if they need tenant scoping.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id()
    }
}

//! Delivery service.
//!
//! Delivery is the moment pay terms freeze onto a shipment. The service
//! resolves the driver's and dispatcher's profiles from the directory,
//! degrades a missing or malformed profile to zero pay instead of blocking
//! the dock, and hands the resolved terms to the shipment aggregate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::warn;

use haulbooks_core::{ActorContext, TenantId};
use haulbooks_dispatch::{MarkDelivered, Shipment, ShipmentCommand, ShipmentId};
use haulbooks_events::{EventBus, EventEnvelope};
use haulbooks_pay::{PayProfile, PayType, PayeeId};

use crate::audit_log::AuditLog;
use crate::dispatcher::{CommandDispatcher, load_aggregate};
use crate::event_store::{EventStore, StoredEvent};
use crate::services::ServiceError;

/// Directory of pay profiles by payee.
///
/// Profiles live outside the event-sourced core; the settlement side only
/// ever reads them, at the moment of delivery.
pub trait ProfileDirectory: Send + Sync {
    fn profile(&self, tenant_id: TenantId, payee_id: PayeeId) -> Option<PayProfile>;
}

impl<T: ProfileDirectory + ?Sized> ProfileDirectory for Arc<T> {
    fn profile(&self, tenant_id: TenantId, payee_id: PayeeId) -> Option<PayProfile> {
        (**self).profile(tenant_id, payee_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<(TenantId, PayeeId), PayProfile>>,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, tenant_id: TenantId, payee_id: PayeeId, profile: PayProfile) {
        if let Ok(mut map) = self.profiles.write() {
            map.insert((tenant_id, payee_id), profile);
        }
    }
}

impl ProfileDirectory for InMemoryProfileDirectory {
    fn profile(&self, tenant_id: TenantId, payee_id: PayeeId) -> Option<PayProfile> {
        let map = self.profiles.read().ok()?;
        map.get(&(tenant_id, payee_id)).cloned()
    }
}

/// Marks shipments delivered with pay terms resolved from the directory.
#[derive(Debug)]
pub struct DeliveryService<S, B, L, P> {
    dispatcher: CommandDispatcher<S, B, L>,
    profiles: P,
}

impl<S, B, L, P> DeliveryService<S, B, L, P>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: AuditLog,
    P: ProfileDirectory,
{
    pub fn new(dispatcher: CommandDispatcher<S, B, L>, profiles: P) -> Self {
        Self {
            dispatcher,
            profiles,
        }
    }

    /// Mark a shipment delivered, freezing the pay snapshot.
    ///
    /// A payee without a usable profile delivers at zero pay with the
    /// snapshot flagged for repair; the adjustment workflow fixes it later.
    pub fn mark_delivered(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        shipment_id: ShipmentId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, ServiceError> {
        let (shipment, _version) = load_aggregate(
            &self.dispatcher.store,
            tenant_id,
            shipment_id.0,
            |id| Shipment::empty(ShipmentId::new(id)),
        )?;

        let driver_pay_terms = shipment
            .payee_id()
            .and_then(|payee_id| self.resolve_terms(tenant_id, payee_id, "driver"));
        let dispatcher_pay_terms = shipment
            .dispatcher_id()
            .and_then(|payee_id| self.resolve_terms(tenant_id, payee_id, "dispatcher"));

        let command = ShipmentCommand::MarkDelivered(MarkDelivered {
            tenant_id,
            shipment_id,
            driver_pay_terms,
            dispatcher_pay_terms,
            occurred_at,
        });
        self.dispatcher
            .dispatch(tenant_id, actor, shipment_id.0, &command, |id| {
                Shipment::empty(ShipmentId::new(id))
            })
            .map_err(ServiceError::from)
    }

    fn resolve_terms(
        &self,
        tenant_id: TenantId,
        payee_id: PayeeId,
        role: &str,
    ) -> Option<PayType> {
        match self.profiles.profile(tenant_id, payee_id) {
            None => {
                warn!(%payee_id, role, "no pay profile on file, delivering with zero pay");
                None
            }
            Some(profile) => {
                let resolved = profile.usable_pay_type().cloned();
                if resolved.is_none() {
                    warn!(%payee_id, role, "pay profile failed validation, delivering with zero pay");
                }
                resolved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use haulbooks_core::{AggregateId, Money, Role, UserId};
    use haulbooks_dispatch::{CreateShipment, DispatchShipment};
    use haulbooks_events::InMemoryEventBus;
    use haulbooks_pay::{DeductionPreferences, PayWarning};

    use crate::audit_log::InMemoryAuditLog;
    use crate::event_store::InMemoryEventStore;

    use super::*;

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        profiles: Arc<InMemoryProfileDirectory>,
        service: DeliveryService<
            Arc<InMemoryEventStore>,
            InMemoryEventBus<EventEnvelope<JsonValue>>,
            Arc<InMemoryAuditLog>,
            Arc<InMemoryProfileDirectory>,
        >,
        tenant: TenantId,
        actor: ActorContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEventStore::new());
        let profiles = Arc::new(InMemoryProfileDirectory::new());
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&store),
            InMemoryEventBus::new(),
            Arc::new(InMemoryAuditLog::new()),
        );
        Fixture {
            store: Arc::clone(&store),
            profiles: Arc::clone(&profiles),
            service: DeliveryService::new(dispatcher, profiles),
            tenant: TenantId::new(),
            actor: ActorContext::new(UserId::new(), Role::Dispatcher),
        }
    }

    fn dispatched_shipment(
        fx: &Fixture,
        driver: PayeeId,
        dispatcher_payee: Option<PayeeId>,
    ) -> ShipmentId {
        let shipment_id = ShipmentId::new(AggregateId::new());
        let create = ShipmentCommand::CreateShipment(CreateShipment {
            tenant_id: fx.tenant,
            shipment_id,
            base_rate: Money::from_dollars(2_000),
            miles: 500,
            accessorials: vec![],
            occurred_at: Utc::now(),
        });
        let dispatch = ShipmentCommand::DispatchShipment(DispatchShipment {
            tenant_id: fx.tenant,
            shipment_id,
            payee_id: driver,
            dispatcher_id: dispatcher_payee,
            occurred_at: Utc::now(),
        });
        for command in [&create, &dispatch] {
            fx.service
                .dispatcher
                .dispatch(fx.tenant, fx.actor, shipment_id.0, command, |id| {
                    Shipment::empty(ShipmentId::new(id))
                })
                .unwrap();
        }
        shipment_id
    }

    fn loaded(fx: &Fixture, shipment_id: ShipmentId) -> Shipment {
        let (shipment, _) = load_aggregate(&fx.store, fx.tenant, shipment_id.0, |id| {
            Shipment::empty(ShipmentId::new(id))
        })
        .unwrap();
        shipment
    }

    #[test]
    fn delivery_freezes_pay_from_the_profiles_on_file() {
        let fx = fixture();
        let driver = PayeeId::new();
        let dispatcher_payee = PayeeId::new();
        fx.profiles.upsert(
            fx.tenant,
            driver,
            PayProfile::new(
                PayType::Percentage { percent: 25 },
                DeductionPreferences::all(),
            )
            .unwrap(),
        );
        fx.profiles.upsert(
            fx.tenant,
            dispatcher_payee,
            PayProfile::new(
                PayType::Percentage { percent: 5 },
                DeductionPreferences::all(),
            )
            .unwrap(),
        );
        let shipment_id = dispatched_shipment(&fx, driver, Some(dispatcher_payee));

        fx.service
            .mark_delivered(fx.tenant, fx.actor, shipment_id, Utc::now())
            .unwrap();

        let shipment = loaded(&fx, shipment_id);
        let snapshot = shipment.payee_snapshot().unwrap();
        assert_eq!(snapshot.total_gross, Money::from_dollars(500));
        assert!(snapshot.warning.is_none());
        assert_eq!(shipment.dispatcher_commission(), Some(Money::from_dollars(100)));
    }

    #[test]
    fn missing_profile_delivers_at_zero_pay_flagged_for_repair() {
        let fx = fixture();
        let driver = PayeeId::new();
        let shipment_id = dispatched_shipment(&fx, driver, None);

        fx.service
            .mark_delivered(fx.tenant, fx.actor, shipment_id, Utc::now())
            .unwrap();

        let shipment = loaded(&fx, shipment_id);
        let snapshot = shipment.payee_snapshot().unwrap();
        assert_eq!(snapshot.total_gross, Money::ZERO);
        assert_eq!(snapshot.warning, Some(PayWarning::MissingPayProfile));
        assert!(shipment.is_settleable());
    }

    #[test]
    fn malformed_stored_profile_counts_as_missing() {
        let fx = fixture();
        let driver = PayeeId::new();
        // Hand-edited data can bypass construction-time validation.
        let bad: PayProfile = serde_json::from_value(serde_json::json!({
            "pay_type": { "percentage": { "percent": 150 } },
            "deductions": { "deductible": [] },
        }))
        .unwrap();
        fx.profiles.upsert(fx.tenant, driver, bad);
        let shipment_id = dispatched_shipment(&fx, driver, None);

        fx.service
            .mark_delivered(fx.tenant, fx.actor, shipment_id, Utc::now())
            .unwrap();

        let snapshot_gross = loaded(&fx, shipment_id)
            .payee_snapshot()
            .unwrap()
            .total_gross;
        assert_eq!(snapshot_gross, Money::ZERO);
    }
}

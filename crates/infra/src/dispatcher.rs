//! Command execution pipeline.
//!
//! One path for every mutation in the system:
//!
//! ```text
//! load stream → rehydrate → handle → append (optimistic) → audit → publish
//! ```
//!
//! The dispatcher owns the cross-cutting guarantees so domain code stays
//! pure: tenant isolation on load, optimistic concurrency on append, exactly
//! one audit entry per user action, publication only after commit.
//!
//! ## Retry Semantics
//!
//! Store-level `Concurrency` failures are transient (two writers raced) and
//! are retried here with backoff. Domain rejections are deterministic;
//! retrying would re-load the same state and fail the same way, so they
//! surface immediately. That includes `DomainError::Conflict`: "this
//! settlement is already paid" is a business answer, not a race.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use haulbooks_audit::{AuditLogEntry, AuditSnapshot, AuditedEvent};
use haulbooks_core::{
    ActorContext, Aggregate, AggregateId, DomainError, ExpectedVersion, TenantId,
};
use haulbooks_events::{Event, EventBus, EventEnvelope};

use crate::audit_log::{AuditLog, AuditLogError};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure. Transient; the dispatcher retries
    /// these itself up to its policy.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The aggregate said no. Deterministic, never retried.
    #[error("command rejected: {0}")]
    Rejected(DomainError),

    /// Historical payloads no longer deserialize into the aggregate's event
    /// type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    #[error("event store failure: {0}")]
    Store(EventStoreError),

    #[error(transparent)]
    Audit(#[from] AuditLogError),

    /// Publication failed after a successful append. The mutation is
    /// committed and audited; republishing is safe.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Rejected(value)
    }
}

/// Command execution engine for event-sourced aggregates.
///
/// Generic over the store, bus, and audit log so tests run fully in memory
/// and real backends can plug in behind the same traits. Services that
/// orchestrate multi-aggregate flows reuse its parts directly.
#[derive(Debug)]
pub struct CommandDispatcher<S, B, L> {
    pub(crate) store: S,
    pub(crate) bus: B,
    pub(crate) audit: L,
    pub(crate) retry: RetryPolicy,
}

impl<S, B, L> CommandDispatcher<S, B, L> {
    pub fn new(store: S, bus: B, audit: L) -> Self {
        Self {
            store,
            bus,
            audit,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(store: S, bus: B, audit: L, retry: RetryPolicy) -> Self {
        Self {
            store,
            bus,
            audit,
            retry,
        }
    }
}

impl<S, B, L> CommandDispatcher<S, B, L>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    L: AuditLog,
{
    /// Dispatch a command against one aggregate.
    ///
    /// `make_aggregate` builds the empty aggregate the stream is replayed
    /// into, e.g. `|id| Shipment::empty(ShipmentId(id))`. The aggregate type
    /// recorded on the stream and the audit trail comes from the aggregate's
    /// `AuditSnapshot::entity_type()`.
    ///
    /// Returns the committed events with their assigned sequence numbers; an
    /// empty `Ok` means the command decided nothing needed to happen.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        aggregate_id: AggregateId,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + AuditSnapshot,
        A::Event: haulbooks_events::Event + AuditedEvent + Serialize + DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_dispatch(tenant_id, actor, aggregate_id, command, &make_aggregate) {
                Err(DispatchError::Concurrency(_)) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        aggregate_type = A::entity_type(),
                        %aggregate_id,
                        attempt,
                        ?delay,
                        "write conflict, retrying"
                    );
                    std::thread::sleep(delay);
                }
                outcome => return outcome,
            }
        }
    }

    fn try_dispatch<A>(
        &self,
        tenant_id: TenantId,
        actor: ActorContext,
        aggregate_id: AggregateId,
        command: &A::Command,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError> + AuditSnapshot,
        A::Event: haulbooks_events::Event + AuditedEvent + Serialize + DeserializeOwned,
    {
        let (mut aggregate, stream_version) =
            load_aggregate(&self.store, tenant_id, aggregate_id, make_aggregate)?;
        let before = (stream_version > 0).then(|| aggregate.snapshot());

        let decided = aggregate.handle(command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let uncommitted =
            to_uncommitted(tenant_id, actor, aggregate_id, A::entity_type(), &decided)?;
        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(stream_version))?;

        for event in &decided {
            aggregate.apply(event);
        }

        // One audit entry per user action, however many events it produced.
        let action = decided[0].audit_action();
        let reason = decided.iter().find_map(|e| e.audit_reason()).map(str::to_string);
        let occurred_at = decided[decided.len() - 1].occurred_at();
        let entry = AuditLogEntry::new(
            tenant_id,
            actor.actor_id,
            A::entity_type(),
            aggregate_id,
            action,
            before,
            Some(aggregate.snapshot()),
            reason,
            occurred_at,
        );
        self.audit.append(entry)?;

        self.publish_all(&committed)?;

        Ok(committed)
    }

    /// Publish committed events to the bus, in order.
    pub(crate) fn publish_all(&self, committed: &[StoredEvent]) -> Result<(), DispatchError> {
        for stored in committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }
        Ok(())
    }
}

/// Load and rehydrate one aggregate, returning it with its stream version.
pub(crate) fn load_aggregate<S, A, F>(
    store: &S,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    make_aggregate: F,
) -> Result<(A, u64), DispatchError>
where
    S: EventStore,
    A: Aggregate,
    A::Event: DeserializeOwned,
    F: FnOnce(AggregateId) -> A,
{
    let history = store.load_stream(tenant_id, aggregate_id)?;
    validate_loaded_stream(tenant_id, aggregate_id, &history)?;
    let version = history.last().map(|e| e.sequence_number).unwrap_or(0);

    let mut aggregate = make_aggregate(aggregate_id);
    for stored in &history {
        let event: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&event);
    }

    Ok((aggregate, version))
}

/// Serialize decided events for the store, stamped with the acting user.
pub(crate) fn to_uncommitted<E>(
    tenant_id: TenantId,
    actor: ActorContext,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, DispatchError>
where
    E: haulbooks_events::Event + Serialize,
{
    events
        .iter()
        .map(|event| {
            UncommittedEvent::from_typed(
                tenant_id,
                actor.actor_id,
                aggregate_id,
                aggregate_type,
                Uuid::now_v7(),
                event,
            )
            .map_err(DispatchError::from)
        })
        .collect()
}

/// Hostile-backend checks on a loaded stream: right tenant, right aggregate,
/// contiguous 1-based sequence numbers.
fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("stream is not contiguous at sequence {}", e.sequence_number),
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

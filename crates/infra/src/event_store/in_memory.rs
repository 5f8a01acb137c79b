use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use haulbooks_core::{AggregateId, TenantId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Holds one write lock across the whole batch, so the validate-then-commit
/// phases below are atomic: a failed check on the third stream leaves the
/// first two untouched.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Every event in a stream's batch must target the same tenant,
    /// aggregate, and aggregate type as its first event.
    fn check_uniform(index: usize, events: &[UncommittedEvent]) -> Result<(), EventStoreError> {
        let first = &events[0];
        for (idx, e) in events.iter().enumerate() {
            if e.tenant_id != first.tenant_id {
                return Err(EventStoreError::TenantIsolation(format!(
                    "event {idx} of stream {index} has a different tenant_id"
                )));
            }
            if e.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event {idx} of stream {index} has a different aggregate_id"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "event {idx} of stream {index} has a different aggregate_type"
                )));
            }
        }
        Ok(())
    }
}

impl EventStore for InMemoryEventStore {
    fn append_batch(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batches: Vec<StreamAppend> =
            batches.into_iter().filter(|b| !b.events.is_empty()).collect();
        if batches.is_empty() {
            return Ok(vec![]);
        }

        let batch_tenant = batches[0].events[0].tenant_id;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("event store lock poisoned".to_string()))?;

        // Phase 1: validate every stream before touching any of them.
        let mut heads: Vec<(StreamKey, u64)> = Vec::with_capacity(batches.len());
        let mut seen: HashSet<StreamKey> = HashSet::with_capacity(batches.len());

        for (index, batch) in batches.iter().enumerate() {
            Self::check_uniform(index, &batch.events)?;

            let first = &batch.events[0];
            if first.tenant_id != batch_tenant {
                return Err(EventStoreError::TenantIsolation(
                    "a batch must not span tenants".to_string(),
                ));
            }

            let key = StreamKey {
                tenant_id: first.tenant_id,
                aggregate_id: first.aggregate_id,
            };
            if !seen.insert(key) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {index} appears twice in the batch"
                )));
            }

            let stream = streams.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {index}: expected {:?}, found {current}",
                    batch.expected_version
                )));
            }

            // Enforce aggregate type stability across the stream.
            if let Some(existing) = stream.first() {
                if existing.aggregate_type != first.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, first.aggregate_type
                    )));
                }
            }

            heads.push((key, current));
        }

        // Phase 2: commit. Nothing below can fail.
        let mut committed = Vec::new();
        for (batch, (key, current)) in batches.into_iter().zip(heads) {
            let stream = streams.entry(key).or_default();
            let mut next = current + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    tenant_id: e.tenant_id,
                    actor_id: e.actor_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("event store lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

//! Atomic document number minting.
//!
//! Numbers come from per-`(tenant, kind, year)` counters advanced with a
//! compare-and-swap loop: two racing mint calls can never share a value, but
//! a transaction that fails after minting leaves a gap. Gaps are fine;
//! duplicates are not.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::warn;

use haulbooks_core::{DomainError, TenantId};
use haulbooks_numbering::{CounterKey, CounterKind, DEFAULT_COUNTER_SEED, DocumentNumber};

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("could not mint a number after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("counter storage failure: {0}")]
    Store(String),

    #[error(transparent)]
    Number(#[from] DomainError),
}

/// Storage for document counters.
///
/// `compare_and_swap` must be atomic: it stores `next` only when the counter
/// still holds `current` (`None` meaning the counter does not exist yet) and
/// reports whether the swap happened.
pub trait CounterStore: Send + Sync {
    fn load(&self, key: CounterKey) -> Result<Option<u64>, SequenceError>;

    fn compare_and_swap(
        &self,
        key: CounterKey,
        current: Option<u64>,
        next: u64,
    ) -> Result<bool, SequenceError>;
}

impl<C> CounterStore for Arc<C>
where
    C: CounterStore + ?Sized,
{
    fn load(&self, key: CounterKey) -> Result<Option<u64>, SequenceError> {
        (**self).load(key)
    }

    fn compare_and_swap(
        &self,
        key: CounterKey,
        current: Option<u64>,
        next: u64,
    ) -> Result<bool, SequenceError> {
        (**self).compare_and_swap(key, current, next)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<CounterKey, u64>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn load(&self, key: CounterKey) -> Result<Option<u64>, SequenceError> {
        let counters = self
            .counters
            .lock()
            .map_err(|_| SequenceError::Store("counter lock poisoned".to_string()))?;
        Ok(counters.get(&key).copied())
    }

    fn compare_and_swap(
        &self,
        key: CounterKey,
        current: Option<u64>,
        next: u64,
    ) -> Result<bool, SequenceError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| SequenceError::Store("counter lock poisoned".to_string()))?;
        if counters.get(&key).copied() != current {
            return Ok(false);
        }
        counters.insert(key, next);
        Ok(true)
    }
}

/// Mints document numbers through a bounded CAS retry loop.
#[derive(Debug)]
pub struct SequenceGenerator<C> {
    store: C,
    policy: RetryPolicy,
}

impl<C> SequenceGenerator<C>
where
    C: CounterStore,
{
    pub fn new(store: C) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(store: C, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Mint the next number for a tenant's counter. Fresh counters start at
    /// the seed, so the first number is 1001.
    pub fn next_number(
        &self,
        tenant_id: TenantId,
        kind: CounterKind,
        year: i32,
    ) -> Result<DocumentNumber, SequenceError> {
        let key = CounterKey::new(tenant_id, kind, year);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let current = self.store.load(key)?;
            let next = current.unwrap_or(DEFAULT_COUNTER_SEED) + 1;

            if self.store.compare_and_swap(key, current, next)? {
                return Ok(DocumentNumber::new(kind, year, next)?);
            }

            if !self.policy.should_retry(attempt) {
                return Err(SequenceError::Exhausted { attempts: attempt });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(counter = ?key, attempt, ?delay, "counter swap lost a race, retrying");
            std::thread::sleep(delay);
        }
    }
}

//! Atomic document-number allocation.
//!
//! The original numbering scheme read the highest existing number for the
//! current month and incremented it, so two concurrent creations could read
//! the same "latest" value and collide at commit time. Here allocation is a
//! single atomic increment on a counter keyed by
//! `(organization, kind, period)` — concurrent callers always observe
//! distinct values and no duplicate identifier can be produced. Numbers are
//! strictly increasing per scope; a number allocated for a command that later
//! fails is simply skipped (uniqueness, not density, is the contract).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use clinicore_core::{DocumentKind, OrganizationId, SequenceScope};

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresSequenceStore;

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("sequence store failure: {0}")]
    Store(String),
}

/// Counter store yielding strictly increasing values per scope.
pub trait SequenceStore: Send + Sync {
    /// Atomically increment and return the next value for `scope`.
    ///
    /// The first allocation in a scope returns 1.
    fn next(&self, scope: &SequenceScope) -> Result<u64, SequenceError>;

    /// Read the current value without incrementing (0 if never allocated).
    fn current(&self, scope: &SequenceScope) -> Result<u64, SequenceError>;
}

impl<S> SequenceStore for std::sync::Arc<S>
where
    S: SequenceStore + ?Sized,
{
    fn next(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        (**self).next(scope)
    }

    fn current(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        (**self).current(scope)
    }
}

/// In-memory sequence store (dev/test): a mutex-guarded counter map.
#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    counters: Mutex<HashMap<SequenceScope, u64>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceStore for InMemorySequenceStore {
    fn next(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| SequenceError::Store("lock poisoned".to_string()))?;
        let value = counters.entry(scope.clone()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn current(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let counters = self
            .counters
            .lock()
            .map_err(|_| SequenceError::Store("lock poisoned".to_string()))?;
        Ok(counters.get(scope).copied().unwrap_or(0))
    }
}

/// Allocates formatted document numbers from a [`SequenceStore`].
///
/// The only inputs are the issuing organization, the document kind, and the
/// issue time; scoping and formatting live in `clinicore_core::numbering`.
#[derive(Debug)]
pub struct NumberAllocator<S> {
    sequences: S,
}

impl<S> NumberAllocator<S>
where
    S: SequenceStore,
{
    pub fn new(sequences: S) -> Self {
        Self { sequences }
    }

    /// Allocate the next document number for `kind` issued at `at`.
    pub fn allocate(
        &self,
        organization_id: OrganizationId,
        kind: DocumentKind,
        at: DateTime<Utc>,
    ) -> Result<String, SequenceError> {
        let scope = SequenceScope::for_document(organization_id, kind, at);
        let seq = self.sequences.next(&scope)?;
        Ok(scope.render(seq))
    }
}

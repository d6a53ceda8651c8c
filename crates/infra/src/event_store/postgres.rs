//! Postgres-backed event store implementation.
//!
//! Persists streams in an `events` table with organization isolation and
//! optimistic concurrency enforced at the database level:
//!
//! ```sql
//! CREATE TABLE events (
//!     event_id        UUID PRIMARY KEY,
//!     organization_id UUID NOT NULL,
//!     aggregate_id    UUID NOT NULL,
//!     aggregate_type  TEXT NOT NULL,
//!     sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
//!     event_type      TEXT NOT NULL,
//!     event_version   INT NOT NULL,
//!     occurred_at     TIMESTAMPTZ NOT NULL,
//!     payload         JSONB NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     UNIQUE (organization_id, aggregate_id, sequence_number)
//! );
//! ```
//!
//! The append transaction reads the current stream version, validates the
//! caller's `ExpectedVersion`, and inserts the batch. If another transaction
//! commits in between, the unique constraint on `(organization_id,
//! aggregate_id, sequence_number)` fails the insert with `23505`, which maps
//! to `EventStoreError::Concurrency` — a retryable conflict for the caller.

use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;

use clinicore_core::{AggregateId, ExpectedVersion, OrganizationId};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// Every query carries `organization_id` in its WHERE clause; cross-tenant
/// reads are unrepresentable at this layer.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Load all events for an organization + aggregate stream.
    #[instrument(
        skip(self),
        fields(
            organization_id = %organization_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid()
        ),
        err
    )]
    pub async fn load_stream_async(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                organization_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE organization_id = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            stored.push(row_to_stored_event(&row)?);
        }
        Ok(stored)
    }

    /// Append a batch of events with an optimistic concurrency check.
    #[instrument(
        skip(self, events),
        fields(
            organization_id = %organization_id.as_uuid(),
            aggregate_id = %aggregate_id.as_uuid(),
            batch_len = events.len()
        ),
        err
    )]
    pub async fn append_async(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        for (idx, e) in events.iter().enumerate() {
            if e.organization_id != organization_id {
                return Err(EventStoreError::OrganizationIsolation(format!(
                    "batch contains multiple organization_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append.begin", e))?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) AS current_version
            FROM events
            WHERE organization_id = $1 AND aggregate_id = $2
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append.version", e))?;

        let current: i64 = row
            .try_get("current_version")
            .map_err(|e| map_sqlx_error("append.version", e))?;
        let current = current as u64;

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, organization_id, aggregate_id, aggregate_type,
                    sequence_number, event_type, event_version, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(e.event_id)
            .bind(e.organization_id.as_uuid())
            .bind(e.aggregate_id.as_uuid())
            .bind(&e.aggregate_type)
            .bind(next as i64)
            .bind(&e.event_type)
            .bind(e.event_version as i32)
            .bind(e.occurred_at)
            .bind(&e.payload)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_sqlx_error("append.insert", err))?;

            committed.push(StoredEvent {
                event_id: e.event_id,
                organization_id: e.organization_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            });
            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append.commit", e))?;

        Ok(committed)
    }
}

fn row_to_stored_event(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |what: &str, e: sqlx::Error| map_sqlx_error(what, e);

    let sequence_number: i64 = row
        .try_get("sequence_number")
        .map_err(|e| read("row.sequence_number", e))?;
    let event_version: i32 = row
        .try_get("event_version")
        .map_err(|e| read("row.event_version", e))?;
    let organization_id: uuid::Uuid = row
        .try_get("organization_id")
        .map_err(|e| read("row.organization_id", e))?;
    let aggregate_id: uuid::Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| read("row.aggregate_id", e))?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(|e| read("row.event_id", e))?,
        organization_id: OrganizationId::from_uuid(organization_id),
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type: row
            .try_get("aggregate_type")
            .map_err(|e| read("row.aggregate_type", e))?,
        sequence_number: sequence_number as u64,
        event_type: row
            .try_get("event_type")
            .map_err(|e| read("row.event_type", e))?,
        event_version: event_version as u32,
        occurred_at: row
            .try_get("occurred_at")
            .map_err(|e| read("row.occurred_at", e))?,
        payload: row.try_get("payload").map_err(|e| read("row.payload", e))?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    if let sqlx::Error::Database(db) = &err {
        // 23505 = unique_violation: a concurrent writer won the append race.
        if db.code().as_deref() == Some("23505") {
            return EventStoreError::Concurrency(format!(
                "{operation}: concurrent append detected: {db}"
            ));
        }
    }
    EventStoreError::InvalidAppend(format!("{operation}: {err}"))
}

impl EventStore for PostgresEventStore {
    // The EventStore trait is synchronous, but Postgres operations require
    // async. tokio::runtime::Handle bridges the two when called from within
    // a runtime (e.g. from axum handlers).
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::InvalidAppend(
                "PostgresEventStore requires a tokio runtime context".to_string(),
            )
        })?;

        if events.is_empty() {
            return Ok(vec![]);
        }

        let organization_id = events[0].organization_id;
        let aggregate_id = events[0].aggregate_id;

        handle.block_on(self.append_async(organization_id, aggregate_id, events, expected_version))
    }

    fn load_stream(
        &self,
        organization_id: OrganizationId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            EventStoreError::InvalidAppend(
                "PostgresEventStore requires a tokio runtime context".to_string(),
            )
        })?;

        handle.block_on(self.load_stream_async(organization_id, aggregate_id))
    }
}

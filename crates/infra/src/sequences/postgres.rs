//! Postgres-backed sequence store.
//!
//! Backing table (periodless kinds store year/month as 0):
//!
//! ```sql
//! CREATE TABLE document_sequences (
//!     organization_id UUID NOT NULL,
//!     kind            TEXT NOT NULL,
//!     period_year     INT NOT NULL,
//!     period_month    INT NOT NULL,
//!     value           BIGINT NOT NULL,
//!     PRIMARY KEY (organization_id, kind, period_year, period_month)
//! );
//! ```
//!
//! `next()` is one atomic upsert, so concurrent allocators always receive
//! distinct values — the database serializes the increment, there is no
//! read-then-write window.

use sqlx::{PgPool, Row};
use std::sync::Arc;

use clinicore_core::SequenceScope;

use super::{SequenceError, SequenceStore};

#[derive(Debug, Clone)]
pub struct PostgresSequenceStore {
    pool: Arc<PgPool>,
}

impl PostgresSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn next_async(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let (year, month) = period_columns(scope);
        let row = sqlx::query(
            r#"
            INSERT INTO document_sequences (organization_id, kind, period_year, period_month, value)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (organization_id, kind, period_year, period_month)
            DO UPDATE SET value = document_sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(scope.organization_id.as_uuid())
        .bind(scope.kind.prefix())
        .bind(year)
        .bind(month)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| SequenceError::Store(format!("next: {e}")))?;

        let value: i64 = row
            .try_get("value")
            .map_err(|e| SequenceError::Store(format!("next.value: {e}")))?;
        Ok(value as u64)
    }

    pub async fn current_async(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let (year, month) = period_columns(scope);
        let row = sqlx::query(
            r#"
            SELECT value FROM document_sequences
            WHERE organization_id = $1 AND kind = $2 AND period_year = $3 AND period_month = $4
            "#,
        )
        .bind(scope.organization_id.as_uuid())
        .bind(scope.kind.prefix())
        .bind(year)
        .bind(month)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| SequenceError::Store(format!("current: {e}")))?;

        match row {
            Some(row) => {
                let value: i64 = row
                    .try_get("value")
                    .map_err(|e| SequenceError::Store(format!("current.value: {e}")))?;
                Ok(value as u64)
            }
            None => Ok(0),
        }
    }
}

fn period_columns(scope: &SequenceScope) -> (i32, i32) {
    match scope.period {
        Some(period) => (period.year, period.month as i32),
        None => (0, 0),
    }
}

impl SequenceStore for PostgresSequenceStore {
    fn next(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| SequenceError::Store("requires a tokio runtime context".to_string()))?;
        handle.block_on(self.next_async(scope))
    }

    fn current(&self, scope: &SequenceScope) -> Result<u64, SequenceError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| SequenceError::Store("requires a tokio runtime context".to_string()))?;
        handle.block_on(self.current_async(scope))
    }
}

//! Database operations for the pump
//!
//! Claiming is one statement: mark-as-processed over a SKIP LOCKED
//! sub-select, so concurrent pump instances take disjoint batches without
//! coordination. Incrementing `retries` inside the claim bounds republish
//! storms when the broker is down.

use chrono::{Duration, Utc};
use outreach_core::error::PipelineError;
use sqlx::PgPool;
use uuid::Uuid;

/// An outbox row claimed for publishing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedIntent {
    pub id: Uuid,
    pub topic: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    #[sqlx(rename = "idemKey")]
    pub idem_key: String,
    pub retries: i32,
}

#[derive(Debug, Clone)]
pub struct PumpDb {
    pool: PgPool,
}

impl PumpDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claim up to `claim_size` unprocessed rows, oldest first.
    pub async fn claim_batch(&self, claim_size: i64) -> Result<Vec<ClaimedIntent>, PipelineError> {
        let rows = sqlx::query_as::<_, ClaimedIntent>(
            r#"
            UPDATE "Outbox"
            SET processed = TRUE, "processedAt" = NOW(), retries = retries + 1
            WHERE id IN (
                SELECT id FROM "Outbox"
                WHERE processed = FALSE AND retries < "maxRetries"
                ORDER BY "createdAt"
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, topic, payload, "idemKey", retries
            "#,
        )
        .bind(claim_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Put a claimed row back after a failed publish so a later poll can
    /// retry it (bounded by `maxRetries`).
    pub async fn revert(&self, id: Uuid) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE "Outbox"
            SET processed = FALSE, "processedAt" = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete processed rows older than the retention window.
    pub async fn cleanup_processed(&self, retention_days: i64) -> Result<u64, PipelineError> {
        let cutoff = Utc::now() - Duration::days(retention_days);

        let result = sqlx::query(
            r#"
            DELETE FROM "Outbox"
            WHERE processed = TRUE AND "processedAt" < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

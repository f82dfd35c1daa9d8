//! Database operations for the scheduler
//!
//! The eligibility scan and the per-lead enqueue transaction. The enqueue
//! returns a sentinel rather than throwing for its expected non-success
//! outcomes, so the transaction boundary stays explicit.

use outreach_core::error::{PipelineError, is_unique_violation};
use outreach_core::idem_key;
use outreach_core::models::{PendingLead, SEQUENCE_TOPIC};
use sqlx::PgPool;
use uuid::Uuid;

/// Result of one per-lead enqueue transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Outbox row inserted, state flipped to RUNNING.
    Enqueued,
    /// An outbox row with this idemKey already exists; an earlier intent is
    /// still in flight or unprocessed. Expected, not an error.
    Duplicate,
    /// The state row advanced or went terminal between scan and enqueue;
    /// nothing was committed.
    Raced,
}

#[derive(Debug, Clone)]
pub struct SchedulerDb {
    pool: PgPool,
}

impl SchedulerDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Leads whose next step is due.
    ///
    /// Joins each active state to the step after its cursor and filters by
    /// the step cooldown and the in-flight freshness guard. The guard is
    /// what lets the scheduler tolerate an unfinished send without a
    /// cross-process lock.
    pub async fn find_due_leads(
        &self,
        batch_size: i64,
        inflight_guard_mins: i64,
    ) -> Result<Vec<PendingLead>, PipelineError> {
        let rows = sqlx::query_as::<_, PendingLead>(
            r#"
            SELECT
                s.id              AS lead_state_id,
                s."leadId"        AS lead_id,
                s."sequenceId"    AS sequence_id,
                s."currentStep"   AS current_step,
                st.id             AS step_id,
                st."stepNumber"   AS step_number,
                st."minIntervalMin" AS min_interval_min
            FROM "LeadSequenceState" s
            JOIN "SequenceStep" st
              ON st."sequenceId" = s."sequenceId"
             AND st."stepNumber" = s."currentStep" + 1
            WHERE s.status IN ('PENDING', 'RUNNING')
              AND (
                s."lastSentAt" IS NULL
                OR s."lastSentAt" < NOW() - make_interval(mins => st."minIntervalMin")
              )
              AND s."updatedAt" < NOW() - make_interval(mins => $2::int)
            ORDER BY s."updatedAt"
            LIMIT $1
            "#,
        )
        .bind(batch_size)
        .bind(inflight_guard_mins)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Enqueue one due lead: insert the outbox row and flip the state to
    /// RUNNING in a single transaction.
    pub async fn enqueue_lead(&self, lead: &PendingLead) -> Result<EnqueueOutcome, PipelineError> {
        let key = idem_key(&lead.sequence_id, &lead.lead_id, lead.current_step + 1, 0, "");

        let mut tx = self.pool.begin().await?;

        let existing: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM "Outbox" WHERE "idemKey" = $1"#)
                .bind(&key)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let insert = sqlx::query(
            r#"
            INSERT INTO "Outbox" (id, topic, payload, "idemKey")
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(SEQUENCE_TOPIC)
        .bind(sqlx::types::Json(lead))
        .bind(&key)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            // Another scheduler instance won the race between the count
            // check and the insert. Same meaning as the count path.
            if is_unique_violation(&e) {
                return Ok(EnqueueOutcome::Duplicate);
            }
            return Err(e.into());
        }

        let updated = sqlx::query(
            r#"
            UPDATE "LeadSequenceState"
            SET status = 'RUNNING', "updatedAt" = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'RUNNING')
            "#,
        )
        .bind(lead.lead_state_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            // A worker advanced this row past us; dropping the transaction
            // rolls the outbox insert back.
            return Ok(EnqueueOutcome::Raced);
        }

        tx.commit().await?;
        Ok(EnqueueOutcome::Enqueued)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use outreach_core::models::OutboxRow;

    #[sqlx::test(migrations = "../../migrations")]
    async fn finds_pending_lead_with_due_step(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, step_ids) = seed_sequence(&pool, &[(1, 0), (2, 60)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;
        let state_id =
            seed_state(&pool, lead_id, sequence_id, 0, "PENDING", None, 120).await?;

        let db = SchedulerDb::new(pool);
        let due = db.find_due_leads(50, 60).await.expect("scan");

        assert_eq!(due.len(), 1);
        let lead = &due[0];
        assert_eq!(lead.lead_state_id, state_id);
        assert_eq!(lead.lead_id, lead_id);
        assert_eq!(lead.sequence_id, sequence_id);
        assert_eq!(lead.current_step, 0);
        assert_eq!(lead.step_id, step_ids[0]);
        assert_eq!(lead.step_number, 1);
        assert_eq!(lead.min_interval_min, 0);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn respects_step_cooldown(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0), (2, 30)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;

        // Step 2 wants 30 minutes since the last send; only 10 elapsed.
        seed_state(&pool, lead_id, sequence_id, 1, "RUNNING", Some(10), 120).await?;

        let db = SchedulerDb::new(pool.clone());
        assert!(db.find_due_leads(50, 60).await.expect("scan").is_empty());

        sqlx::query(
            r#"UPDATE "LeadSequenceState" SET "lastSentAt" = NOW() - make_interval(mins => 31)"#,
        )
        .execute(&pool)
        .await?;

        let due = db.find_due_leads(50, 60).await.expect("scan");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].step_number, 2);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn inflight_guard_skips_recently_touched_states(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;
        seed_state(&pool, lead_id, sequence_id, 0, "RUNNING", None, 10).await?;

        let db = SchedulerDb::new(pool);
        assert!(db.find_due_leads(50, 60).await.expect("scan").is_empty());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn terminal_and_exhausted_states_are_ignored(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0), (2, 0)]).await?;

        let completed = seed_lead(&pool, "done@acme.example").await?;
        seed_state(&pool, completed, sequence_id, 2, "COMPLETED", Some(600), 120).await?;

        let paused = seed_lead(&pool, "paused@acme.example").await?;
        seed_state(&pool, paused, sequence_id, 1, "PAUSED", Some(600), 120).await?;

        // RUNNING but already past the last step: the join finds no step 3.
        let exhausted = seed_lead(&pool, "exhausted@acme.example").await?;
        seed_state(&pool, exhausted, sequence_id, 2, "RUNNING", Some(600), 120).await?;

        let db = SchedulerDb::new(pool);
        assert!(db.find_due_leads(50, 60).await.expect("scan").is_empty());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn batch_size_caps_the_scan(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0)]).await?;
        for i in 0..3 {
            let lead_id = seed_lead(&pool, &format!("lead{i}@acme.example")).await?;
            seed_state(&pool, lead_id, sequence_id, 0, "PENDING", None, 120).await?;
        }

        let db = SchedulerDb::new(pool);
        assert_eq!(db.find_due_leads(2, 60).await.expect("scan").len(), 2);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn enqueue_inserts_outbox_row_and_flips_state(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;
        seed_state(&pool, lead_id, sequence_id, 0, "PENDING", None, 120).await?;

        let db = SchedulerDb::new(pool.clone());
        let due = db.find_due_leads(50, 60).await.expect("scan");
        let outcome = db.enqueue_lead(&due[0]).await.expect("enqueue");
        assert_eq!(outcome, EnqueueOutcome::Enqueued);

        let row = sqlx::query_as::<_, OutboxRow>(r#"SELECT * FROM "Outbox""#)
            .fetch_one(&pool)
            .await?;
        assert_eq!(row.topic, SEQUENCE_TOPIC);
        assert!(!row.processed);
        assert_eq!(row.retries, 0);
        assert_eq!(
            row.idem_key,
            idem_key(&sequence_id, &lead_id, 1, 0, "")
        );

        let payload: PendingLead =
            serde_json::from_value(row.payload).expect("payload decodes");
        assert_eq!(payload.lead_id, lead_id);
        assert_eq!(payload.step_number, 1);

        let status: String =
            sqlx::query_scalar(r#"SELECT status::text FROM "LeadSequenceState" WHERE id = $1"#)
                .bind(due[0].lead_state_id)
                .fetch_one(&pool)
                .await?;
        assert_eq!(status, "RUNNING");
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn enqueue_is_idempotent_per_step(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;
        seed_state(&pool, lead_id, sequence_id, 0, "PENDING", None, 120).await?;

        let db = SchedulerDb::new(pool.clone());
        let due = db.find_due_leads(50, 60).await.expect("scan");

        assert_eq!(db.enqueue_lead(&due[0]).await.expect("first"), EnqueueOutcome::Enqueued);
        assert_eq!(db.enqueue_lead(&due[0]).await.expect("second"), EnqueueOutcome::Duplicate);

        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "Outbox""#)
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn enqueue_rolls_back_when_state_went_terminal(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;
        let state_id = seed_state(&pool, lead_id, sequence_id, 0, "PENDING", None, 120).await?;

        let db = SchedulerDb::new(pool.clone());
        let due = db.find_due_leads(50, 60).await.expect("scan");

        // A concurrent actor pauses the lead between scan and enqueue.
        sqlx::query(r#"UPDATE "LeadSequenceState" SET status = 'PAUSED' WHERE id = $1"#)
            .bind(state_id)
            .execute(&pool)
            .await?;

        assert_eq!(db.enqueue_lead(&due[0]).await.expect("enqueue"), EnqueueOutcome::Raced);

        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "Outbox""#)
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn rescan_after_enqueue_finds_nothing(pool: PgPool) -> sqlx::Result<()> {
        let (sequence_id, _) = seed_sequence(&pool, &[(1, 0)]).await?;
        let lead_id = seed_lead(&pool, "jane@acme.example").await?;
        seed_state(&pool, lead_id, sequence_id, 0, "PENDING", None, 120).await?;

        let db = SchedulerDb::new(pool);
        let due = db.find_due_leads(50, 60).await.expect("scan");
        db.enqueue_lead(&due[0]).await.expect("enqueue");

        // The enqueue refreshed updatedAt, so the guard hides the lead.
        assert!(db.find_due_leads(50, 60).await.expect("rescan").is_empty());
        Ok(())
    }
}

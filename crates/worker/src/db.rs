//! Database operations for the worker
//!
//! Context loading for one pending send, and the conditional state
//! advancement that makes redeliveries harmless at the state machine.

use outreach_core::error::PipelineError;
use outreach_core::models::{EmailTemplate, Lead, SequenceStatus, SequenceStep};
use sqlx::PgPool;
use uuid::Uuid;

/// Row returned by the advancement update.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdvanceResult {
    pub id: Uuid,
    pub status: SequenceStatus,
    pub current_step: i32,
}

#[derive(Debug, Clone)]
pub struct WorkerDb {
    pool: PgPool,
}

impl WorkerDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load_lead(&self, lead_id: Uuid) -> Result<Option<Lead>, PipelineError> {
        let lead = sqlx::query_as::<_, Lead>(r#"SELECT * FROM "Lead" WHERE id = $1"#)
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lead)
    }

    pub async fn load_enrichment(
        &self,
        lead_id: Uuid,
    ) -> Result<Option<serde_json::Value>, PipelineError> {
        let data = sqlx::query_scalar(r#"SELECT data FROM "LeadEnrichment" WHERE "leadId" = $1"#)
            .bind(lead_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(data)
    }

    pub async fn load_step(&self, step_id: Uuid) -> Result<Option<SequenceStep>, PipelineError> {
        let step = sqlx::query_as::<_, SequenceStep>(
            r#"SELECT * FROM "SequenceStep" WHERE id = $1"#,
        )
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(step)
    }

    /// Templates attached to a step, resolved down to subject/body copy.
    pub async fn load_templates(
        &self,
        step_id: Uuid,
    ) -> Result<Vec<EmailTemplate>, PipelineError> {
        let templates = sqlx::query_as::<_, EmailTemplate>(
            r#"
            SELECT t.id, e.subject, e.body
            FROM "_SequenceStepToSequenceTemplate" j
            JOIN "SequenceTemplate" t ON t.id = j."B"
            JOIN "EmailCampaignTemplate" e ON e.id = t."emailCampaignTemplateId"
            WHERE j."A" = $1
            "#,
        )
        .bind(step_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(templates)
    }

    /// Advance the cursor by one step after a successful send.
    ///
    /// The status guard makes the operation idempotent: a redelivered
    /// message finds the cursor already moved and updates zero rows, which
    /// callers treat as success. COMPLETED is reached exactly when the new
    /// cursor hits the sequence's last step.
    pub async fn advance_state(
        &self,
        lead_state_id: Uuid,
        sequence_id: Uuid,
        expected_current_step: i32,
    ) -> Result<Option<AdvanceResult>, PipelineError> {
        let result = sqlx::query_as::<_, AdvanceResult>(
            r#"
            UPDATE "LeadSequenceState" SET
                "currentStep" = "currentStep" + 1,
                status = CASE
                    WHEN "currentStep" + 1 >= (
                        SELECT MAX("stepNumber") FROM "SequenceStep" WHERE "sequenceId" = $2
                    ) THEN 'COMPLETED'::sequence_status
                    ELSE 'RUNNING'::sequence_status
                END,
                "lastSentAt" = NOW(),
                "failureCount" = 0,
                "updatedAt" = NOW()
            WHERE id = $1
              AND status IN ('PENDING', 'RUNNING')
              AND "currentStep" = $3
            RETURNING id, status, "currentStep" AS current_step
            "#,
        )
        .bind(lead_state_id)
        .bind(sequence_id)
        .bind(expected_current_step)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[sqlx::test(migrations = "../../migrations")]
    async fn loads_lead_and_templates(pool: PgPool) -> sqlx::Result<()> {
        let fixture = seed_pipeline(&pool, &[(1, 0)], 0, "RUNNING").await?;

        let db = WorkerDb::new(pool);
        let lead = db
            .load_lead(fixture.lead_id)
            .await
            .expect("load")
            .expect("lead exists");
        assert_eq!(lead.email, "jane@acme.example");
        assert!(lead.is_subscribed_to_email);

        let templates = db
            .load_templates(fixture.step_ids[0])
            .await
            .expect("templates");
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].id, fixture.template_ids[0]);
        assert!(templates[0].subject.starts_with("Step 1"));

        assert!(db.load_lead(Uuid::new_v4()).await.expect("load").is_none());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn enrichment_is_optional(pool: PgPool) -> sqlx::Result<()> {
        let fixture = seed_pipeline(&pool, &[(1, 0)], 0, "RUNNING").await?;

        let db = WorkerDb::new(pool.clone());
        assert!(db
            .load_enrichment(fixture.lead_id)
            .await
            .expect("load")
            .is_none());

        sqlx::query(r#"INSERT INTO "LeadEnrichment" ("leadId", data) VALUES ($1, $2)"#)
            .bind(fixture.lead_id)
            .bind(serde_json::json!({ "fundingStage": "Series B" }))
            .execute(&pool)
            .await?;

        let data = db
            .load_enrichment(fixture.lead_id)
            .await
            .expect("load")
            .expect("data exists");
        assert_eq!(data["fundingStage"], "Series B");
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn advance_moves_cursor_and_stamps_send(pool: PgPool) -> sqlx::Result<()> {
        let fixture = seed_pipeline(&pool, &[(1, 0), (2, 0), (3, 0)], 0, "RUNNING").await?;

        let db = WorkerDb::new(pool.clone());
        let advanced = db
            .advance_state(fixture.state_id, fixture.sequence_id, 0)
            .await
            .expect("advance")
            .expect("row updated");

        assert_eq!(advanced.current_step, 1);
        assert_eq!(advanced.status, SequenceStatus::Running);

        let (last_sent_set, failure_count): (bool, i32) = sqlx::query_as(
            r#"SELECT "lastSentAt" IS NOT NULL, "failureCount" FROM "LeadSequenceState" WHERE id = $1"#,
        )
        .bind(fixture.state_id)
        .fetch_one(&pool)
        .await?;
        assert!(last_sent_set);
        assert_eq!(failure_count, 0);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn advancing_the_final_step_completes_the_sequence(pool: PgPool) -> sqlx::Result<()> {
        let fixture = seed_pipeline(&pool, &[(1, 0), (2, 0), (3, 0)], 2, "RUNNING").await?;

        let db = WorkerDb::new(pool);
        let advanced = db
            .advance_state(fixture.state_id, fixture.sequence_id, 2)
            .await
            .expect("advance")
            .expect("row updated");

        assert_eq!(advanced.current_step, 3);
        assert_eq!(advanced.status, SequenceStatus::Completed);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn redelivered_advancement_updates_nothing(pool: PgPool) -> sqlx::Result<()> {
        let fixture = seed_pipeline(&pool, &[(1, 0), (2, 0)], 0, "RUNNING").await?;

        let db = WorkerDb::new(pool);
        let first = db
            .advance_state(fixture.state_id, fixture.sequence_id, 0)
            .await
            .expect("advance");
        assert!(first.is_some());

        // Same message delivered again: the cursor no longer matches.
        let second = db
            .advance_state(fixture.state_id, fixture.sequence_id, 0)
            .await
            .expect("advance");
        assert!(second.is_none());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn terminal_states_are_never_advanced(pool: PgPool) -> sqlx::Result<()> {
        let fixture = seed_pipeline(&pool, &[(1, 0)], 1, "COMPLETED").await?;

        let db = WorkerDb::new(pool);
        let advanced = db
            .advance_state(fixture.state_id, fixture.sequence_id, 1)
            .await
            .expect("advance");
        assert!(advanced.is_none());
        Ok(())
    }
}

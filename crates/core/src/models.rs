//! Domain models for the sequence pipeline
//!
//! These map to the persisted catalog (leads, sequences, steps, templates),
//! the per-lead sequence cursor, and the transactional outbox. Column names
//! keep the upstream camelCase identifiers, so every mapped field carries an
//! explicit rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Queue name shared by scheduler, pump and worker.
pub const SEQUENCE_TOPIC: &str = "lead.sequence.pending";

/// Lead profile, read-only for this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub email: String,
    #[sqlx(rename = "firstName")]
    pub first_name: Option<String>,
    #[sqlx(rename = "lastName")]
    pub last_name: Option<String>,
    #[sqlx(rename = "jobTitle")]
    pub job_title: Option<String>,
    #[sqlx(rename = "companyName")]
    pub company_name: Option<String>,
    pub industry: Option<String>,
    #[sqlx(rename = "companySize")]
    pub company_size: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
    #[sqlx(rename = "linkedinUrl")]
    pub linkedin_url: Option<String>,
    pub source: Option<String>,
    #[sqlx(rename = "isSubscribedToEmail")]
    pub is_subscribed_to_email: bool,
    #[sqlx(rename = "isEmailValid")]
    pub is_email_valid: EmailValidity,
}

/// Verdict of upstream email verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "email_validity", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EmailValidity {
    Valid,
    Invalid,
    Unknown,
}

/// One step of a sequence. `step_number` is 1-based and dense.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SequenceStep {
    pub id: Uuid,
    #[sqlx(rename = "sequenceId")]
    pub sequence_id: Uuid,
    #[sqlx(rename = "stepNumber")]
    pub step_number: i32,
    #[sqlx(rename = "minIntervalMin")]
    pub min_interval_min: i32,
    #[sqlx(rename = "timeWindows")]
    pub time_windows: Option<serde_json::Value>,
    #[sqlx(rename = "requireNoReply")]
    pub require_no_reply: bool,
    #[sqlx(rename = "stopOnBounce")]
    pub stop_on_bounce: bool,
}

/// Subject/body pair resolved for a step, joined through the step-template
/// link table down to the campaign template that holds the actual copy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
}

/// Per-lead cursor through a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeadSequenceState {
    pub id: Uuid,
    #[sqlx(rename = "leadId")]
    pub lead_id: Uuid,
    #[sqlx(rename = "sequenceId")]
    pub sequence_id: Uuid,
    #[sqlx(rename = "currentStep")]
    pub current_step: i32,
    pub status: SequenceStatus,
    #[sqlx(rename = "lastSentAt")]
    pub last_sent_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "failureCount")]
    pub failure_count: i32,
    #[sqlx(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle of a lead within a sequence.
///
/// PENDING and RUNNING are the only states this pipeline advances from;
/// COMPLETED, FAILED and PAUSED are sinks (the latter two are reserved for
/// external bounce/reply ingestion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sequence_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SequenceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl SequenceStatus {
    /// Terminal states are never advanced by the worker.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SequenceStatus::Completed | SequenceStatus::Failed | SequenceStatus::Paused
        )
    }
}

/// Durable hand-off row between scheduler and broker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub topic: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    #[sqlx(rename = "idemKey")]
    pub idem_key: String,
    pub processed: bool,
    #[sqlx(rename = "processedAt")]
    pub processed_at: Option<DateTime<Utc>>,
    pub retries: i32,
    #[sqlx(rename = "maxRetries")]
    pub max_retries: i32,
    #[sqlx(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// The broker message body: one due lead joined to its next step.
///
/// The scheduler serializes this row into `"Outbox"."payload"`, the pump
/// ships it verbatim, and the worker decodes and validates it. Ids travel
/// as their canonical string form and are treated as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingLead {
    pub lead_state_id: Uuid,
    pub lead_id: Uuid,
    pub sequence_id: Uuid,
    pub current_step: i32,
    pub step_id: Uuid,
    pub step_number: i32,
    pub min_interval_min: i32,
}

impl PendingLead {
    /// Schema validation beyond what serde enforces structurally.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.current_step < 0 {
            return Err(PipelineError::InvalidPayload(format!(
                "current_step must be >= 0, got {}",
                self.current_step
            )));
        }
        if self.step_number < 1 {
            return Err(PipelineError::InvalidPayload(format!(
                "step_number must be >= 1, got {}",
                self.step_number
            )));
        }
        if self.min_interval_min < 0 {
            return Err(PipelineError::InvalidPayload(format!(
                "min_interval_min must be >= 0, got {}",
                self.min_interval_min
            )));
        }
        Ok(())
    }
}

/// Fully rendered email handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailData {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub lead_id: Uuid,
    pub sequence_id: Uuid,
    pub step_id: Uuid,
    pub template_id: Uuid,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

/// Provider acknowledgement of a delivered message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending_lead() -> PendingLead {
        PendingLead {
            lead_state_id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            sequence_id: Uuid::new_v4(),
            current_step: 0,
            step_id: Uuid::new_v4(),
            step_number: 1,
            min_interval_min: 0,
        }
    }

    #[test]
    fn pending_lead_round_trips_through_json() {
        let lead = pending_lead();
        let value = serde_json::to_value(&lead).expect("serialize");
        let back: PendingLead = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back.lead_state_id, lead.lead_state_id);
        assert_eq!(back.step_number, lead.step_number);
    }

    #[test]
    fn pending_lead_ids_serialize_as_strings() {
        let lead = pending_lead();
        let value = serde_json::to_value(&lead).expect("serialize");
        assert!(value["lead_state_id"].is_string());
        assert!(value["lead_id"].is_string());
        assert!(value["sequence_id"].is_string());
    }

    #[test]
    fn validate_rejects_out_of_range_fields() {
        let mut lead = pending_lead();
        lead.step_number = 0;
        assert!(lead.validate().is_err());

        let mut lead = pending_lead();
        lead.current_step = -1;
        assert!(lead.validate().is_err());

        let mut lead = pending_lead();
        lead.min_interval_min = -5;
        assert!(lead.validate().is_err());

        assert!(pending_lead().validate().is_ok());
    }

    #[test]
    fn malformed_payload_fails_to_decode() {
        let result: Result<PendingLead, _> = serde_json::from_value(json!({
            "lead_state_id": "not-a-uuid",
            "lead_id": Uuid::new_v4(),
        }));
        assert!(result.is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!SequenceStatus::Pending.is_terminal());
        assert!(!SequenceStatus::Running.is_terminal());
        assert!(SequenceStatus::Completed.is_terminal());
        assert!(SequenceStatus::Failed.is_terminal());
        assert!(SequenceStatus::Paused.is_terminal());
    }

    #[test]
    fn email_validity_uses_uppercase_wire_form() {
        assert_eq!(
            serde_json::to_value(EmailValidity::Invalid).expect("serialize"),
            json!("INVALID")
        );
    }
}

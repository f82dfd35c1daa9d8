//! Sequence message handling
//!
//! One function per delivered message: decode, load context, check
//! eligibility, render, send, advance. Every failure surfaces as a
//! [`PipelineError`] so the consumer loop can pick ack, retry or DLQ.

use chrono::Utc;
use outreach_core::error::PipelineError;
use outreach_core::models::{EmailData, EmailValidity, PendingLead};
use rand::RngExt;
use template::{OpenerGenerator, SpecialContext, TemplateOptions};
use tokio::time::Duration;
use tracing::info;

use crate::Config;
use crate::db::WorkerDb;
use crate::provider::EmailProvider;

/// Handle one broker message end to end.
pub async fn handle_message(
    db: &WorkerDb,
    provider: &dyn EmailProvider,
    opener: Option<&dyn OpenerGenerator>,
    config: &Config,
    payload: &[u8],
) -> Result<(), PipelineError> {
    let pending: PendingLead = serde_json::from_slice(payload)
        .map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;
    pending.validate()?;

    let (lead, enrichment, step, templates) = tokio::try_join!(
        db.load_lead(pending.lead_id),
        db.load_enrichment(pending.lead_id),
        db.load_step(pending.step_id),
        db.load_templates(pending.step_id),
    )?;

    let lead = lead.ok_or_else(|| {
        PipelineError::Ineligible(format!("lead {} not found", pending.lead_id))
    })?;
    if lead.email.trim().is_empty() {
        return Err(PipelineError::Ineligible(format!(
            "lead {} has no email address",
            lead.id
        )));
    }
    if !lead.is_subscribed_to_email {
        return Err(PipelineError::Ineligible(format!(
            "lead {} is unsubscribed",
            lead.id
        )));
    }
    if lead.is_email_valid == EmailValidity::Invalid {
        return Err(PipelineError::Ineligible(format!(
            "lead {} failed email validation",
            lead.id
        )));
    }

    let step = step.ok_or_else(|| {
        PipelineError::Ineligible(format!("step {} not found", pending.step_id))
    })?;
    if step.step_number != pending.step_number {
        return Err(PipelineError::Ineligible(format!(
            "step {} moved from number {} to {}",
            step.id, pending.step_number, step.step_number
        )));
    }
    if templates.is_empty() {
        return Err(PipelineError::Ineligible(format!(
            "step {} has no templates attached",
            pending.step_id
        )));
    }
    let template = &templates[rand::rng().random_range(0..templates.len())];

    let mut variables = template::lead_variables(&lead);
    if let Some(data) = &enrichment {
        template::merge_custom_variables(&mut variables, data);
    }
    let specials = SpecialContext {
        base_url: config.core.main_app_base_url.as_deref(),
        lead_id: Some(lead.id),
        now: Utc::now(),
        opener,
        lead: Some(&lead),
    };
    let options = TemplateOptions::default();

    let subject = template::render(&template.subject, &variables, &specials, &options).await;
    let body = template::render(&template.body, &variables, &specials, &options).await;

    let email = EmailData {
        to: lead.email.clone(),
        subject,
        body,
        lead_id: pending.lead_id,
        sequence_id: pending.sequence_id,
        step_id: pending.step_id,
        template_id: template.id,
        from_email: Some(config.from_email.clone()),
        from_name: config.from_name.clone(),
        reply_to: None,
        cc: Vec::new(),
        bcc: Vec::new(),
    };

    let timeout = Duration::from_secs(config.send_timeout_secs);
    let receipt = tokio::time::timeout(timeout, provider.send(&email))
        .await
        .map_err(|_| PipelineError::Timeout(timeout))??;

    info!(
        lead_id = %pending.lead_id,
        step_number = pending.step_number,
        message_id = %receipt.message_id,
        "email sent"
    );

    match db
        .advance_state(pending.lead_state_id, pending.sequence_id, pending.current_step)
        .await?
    {
        Some(advanced) => {
            info!(
                lead_state_id = %advanced.id,
                current_step = advanced.current_step,
                status = ?advanced.status,
                "sequence state advanced"
            );
        }
        None => {
            // Concurrently advanced or terminal. The send happened, the
            // state is someone else's: still a success for this delivery.
            info!(
                lead_state_id = %pending.lead_state_id,
                "state not advanced (already moved or terminal)"
            );
        }
    }

    Ok(())
}

//! Outreach Scheduler - due-step scanner
//!
//! Scans per-lead sequence state, and for each lead whose next step's
//! cooldown has elapsed, durably records the send intent in the outbox and
//! flips the state to RUNNING in one transaction. Delivery itself belongs
//! to the pump and the worker.

mod config;
mod db;

pub use config::Config;
pub use db::{EnqueueOutcome, SchedulerDb};

use anyhow::Result;
use outreach_core::error::log_error;
use sqlx::PgPool;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the scheduler loop until cancelled.
///
/// # Arguments
/// * `pool` - Database connection pool
/// * `config` - Scheduler configuration
/// * `shutdown` - Optional cancellation token for graceful shutdown
pub async fn run_scheduler(
    pool: PgPool,
    config: Config,
    shutdown: Option<CancellationToken>,
) -> Result<()> {
    let db = SchedulerDb::new(pool);

    info!(
        batch_size = config.batch_size,
        tick_busy_secs = config.tick_busy_secs,
        tick_idle_secs = config.tick_idle_secs,
        inflight_guard_mins = config.inflight_guard_mins,
        "starting scheduler"
    );

    loop {
        if let Some(token) = &shutdown
            && token.is_cancelled()
        {
            info!("scheduler shutdown complete");
            break;
        }

        let found = match tick(&db, &config).await {
            Ok(found) => found,
            Err(e) => {
                log_error(&e, "scheduler tick", config.core.enable_metrics);
                0
            }
        };

        let sleep_secs = if found > 0 {
            config.tick_busy_secs
        } else {
            config.tick_idle_secs
        };
        let sleep = tokio::time::sleep(Duration::from_secs(sleep_secs));

        match &shutdown {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("scheduler received shutdown signal");
                    }
                    _ = sleep => {}
                }
            }
            None => sleep.await,
        }
    }

    Ok(())
}

/// One scan-and-enqueue pass. Returns how many due leads the scan found so
/// the loop can pick its next tick interval.
async fn tick(db: &SchedulerDb, config: &Config) -> Result<usize, outreach_core::PipelineError> {
    let due = db
        .find_due_leads(config.batch_size, config.inflight_guard_mins)
        .await?;
    if due.is_empty() {
        return Ok(0);
    }

    let mut enqueued = 0;
    for lead in &due {
        match db.enqueue_lead(lead).await {
            Ok(EnqueueOutcome::Enqueued) => enqueued += 1,
            Ok(EnqueueOutcome::Duplicate) => {
                info!(
                    lead_state_id = %lead.lead_state_id,
                    step_number = lead.step_number,
                    "outbox entry already exists, skipping"
                );
            }
            Ok(EnqueueOutcome::Raced) => {
                info!(
                    lead_state_id = %lead.lead_state_id,
                    "state changed concurrently, skipping"
                );
            }
            Err(e) => log_error(&e, "enqueue lead", config.core.enable_metrics),
        }
    }

    info!(due = due.len(), enqueued, "scheduler tick complete");
    Ok(due.len())
}

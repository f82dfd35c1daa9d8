//! Outreach Pump - outbox relay
//!
//! Claims unprocessed outbox rows in SKIP LOCKED batches and ships them to
//! the broker. A failed publish reverts the claim so a later poll retries
//! it, bounded by the row's `maxRetries`. Multiple pump instances can run
//! side by side; claims never overlap.

mod config;
mod db;

pub use config::Config;
pub use db::{ClaimedIntent, PumpDb};

use std::sync::Arc;

use anyhow::Result;
use outreach_core::PipelineError;
use outreach_core::error::log_error;
use outreach_shared::Publisher;
use sqlx::PgPool;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the pump loop until cancelled.
pub async fn run_pump(
    pool: PgPool,
    publisher: Arc<dyn Publisher>,
    config: Config,
    shutdown: Option<CancellationToken>,
) -> Result<()> {
    let db = PumpDb::new(pool);

    info!(
        claim_size = config.claim_size,
        poll_busy_secs = config.poll_busy_secs,
        poll_idle_secs = config.poll_idle_secs,
        "starting pump"
    );

    let mut last_cleanup = Instant::now();

    loop {
        if let Some(token) = &shutdown
            && token.is_cancelled()
        {
            info!("pump shutdown complete");
            break;
        }

        let claimed = match tick(&db, publisher.as_ref(), &config).await {
            Ok(claimed) => claimed,
            Err(e) => {
                log_error(&e, "pump tick", config.core.enable_metrics);
                0
            }
        };

        if claimed == 0 && last_cleanup.elapsed() >= CLEANUP_INTERVAL {
            match db.cleanup_processed(config.retention_days).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "removed old processed outbox rows"),
                Err(e) => log_error(&e, "outbox cleanup", config.core.enable_metrics),
            }
            last_cleanup = Instant::now();
        }

        let sleep_secs = if claimed > 0 {
            config.poll_busy_secs
        } else {
            config.poll_idle_secs
        };
        let sleep = tokio::time::sleep(Duration::from_secs(sleep_secs));

        match &shutdown {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("pump received shutdown signal");
                    }
                    _ = sleep => {}
                }
            }
            None => sleep.await,
        }
    }

    Ok(())
}

/// Claim one batch and publish it. Returns the claimed count so the loop
/// can pick its next poll interval.
async fn tick(
    db: &PumpDb,
    publisher: &dyn Publisher,
    config: &Config,
) -> Result<usize, PipelineError> {
    let claimed = db.claim_batch(config.claim_size).await?;
    if claimed.is_empty() {
        return Ok(0);
    }

    let mut published = 0;
    for intent in &claimed {
        match publish_intent(publisher, intent).await {
            Ok(()) => {
                published += 1;
                debug!(outbox_id = %intent.id, topic = %intent.topic, "published");
            }
            Err(e) => {
                log_error(&e, "publish outbox row", config.core.enable_metrics);
                if let Err(revert_err) = db.revert(intent.id).await {
                    // The row stays marked processed and is effectively
                    // stuck until an operator intervenes.
                    log_error(&revert_err, "revert outbox row", config.core.enable_metrics);
                }
            }
        }
    }

    info!(claimed = claimed.len(), published, "pump tick complete");
    Ok(claimed.len())
}

async fn publish_intent(
    publisher: &dyn Publisher,
    intent: &ClaimedIntent,
) -> Result<(), PipelineError> {
    let body = serde_json::to_vec(&intent.payload)
        .map_err(|e| PipelineError::InvalidPayload(format!("outbox payload unserializable: {e}")))?;
    publisher.publish(&intent.topic, &body, 0).await
}

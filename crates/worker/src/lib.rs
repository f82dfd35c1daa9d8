//! Outreach Worker - sequence send executor
//!
//! Consumes pending-lead messages (prefetch 1, manual ack), sends the
//! rendered email, and advances the per-lead cursor. Delivery is
//! at-least-once at the provider and exactly-once at the state machine:
//! a redelivered message may repeat the send but can never advance the
//! cursor twice.
//!
//! Failed handling republishes the message with an incremented `x-retries`
//! header; once the header reaches the retry budget the message is rejected
//! without requeue and lands in the broker's dead-letter queue.

mod config;
mod db;
pub mod processors;
pub mod provider;

pub use config::Config;
pub use db::{AdvanceResult, WorkerDb};
pub use provider::{EmailProvider, MockProvider, SmtpProvider};

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use outreach_core::PipelineError;
use outreach_core::error::log_error;
use outreach_core::models::SEQUENCE_TOPIC;
use outreach_shared::{Broker, Publisher, retry_count};
use sqlx::PgPool;
use template::OpenerGenerator;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to do with a delivery after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Settled: success, or a malformed payload that redelivery cannot fix.
    Ack,
    /// Republish with the given retry count, then ack the original.
    Retry { next: i64 },
    /// Reject without requeue; the broker routes it to the DLQ.
    DeadLetter,
}

/// Map a handling result onto a disposition.
pub fn disposition(
    result: &Result<(), PipelineError>,
    retries: i64,
    max_retries: i64,
) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(PipelineError::InvalidPayload(_)) => Disposition::Ack,
        Err(_) if retries < max_retries => Disposition::Retry { next: retries + 1 },
        Err(_) => Disposition::DeadLetter,
    }
}

/// Run the worker consumer loop until cancelled.
pub async fn run_worker(
    pool: PgPool,
    broker: Arc<Broker>,
    provider: Arc<dyn EmailProvider>,
    opener: Option<Arc<dyn OpenerGenerator>>,
    config: Config,
    shutdown: Option<CancellationToken>,
) -> Result<()> {
    let db = WorkerDb::new(pool);
    let mut consumer = broker.consumer(SEQUENCE_TOPIC, "sequence-worker").await?;

    info!(
        queue = SEQUENCE_TOPIC,
        max_retries = config.max_retries,
        send_timeout_secs = config.send_timeout_secs,
        "starting worker"
    );

    loop {
        tokio::select! {
            _ = cancelled(shutdown.as_ref()) => {
                info!("worker received shutdown signal");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    None => {
                        // The channel died under us; exit non-zero so a
                        // supervisor restarts the process.
                        anyhow::bail!("broker consumer stream ended unexpectedly");
                    }
                    Some(Err(e)) => {
                        log_error(
                            &PipelineError::Broker(e.to_string()),
                            "consume delivery",
                            config.core.enable_metrics,
                        );
                    }
                    Some(Ok(delivery)) => {
                        // Runs to completion even if shutdown fires meanwhile;
                        // prefetch 1 means this is the only message in flight.
                        process_delivery(
                            &db,
                            broker.as_ref(),
                            provider.as_ref(),
                            opener.as_deref(),
                            &config,
                            delivery,
                        )
                        .await;
                    }
                }
            }
        }
    }

    info!("worker shutdown complete");
    Ok(())
}

async fn cancelled(shutdown: Option<&CancellationToken>) {
    match shutdown {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

async fn process_delivery(
    db: &WorkerDb,
    broker: &Broker,
    provider: &dyn EmailProvider,
    opener: Option<&dyn OpenerGenerator>,
    config: &Config,
    delivery: Delivery,
) {
    let retries = retry_count(&delivery.properties);
    let result = processors::handle_message(db, provider, opener, config, &delivery.data).await;

    if let Err(e) = &result {
        match e {
            PipelineError::InvalidPayload(reason) => {
                warn!(reason = %reason, "discarding malformed message");
            }
            _ => log_error(e, "handle sequence message", config.core.enable_metrics),
        }
    }

    match disposition(&result, retries, config.max_retries) {
        Disposition::Ack => {
            if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                warn!(error = %e, "failed to ack delivery");
            }
        }
        Disposition::Retry { next } => {
            match broker.publish(SEQUENCE_TOPIC, &delivery.data, next).await {
                Ok(()) => {
                    info!(retries = next, "republished message for retry");
                    if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                        warn!(error = %e, "failed to ack original after republish");
                    }
                }
                Err(e) => {
                    // Let the broker redeliver the original instead; the
                    // retry count stays where it was.
                    log_error(&e, "republish for retry", config.core.enable_metrics);
                    let nack = delivery
                        .acker
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        })
                        .await;
                    if let Err(e) = nack {
                        warn!(error = %e, "failed to nack delivery");
                    }
                }
            }
        }
        Disposition::DeadLetter => {
            warn!(retries, "retry budget exhausted, dead-lettering message");
            let reject = delivery
                .acker
                .reject(BasicRejectOptions { requeue: false })
                .await;
            if let Err(e) = reject {
                warn!(error = %e, "failed to reject delivery");
            }
        }
    }
}

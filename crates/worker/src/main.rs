//! Worker entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use outreach_core::config::Environment;
use outreach_shared::{Broker, bootstrap};
use template::{GeminiOpener, OpenerGenerator};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use worker::{EmailProvider, MockProvider, SmtpProvider};

#[tokio::main]
async fn main() {
    bootstrap::init_env();

    if let Err(e) = run().await {
        eprintln!("worker failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = worker::Config::from_env()?;
    let _guard = bootstrap::init_tracing("worker", &config.core.log_level);

    let pool = bootstrap::init_db(&config.core).await?;
    let broker = Arc::new(Broker::connect(config.core.require_rabbit_mq()?).await?);

    let provider = build_provider(&config)?;
    let opener = build_opener(&config);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker::run_worker(
        pool.clone(),
        broker,
        provider,
        opener,
        config.clone(),
        Some(shutdown.clone()),
    ));

    bootstrap::wait_for_shutdown().await;
    info!("shutdown signal received");
    shutdown.cancel();

    // Give the in-flight message its grace period, then stop waiting.
    let grace = Duration::from_secs(config.grace_period_secs);
    match tokio::time::timeout(grace, handle).await {
        Ok(joined) => joined??,
        Err(_) => warn!("grace period elapsed with a message still in flight"),
    }

    bootstrap::close_db(&pool).await;
    Ok(())
}

fn build_provider(config: &worker::Config) -> Result<Arc<dyn EmailProvider>> {
    let retry_delay = Duration::from_millis(config.provider_retry_delay_ms);
    match config.core.environment {
        Environment::Production => {
            let aws = config.core.aws.as_ref().ok_or_else(|| {
                anyhow::anyhow!("AWS credentials are required for the SES provider in production")
            })?;
            Ok(Arc::new(SmtpProvider::ses(
                aws,
                config.provider_retry_attempts,
                retry_delay,
            )?))
        }
        Environment::Development | Environment::Test => {
            info!("non-production environment, using mock email provider");
            Ok(Arc::new(MockProvider))
        }
    }
}

fn build_opener(config: &worker::Config) -> Option<Arc<dyn OpenerGenerator>> {
    match &config.core.gemini_api_key {
        Some(key) => {
            let timeout = Duration::from_secs(config.send_timeout_secs);
            Some(Arc::new(GeminiOpener::new(key.clone()).with_timeout(timeout)))
        }
        None => {
            info!("GEMINI_API_KEY not set, opener variables fall back to the static line");
            None
        }
    }
}

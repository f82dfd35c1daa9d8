//! Unified dev server: scheduler, pump and worker in one process sharing a
//! pool, a broker connection and a shutdown token. Production runs the
//! three dedicated binaries instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use outreach_core::config::Environment;
use outreach_shared::{Broker, bootstrap};
use sqlx::PgPool;
use template::{GeminiOpener, OpenerGenerator};
use tokio_util::sync::CancellationToken;
use tracing::info;
use worker::{EmailProvider, MockProvider, SmtpProvider};

mod config;

#[tokio::main]
async fn main() {
    bootstrap::init_env();

    if let Err(e) = run().await {
        eprintln!("outreach server failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = config::UnifiedConfig::from_env()?;
    let _guard = bootstrap::init_tracing("server", &config.worker.core.log_level);

    info!("starting outreach unified server");

    let pool = bootstrap::init_db(&config.worker.core).await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("migrations completed");

    let broker = Arc::new(Broker::connect(config.worker.core.require_rabbit_mq()?).await?);

    let shutdown = CancellationToken::new();

    let scheduler_handle = spawn_scheduler(pool.clone(), config.scheduler, shutdown.clone());
    let pump_handle = spawn_pump(pool.clone(), broker.clone(), config.pump, shutdown.clone());
    let worker_handle = spawn_worker(pool.clone(), broker, config.worker.clone(), shutdown.clone())?;

    info!("all services started");

    bootstrap::wait_for_shutdown().await;
    info!("shutdown signal received");
    shutdown.cancel();

    let grace = Duration::from_secs(config.worker.grace_period_secs);
    let joined = tokio::time::timeout(
        grace + Duration::from_secs(1),
        async { tokio::join!(scheduler_handle, pump_handle, worker_handle) },
    )
    .await;
    if joined.is_err() {
        tracing::warn!("services did not drain within the grace period");
    }

    bootstrap::close_db(&pool).await;
    info!("all services stopped");
    Ok(())
}

fn spawn_scheduler(
    pool: PgPool,
    config: scheduler::Config,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move { scheduler::run_scheduler(pool, config, Some(shutdown)).await })
}

fn spawn_pump(
    pool: PgPool,
    broker: Arc<Broker>,
    config: pump::Config,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move { pump::run_pump(pool, broker, config, Some(shutdown)).await })
}

fn spawn_worker(
    pool: PgPool,
    broker: Arc<Broker>,
    config: worker::Config,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<Result<()>>> {
    let retry_delay = Duration::from_millis(config.provider_retry_delay_ms);
    let provider: Arc<dyn EmailProvider> = match config.core.environment {
        Environment::Production => {
            let aws = config.core.aws.as_ref().ok_or_else(|| {
                anyhow::anyhow!("AWS credentials are required for the SES provider in production")
            })?;
            Arc::new(SmtpProvider::ses(
                aws,
                config.provider_retry_attempts,
                retry_delay,
            )?)
        }
        Environment::Development | Environment::Test => Arc::new(MockProvider),
    };

    let opener: Option<Arc<dyn OpenerGenerator>> = config
        .core
        .gemini_api_key
        .as_ref()
        .map(|key| {
            Arc::new(GeminiOpener::new(key.clone())) as Arc<dyn OpenerGenerator>
        });

    Ok(tokio::spawn(async move {
        worker::run_worker(pool, broker, provider, opener, config, Some(shutdown)).await
    }))
}

//! Scheduler entry point

use anyhow::Result;
use outreach_shared::bootstrap;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    bootstrap::init_env();

    if let Err(e) = run().await {
        eprintln!("scheduler failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = scheduler::Config::from_env()?;
    let _guard = bootstrap::init_tracing("scheduler", &config.core.log_level);

    let pool = bootstrap::init_db(&config.core).await?;

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            bootstrap::wait_for_shutdown().await;
            info!("shutdown signal received");
            token.cancel();
        });
    }

    scheduler::run_scheduler(pool.clone(), config, Some(shutdown)).await?;

    bootstrap::close_db(&pool).await;
    Ok(())
}

//! Pump entry point

use std::sync::Arc;

use anyhow::Result;
use outreach_shared::{Broker, bootstrap};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    bootstrap::init_env();

    if let Err(e) = run().await {
        eprintln!("pump failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = pump::Config::from_env()?;
    let _guard = bootstrap::init_tracing("pump", &config.core.log_level);

    let pool = bootstrap::init_db(&config.core).await?;
    let broker = Broker::connect(config.core.require_rabbit_mq()?).await?;
    broker
        .declare_queue(outreach_core::models::SEQUENCE_TOPIC)
        .await?;

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            bootstrap::wait_for_shutdown().await;
            info!("shutdown signal received");
            token.cancel();
        });
    }

    pump::run_pump(pool.clone(), Arc::new(broker), config, Some(shutdown)).await?;

    bootstrap::close_db(&pool).await;
    Ok(())
}

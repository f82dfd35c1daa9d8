//! Configuration for the scheduler process

use outreach_core::config::{CoreConfig, env_parse};
use outreach_core::error::PipelineError;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,

    /// Tick interval after a productive scan, in seconds.
    pub tick_busy_secs: u64,

    /// Tick interval when no lead was due, in seconds.
    pub tick_idle_secs: u64,

    /// Maximum leads considered per tick.
    pub batch_size: i64,

    /// Freshness guard: states touched within this window are skipped,
    /// which bounds duplicate enqueues while a send is still in flight.
    pub inflight_guard_mins: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, PipelineError> {
        Ok(Self {
            core: CoreConfig::from_env()?,
            tick_busy_secs: env_parse("SCHEDULER_TICK_BUSY_SECS", 3)?,
            tick_idle_secs: env_parse("SCHEDULER_TICK_IDLE_SECS", 10)?,
            batch_size: env_parse("SCHEDULER_BATCH_SIZE", 50)?,
            inflight_guard_mins: env_parse("SCHEDULER_INFLIGHT_GUARD_MINS", 60)?,
        })
    }
}

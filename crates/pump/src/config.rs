//! Configuration for the pump process

use outreach_core::config::{CoreConfig, env_parse};
use outreach_core::error::PipelineError;

/// Pump configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,

    /// Poll interval after a productive claim, in seconds.
    pub poll_busy_secs: u64,

    /// Poll interval when the outbox was empty, in seconds.
    pub poll_idle_secs: u64,

    /// Maximum rows claimed per poll.
    pub claim_size: i64,

    /// Processed rows older than this are deleted during housekeeping.
    pub retention_days: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, PipelineError> {
        let core = CoreConfig::from_env()?;
        core.require_rabbit_mq()?;

        Ok(Self {
            core,
            poll_busy_secs: env_parse("PUMP_POLL_BUSY_SECS", 1)?,
            poll_idle_secs: env_parse("PUMP_POLL_IDLE_SECS", 10)?,
            claim_size: env_parse("PUMP_CLAIM_SIZE", 10)?,
            retention_days: env_parse("PUMP_RETENTION_DAYS", 90)?,
        })
    }
}

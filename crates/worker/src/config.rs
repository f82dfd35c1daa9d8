//! Configuration for the worker process

use outreach_core::config::{CoreConfig, env_parse};
use outreach_core::error::PipelineError;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub core: CoreConfig,

    /// Maximum broker redeliveries before a message is dead-lettered.
    pub max_retries: i64,

    /// Caller-side timeout around one provider send, in seconds.
    pub send_timeout_secs: u64,

    /// How long shutdown waits for the in-flight message, in seconds.
    pub grace_period_secs: u64,

    /// Provider-internal attempts per send.
    pub provider_retry_attempts: u32,

    /// Base delay between provider attempts, in milliseconds. Backoff is
    /// linear: delay × attempt.
    pub provider_retry_delay_ms: u64,

    pub from_email: String,
    pub from_name: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, PipelineError> {
        let core = CoreConfig::from_env()?;
        core.require_rabbit_mq()?;

        Ok(Self {
            core,
            max_retries: env_parse("WORKER_MAX_RETRIES", 3)?,
            send_timeout_secs: env_parse("WORKER_SEND_TIMEOUT_SECS", 10)?,
            grace_period_secs: env_parse("WORKER_GRACE_PERIOD_SECS", 5)?,
            provider_retry_attempts: env_parse("PROVIDER_RETRY_ATTEMPTS", 3)?,
            provider_retry_delay_ms: env_parse("PROVIDER_RETRY_DELAY_MS", 1000)?,
            from_email: std::env::var("FROM_EMAIL")
                .map_err(|_| PipelineError::Configuration("FROM_EMAIL must be set".to_string()))?,
            from_name: std::env::var("FROM_NAME").ok(),
        })
    }
}

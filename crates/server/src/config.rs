//! Unified configuration for the single-process server

use outreach_core::error::PipelineError;

/// Configuration for all three services in one process.
#[derive(Debug, Clone)]
pub struct UnifiedConfig {
    pub scheduler: scheduler::Config,
    pub pump: pump::Config,
    pub worker: worker::Config,
}

impl UnifiedConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Ok(Self {
            scheduler: scheduler::Config::from_env()?,
            pump: pump::Config::from_env()?,
            worker: worker::Config::from_env()?,
        })
    }
}

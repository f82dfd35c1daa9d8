//! Error taxonomy for the pipeline
//!
//! Every failure carries a stable code, a category and a severity so that
//! log aggregation can group and alert on them uniformly across the three
//! processes.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Database,
    Network,
    ExternalService,
    Configuration,
    System,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Database => "database",
            ErrorCategory::Network => "network",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default severity attached to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline-wide error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Broker payload failed to decode or violates the message schema.
    /// These are acked without redelivery: replaying bad bytes cannot help.
    #[error("invalid message payload: {0}")]
    InvalidPayload(String),

    /// The lead exists but must not be emailed (unsubscribed, invalid
    /// address, missing template). Routed through the retry/DLQ path.
    #[error("lead not eligible for sending: {0}")]
    Ineligible(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("email provider error: {0}")]
    Provider(String),

    #[error("external call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::InvalidPayload(_) | PipelineError::Ineligible(_) => {
                ErrorCategory::Validation
            }
            PipelineError::Database(_) => ErrorCategory::Database,
            PipelineError::Broker(_) => ErrorCategory::Network,
            PipelineError::Provider(_) | PipelineError::Timeout(_) => {
                ErrorCategory::ExternalService
            }
            PipelineError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.category() {
            ErrorCategory::Validation => Severity::Low,
            ErrorCategory::Database => Severity::High,
            ErrorCategory::Network | ErrorCategory::ExternalService => Severity::Medium,
            ErrorCategory::Configuration | ErrorCategory::System => Severity::Critical,
        }
    }

    /// Stable machine-readable code for metrics and alerting.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidPayload(_) => "PAYLOAD_INVALID",
            PipelineError::Ineligible(_) => "LEAD_INELIGIBLE",
            PipelineError::Database(e) if is_unique_violation(e) => "UNIQUE_VIOLATION",
            PipelineError::Database(_) => "DB_QUERY_FAILED",
            PipelineError::Broker(_) => "BROKER_IO_FAILED",
            PipelineError::Provider(_) => "PROVIDER_SEND_FAILED",
            PipelineError::Timeout(_) => "EXTERNAL_TIMEOUT",
            PipelineError::Configuration(_) => "CONFIG_INVALID",
        }
    }
}

/// True when the underlying database error is a Postgres unique-constraint
/// violation (SQLSTATE 23505). The scheduler relies on this to treat idemKey
/// collisions as expected duplicates rather than failures.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Emit a structured log record for an error, with a per-code counter event
/// when metrics are enabled.
pub fn log_error(err: &PipelineError, context: &str, metrics_enabled: bool) {
    let code = err.code();
    let category = err.category();
    let severity = err.severity();

    match severity {
        Severity::Low => {
            tracing::info!(%code, %category, %severity, context, error = %err, "pipeline error");
        }
        Severity::Medium => {
            tracing::warn!(%code, %category, %severity, context, error = %err, "pipeline error");
        }
        Severity::High | Severity::Critical => {
            tracing::error!(%code, %category, %severity, context, error = %err, "pipeline error");
        }
    }

    if metrics_enabled {
        tracing::info!(target: "metrics", counter = "errors_total", %code, value = 1_u64);
    }
}

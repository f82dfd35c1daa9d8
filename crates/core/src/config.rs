//! Shared configuration logic
//!
//! Handles loading of the environment variables common to all three
//! processes. Service-specific knobs live in each service's own config.

use std::env;
use std::str::FromStr;

use crate::error::PipelineError;

/// Deployment environment. Controls provider selection: anything other than
/// `Production` sends through the mock provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(PipelineError::Configuration(format!(
                "APP_ENV must be one of development|production|test, got '{other}'"
            ))),
        }
    }
}

/// AWS credentials for the SES provider.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Common configuration used across services.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Database connection URL.
    pub database_url: String,

    /// AMQP broker URL. Required by the pump and the worker; the scheduler
    /// talks only to the database.
    pub rabbit_mq_url: Option<String>,

    pub environment: Environment,

    /// One of error|warn|info|debug. Seeds the default tracing filter.
    pub log_level: String,

    /// Reserved; read and validated but not yet consumed by this core.
    pub redis_url: Option<String>,

    pub enable_metrics: bool,
    pub enable_debug: bool,

    /// API key for the opener-generation call. When absent, the `aiOpener`
    /// template variable resolves to its static fallback.
    pub gemini_api_key: Option<String>,

    /// SES credentials. Required in production, optional elsewhere.
    pub aws: Option<AwsConfig>,

    /// Base URL for unsubscribe links, with trailing slash.
    pub main_app_base_url: Option<String>,

    pub db_max_connections: u32,
}

impl CoreConfig {
    /// Load common configuration from environment variables.
    ///
    /// Missing or invalid required variables are a fatal configuration
    /// error; the process must refuse to start.
    pub fn from_env() -> Result<Self, PipelineError> {
        let database_url = require("DATABASE_URL")?;
        let rabbit_mq_url = env::var("RABBIT_MQ_URL").ok();

        let environment = match env::var("APP_ENV") {
            Ok(v) => v.parse()?,
            Err(_) => Environment::Development,
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        validate_log_level(&log_level)?;

        let aws = load_aws_config();
        if environment == Environment::Production && aws.is_none() {
            return Err(PipelineError::Configuration(
                "AWS_REGION, AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set in production"
                    .to_string(),
            ));
        }

        let db_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(v) => v.parse().map_err(|_| {
                PipelineError::Configuration(
                    "DATABASE_MAX_CONNECTIONS must be a positive integer".to_string(),
                )
            })?,
            Err(_) => 10,
        };

        Ok(Self {
            database_url,
            rabbit_mq_url,
            environment,
            log_level,
            redis_url: env::var("REDIS_URL").ok(),
            enable_metrics: parse_bool(env::var("ENABLE_METRICS").ok().as_deref()),
            enable_debug: parse_bool(env::var("ENABLE_DEBUG").ok().as_deref()),
            gemini_api_key: env::var("GEMINI_API_KEY").ok(),
            aws,
            main_app_base_url: env::var("MAIN_APP_BASE_URL").ok(),
            db_max_connections,
        })
    }

    /// The broker URL, or a configuration error for services that need one.
    pub fn require_rabbit_mq(&self) -> Result<&str, PipelineError> {
        self.rabbit_mq_url
            .as_deref()
            .ok_or_else(|| PipelineError::Configuration("RABBIT_MQ_URL must be set".to_string()))
    }
}

fn require(name: &str) -> Result<String, PipelineError> {
    env::var(name).map_err(|_| PipelineError::Configuration(format!("{name} must be set")))
}

fn load_aws_config() -> Option<AwsConfig> {
    Some(AwsConfig {
        region: env::var("AWS_REGION").ok()?,
        access_key_id: env::var("AWS_ACCESS_KEY_ID").ok()?,
        secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok()?,
    })
}

/// Only the literal `"true"` enables a flag.
pub fn parse_bool(value: Option<&str>) -> bool {
    value == Some("true")
}

fn validate_log_level(level: &str) -> Result<(), PipelineError> {
    match level {
        "error" | "warn" | "info" | "debug" => Ok(()),
        other => Err(PipelineError::Configuration(format!(
            "LOG_LEVEL must be one of error|warn|info|debug, got '{other}'"
        ))),
    }
}

/// Read a service-level env override with a default, failing on garbage
/// rather than silently falling back.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, PipelineError> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| PipelineError::Configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_known_values() {
        assert_eq!(
            "development".parse::<Environment>().expect("parse"),
            Environment::Development
        );
        assert_eq!(
            "production".parse::<Environment>().expect("parse"),
            Environment::Production
        );
        assert_eq!(
            "test".parse::<Environment>().expect("parse"),
            Environment::Test
        );
        assert!("staging".parse::<Environment>().is_err());
        assert!("PRODUCTION".parse::<Environment>().is_err());
    }

    #[test]
    fn only_literal_true_enables_flags() {
        assert!(parse_bool(Some("true")));
        assert!(!parse_bool(Some("TRUE")));
        assert!(!parse_bool(Some("1")));
        assert!(!parse_bool(Some("yes")));
        assert!(!parse_bool(None));
    }

    #[test]
    fn log_level_is_validated() {
        for ok in ["error", "warn", "info", "debug"] {
            assert!(validate_log_level(ok).is_ok());
        }
        assert!(validate_log_level("trace").is_err());
        assert!(validate_log_level("INFO").is_err());
    }
}

//! Outreach Core - Domain logic and models
//!
//! This crate contains the shared domain types for the sequence pipeline:
//! database models, configuration loading, the error taxonomy, and the
//! idempotency key derivation. No I/O happens here apart from reading
//! environment variables.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod models;

pub use config::{CoreConfig, Environment};
pub use error::{ErrorCategory, PipelineError, Severity, log_error};
pub use idempotency::idem_key;

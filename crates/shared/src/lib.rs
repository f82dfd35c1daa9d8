//! Outreach Shared - process bootstrap and broker plumbing
//!
//! Everything a service binary needs before its loop starts: environment
//! loading, tracing, the database pool, the broker channel, and shutdown
//! signal wiring. Resources are constructed here and passed down; no lazy
//! globals.

pub mod bootstrap;
pub mod broker;

pub use broker::{Broker, Publisher, RETRIES_HEADER, retry_count, retry_headers};

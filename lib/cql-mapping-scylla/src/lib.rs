//! ScyllaDB and Cassandra driver for cql-mapping.
//!
//! Wraps a `scylla::Session` and implements [`Driver`] on it. Statements are
//! prepared through the session's cache, batches are sent as logged batches,
//! and live table definitions come from `system_schema`.
//!
//! # Usage
//!
//! ```text
//! use cql_mapping::{DriverConnection, MappingSession, ConnectionConfig};
//! use cql_mapping_scylla::ScyllaDriver;
//!
//! let driver = ScyllaDriver::connect(ConnectionConfig::new("127.0.0.1:9042")).await?;
//! let session = MappingSession::new("ledger", driver);
//! session.save(&expense).await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod convert;
mod driver;
mod introspect;

pub use driver::ScyllaDriver;

// Re-export core types for convenience
pub use cql_mapping::{ConnectionConfig, Driver, DriverConnection, MappingError, MappingSession};

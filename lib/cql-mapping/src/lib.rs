//! CQL Mapping - typed records over wide-column CQL stores.
//!
//! Record types describe their table once (usually through
//! `#[derive(Entity)]`); the crate keeps the live schema in line with that
//! description and converts records to and from rows.
//!
//! # Core Concepts
//!
//! - **Entity metadata**: the validated column layout of a record type, built
//!   on first use and cached for the life of the process.
//! - **Schema synchronization**: on first use per keyspace, the live table is
//!   diffed against the declaration and the missing DDL is executed.
//! - **Statements**: pure values holding CQL text with `?` markers plus the
//!   values to bind; nothing is ever interpolated into the text.
//!
//! # Traits
//!
//! - [`Entity`]: a record type mapped to one table
//! - [`CqlEnum`]: a unit enum stored by ordinal or by name
//! - [`Driver`]: statement execution and schema introspection for a backend
//! - [`DriverConnection`]: connecting a driver from a [`ConnectionConfig`]

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

extern crate self as cql_mapping;

mod batch;
mod cache;
mod codec;
mod driver;
mod entity;
mod error;
mod options;
pub mod schema;
mod session;
mod statement;
mod time;
mod value;

pub use batch::Batch;
pub use cache::StatementCache;
pub use codec::record_from_row;
pub use driver::{
    APPLIED, ColumnKind, ConnectionConfig, Driver, DriverConnection, LiveColumn, LiveIndex,
    ResultSet, Row, TableDefinition,
};
pub use entity::{
    ClusteringOrder, ColumnField, CqlEnum, Entity, EntityDescriptor, EntityMetadata, EnumMapping,
    FieldDescriptor, KeyRole, metadata_for,
};
pub use error::MappingError;
pub use options::{
    Consistency, RetryPolicy, SessionConfig, SyncFlags, SyncOptions, WriteOptions,
};
pub use schema::SchemaSync;
pub use session::{MappingSession, SaveOutcome};
pub use statement::{
    AlterTable, Assignment, ColumnDef, Filter, Statement, StatementBody, StatementFactory,
    StatementOptions, MAX_TTL, effective_ttl, ident,
};
pub use time::{Timestamp, epoch_micros};
pub use value::{DataType, Key, Value};

// Re-export derive macros
pub use cql_mapping_derive::{CqlEnum, Entity};


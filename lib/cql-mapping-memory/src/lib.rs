//! In-process driver for `cql-mapping`.
//!
//! [`MemoryDriver`] keeps keyspaces, tables and indexes in memory and applies
//! statements the way a CQL store would. It backs the test suites and local
//! development where no cluster is available.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod driver;
mod raw;
mod store;

pub use driver::MemoryDriver;

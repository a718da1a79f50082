use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cql_mapping::{
    ConnectionConfig, Driver, DriverConnection, MappingError, ResultSet, Statement,
    TableDefinition, epoch_micros,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::store::Store;

#[derive(Debug, Default)]
struct Recorder {
    executed: Vec<String>,
    prepared: usize,
    failures: Vec<String>,
    last_timestamp: i64,
}

impl Recorder {
    /// Microsecond write timestamp, strictly increasing across calls.
    fn next_timestamp(&mut self) -> i64 {
        self.last_timestamp = epoch_micros().max(self.last_timestamp + 1);
        self.last_timestamp
    }

    fn record(&mut self, cql: String) -> Result<(), MappingError> {
        if let Some(fragment) = self.failures.iter().find(|f| cql.contains(f.as_str())) {
            warn!(cql = %cql, fragment = %fragment, "injected statement failure");
            return Err(MappingError::Driver(format!(
                "injected failure for statement containing '{}'",
                fragment
            )));
        }
        self.executed.push(cql);
        Ok(())
    }
}

/// A driver holding keyspaces in process memory.
///
/// Statements are applied with CQL semantics: last write wins per cell, TTLs
/// expire cells, `IF` conditions report `[applied]`, and batches apply all or
/// nothing. Every executed statement's CQL is recorded for inspection.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    store: Mutex<Store>,
    recorder: Mutex<Recorder>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyspace(self, keyspace: &str) -> Self {
        self.create_keyspace(keyspace);
        self
    }

    pub fn create_keyspace(&self, keyspace: &str) {
        self.store.lock().create_keyspace(keyspace);
    }

    /// CQL text of every statement executed so far, batches included.
    pub fn executed(&self) -> Vec<String> {
        self.recorder.lock().executed.clone()
    }

    pub fn clear_history(&self) {
        self.recorder.lock().executed.clear();
    }

    /// Number of `prepare` calls that reached the driver.
    pub fn prepare_count(&self) -> usize {
        self.recorder.lock().prepared
    }

    /// Fail any later statement whose CQL contains `fragment`.
    pub fn fail_statements_containing(&self, fragment: impl Into<String>) {
        self.recorder.lock().failures.push(fragment.into());
    }

    pub fn clear_failures(&self) {
        self.recorder.lock().failures.clear();
    }

    fn apply(&self, statement: &Statement) -> Result<ResultSet, MappingError> {
        let timestamp = {
            let mut recorder = self.recorder.lock();
            recorder.record(statement.cql())?;
            recorder.next_timestamp()
        };
        self.store.lock().apply(statement, timestamp, Instant::now())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Prepared = Arc<str>;

    async fn prepare(&self, cql: &str) -> Result<Self::Prepared, MappingError> {
        self.recorder.lock().prepared += 1;
        Ok(Arc::from(cql))
    }

    async fn execute(&self, statement: &Statement) -> Result<ResultSet, MappingError> {
        self.apply(statement)
    }

    async fn execute_prepared(
        &self,
        prepared: &Self::Prepared,
        statement: &Statement,
    ) -> Result<ResultSet, MappingError> {
        if **prepared != statement.cql() {
            return Err(MappingError::Driver(format!(
                "prepared statement '{}' does not match '{}'",
                prepared,
                statement.cql()
            )));
        }
        self.apply(statement)
    }

    async fn execute_batch(
        &self,
        statements: &[(Self::Prepared, Statement)],
    ) -> Result<ResultSet, MappingError> {
        let timestamp = {
            let mut recorder = self.recorder.lock();
            for (_, statement) in statements {
                recorder.record(statement.cql())?;
            }
            recorder.next_timestamp()
        };

        let mut store = self.store.lock();
        let mut staged = store.clone();
        let now = Instant::now();
        let conditional = statements.iter().any(|(_, s)| s.is_conditional());
        for (_, statement) in statements {
            if !staged.apply(statement, timestamp, now)?.applied() {
                debug!(statements = statements.len(), "batch condition rejected");
                return Ok(ResultSet::applied_result(false));
            }
        }
        *store = staged;

        Ok(if conditional {
            ResultSet::applied_result(true)
        } else {
            ResultSet::empty()
        })
    }

    async fn table_definition(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableDefinition>, MappingError> {
        Ok(self.store.lock().table_definition(keyspace, table))
    }

    async fn keyspace_exists(&self, keyspace: &str) -> Result<bool, MappingError> {
        Ok(self.store.lock().keyspace_exists(keyspace))
    }
}

#[async_trait]
impl DriverConnection for MemoryDriver {
    /// Node addresses and credentials are ignored; the configured keyspace is created.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, MappingError> {
        let config = config.into();
        let driver = Self::new();
        if let Some(keyspace) = &config.keyspace {
            driver.create_keyspace(keyspace);
        }
        Ok(driver)
    }
}

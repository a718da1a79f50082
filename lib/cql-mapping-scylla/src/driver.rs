//! ScyllaDB implementation of Driver.

use std::ops::Deref;

use async_trait::async_trait;
use cql_mapping::{
    ConnectionConfig, Driver, DriverConnection, MappingError, ResultSet, Statement,
    StatementOptions, TableDefinition,
};
use scylla::batch::{Batch, BatchType};
use scylla::prepared_statement::PreparedStatement;
use scylla::query::Query;
use scylla::{Session, SessionBuilder};
use tracing::{debug, info};

use crate::convert::{bind_values, consistency, result_set, retry_policy};
use crate::introspect::{self, COLUMNS_CQL, INDEXES_CQL, KEYSPACE_CQL};

fn driver_error(e: impl std::fmt::Display) -> MappingError {
    MappingError::Driver(e.to_string())
}

// Query, PreparedStatement and Batch share these setters without a common trait.
macro_rules! configure {
    ($target:expr, $options:expr) => {{
        let options: &StatementOptions = $options;
        if let Some(level) = options.consistency {
            $target.set_consistency(consistency(level));
        }
        if let Some(micros) = options.timestamp {
            $target.set_timestamp(Some(micros));
        }
        if let Some(policy) = options.retry_policy {
            $target.set_retry_policy(Some(retry_policy(policy)));
        }
    }};
}

/// Wrapper around `scylla::Session` that implements Driver.
pub struct ScyllaDriver(Session);

impl ScyllaDriver {
    pub fn new(session: Session) -> Self {
        Self(session)
    }

    pub fn inner(&self) -> &Session {
        &self.0
    }
}

impl Deref for ScyllaDriver {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl Driver for ScyllaDriver {
    type Prepared = PreparedStatement;

    async fn prepare(&self, cql: &str) -> Result<Self::Prepared, MappingError> {
        self.0.prepare(cql).await.map_err(driver_error)
    }

    async fn execute(&self, statement: &Statement) -> Result<ResultSet, MappingError> {
        let mut query = Query::new(statement.cql());
        configure!(query, statement.options());
        let result = self
            .0
            .query_unpaged(query, bind_values(statement))
            .await
            .map_err(driver_error)?;
        Ok(result_set(result))
    }

    async fn execute_prepared(
        &self,
        prepared: &Self::Prepared,
        statement: &Statement,
    ) -> Result<ResultSet, MappingError> {
        let mut prepared = prepared.clone();
        configure!(prepared, statement.options());
        let result = self
            .0
            .execute_unpaged(&prepared, bind_values(statement))
            .await
            .map_err(driver_error)?;
        Ok(result_set(result))
    }

    /// Logged batch. Batch-level options come from the first statement.
    async fn execute_batch(
        &self,
        statements: &[(Self::Prepared, Statement)],
    ) -> Result<ResultSet, MappingError> {
        let mut batch = Batch::new(BatchType::Logged);
        let mut values = Vec::with_capacity(statements.len());
        for (prepared, statement) in statements {
            batch.append_statement(prepared.clone());
            values.push(bind_values(statement));
        }
        if let Some((_, first)) = statements.first() {
            configure!(batch, first.options());
        }
        debug!(statements = statements.len(), "executing logged batch");

        let result = self.0.batch(&batch, values).await.map_err(driver_error)?;
        Ok(result_set(result))
    }

    async fn table_definition(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableDefinition>, MappingError> {
        let columns = self
            .0
            .query_unpaged(COLUMNS_CQL, (keyspace, table))
            .await
            .map_err(driver_error)?;
        let indexes = self
            .0
            .query_unpaged(INDEXES_CQL, (keyspace, table))
            .await
            .map_err(driver_error)?;
        Ok(introspect::table_definition(
            table,
            &result_set(columns),
            &result_set(indexes),
        ))
    }

    async fn keyspace_exists(&self, keyspace: &str) -> Result<bool, MappingError> {
        let result = self
            .0
            .query_unpaged(KEYSPACE_CQL, (keyspace,))
            .await
            .map_err(driver_error)?;
        Ok(!result_set(result).is_empty())
    }
}

#[async_trait]
impl DriverConnection for ScyllaDriver {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, MappingError> {
        let config = config.into();
        if config.nodes.is_empty() {
            return Err(MappingError::Driver(
                "at least one contact point is required".to_string(),
            ));
        }

        let mut builder = SessionBuilder::new().known_nodes(&config.nodes);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.user(username, password);
        }
        let session = builder.build().await.map_err(driver_error)?;
        if let Some(keyspace) = &config.keyspace {
            session
                .use_keyspace(keyspace, false)
                .await
                .map_err(driver_error)?;
        }

        info!(nodes = ?config.nodes, keyspace = ?config.keyspace, "connected to CQL cluster");
        Ok(Self(session))
    }
}

//! The driver seam: statement execution and live schema introspection.
//!
//! - `Driver`: prepares and executes statements, reads live table definitions
//! - `DriverConnection`: connects a driver from a `ConnectionConfig`
//! - `ResultSet` / `Row`: rows returned by the store, with case-insensitive column lookup

use async_trait::async_trait;
use serde::Deserialize;

use crate::entity::ClusteringOrder;
use crate::{MappingError, Statement, Value};

/// Connection configuration for driver backends.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
    /// Contact points, `host:port`.
    pub nodes: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Keyspace selected on every connection.
    #[serde(default)]
    pub keyspace: Option<String>,
}

impl ConnectionConfig {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            nodes: vec![node.into()],
            ..Self::default()
        }
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }
}

impl From<&str> for ConnectionConfig {
    fn from(node: &str) -> Self {
        ConnectionConfig::new(node)
    }
}

impl From<String> for ConnectionConfig {
    fn from(node: String) -> Self {
        ConnectionConfig::new(node)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(node: &String) -> Self {
        ConnectionConfig::new(node.clone())
    }
}

/// Role of a live column in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Static,
    Regular,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveColumn {
    pub name: String,
    /// Type as the store reports it, e.g. `list<text>`.
    pub cql_type: String,
    pub kind: ColumnKind,
    pub clustering_order: Option<ClusteringOrder>,
}

impl LiveColumn {
    pub fn new(name: impl Into<String>, cql_type: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            cql_type: cql_type.into(),
            kind,
            clustering_order: None,
        }
    }

    pub fn is_key(&self) -> bool {
        matches!(self.kind, ColumnKind::PartitionKey | ColumnKind::Clustering)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub column: String,
}

/// A table as it currently exists in the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<LiveColumn>,
    pub indexes: Vec<LiveIndex>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_column(mut self, column: LiveColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.indexes.push(LiveIndex {
            name: name.into(),
            column: column.into(),
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn index_on(&self, column: &str) -> Option<&LiveIndex> {
        self.indexes
            .iter()
            .find(|i| i.column.eq_ignore_ascii_case(column))
    }

    pub fn partition_key(&self) -> impl Iterator<Item = &LiveColumn> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::PartitionKey)
    }

    pub fn clustering_key(&self) -> impl Iterator<Item = &LiveColumn> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Clustering)
    }
}

/// One row of a result, columns in the order the store returned them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Value of a column, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub const APPLIED: &str = "[applied]";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Result of a conditional statement.
    pub fn applied_result(applied: bool) -> Self {
        Self::new(vec![Row::new(vec![(
            APPLIED.to_string(),
            Value::Boolean(applied),
        )])])
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `false` only when the store reported a rejected condition.
    pub fn applied(&self) -> bool {
        self.first()
            .and_then(|row| row.get(APPLIED))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Trait for executing statements against a store.
///
/// Implemented by backend session types. Failures surface as
/// [`MappingError::Driver`]; no retry happens above the driver's own policy.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Handle returned by [`prepare`](Driver::prepare), cached by the session.
    type Prepared: Clone + Send + Sync + 'static;

    async fn prepare(&self, cql: &str) -> Result<Self::Prepared, MappingError>;

    /// Execute without preparing. Used for schema changes and one-off statements.
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, MappingError>;

    async fn execute_prepared(
        &self,
        prepared: &Self::Prepared,
        statement: &Statement,
    ) -> Result<ResultSet, MappingError>;

    /// Submit statements as one logged batch. Conditional statements must share a partition.
    async fn execute_batch(
        &self,
        statements: &[(Self::Prepared, Statement)],
    ) -> Result<ResultSet, MappingError>;

    /// Live definition of a table, or `None` when it does not exist.
    async fn table_definition(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableDefinition>, MappingError>;

    async fn keyspace_exists(&self, keyspace: &str) -> Result<bool, MappingError>;
}

/// Trait for connecting a driver.
#[async_trait]
pub trait DriverConnection: Driver + Sized {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, MappingError>;
}

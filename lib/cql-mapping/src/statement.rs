//! Statement values and the factory that builds them from entity metadata.
//!
//! A [`Statement`] is a plain value: a structured body, the keyspace it
//! targets, and statement-level options. Its CQL text only ever contains
//! identifiers and `?` markers; every runtime value travels separately in
//! [`Statement::values`], in marker order.

use std::fmt::Write as _;

use tracing::warn;

use crate::entity::{ClusteringOrder, ColumnField, KeyRole};
use crate::{
    Consistency, DataType, EntityMetadata, Key, MappingError, RetryPolicy, Value, WriteOptions,
};

/// Options carried alongside the statement text rather than inside it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOptions {
    /// Write timestamp in microseconds since the epoch.
    pub timestamp: Option<i64>,
    pub consistency: Option<Consistency>,
    pub retry_policy: Option<RetryPolicy>,
}

impl From<&WriteOptions> for StatementOptions {
    fn from(options: &WriteOptions) -> Self {
        Self {
            timestamp: options.timestamp,
            consistency: options.consistency,
            retry_policy: options.retry_policy,
        }
    }
}

/// Column of a create-table or add-column statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub is_static: bool,
}

impl From<&ColumnField> for ColumnDef {
    fn from(column: &ColumnField) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
            is_static: column.is_static,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterTable {
    AddColumn(ColumnDef),
    AlterColumn { name: String, data_type: DataType },
    DropColumn(String),
}

/// One `SET` clause of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// column = value
    Set(String, Value),
    /// column = column + value
    Append(String, Value),
    /// column = value + column
    Prepend(String, Value),
    /// column[index] = value
    SetAt {
        column: String,
        index: i32,
        value: Value,
    },
    /// column = column + delta, for counters
    Increment(String, i64),
}

impl Assignment {
    pub fn column(&self) -> &str {
        match self {
            Assignment::Set(column, _)
            | Assignment::Append(column, _)
            | Assignment::Prepend(column, _)
            | Assignment::Increment(column, _) => column,
            Assignment::SetAt { column, .. } => column,
        }
    }
}

/// Filter conditions for selects.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field = value
    Eq(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field IN values
    In(String, Vec<Value>),
    /// collection field CONTAINS value
    Contains(String, Value),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn r#in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains(field.into(), value.into())
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _)
            | Filter::Contains(field, _) => field,
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            Filter::Eq(..) => "=",
            Filter::Gt(..) => ">",
            Filter::Gte(..) => ">=",
            Filter::Lt(..) => "<",
            Filter::Lte(..) => "<=",
            Filter::In(..) => "IN",
            Filter::Contains(..) => "CONTAINS",
        }
    }

    fn value(&self) -> Value {
        match self {
            Filter::In(_, values) => Value::List(values.clone()),
            Filter::Eq(_, value)
            | Filter::Gt(_, value)
            | Filter::Gte(_, value)
            | Filter::Lt(_, value)
            | Filter::Lte(_, value)
            | Filter::Contains(_, value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementBody {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        partition_key: Vec<String>,
        clustering_key: Vec<(String, ClusteringOrder)>,
    },
    AlterTable {
        table: String,
        change: AlterTable,
    },
    CreateIndex {
        table: String,
        index: String,
        column: String,
    },
    DropIndex {
        index: String,
    },
    DropTable {
        table: String,
    },
    Insert {
        table: String,
        columns: Vec<(String, Value)>,
        if_not_exists: bool,
        ttl: Option<u32>,
    },
    Update {
        table: String,
        ttl: Option<u32>,
        assignments: Vec<Assignment>,
        keys: Vec<(String, Value)>,
        /// `IF column = value` conditions.
        conditions: Vec<(String, Value)>,
    },
    Select {
        table: String,
        /// Empty selects every column.
        columns: Vec<String>,
        filters: Vec<Filter>,
        limit: Option<u32>,
        allow_filtering: bool,
    },
    Delete {
        table: String,
        keys: Vec<(String, Value)>,
    },
    /// Caller-supplied CQL text with positional values.
    Raw {
        cql: String,
        values: Vec<Value>,
    },
}

/// A keyspace-scoped statement ready to prepare and execute.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    keyspace: String,
    body: StatementBody,
    options: StatementOptions,
}

impl Statement {
    pub fn new(keyspace: impl Into<String>, body: StatementBody) -> Self {
        Self {
            keyspace: keyspace.into(),
            body,
            options: StatementOptions::default(),
        }
    }

    pub fn raw(keyspace: impl Into<String>, cql: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(
            keyspace,
            StatementBody::Raw {
                cql: cql.into(),
                values,
            },
        )
    }

    pub fn with_options(mut self, options: StatementOptions) -> Self {
        self.options = options;
        self
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn body(&self) -> &StatementBody {
        &self.body
    }

    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    /// Table the statement targets, if any.
    pub fn table(&self) -> Option<&str> {
        match &self.body {
            StatementBody::CreateTable { table, .. }
            | StatementBody::AlterTable { table, .. }
            | StatementBody::CreateIndex { table, .. }
            | StatementBody::DropTable { table }
            | StatementBody::Insert { table, .. }
            | StatementBody::Update { table, .. }
            | StatementBody::Select { table, .. }
            | StatementBody::Delete { table, .. } => Some(table.as_str()),
            StatementBody::DropIndex { .. } | StatementBody::Raw { .. } => None,
        }
    }

    /// Whether the store reports an `[applied]` outcome for this statement.
    pub fn is_conditional(&self) -> bool {
        match &self.body {
            StatementBody::Insert { if_not_exists, .. } => *if_not_exists,
            StatementBody::Update { conditions, .. } => !conditions.is_empty(),
            _ => false,
        }
    }

    pub fn is_schema_change(&self) -> bool {
        matches!(
            self.body,
            StatementBody::CreateTable { .. }
                | StatementBody::AlterTable { .. }
                | StatementBody::CreateIndex { .. }
                | StatementBody::DropIndex { .. }
                | StatementBody::DropTable { .. }
        )
    }

    /// Values for the `?` markers of [`cql`](Self::cql), in marker order.
    pub fn values(&self) -> Vec<Value> {
        match &self.body {
            StatementBody::Insert { columns, ttl, .. } => {
                let mut values: Vec<Value> = columns.iter().map(|(_, v)| v.clone()).collect();
                values.extend(ttl_value(*ttl));
                values
            }
            StatementBody::Update {
                ttl,
                assignments,
                keys,
                conditions,
                ..
            } => {
                let mut values: Vec<Value> = ttl_value(*ttl).into_iter().collect();
                for assignment in assignments {
                    match assignment {
                        Assignment::Set(_, v) | Assignment::Append(_, v) | Assignment::Prepend(_, v) => {
                            values.push(v.clone())
                        }
                        Assignment::SetAt { index, value, .. } => {
                            values.push(Value::Int(*index));
                            values.push(value.clone());
                        }
                        Assignment::Increment(_, delta) => values.push(Value::Counter(*delta)),
                    }
                }
                values.extend(keys.iter().map(|(_, v)| v.clone()));
                values.extend(conditions.iter().map(|(_, v)| v.clone()));
                values
            }
            StatementBody::Select { filters, .. } => filters.iter().map(Filter::value).collect(),
            StatementBody::Delete { keys, .. } => keys.iter().map(|(_, v)| v.clone()).collect(),
            StatementBody::Raw { values, .. } => values.clone(),
            _ => Vec::new(),
        }
    }

    /// CQL text of the statement.
    pub fn cql(&self) -> String {
        let ks = &self.keyspace;
        match &self.body {
            StatementBody::CreateTable {
                table,
                columns,
                partition_key,
                clustering_key,
            } => {
                let mut cql = format!("CREATE TABLE IF NOT EXISTS {} (", qualified(ks, table));
                for column in columns {
                    let _ = write!(cql, "{} {}", ident(&column.name), column.data_type.cql());
                    if column.is_static {
                        cql.push_str(" STATIC");
                    }
                    cql.push_str(", ");
                }
                let partition: Vec<String> = partition_key.iter().map(|c| ident(c)).collect();
                let _ = write!(cql, "PRIMARY KEY (({})", partition.join(", "));
                for (column, _) in clustering_key {
                    let _ = write!(cql, ", {}", ident(column));
                }
                cql.push_str("))");
                if clustering_key
                    .iter()
                    .any(|(_, order)| *order == ClusteringOrder::Desc)
                {
                    let order: Vec<String> = clustering_key
                        .iter()
                        .map(|(column, order)| format!("{} {}", ident(column), order.cql()))
                        .collect();
                    let _ = write!(cql, " WITH CLUSTERING ORDER BY ({})", order.join(", "));
                }
                cql
            }
            StatementBody::AlterTable { table, change } => {
                let target = qualified(ks, table);
                match change {
                    AlterTable::AddColumn(column) => format!(
                        "ALTER TABLE {} ADD {} {}{}",
                        target,
                        ident(&column.name),
                        column.data_type.cql(),
                        if column.is_static { " STATIC" } else { "" }
                    ),
                    AlterTable::AlterColumn { name, data_type } => format!(
                        "ALTER TABLE {} ALTER {} TYPE {}",
                        target,
                        ident(name),
                        data_type.cql()
                    ),
                    AlterTable::DropColumn(name) => {
                        format!("ALTER TABLE {} DROP {}", target, ident(name))
                    }
                }
            }
            StatementBody::CreateIndex {
                table,
                index,
                column,
            } => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                ident(index),
                qualified(ks, table),
                ident(column)
            ),
            StatementBody::DropIndex { index } => {
                format!("DROP INDEX IF EXISTS {}", qualified(ks, index))
            }
            StatementBody::DropTable { table } => {
                format!("DROP TABLE IF EXISTS {}", qualified(ks, table))
            }
            StatementBody::Insert {
                table,
                columns,
                if_not_exists,
                ttl,
            } => {
                let names: Vec<String> = columns.iter().map(|(c, _)| ident(c)).collect();
                let markers = vec!["?"; columns.len()].join(", ");
                let mut cql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    qualified(ks, table),
                    names.join(", "),
                    markers
                );
                if *if_not_exists {
                    cql.push_str(" IF NOT EXISTS");
                }
                if ttl.is_some() {
                    cql.push_str(" USING TTL ?");
                }
                cql
            }
            StatementBody::Update {
                table,
                ttl,
                assignments,
                keys,
                conditions,
            } => {
                let mut cql = format!("UPDATE {}", qualified(ks, table));
                if ttl.is_some() {
                    cql.push_str(" USING TTL ?");
                }
                let sets: Vec<String> = assignments.iter().map(render_assignment).collect();
                let _ = write!(cql, " SET {} WHERE {}", sets.join(", "), equalities(keys, " AND "));
                if !conditions.is_empty() {
                    let _ = write!(cql, " IF {}", equalities(conditions, " AND "));
                }
                cql
            }
            StatementBody::Select {
                table,
                columns,
                filters,
                limit,
                allow_filtering,
            } => {
                let projection = if columns.is_empty() {
                    "*".to_string()
                } else {
                    columns.iter().map(|c| ident(c)).collect::<Vec<_>>().join(", ")
                };
                let mut cql = format!("SELECT {} FROM {}", projection, qualified(ks, table));
                if !filters.is_empty() {
                    let clauses: Vec<String> = filters
                        .iter()
                        .map(|f| format!("{} {} ?", ident(f.field()), f.operator()))
                        .collect();
                    let _ = write!(cql, " WHERE {}", clauses.join(" AND "));
                }
                if let Some(limit) = limit {
                    let _ = write!(cql, " LIMIT {}", limit);
                }
                if *allow_filtering {
                    cql.push_str(" ALLOW FILTERING");
                }
                cql
            }
            StatementBody::Delete { table, keys } => format!(
                "DELETE FROM {} WHERE {}",
                qualified(ks, table),
                equalities(keys, " AND ")
            ),
            StatementBody::Raw { cql, .. } => cql.clone(),
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cql())
    }
}

fn ttl_value(ttl: Option<u32>) -> Option<Value> {
    ttl.map(|seconds| {
        let bound = i32::try_from(seconds).unwrap_or_else(|_| {
            warn!(ttl = seconds, "TTL does not fit the protocol's int, clamping");
            i32::MAX
        });
        Value::Int(bound)
    })
}

fn render_assignment(assignment: &Assignment) -> String {
    match assignment {
        Assignment::Set(column, _) => format!("{} = ?", ident(column)),
        Assignment::Append(column, _) | Assignment::Increment(column, _) => {
            format!("{0} = {0} + ?", ident(column))
        }
        Assignment::Prepend(column, _) => format!("{0} = ? + {0}", ident(column)),
        Assignment::SetAt { column, .. } => format!("{}[?] = ?", ident(column)),
    }
}

fn equalities(pairs: &[(String, Value)], separator: &str) -> String {
    pairs
        .iter()
        .map(|(column, _)| format!("{} = ?", ident(column)))
        .collect::<Vec<_>>()
        .join(separator)
}

fn qualified(keyspace: &str, name: &str) -> String {
    format!("{}.{}", ident(keyspace), ident(name))
}

// Reserved CQL keywords, sorted. These cannot appear unquoted as identifiers.
const RESERVED: &[&str] = &[
    "add", "allow", "alter", "and", "apply", "asc", "authorize", "batch", "begin", "by",
    "columnfamily", "create", "delete", "desc", "describe", "drop", "entries", "execute", "from",
    "full", "grant", "if", "in", "index", "infinity", "insert", "into", "is", "keyspace", "limit",
    "materialized", "modify", "nan", "norecursive", "not", "null", "of", "on", "or", "order",
    "primary", "rename", "replace", "revoke", "schema", "select", "set", "table", "to", "token",
    "truncate", "unlogged", "unset", "update", "use", "using", "view", "where", "with",
];

/// Quote identifiers the store would otherwise fold to lower case or parse as keywords.
pub fn ident(name: &str) -> String {
    let plain = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && RESERVED.binary_search(&name).is_err();
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Largest TTL the store accepts, twenty years in seconds.
pub const MAX_TTL: u32 = 630_720_000;

/// Effective TTL: the explicit option, else the type's default. Zero means no expiry.
pub fn effective_ttl(
    metadata: &EntityMetadata,
    options: &WriteOptions,
) -> Result<Option<u32>, MappingError> {
    match options.ttl.or(metadata.default_ttl()) {
        Some(seconds) if seconds > MAX_TTL => Err(MappingError::InvalidOperation(format!(
            "TTL of {} seconds on {} exceeds the maximum of {}",
            seconds,
            metadata.table_name(),
            MAX_TTL
        ))),
        ttl => Ok(ttl.filter(|seconds| *seconds > 0)),
    }
}

/// Builds statements for one entity type in one keyspace.
#[derive(Debug, Clone, Copy)]
pub struct StatementFactory<'a> {
    keyspace: &'a str,
    metadata: &'a EntityMetadata,
}

impl<'a> StatementFactory<'a> {
    pub fn new(keyspace: &'a str, metadata: &'a EntityMetadata) -> Self {
        Self { keyspace, metadata }
    }

    fn table(&self) -> String {
        self.metadata.table_name().to_string()
    }

    fn statement(&self, body: StatementBody) -> Statement {
        Statement::new(self.keyspace, body)
    }

    pub fn create_table(&self) -> Statement {
        let meta = self.metadata;
        self.statement(StatementBody::CreateTable {
            table: self.table(),
            columns: meta.columns().iter().map(ColumnDef::from).collect(),
            partition_key: meta.partition_key().map(|c| c.name.clone()).collect(),
            clustering_key: meta
                .clustering_key()
                .map(|c| match c.key {
                    KeyRole::Clustering(order) => (c.name.clone(), order),
                    _ => (c.name.clone(), ClusteringOrder::Asc),
                })
                .collect(),
        })
    }

    pub fn create_index(&self, column: &str, index: &str) -> Statement {
        self.statement(StatementBody::CreateIndex {
            table: self.table(),
            index: index.to_string(),
            column: column.to_string(),
        })
    }

    pub fn drop_index(&self, index: &str) -> Statement {
        self.statement(StatementBody::DropIndex {
            index: index.to_string(),
        })
    }

    pub fn drop_table(&self) -> Statement {
        self.statement(StatementBody::DropTable { table: self.table() })
    }

    pub fn add_column(&self, column: &ColumnField) -> Statement {
        self.alter(AlterTable::AddColumn(ColumnDef::from(column)))
    }

    /// Change a regular column's type. Key and static columns are immutable.
    pub fn alter_column(&self, column: &ColumnField) -> Result<Statement, MappingError> {
        if column.is_key() || column.is_static {
            return Err(MappingError::UnsupportedSchemaChange {
                table: self.table(),
                column: column.name.clone(),
                reason: if column.is_static {
                    "static column types cannot change".to_string()
                } else {
                    "key column types cannot change".to_string()
                },
            });
        }

        Ok(self.alter(AlterTable::AlterColumn {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
        }))
    }

    pub fn drop_column(&self, name: &str) -> Statement {
        self.alter(AlterTable::DropColumn(name.to_string()))
    }

    fn alter(&self, change: AlterTable) -> Statement {
        self.statement(StatementBody::AlterTable {
            table: self.table(),
            change,
        })
    }

    /// Insert every non-null, non-counter column. `values` holds one value per declared column.
    pub fn insert(
        &self,
        values: &[Value],
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        self.check_arity(values)?;
        self.key_from_values(values)?;
        let columns = self
            .metadata
            .columns()
            .iter()
            .zip(values)
            .filter(|(column, value)| !column.is_counter() && !value.is_null())
            .map(|(column, value)| Ok((column.name.clone(), self.coerce(column, value.clone())?)))
            .collect::<Result<Vec<_>, MappingError>>()?;

        Ok(self
            .statement(StatementBody::Insert {
                table: self.table(),
                columns,
                if_not_exists: false,
                ttl: effective_ttl(self.metadata, options)?,
            })
            .with_options(options.into()))
    }

    /// Update every non-null regular column if the stored version equals `expected`.
    ///
    /// `values` must already carry the next version in the version column.
    pub fn update_versioned(
        &self,
        values: &[Value],
        expected: i64,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        self.check_arity(values)?;
        let version = self.metadata.version_field().ok_or_else(|| {
            MappingError::InvalidOperation(format!(
                "{} declares no version field",
                self.metadata.entity_name()
            ))
        })?;
        let keys = self.bind_key(&self.key_from_values(values)?)?;
        let assignments = self
            .metadata
            .columns()
            .iter()
            .zip(values)
            .filter(|(column, value)| !column.is_key() && !column.is_counter() && !value.is_null())
            .map(|(column, value)| {
                Ok(Assignment::Set(column.name.clone(), self.coerce(column, value.clone())?))
            })
            .collect::<Result<Vec<_>, MappingError>>()?;
        let expected = self.coerce(version, Value::BigInt(expected))?;

        Ok(self
            .statement(StatementBody::Update {
                table: self.table(),
                ttl: effective_ttl(self.metadata, options)?,
                assignments,
                keys,
                conditions: vec![(version.name.clone(), expected)],
            })
            .with_options(options.into()))
    }

    /// Select by a full primary key, or by a prefix covering at least the partition key.
    pub fn select(&self, key: &Key) -> Result<Statement, MappingError> {
        let keys = self.bind_key_prefix(key)?;
        Ok(self.statement(StatementBody::Select {
            table: self.table(),
            columns: Vec::new(),
            filters: keys.into_iter().map(|(c, v)| Filter::Eq(c, v)).collect(),
            limit: None,
            allow_filtering: false,
        }))
    }

    /// Select rows matching arbitrary filters. Values are converted to the filtered column's type.
    pub fn select_where(&self, filters: Vec<Filter>) -> Result<Statement, MappingError> {
        let filters = filters
            .into_iter()
            .map(|filter| self.coerce_filter(filter))
            .collect::<Result<Vec<_>, MappingError>>()?;
        let allow_filtering = filters.iter().any(|f| {
            self.metadata
                .column(f.field())
                .is_some_and(|c| !c.is_key() && c.index.is_none())
        });

        Ok(self.statement(StatementBody::Select {
            table: self.table(),
            columns: Vec::new(),
            filters,
            limit: None,
            allow_filtering,
        }))
    }

    pub fn delete(&self, key: &Key, options: &WriteOptions) -> Result<Statement, MappingError> {
        let keys = self.bind_key(key)?;
        Ok(self
            .statement(StatementBody::Delete {
                table: self.table(),
                keys,
            })
            .with_options(options.into()))
    }

    /// Add to a collection: a single element or a whole collection of elements.
    pub fn append(
        &self,
        key: &Key,
        column: &str,
        value: Value,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        let field = self.collection(column)?;
        let value = self.collection_delta(field, value)?;
        self.update(key, vec![Assignment::Append(field.name.clone(), value)], options)
    }

    /// Insert elements before the head of a list, keeping the order given.
    pub fn prepend(
        &self,
        key: &Key,
        column: &str,
        value: Value,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        let field = self.list(column)?;
        let value = self.collection_delta(field, value)?;
        self.update(key, vec![Assignment::Prepend(field.name.clone(), value)], options)
    }

    /// Overwrite the list element at a zero-based index.
    pub fn replace_at(
        &self,
        key: &Key,
        column: &str,
        value: Value,
        index: usize,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        let field = self.list(column)?;
        let element = match field.data_type.unfrozen() {
            DataType::List(element) => element.as_ref(),
            other => other,
        };
        let value = value
            .coerce(element)
            .map_err(|reason| MappingError::codec(&field.name, reason))?;
        let index = i32::try_from(index).map_err(|_| {
            MappingError::InvalidOperation(format!("list index {} is out of range", index))
        })?;
        self.update(
            key,
            vec![Assignment::SetAt {
                column: field.name.clone(),
                index,
                value,
            }],
            options,
        )
    }

    /// Clear a collection to empty.
    pub fn delete_value(
        &self,
        key: &Key,
        column: &str,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        let field = self.collection(column)?;
        let empty = match field.data_type.unfrozen() {
            DataType::List(_) => Value::List(Vec::new()),
            DataType::Set(_) => Value::Set(Vec::new()),
            _ => Value::Map(Vec::new()),
        };
        self.update(key, vec![Assignment::Set(field.name.clone(), empty)], options)
    }

    /// Set individual columns by key without touching the rest of the row.
    pub fn update_values(
        &self,
        key: &Key,
        updates: Vec<(String, Value)>,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        if updates.is_empty() {
            return Err(MappingError::InvalidOperation(
                "update_values needs at least one column".to_string(),
            ));
        }
        let assignments = updates
            .into_iter()
            .map(|(name, value)| {
                let field = self.metadata.require_column(&name)?;
                if field.is_key() {
                    return Err(MappingError::InvalidOperation(format!(
                        "key column {} cannot be updated",
                        field.name
                    )));
                }
                if field.is_counter() {
                    return Err(MappingError::InvalidOperation(format!(
                        "counter column {} only supports increments",
                        field.name
                    )));
                }
                Ok(Assignment::Set(field.name.clone(), self.coerce(field, value)?))
            })
            .collect::<Result<Vec<_>, MappingError>>()?;
        self.update(key, assignments, options)
    }

    /// Add `delta` to a counter column.
    pub fn increment(
        &self,
        key: &Key,
        column: &str,
        delta: i64,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        let field = self.metadata.require_column(column)?;
        if !field.is_counter() {
            return Err(MappingError::InvalidOperation(format!(
                "column {} is not a counter",
                field.name
            )));
        }
        let options = WriteOptions {
            ttl: Some(0),
            ..options.clone()
        };
        self.update(key, vec![Assignment::Increment(field.name.clone(), delta)], &options)
    }

    fn update(
        &self,
        key: &Key,
        assignments: Vec<Assignment>,
        options: &WriteOptions,
    ) -> Result<Statement, MappingError> {
        let keys = self.bind_key(key)?;
        Ok(self
            .statement(StatementBody::Update {
                table: self.table(),
                ttl: effective_ttl(self.metadata, options)?,
                assignments,
                keys,
                conditions: Vec::new(),
            })
            .with_options(options.into()))
    }

    /// Primary key of a record from its column values.
    pub fn key_from_values(&self, values: &[Value]) -> Result<Key, MappingError> {
        self.check_arity(values)?;
        let components = self
            .metadata
            .key_positions()
            .iter()
            .map(|&i| values[i].clone())
            .collect();
        let key = Key::new(components);
        self.bind_key(&key)?;
        Ok(key)
    }

    fn bind_key(&self, key: &Key) -> Result<Vec<(String, Value)>, MappingError> {
        if key.len() != self.metadata.primary_key_len() {
            return Err(self.invalid_key(format!(
                "expected {} key components, got {}",
                self.metadata.primary_key_len(),
                key.len()
            )));
        }
        self.bind_key_prefix(key)
    }

    fn bind_key_prefix(&self, key: &Key) -> Result<Vec<(String, Value)>, MappingError> {
        let partition_len = self.metadata.partition_key().count();
        if key.len() < partition_len || key.len() > self.metadata.primary_key_len() {
            return Err(self.invalid_key(format!(
                "expected between {} and {} key components, got {}",
                partition_len,
                self.metadata.primary_key_len(),
                key.len()
            )));
        }

        self.metadata
            .primary_key()
            .zip(key.components())
            .map(|(column, value)| {
                if value.is_null() {
                    return Err(self.invalid_key(format!("key column {} is null", column.name)));
                }
                let value = value
                    .clone()
                    .coerce(&column.data_type)
                    .map_err(|reason| self.invalid_key(reason))?;
                Ok((column.name.clone(), value))
            })
            .collect()
    }

    fn invalid_key(&self, reason: String) -> MappingError {
        MappingError::InvalidKey {
            table: self.table(),
            reason,
        }
    }

    fn check_arity(&self, values: &[Value]) -> Result<(), MappingError> {
        if values.len() != self.metadata.columns().len() {
            return Err(MappingError::InvalidOperation(format!(
                "{} declares {} columns, got {} values",
                self.metadata.entity_name(),
                self.metadata.columns().len(),
                values.len()
            )));
        }
        Ok(())
    }

    fn coerce(&self, column: &ColumnField, value: Value) -> Result<Value, MappingError> {
        value
            .coerce(&column.data_type)
            .map_err(|reason| MappingError::codec(&column.name, reason))
    }

    fn coerce_filter(&self, filter: Filter) -> Result<Filter, MappingError> {
        let column = self.metadata.require_column(filter.field())?;
        let name = column.name.clone();
        let element = match column.data_type.unfrozen() {
            DataType::List(element) | DataType::Set(element) => element.as_ref().clone(),
            DataType::Map(_, value) => value.as_ref().clone(),
            other => other.clone(),
        };
        Ok(match filter {
            Filter::Eq(_, v) => Filter::Eq(name, self.coerce(column, v)?),
            Filter::Gt(_, v) => Filter::Gt(name, self.coerce(column, v)?),
            Filter::Gte(_, v) => Filter::Gte(name, self.coerce(column, v)?),
            Filter::Lt(_, v) => Filter::Lt(name, self.coerce(column, v)?),
            Filter::Lte(_, v) => Filter::Lte(name, self.coerce(column, v)?),
            Filter::In(_, values) => Filter::In(
                name,
                values
                    .into_iter()
                    .map(|v| self.coerce(column, v))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Filter::Contains(_, v) => Filter::Contains(
                name,
                v.coerce(&element)
                    .map_err(|reason| MappingError::codec(&column.name, reason))?,
            ),
        })
    }

    fn collection(&self, column: &str) -> Result<&'a ColumnField, MappingError> {
        let field = self.metadata.require_column(column)?;
        if !field.data_type.is_collection() || field.data_type.is_frozen() {
            return Err(MappingError::InvalidOperation(format!(
                "column {} is not a mutable collection",
                field.name
            )));
        }
        Ok(field)
    }

    fn list(&self, column: &str) -> Result<&'a ColumnField, MappingError> {
        let field = self.collection(column)?;
        if !matches!(field.data_type, DataType::List(_)) {
            return Err(MappingError::InvalidOperation(format!(
                "column {} is not a list",
                field.name
            )));
        }
        Ok(field)
    }

    // A lone element is wrapped into a one-element collection of the column's kind.
    fn collection_delta(&self, field: &ColumnField, value: Value) -> Result<Value, MappingError> {
        let wrapped = match (&field.data_type, value) {
            (DataType::List(_) | DataType::Set(_), value @ (Value::List(_) | Value::Set(_))) => value,
            (DataType::List(_), element) => Value::List(vec![element]),
            (DataType::Set(_), element) => Value::Set(vec![element]),
            (_, value) => value,
        };
        self.coerce(field, wrapped)
    }
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;

    use super::*;
    use crate::{EntityDescriptor, FieldDescriptor};

    fn expenses() -> EntityMetadata {
        let descriptor = EntityDescriptor::new("Expense", "expenses")
            .default_ttl(60)
            .field(FieldDescriptor::new("user", DataType::Text).partition_key())
            .field(
                FieldDescriptor::new("expense_id", DataType::Int)
                    .clustering_key(ClusteringOrder::Desc),
            )
            .field(FieldDescriptor::new("balance", DataType::BigInt).static_column())
            .field(FieldDescriptor::new("amount", DataType::Double))
            .field(FieldDescriptor::new("tags", DataType::list(DataType::Text)).index("expense_tags_idx"))
            .field(FieldDescriptor::new("labels", DataType::set(DataType::Text)))
            .field(FieldDescriptor::new("version", DataType::BigInt).version());
        EntityMetadata::from_descriptor(TypeId::of::<u8>(), descriptor).unwrap()
    }

    fn key() -> Key {
        Key::from(("ada", 7))
    }

    #[test]
    fn create_table_renders_keys_static_and_order() {
        let meta = expenses();
        let cql = StatementFactory::new("ledger", &meta).create_table().cql();
        assert_eq!(
            cql,
            "CREATE TABLE IF NOT EXISTS ledger.expenses (user text, expense_id int, \
             balance bigint STATIC, amount double, tags list<text>, labels set<text>, \
             version bigint, PRIMARY KEY ((user), expense_id)) \
             WITH CLUSTERING ORDER BY (expense_id DESC)"
        );
    }

    #[test]
    fn ddl_statements_use_idempotent_forms() {
        let meta = expenses();
        let factory = StatementFactory::new("ledger", &meta);
        assert_eq!(
            factory.create_index("tags", "expense_tags_idx").cql(),
            "CREATE INDEX IF NOT EXISTS expense_tags_idx ON ledger.expenses (tags)"
        );
        assert_eq!(
            factory.drop_index("expense_tags_idx").cql(),
            "DROP INDEX IF EXISTS ledger.expense_tags_idx"
        );
        assert_eq!(factory.drop_table().cql(), "DROP TABLE IF EXISTS ledger.expenses");
        assert_eq!(
            factory.add_column(meta.column("balance").unwrap()).cql(),
            "ALTER TABLE ledger.expenses ADD balance bigint STATIC"
        );
        assert_eq!(
            factory.alter_column(meta.column("amount").unwrap()).unwrap().cql(),
            "ALTER TABLE ledger.expenses ALTER amount TYPE double"
        );
        assert_eq!(
            factory.drop_column("legacy").cql(),
            "ALTER TABLE ledger.expenses DROP legacy"
        );
    }

    #[test]
    fn altering_key_or_static_columns_is_rejected() {
        let meta = expenses();
        let factory = StatementFactory::new("ledger", &meta);
        for column in ["user", "expense_id", "balance"] {
            let err = factory.alter_column(meta.column(column).unwrap()).unwrap_err();
            assert!(matches!(err, MappingError::UnsupportedSchemaChange { .. }));
        }
    }

    #[test]
    fn insert_binds_non_null_values_and_ttl() {
        let meta = expenses();
        let values = vec![
            Value::from("ada"),
            Value::from(7),
            Value::Null,
            Value::from(12.5),
            Value::from(vec!["food"]),
            Value::Null,
            Value::from(1i64),
        ];
        let statement = StatementFactory::new("ledger", &meta)
            .insert(&values, &WriteOptions::new().timestamp(99))
            .unwrap();
        assert_eq!(
            statement.cql(),
            "INSERT INTO ledger.expenses (user, expense_id, amount, tags, version) \
             VALUES (?, ?, ?, ?, ?) USING TTL ?"
        );
        assert_eq!(statement.values().len(), 6);
        assert_eq!(statement.values()[5], Value::Int(60));
        assert_eq!(statement.options().timestamp, Some(99));
    }

    #[test]
    fn zero_ttl_disables_the_type_default() {
        let meta = expenses();
        assert_eq!(effective_ttl(&meta, &WriteOptions::new()).unwrap(), Some(60));
        assert_eq!(effective_ttl(&meta, &WriteOptions::new().ttl(5)).unwrap(), Some(5));
        assert_eq!(effective_ttl(&meta, &WriteOptions::new().ttl(0)).unwrap(), None);
    }

    #[test]
    fn oversized_ttls_are_rejected() {
        let meta = expenses();
        let factory = StatementFactory::new("ledger", &meta);
        let too_long = WriteOptions::new().ttl(MAX_TTL + 1);
        assert!(matches!(
            effective_ttl(&meta, &too_long),
            Err(MappingError::InvalidOperation(_))
        ));
        assert!(factory
            .append(&key(), "tags", Value::from("x"), &too_long)
            .is_err());
        assert_eq!(
            effective_ttl(&meta, &WriteOptions::new().ttl(MAX_TTL)).unwrap(),
            Some(MAX_TTL)
        );
    }

    #[test]
    fn versioned_update_is_conditional() {
        let meta = expenses();
        let values = vec![
            Value::from("ada"),
            Value::from(7),
            Value::Null,
            Value::from(3.0),
            Value::Null,
            Value::Null,
            Value::from(4i64),
        ];
        let statement = StatementFactory::new("ledger", &meta)
            .update_versioned(&values, 3, &WriteOptions::new().ttl(0))
            .unwrap();
        assert_eq!(
            statement.cql(),
            "UPDATE ledger.expenses SET amount = ?, version = ? \
             WHERE user = ? AND expense_id = ? IF version = ?"
        );
        assert_eq!(
            statement.values(),
            vec![
                Value::Double(3.0),
                Value::BigInt(4),
                Value::from("ada"),
                Value::Int(7),
                Value::BigInt(3)
            ]
        );
        assert!(statement.is_conditional());
    }

    #[test]
    fn collection_deltas() {
        let meta = expenses();
        let factory = StatementFactory::new("ledger", &meta);
        let none = WriteOptions::new().ttl(0);

        let append = factory.append(&key(), "tags", Value::from("x"), &none).unwrap();
        assert_eq!(
            append.cql(),
            "UPDATE ledger.expenses SET tags = tags + ? WHERE user = ? AND expense_id = ?"
        );
        assert_eq!(append.values()[0], Value::List(vec![Value::from("x")]));

        let prepend = factory
            .prepend(&key(), "tags", Value::from(vec!["a", "b"]), &none)
            .unwrap();
        assert_eq!(
            prepend.cql(),
            "UPDATE ledger.expenses SET tags = ? + tags WHERE user = ? AND expense_id = ?"
        );
        assert_eq!(
            prepend.values()[0],
            Value::List(vec![Value::from("a"), Value::from("b")])
        );

        let replace = factory.replace_at(&key(), "tags", Value::from("z"), 1, &none).unwrap();
        assert_eq!(
            replace.cql(),
            "UPDATE ledger.expenses SET tags[?] = ? WHERE user = ? AND expense_id = ?"
        );
        assert_eq!(&replace.values()[..2], &[Value::Int(1), Value::from("z")]);

        let clear = factory.delete_value(&key(), "labels", &none).unwrap();
        assert_eq!(clear.values()[0], Value::Set(Vec::new()));

        assert!(factory.prepend(&key(), "labels", Value::from("a"), &none).is_err());
        assert!(factory.append(&key(), "amount", Value::from(1.0), &none).is_err());
    }

    #[test]
    fn keys_must_match_the_primary_key() {
        let meta = expenses();
        let factory = StatementFactory::new("ledger", &meta);
        assert!(matches!(
            factory.delete(&Key::from("ada"), &WriteOptions::new()),
            Err(MappingError::InvalidKey { .. })
        ));
        assert!(factory.select(&Key::from("ada")).is_ok());
        assert_eq!(
            factory.select(&key()).unwrap().cql(),
            "SELECT * FROM ledger.expenses WHERE user = ? AND expense_id = ?"
        );
    }

    #[test]
    fn select_where_allows_filtering_on_unindexed_columns() {
        let meta = expenses();
        let factory = StatementFactory::new("ledger", &meta);
        let indexed = factory
            .select_where(vec![Filter::contains("tags", "food")])
            .unwrap();
        assert_eq!(
            indexed.cql(),
            "SELECT * FROM ledger.expenses WHERE tags CONTAINS ?"
        );
        let scan = factory.select_where(vec![Filter::gt("amount", 10)]).unwrap();
        assert_eq!(
            scan.cql(),
            "SELECT * FROM ledger.expenses WHERE amount > ? ALLOW FILTERING"
        );
        assert_eq!(scan.values(), vec![Value::Double(10.0)]);
    }

    #[test]
    fn mixed_case_identifiers_are_quoted() {
        assert_eq!(ident("balance"), "balance");
        assert_eq!(ident("userName"), "\"userName\"");
    }

    #[test]
    fn reserved_words_are_quoted() {
        assert_eq!(ident("order"), "\"order\"");
        assert_eq!(ident("select"), "\"select\"");
        assert_eq!(ident("user"), "user");

        let descriptor = EntityDescriptor::new("Line", "lines")
            .field(FieldDescriptor::new("from", DataType::Text).partition_key())
            .field(FieldDescriptor::new("order", DataType::Int));
        let meta = EntityMetadata::from_descriptor(TypeId::of::<u16>(), descriptor).unwrap();
        let factory = StatementFactory::new("ledger", &meta);
        assert_eq!(
            factory.select(&Key::from("a")).unwrap().cql(),
            "SELECT * FROM ledger.lines WHERE \"from\" = ?"
        );
    }
}

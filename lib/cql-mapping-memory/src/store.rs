//! Tables, partitions and cells with CQL write semantics.
//!
//! Cells carry their write timestamp and optional expiry. A write only
//! replaces a cell written at the same or an earlier timestamp, rows exist
//! while their insert marker or any regular cell is live, and static cells
//! belong to the partition. Collections are stored as whole values.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use cql_mapping::{
    AlterTable, Assignment, ClusteringOrder, ColumnDef, ColumnKind, DataType, Filter, LiveColumn,
    MappingError, ResultSet, Row, Statement, StatementBody, TableDefinition, Value,
};

use crate::raw::parse_select;

fn norm(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn invalid(message: impl Into<String>) -> MappingError {
    MappingError::Driver(message.into())
}

#[derive(Debug, Clone)]
struct Cell {
    value: Value,
    written: i64,
    expires: Option<Instant>,
}

impl Cell {
    fn live(&self, now: Instant) -> bool {
        self.expires.is_none_or(|at| at > now)
    }
}

/// Timestamp and expiry applied to every cell a statement writes.
#[derive(Debug, Clone, Copy)]
struct Write {
    timestamp: i64,
    expires: Option<Instant>,
}

impl Write {
    fn cell(&self, value: Value) -> Cell {
        Cell {
            value,
            written: self.timestamp,
            expires: self.expires,
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnSchema {
    name: String,
    data_type: DataType,
    kind: ColumnKind,
    order: ClusteringOrder,
}

#[derive(Debug, Clone, Default)]
struct StoredRow {
    clustering: Vec<Value>,
    marker: Option<Cell>,
    cells: HashMap<String, Cell>,
}

impl StoredRow {
    fn live(&self, now: Instant) -> bool {
        self.marker.as_ref().is_some_and(|m| m.live(now)) || self.cells.values().any(|c| c.live(now))
    }
}

#[derive(Debug, Clone)]
struct Partition {
    key: Vec<Value>,
    statics: HashMap<String, Cell>,
    rows: Vec<StoredRow>,
}

#[derive(Debug, Clone)]
struct Table {
    name: String,
    columns: Vec<ColumnSchema>,
    partitions: Vec<Partition>,
}

/// A statement's key split into partition and clustering components.
struct KeyParts {
    partition: Vec<Value>,
    clustering: Vec<Value>,
}

impl Table {
    fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn require_column(&self, name: &str) -> Result<&ColumnSchema, MappingError> {
        self.column(name)
            .ok_or_else(|| invalid(format!("Undefined column name {} in table {}", name, self.name)))
    }

    fn keys_of(&self, kind: ColumnKind) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(move |c| c.kind == kind)
    }

    fn clustering_len(&self) -> usize {
        self.keys_of(ColumnKind::Clustering).count()
    }

    fn clustering_orders(&self) -> Vec<ClusteringOrder> {
        self.keys_of(ColumnKind::Clustering).map(|c| c.order).collect()
    }

    fn split_key(&self, pairs: &[(String, Value)]) -> Result<KeyParts, MappingError> {
        let find = |column: &ColumnSchema| {
            pairs
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
                .map(|(_, value)| value.clone())
        };

        let partition = self
            .keys_of(ColumnKind::PartitionKey)
            .map(|column| {
                find(column).ok_or_else(|| {
                    invalid(format!("Missing mandatory PRIMARY KEY part {}", column.name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut clustering = Vec::new();
        for column in self.keys_of(ColumnKind::Clustering) {
            match find(column) {
                Some(value) => clustering.push(value),
                None => break,
            }
        }

        for (name, value) in pairs {
            let column = self.require_column(name)?;
            if column.kind == ColumnKind::PartitionKey || column.kind == ColumnKind::Clustering {
                if value.is_null() {
                    return Err(invalid(format!("Invalid null value for key column {}", name)));
                }
            } else {
                return Err(invalid(format!("Non PRIMARY KEY column {} found in where clause", name)));
            }
        }

        Ok(KeyParts {
            partition,
            clustering,
        })
    }

    fn partition(&self, key: &[Value]) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.key == key)
    }

    fn partition_mut(&mut self, key: Vec<Value>) -> &mut Partition {
        let position = match self.partitions.iter().position(|p| p.key == key) {
            Some(position) => position,
            None => {
                self.partitions.push(Partition {
                    key,
                    statics: HashMap::new(),
                    rows: Vec::new(),
                });
                self.partitions.len() - 1
            }
        };
        &mut self.partitions[position]
    }
}

impl Partition {
    fn row(&self, clustering: &[Value]) -> Option<&StoredRow> {
        self.rows.iter().find(|r| r.clustering == clustering)
    }

    fn row_mut(&mut self, clustering: Vec<Value>, orders: &[ClusteringOrder]) -> &mut StoredRow {
        let position = match self.rows.iter().position(|r| r.clustering == clustering) {
            Some(position) => position,
            None => {
                let at = self
                    .rows
                    .iter()
                    .position(|r| compare_clustering(&r.clustering, &clustering, orders) == Ordering::Greater)
                    .unwrap_or(self.rows.len());
                self.rows.insert(
                    at,
                    StoredRow {
                        clustering,
                        ..StoredRow::default()
                    },
                );
                at
            }
        };
        &mut self.rows[position]
    }
}

fn compare_clustering(a: &[Value], b: &[Value], orders: &[ClusteringOrder]) -> Ordering {
    for ((x, y), order) in a.iter().zip(b).zip(orders) {
        let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
        let ordering = match order {
            ClusteringOrder::Asc => ordering,
            ClusteringOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Uuid(x) | Value::Timeuuid(x), Value::Uuid(y) | Value::Timeuuid(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Blob(x), Value::Blob(y)) => Some(x.cmp(y)),
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::List(items) | Value::Set(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        _ => false,
    }
}

/// Write a cell unless a newer write already holds it. Null and empty collections delete.
fn write_cell(cells: &mut HashMap<String, Cell>, column: &str, value: Value, write: &Write) {
    if cells
        .get(column)
        .is_some_and(|existing| existing.written > write.timestamp)
    {
        return;
    }
    if is_empty_value(&value) {
        cells.remove(column);
    } else {
        cells.insert(column.to_string(), write.cell(value));
    }
}

fn live_value(cells: &HashMap<String, Cell>, column: &str, now: Instant) -> Option<Value> {
    cells
        .get(column)
        .filter(|cell| cell.live(now))
        .map(|cell| cell.value.clone())
}

fn sort_set(items: &mut Vec<Value>) {
    items.sort_by(|a, b| compare_values(a, b).unwrap_or(Ordering::Equal));
    items.dedup_by(|a, b| values_equal(a, b));
}

fn append(current: Option<Value>, delta: Value) -> Value {
    match (current, delta) {
        (Some(Value::List(mut items)), Value::List(more)) => {
            items.extend(more);
            Value::List(items)
        }
        (Some(Value::Set(mut items)), Value::Set(more)) => {
            items.extend(more);
            sort_set(&mut items);
            Value::Set(items)
        }
        (Some(Value::Map(mut entries)), Value::Map(more)) => {
            for (key, value) in more {
                match entries.iter_mut().find(|(k, _)| values_equal(k, &key)) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
            }
            Value::Map(entries)
        }
        (_, Value::Set(mut items)) => {
            sort_set(&mut items);
            Value::Set(items)
        }
        (_, delta) => delta,
    }
}

fn prepend(current: Option<Value>, delta: Value) -> Value {
    match (current, delta) {
        (Some(Value::List(items)), Value::List(mut head)) => {
            head.extend(items);
            Value::List(head)
        }
        (_, delta) => delta,
    }
}

fn filter_matches(filter: &Filter, values: &HashMap<String, Value>) -> bool {
    let current = values.get(&norm(filter.field())).unwrap_or(&Value::Null);
    let compared = |v: &Value| compare_values(current, v);
    match filter {
        Filter::Eq(_, v) => values_equal(current, v),
        Filter::Gt(_, v) => compared(v) == Some(Ordering::Greater),
        Filter::Gte(_, v) => matches!(compared(v), Some(Ordering::Greater | Ordering::Equal)),
        Filter::Lt(_, v) => compared(v) == Some(Ordering::Less),
        Filter::Lte(_, v) => matches!(compared(v), Some(Ordering::Less | Ordering::Equal)),
        Filter::In(_, candidates) => candidates.iter().any(|v| values_equal(current, v)),
        Filter::Contains(_, v) => match current {
            Value::List(items) | Value::Set(items) => items.iter().any(|item| values_equal(item, v)),
            Value::Map(entries) => entries.iter().any(|(_, item)| values_equal(item, v)),
            _ => false,
        },
    }
}

#[derive(Debug, Clone)]
struct Index {
    name: String,
    table: String,
    column: String,
}

/// Keyspaces, tables and secondary-index metadata.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    keyspaces: HashSet<String>,
    tables: HashMap<(String, String), Table>,
    indexes: HashMap<(String, String), Index>,
}

impl Store {
    pub fn create_keyspace(&mut self, keyspace: &str) {
        self.keyspaces.insert(norm(keyspace));
    }

    pub fn keyspace_exists(&self, keyspace: &str) -> bool {
        self.keyspaces.contains(&norm(keyspace))
    }

    pub fn table_definition(&self, keyspace: &str, table: &str) -> Option<TableDefinition> {
        let stored = self.tables.get(&(norm(keyspace), norm(table)))?;
        let mut definition = TableDefinition::new(stored.name.clone());
        for column in &stored.columns {
            let mut live = LiveColumn::new(column.name.clone(), column.data_type.cql(), column.kind);
            if column.kind == ColumnKind::Clustering {
                live.clustering_order = Some(column.order);
            }
            definition = definition.with_column(live);
        }
        let mut indexes: Vec<&Index> = self
            .indexes
            .iter()
            .filter(|((ks, _), index)| *ks == norm(keyspace) && index.table == norm(table))
            .map(|(_, index)| index)
            .collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        for index in indexes {
            definition = definition.with_index(index.name.clone(), index.column.clone());
        }
        Some(definition)
    }

    fn table(&self, keyspace: &str, table: &str) -> Result<&Table, MappingError> {
        self.tables
            .get(&(norm(keyspace), norm(table)))
            .ok_or_else(|| invalid(format!("unconfigured table {}.{}", keyspace, table)))
    }

    fn table_mut(&mut self, keyspace: &str, table: &str) -> Result<&mut Table, MappingError> {
        self.tables
            .get_mut(&(norm(keyspace), norm(table)))
            .ok_or_else(|| invalid(format!("unconfigured table {}.{}", keyspace, table)))
    }

    /// Apply one statement. `timestamp` is used when the statement carries none.
    pub fn apply(
        &mut self,
        statement: &Statement,
        timestamp: i64,
        now: Instant,
    ) -> Result<ResultSet, MappingError> {
        let keyspace = statement.keyspace();
        let write = |ttl: &Option<u32>| Write {
            timestamp: statement.options().timestamp.unwrap_or(timestamp),
            expires: ttl.map(|seconds| now + Duration::from_secs(u64::from(seconds))),
        };

        match statement.body() {
            StatementBody::CreateTable {
                table,
                columns,
                partition_key,
                clustering_key,
            } => self.create_table(keyspace, table, columns, partition_key, clustering_key),
            StatementBody::AlterTable { table, change } => self.alter_table(keyspace, table, change),
            StatementBody::CreateIndex {
                table,
                index,
                column,
            } => self.create_index(keyspace, table, index, column),
            StatementBody::DropIndex { index } => {
                self.indexes.remove(&(norm(keyspace), norm(index)));
                Ok(ResultSet::empty())
            }
            StatementBody::DropTable { table } => {
                self.tables.remove(&(norm(keyspace), norm(table)));
                let table = norm(table);
                self.indexes
                    .retain(|(ks, _), index| *ks != norm(keyspace) || index.table != table);
                Ok(ResultSet::empty())
            }
            StatementBody::Insert {
                table,
                columns,
                if_not_exists,
                ttl,
            } => self.table_mut(keyspace, table)?.insert(columns, *if_not_exists, &write(ttl), now),
            StatementBody::Update {
                table,
                ttl,
                assignments,
                keys,
                conditions,
            } => self
                .table_mut(keyspace, table)?
                .update(assignments, keys, conditions, &write(ttl), now),
            StatementBody::Select {
                table,
                columns,
                filters,
                limit,
                ..
            } => self.table(keyspace, table)?.select(columns, filters, *limit, now),
            StatementBody::Delete { table, keys } => {
                self.table_mut(keyspace, table)?.delete(keys, &write(&None))
            }
            StatementBody::Raw { cql, values } => {
                let select = parse_select(cql, values)?;
                let keyspace = select.keyspace.as_deref().unwrap_or(keyspace);
                self.table(keyspace, &select.table)?
                    .select(&select.columns, &select.filters, select.limit, now)
            }
        }
    }

    fn create_table(
        &mut self,
        keyspace: &str,
        table: &str,
        columns: &[ColumnDef],
        partition_key: &[String],
        clustering_key: &[(String, ClusteringOrder)],
    ) -> Result<ResultSet, MappingError> {
        if !self.keyspace_exists(keyspace) {
            return Err(invalid(format!("Keyspace {} does not exist", keyspace)));
        }
        let id = (norm(keyspace), norm(table));
        if self.tables.contains_key(&id) {
            return Ok(ResultSet::empty());
        }

        let schema = columns
            .iter()
            .map(|column| {
                let clustering = clustering_key
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&column.name));
                let kind = if partition_key.iter().any(|k| k.eq_ignore_ascii_case(&column.name)) {
                    ColumnKind::PartitionKey
                } else if clustering.is_some() {
                    ColumnKind::Clustering
                } else if column.is_static {
                    ColumnKind::Static
                } else {
                    ColumnKind::Regular
                };
                ColumnSchema {
                    name: column.name.clone(),
                    data_type: column.data_type.clone(),
                    kind,
                    order: clustering.map(|(_, order)| *order).unwrap_or_default(),
                }
            })
            .collect();

        self.tables.insert(
            id,
            Table {
                name: table.to_string(),
                columns: schema,
                partitions: Vec::new(),
            },
        );
        Ok(ResultSet::empty())
    }

    fn alter_table(
        &mut self,
        keyspace: &str,
        table_name: &str,
        change: &AlterTable,
    ) -> Result<ResultSet, MappingError> {
        let indexed: HashSet<String> = self
            .indexes
            .iter()
            .filter(|((ks, _), index)| *ks == norm(keyspace) && index.table == norm(table_name))
            .map(|(_, index)| norm(&index.column))
            .collect();
        let table = self.table_mut(keyspace, table_name)?;

        match change {
            AlterTable::AddColumn(column) => {
                if table.column(&column.name).is_some() {
                    return Err(invalid(format!(
                        "Invalid column name {} because it conflicts with an existing column",
                        column.name
                    )));
                }
                table.columns.push(ColumnSchema {
                    name: column.name.clone(),
                    data_type: column.data_type.clone(),
                    kind: if column.is_static {
                        ColumnKind::Static
                    } else {
                        ColumnKind::Regular
                    },
                    order: ClusteringOrder::Asc,
                });
            }
            AlterTable::AlterColumn { name, data_type } => {
                let Some(column) = table
                    .columns
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                else {
                    return Err(invalid(format!("Column {} was not found in table {}", name, table_name)));
                };
                if matches!(column.kind, ColumnKind::PartitionKey | ColumnKind::Clustering) {
                    return Err(invalid(format!("Cannot alter PRIMARY KEY part {}", name)));
                }
                column.data_type = data_type.clone();
            }
            AlterTable::DropColumn(name) => {
                let column = table.require_column(name)?;
                if matches!(column.kind, ColumnKind::PartitionKey | ColumnKind::Clustering) {
                    return Err(invalid(format!("Cannot drop PRIMARY KEY part {}", name)));
                }
                if indexed.contains(&norm(name)) {
                    return Err(invalid(format!(
                        "Cannot drop column {} because it has dependent secondary indexes",
                        name
                    )));
                }
                let lowered = norm(name);
                table.columns.retain(|c| norm(&c.name) != lowered);
                for partition in &mut table.partitions {
                    partition.statics.remove(&lowered);
                    for row in &mut partition.rows {
                        row.cells.remove(&lowered);
                    }
                }
            }
        }
        Ok(ResultSet::empty())
    }

    fn create_index(
        &mut self,
        keyspace: &str,
        table_name: &str,
        index: &str,
        column: &str,
    ) -> Result<ResultSet, MappingError> {
        let id = (norm(keyspace), norm(index));
        if self.indexes.contains_key(&id) {
            return Ok(ResultSet::empty());
        }
        let table = self.table(keyspace, table_name)?;
        let column = table.require_column(column)?;
        if column.kind == ColumnKind::PartitionKey && table.keys_of(ColumnKind::PartitionKey).count() == 1 {
            return Err(invalid(format!(
                "Cannot create secondary index on the only partition key column {}",
                column.name
            )));
        }
        let column_name = column.name.clone();
        let duplicate = self
            .indexes
            .iter()
            .any(|((ks, _), existing)| {
                *ks == norm(keyspace)
                    && existing.table == norm(table_name)
                    && existing.column.eq_ignore_ascii_case(&column_name)
            });
        if duplicate {
            return Ok(ResultSet::empty());
        }

        self.indexes.insert(
            id,
            Index {
                name: index.to_string(),
                table: norm(table_name),
                column: column_name,
            },
        );
        Ok(ResultSet::empty())
    }
}

impl Table {
    fn insert(
        &mut self,
        columns: &[(String, Value)],
        if_not_exists: bool,
        write: &Write,
        now: Instant,
    ) -> Result<ResultSet, MappingError> {
        let keys: Vec<(String, Value)> = columns
            .iter()
            .filter(|(name, _)| {
                self.column(name)
                    .is_some_and(|c| matches!(c.kind, ColumnKind::PartitionKey | ColumnKind::Clustering))
            })
            .cloned()
            .collect();
        let key = self.split_key(&keys)?;

        let mut cells = Vec::with_capacity(columns.len());
        for (name, value) in columns {
            let column = self.require_column(name)?;
            match column.kind {
                ColumnKind::PartitionKey | ColumnKind::Clustering => {}
                kind => cells.push((kind, norm(&column.name), value.clone())),
            }
        }

        let clustering_len = self.clustering_len();
        let statics_only = key.clustering.is_empty()
            && clustering_len > 0
            && cells.iter().all(|(kind, _, _)| *kind == ColumnKind::Static);
        if key.clustering.len() != clustering_len && !statics_only {
            return Err(invalid("Some clustering keys are missing"));
        }

        if if_not_exists {
            let exists = self
                .partition(&key.partition)
                .and_then(|p| p.row(&key.clustering))
                .is_some_and(|row| row.live(now));
            if exists {
                return Ok(ResultSet::applied_result(false));
            }
        }

        let orders = self.clustering_orders();
        let partition = self.partition_mut(key.partition);
        for (_, name, value) in cells.iter().filter(|(kind, _, _)| *kind == ColumnKind::Static) {
            write_cell(&mut partition.statics, name, value.clone(), write);
        }
        if !statics_only {
            let row = partition.row_mut(key.clustering, &orders);
            if row.marker.as_ref().is_none_or(|m| m.written <= write.timestamp) {
                row.marker = Some(write.cell(Value::Null));
            }
            for (_, name, value) in cells.into_iter().filter(|(kind, _, _)| *kind != ColumnKind::Static) {
                write_cell(&mut row.cells, &name, value, write);
            }
        }

        Ok(if if_not_exists {
            ResultSet::applied_result(true)
        } else {
            ResultSet::empty()
        })
    }

    fn current_values(&self, key: &KeyParts, now: Instant) -> HashMap<String, Value> {
        let mut values = HashMap::new();
        let Some(partition) = self.partition(&key.partition) else {
            return values;
        };
        for (name, cell) in &partition.statics {
            if cell.live(now) {
                values.insert(name.clone(), cell.value.clone());
            }
        }
        if let Some(row) = partition.row(&key.clustering).filter(|r| r.live(now)) {
            for (name, cell) in &row.cells {
                if cell.live(now) {
                    values.insert(name.clone(), cell.value.clone());
                }
            }
        }
        values
    }

    fn update(
        &mut self,
        assignments: &[Assignment],
        keys: &[(String, Value)],
        conditions: &[(String, Value)],
        write: &Write,
        now: Instant,
    ) -> Result<ResultSet, MappingError> {
        let key = self.split_key(keys)?;
        let mut targets = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = self.require_column(assignment.column())?;
            if matches!(column.kind, ColumnKind::PartitionKey | ColumnKind::Clustering) {
                return Err(invalid(format!("PRIMARY KEY part {} found in SET part", column.name)));
            }
            targets.push((column.kind, norm(&column.name), assignment));
        }
        let touches_rows = targets.iter().any(|(kind, _, _)| *kind != ColumnKind::Static);
        if touches_rows && key.clustering.len() != self.clustering_len() {
            return Err(invalid("Some clustering keys are missing"));
        }

        if !conditions.is_empty() {
            let current = self.current_values(&key, now);
            let applied = conditions.iter().all(|(name, expected)| {
                current
                    .get(&norm(name))
                    .is_some_and(|value| values_equal(value, expected))
            });
            if !applied {
                return Ok(ResultSet::applied_result(false));
            }
        }

        let orders = self.clustering_orders();
        let partition = self.partition_mut(key.partition);
        for (kind, name, assignment) in targets {
            let cells = if kind == ColumnKind::Static {
                &mut partition.statics
            } else {
                &mut partition.row_mut(key.clustering.clone(), &orders).cells
            };
            let current = live_value(cells, &name, now);
            let value = match assignment {
                Assignment::Set(_, value) => value.clone(),
                Assignment::Append(_, value) => append(current, value.clone()),
                Assignment::Prepend(_, value) => prepend(current, value.clone()),
                Assignment::SetAt { index, value, .. } => {
                    let mut items = match current {
                        Some(Value::List(items)) => items,
                        _ => Vec::new(),
                    };
                    let size = items.len();
                    let slot = usize::try_from(*index)
                        .ok()
                        .and_then(|i| items.get_mut(i))
                        .ok_or_else(|| {
                            invalid(format!("List index {} out of bound, list has size {}", index, size))
                        })?;
                    *slot = value.clone();
                    Value::List(items)
                }
                Assignment::Increment(_, delta) => {
                    let base = current.and_then(|v| v.as_i64()).unwrap_or(0);
                    Value::Counter(base + delta)
                }
            };
            write_cell(cells, &name, value, write);
        }
        // an update that leaves nothing live does not create a row
        partition.rows.retain(|row| row.live(now));

        Ok(if conditions.is_empty() {
            ResultSet::empty()
        } else {
            ResultSet::applied_result(true)
        })
    }

    fn delete(&mut self, keys: &[(String, Value)], write: &Write) -> Result<ResultSet, MappingError> {
        let key = self.split_key(keys)?;
        let Some(position) = self.partitions.iter().position(|p| p.key == key.partition) else {
            return Ok(ResultSet::empty());
        };
        let partition = &mut self.partitions[position];
        let prefix = key.clustering.len();
        let whole_partition = prefix == 0;

        for row in &mut partition.rows {
            if row.clustering[..prefix.min(row.clustering.len())] == key.clustering[..] {
                row.cells.retain(|_, cell| cell.written > write.timestamp);
                if row.marker.as_ref().is_some_and(|m| m.written <= write.timestamp) {
                    row.marker = None;
                }
            }
        }
        partition
            .rows
            .retain(|row| row.marker.is_some() || !row.cells.is_empty());
        if whole_partition {
            partition.statics.retain(|_, cell| cell.written > write.timestamp);
        }
        if partition.rows.is_empty() && partition.statics.is_empty() {
            self.partitions.remove(position);
        }
        Ok(ResultSet::empty())
    }

    fn select(
        &self,
        projection: &[String],
        filters: &[Filter],
        limit: Option<u32>,
        now: Instant,
    ) -> Result<ResultSet, MappingError> {
        for filter in filters {
            self.require_column(filter.field())?;
        }
        let output: Vec<&ColumnSchema> = if projection.is_empty() {
            self.columns.iter().collect()
        } else {
            projection
                .iter()
                .map(|name| self.require_column(name))
                .collect::<Result<_, _>>()?
        };

        let partition_columns: Vec<String> = self
            .keys_of(ColumnKind::PartitionKey)
            .map(|c| norm(&c.name))
            .collect();
        let clustering_columns: Vec<String> = self
            .keys_of(ColumnKind::Clustering)
            .map(|c| norm(&c.name))
            .collect();

        let mut rows = Vec::new();
        for partition in &self.partitions {
            let mut base: HashMap<String, Value> = partition_columns
                .iter()
                .cloned()
                .zip(partition.key.iter().cloned())
                .collect();
            for (name, cell) in &partition.statics {
                if cell.live(now) {
                    base.insert(name.clone(), cell.value.clone());
                }
            }

            let live_rows: Vec<&StoredRow> = partition.rows.iter().filter(|r| r.live(now)).collect();
            let mut materialized = Vec::new();
            if live_rows.is_empty() {
                if base.len() > partition_columns.len() {
                    materialized.push(base.clone());
                }
            } else {
                for row in live_rows {
                    let mut values = base.clone();
                    values.extend(clustering_columns.iter().cloned().zip(row.clustering.iter().cloned()));
                    for (name, cell) in &row.cells {
                        if cell.live(now) {
                            values.insert(name.clone(), cell.value.clone());
                        }
                    }
                    materialized.push(values);
                }
            }

            for values in materialized {
                if filters.iter().all(|f| filter_matches(f, &values)) {
                    rows.push(Row::new(
                        output
                            .iter()
                            .map(|column| {
                                let value = values.get(&norm(&column.name)).cloned().unwrap_or_default();
                                (column.name.clone(), value)
                            })
                            .collect(),
                    ));
                }
            }
        }

        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(ResultSet::new(rows))
    }
}

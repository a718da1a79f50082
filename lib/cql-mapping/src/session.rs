//! The mapping session: typed records in, statements out.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::Batch;
use crate::cache::StatementCache;
use crate::codec::{RecordValues, record_from_row};
use crate::{
    DataType, Driver, Entity, EntityMetadata, Key, MappingError, ResultSet, Row, SchemaSync,
    SessionConfig, Statement, StatementFactory, SyncOptions, Value, WriteOptions, metadata_for,
};

/// Result of a save.
///
/// `NotSaved` means the optimistic version check lost against a concurrent
/// writer; the stored record was left untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome<T> {
    /// The record as written, including generated keys and the new version.
    Saved(T),
    NotSaved,
}

impl<T> SaveOutcome<T> {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }

    pub fn saved(self) -> Option<T> {
        match self {
            SaveOutcome::Saved(record) => Some(record),
            SaveOutcome::NotSaved => None,
        }
    }
}

/// Runtime façade over a driver for one keyspace.
///
/// Every typed operation synchronizes the record type's table on first use
/// (subject to the session's [`SyncOptions`]) and then goes straight to the
/// store. Collection updates never read the row first.
pub struct MappingSession<D: Driver> {
    driver: D,
    keyspace: String,
    schema: Arc<SchemaSync>,
    sync_options: RwLock<SyncOptions>,
    cache: StatementCache<D::Prepared>,
}

impl<D: Driver> MappingSession<D> {
    pub fn new(keyspace: impl Into<String>, driver: D) -> Self {
        Self::from_config(SessionConfig::new(keyspace), driver)
    }

    pub fn from_config(config: SessionConfig, driver: D) -> Self {
        Self {
            driver,
            cache: StatementCache::new(config.cache_capacity, config.cache_idle()),
            sync_options: RwLock::new(SyncOptions::new(config.sync)),
            keyspace: config.keyspace,
            schema: Arc::new(SchemaSync::new()),
        }
    }

    /// Share a synchronization coordinator with other sessions.
    pub fn with_schema_sync(mut self, schema: Arc<SchemaSync>) -> Self {
        self.schema = schema;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn schema_sync(&self) -> &Arc<SchemaSync> {
        &self.schema
    }

    pub fn sync_options(&self) -> SyncOptions {
        self.sync_options.read().clone()
    }

    /// Replace the synchronization policy for subsequent passes.
    pub fn set_sync_options(&self, options: SyncOptions) {
        *self.sync_options.write() = options;
    }

    pub(crate) async fn ensure_synced(&self, metadata: &EntityMetadata) -> Result<(), MappingError> {
        let flags = self.sync_options.read().flags_for(metadata.type_id());
        self.schema
            .sync(&self.driver, &self.keyspace, metadata, flags)
            .await?;
        Ok(())
    }

    async fn entity<T: Entity>(&self) -> Result<Arc<EntityMetadata>, MappingError> {
        let metadata = metadata_for::<T>()?;
        self.ensure_synced(&metadata).await?;
        Ok(metadata)
    }

    pub(crate) async fn prepared(&self, cql: &str) -> Result<D::Prepared, MappingError> {
        if let Some(prepared) = self.cache.get(cql) {
            return Ok(prepared);
        }
        let prepared = self.driver.prepare(cql).await?;
        self.cache.insert(cql, prepared.clone());
        Ok(prepared)
    }

    /// Prepare (through the cache) and execute any statement in this session.
    pub async fn execute(&self, statement: &Statement) -> Result<ResultSet, MappingError> {
        let cql = statement.cql();
        debug!(keyspace = statement.keyspace(), cql = %cql, "executing statement");
        let prepared = self.prepared(&cql).await?;
        self.driver.execute_prepared(&prepared, statement).await
    }

    pub async fn save<T: Entity>(&self, record: &T) -> Result<SaveOutcome<T>, MappingError> {
        self.save_with(record, &WriteOptions::default()).await
    }

    /// Write a record.
    ///
    /// Records with a version field are written optimistically: version 0 inserts
    /// and becomes 1, version N updates only if the store still holds N and
    /// becomes N + 1. A lost check returns [`SaveOutcome::NotSaved`].
    pub async fn save_with<T: Entity>(
        &self,
        record: &T,
        options: &WriteOptions,
    ) -> Result<SaveOutcome<T>, MappingError> {
        let metadata = self.entity::<T>().await?;
        let (statement, values) = save_statement(&self.keyspace, &metadata, record, options)?;
        let result = self.execute(&statement).await?;
        if !result.applied() {
            debug!(
                table = metadata.table_name(),
                "version check rejected, record not saved"
            );
            return Ok(SaveOutcome::NotSaved);
        }
        Ok(SaveOutcome::Saved(values.into_record()?))
    }

    /// Fetch a record by primary key. Absent rows are `Ok(None)`.
    ///
    /// A key prefix that matches several rows yields the first row in
    /// clustering order and logs a warning.
    pub async fn get<T: Entity>(&self, key: impl Into<Key>) -> Result<Option<T>, MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata).select(&key.into())?;
        let rows = self.execute(&statement).await?.into_rows();
        if rows.len() > 1 {
            warn!(
                table = metadata.table_name(),
                rows = rows.len(),
                "key lookup matched several rows, returning the first"
            );
        }
        rows.first()
            .map(|row| record_from_row(&metadata, row))
            .transpose()
    }

    pub async fn delete<T: Entity>(&self, record: &T) -> Result<(), MappingError> {
        self.delete_with(record, &WriteOptions::default()).await
    }

    /// Delete the record's row. Deleting an absent row is not an error.
    pub async fn delete_with<T: Entity>(
        &self,
        record: &T,
        options: &WriteOptions,
    ) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = delete_statement(&self.keyspace, &metadata, record, options)?;
        self.execute(&statement).await?;
        Ok(())
    }

    pub async fn delete_by_key<T: Entity>(&self, key: impl Into<Key>) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata)
            .delete(&key.into(), &WriteOptions::default())?;
        self.execute(&statement).await?;
        Ok(())
    }

    pub async fn append<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<(), MappingError> {
        self.append_with::<T>(key, column, value, &WriteOptions::default())
            .await
    }

    /// Add an element, or every element of a collection, to a list, set or map column.
    pub async fn append_with<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        value: impl Into<Value>,
        options: &WriteOptions,
    ) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata).append(
            &key.into(),
            column,
            value.into(),
            options,
        )?;
        self.execute(&statement).await?;
        Ok(())
    }

    pub async fn prepend<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<(), MappingError> {
        self.prepend_with::<T>(key, column, value, &WriteOptions::default())
            .await
    }

    /// Insert elements at the head of a list column, in the order given.
    pub async fn prepend_with<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        value: impl Into<Value>,
        options: &WriteOptions,
    ) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata).prepend(
            &key.into(),
            column,
            value.into(),
            options,
        )?;
        self.execute(&statement).await?;
        Ok(())
    }

    /// Overwrite one element of a list column by zero-based index.
    pub async fn replace_at<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        value: impl Into<Value>,
        index: usize,
    ) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata).replace_at(
            &key.into(),
            column,
            value.into(),
            index,
            &WriteOptions::default(),
        )?;
        self.execute(&statement).await?;
        Ok(())
    }

    /// Empty a collection column.
    pub async fn delete_value<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
    ) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata).delete_value(
            &key.into(),
            column,
            &WriteOptions::default(),
        )?;
        self.execute(&statement).await?;
        Ok(())
    }

    pub async fn update_value<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<(), MappingError> {
        self.update_values::<T, _, _>(key, [(column, value)]).await
    }

    /// Set several columns of one row by key, without serializing the whole record.
    pub async fn update_values<T, C, V>(
        &self,
        key: impl Into<Key>,
        updates: impl IntoIterator<Item = (C, V)>,
    ) -> Result<(), MappingError>
    where
        T: Entity,
        C: Into<String>,
        V: Into<Value>,
    {
        let metadata = self.entity::<T>().await?;
        let updates = updates
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .collect();
        let statement = StatementFactory::new(&self.keyspace, &metadata).update_values(
            &key.into(),
            updates,
            &WriteOptions::default(),
        )?;
        self.execute(&statement).await?;
        Ok(())
    }

    /// Add `delta` to a counter column.
    pub async fn increment<T: Entity>(
        &self,
        key: impl Into<Key>,
        column: &str,
        delta: i64,
    ) -> Result<(), MappingError> {
        let metadata = self.entity::<T>().await?;
        let statement = StatementFactory::new(&self.keyspace, &metadata).increment(
            &key.into(),
            column,
            delta,
            &WriteOptions::default(),
        )?;
        self.execute(&statement).await?;
        Ok(())
    }

    /// Start a batch of saves and deletes, submitted together by [`Batch::execute`].
    pub fn with_batch(&self) -> Batch<'_, D> {
        Batch::new(self)
    }

    /// Run a statement and map every returned row to `T`.
    pub async fn get_by_query<T: Entity>(&self, statement: Statement) -> Result<Vec<T>, MappingError> {
        let metadata = self.entity::<T>().await?;
        let result = self.execute(&statement).await?;
        rows_to_records(&metadata, result.rows())
    }

    /// Run CQL text in this session's keyspace and map every returned row to `T`.
    pub async fn get_by_cql<T: Entity>(
        &self,
        cql: &str,
        values: Vec<Value>,
    ) -> Result<Vec<T>, MappingError> {
        self.get_by_query(Statement::raw(&self.keyspace, cql, values))
            .await
    }

    pub fn get_from_result_set<T: Entity>(&self, result: ResultSet) -> Result<Vec<T>, MappingError> {
        let metadata = metadata_for::<T>()?;
        rows_to_records(&metadata, result.rows())
    }

    pub fn get_from_row<T: Entity>(&self, row: &Row) -> Result<T, MappingError> {
        let metadata = metadata_for::<T>()?;
        record_from_row(&metadata, row)
    }

    pub fn get_from_rows<T: Entity>(&self, rows: &[Row]) -> Result<Vec<T>, MappingError> {
        let metadata = metadata_for::<T>()?;
        rows_to_records(&metadata, rows)
    }

    /// Synchronize `T`'s table now instead of on first use.
    pub async fn maybe_sync<T: Entity>(&self) -> Result<(), MappingError> {
        self.entity::<T>().await?;
        Ok(())
    }

    /// Synchronize several types, e.g. every type the application uses, at startup.
    pub async fn sync_all(&self, entities: &[Arc<EntityMetadata>]) -> Result<(), MappingError> {
        let options = self.sync_options();
        let entities: Vec<_> = entities
            .iter()
            .map(|metadata| (Arc::clone(metadata), options.flags_for(metadata.type_id())))
            .collect();
        self.schema
            .sync_all(&self.driver, &self.keyspace, &entities)
            .await?;
        Ok(())
    }

    /// DDL a synchronization of `T` would run now, one statement per line.
    pub async fn sync_script<T: Entity>(&self) -> Result<String, MappingError> {
        let metadata = metadata_for::<T>()?;
        let flags = self.sync_options.read().flags_for(metadata.type_id());
        let statements = self
            .schema
            .script(&self.driver, &self.keyspace, &metadata, flags)
            .await?;
        Ok(statements
            .iter()
            .map(|statement| format!("{};", statement.cql()))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Drop `T`'s table. The next use re-creates it.
    pub async fn drop<T: Entity>(&self) -> Result<(), MappingError> {
        let metadata = metadata_for::<T>()?;
        self.schema
            .drop_table(&self.driver, &self.keyspace, &metadata)
            .await
    }

    pub async fn drop_all(&self, entities: &[Arc<EntityMetadata>]) -> Result<(), MappingError> {
        self.schema
            .drop_all(&self.driver, &self.keyspace, entities)
            .await
    }
}

fn rows_to_records<T: Entity>(metadata: &EntityMetadata, rows: &[Row]) -> Result<Vec<T>, MappingError> {
    rows.iter().map(|row| record_from_row(metadata, row)).collect()
}

/// Statement for saving `record`, plus the values as they will be stored.
pub(crate) fn save_statement<T: Entity>(
    keyspace: &str,
    metadata: &EntityMetadata,
    record: &T,
    options: &WriteOptions,
) -> Result<(Statement, RecordValues), MappingError> {
    let mut values = RecordValues::from_record(metadata, record)?;
    generate_keys(metadata, &mut values)?;
    let factory = StatementFactory::new(keyspace, metadata);

    let Some(position) = metadata.version_position() else {
        let statement = factory.insert(&values.values, options)?;
        return Ok((statement, values));
    };

    let column = &metadata.columns()[position];
    let current = values.values[position].as_i64().unwrap_or(0);
    let next = current
        .checked_add(1)
        .ok_or_else(|| MappingError::codec(&column.name, "version counter overflow"))?;
    let next = Value::BigInt(next)
        .coerce(&column.data_type)
        .map_err(|reason| MappingError::codec(&column.name, reason))?;
    values.set(column, position, next)?;

    let statement = if current == 0 {
        factory.insert(&values.values, options)?
    } else {
        factory.update_versioned(&values.values, current, options)?
    };
    Ok((statement, values))
}

pub(crate) fn delete_statement<T: Entity>(
    keyspace: &str,
    metadata: &EntityMetadata,
    record: &T,
    options: &WriteOptions,
) -> Result<Statement, MappingError> {
    let values = RecordValues::from_record(metadata, record)?;
    let factory = StatementFactory::new(keyspace, metadata);
    let key = factory.key_from_values(&values.values)?;
    factory.delete(&key, options)
}

fn generate_keys(metadata: &EntityMetadata, values: &mut RecordValues) -> Result<(), MappingError> {
    for (position, column) in metadata.columns().iter().enumerate() {
        if !column.auto_generate {
            continue;
        }
        let unset = match &values.values[position] {
            Value::Null => true,
            other => other.as_uuid().is_none_or(|uuid| uuid.is_nil()),
        };
        if !unset {
            continue;
        }
        let generated = match column.data_type {
            DataType::Timeuuid => Value::Timeuuid(time_uuid()),
            _ => Value::Uuid(Uuid::new_v4()),
        };
        values.set(column, position, generated)?;
    }
    Ok(())
}

// Version 1 UUID with a random node id.
fn time_uuid() -> Uuid {
    let random = Uuid::new_v4();
    let bytes = random.as_bytes();
    let node = [bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]];
    Uuid::now_v1(&node)
}

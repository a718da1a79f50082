use std::any::TypeId;
use std::sync::Arc;

use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::session::{delete_statement, save_statement};
use crate::{
    Driver, Entity, EntityMetadata, MappingError, MappingSession, Statement, WriteOptions,
    metadata_for,
};

/// Saves and deletes collected for one submission.
///
/// Statements go to the store as a single logged batch: the client sees all
/// of them applied or none. The store only makes a batch atomic within one
/// partition, so statements spanning partitions may become visible at
/// different moments, and conditional (versioned) saves must all target the
/// same partition.
pub struct Batch<'a, D: Driver> {
    session: &'a MappingSession<D>,
    entries: Vec<Entry>,
}

struct Entry {
    metadata: Arc<EntityMetadata>,
    statement: Statement,
    // Saved record as it will be stored. Deletes carry none.
    record: Option<Map<String, Json>>,
}

impl<'a, D: Driver> Batch<'a, D> {
    pub(crate) fn new(session: &'a MappingSession<D>) -> Self {
        Self {
            session,
            entries: Vec::new(),
        }
    }

    pub fn save<T: Entity>(&mut self, record: &T) -> Result<&mut Self, MappingError> {
        self.save_with(record, &WriteOptions::default())
    }

    pub fn save_with<T: Entity>(
        &mut self,
        record: &T,
        options: &WriteOptions,
    ) -> Result<&mut Self, MappingError> {
        let metadata = metadata_for::<T>()?;
        let (statement, values) =
            save_statement(self.session.keyspace(), &metadata, record, options)?;
        self.entries.push(Entry {
            metadata,
            statement,
            record: Some(values.json),
        });
        Ok(self)
    }

    pub fn delete<T: Entity>(&mut self, record: &T) -> Result<&mut Self, MappingError> {
        self.delete_with(record, &WriteOptions::default())
    }

    pub fn delete_with<T: Entity>(
        &mut self,
        record: &T,
        options: &WriteOptions,
    ) -> Result<&mut Self, MappingError> {
        let metadata = metadata_for::<T>()?;
        let statement = delete_statement(self.session.keyspace(), &metadata, record, options)?;
        self.entries.push(Entry {
            metadata,
            statement,
            record: None,
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records of type `T` saved so far, as the batch will write them: with
    /// generated keys filled in and versions advanced.
    pub fn saved<T: Entity>(&self) -> Result<Vec<T>, MappingError> {
        self.entries
            .iter()
            .filter(|entry| entry.metadata.type_id() == TypeId::of::<T>())
            .filter_map(|entry| entry.record.clone())
            .map(|json| serde_json::from_value(Json::Object(json)).map_err(MappingError::from))
            .collect()
    }

    /// Submit the batch. Returns `false` when a versioned save's condition was
    /// rejected, in which case nothing was applied.
    pub async fn execute(self) -> Result<bool, MappingError> {
        if self.entries.is_empty() {
            return Ok(true);
        }

        let mut seen: Vec<TypeId> = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.metadata.type_id()) {
                seen.push(entry.metadata.type_id());
                self.session.ensure_synced(&entry.metadata).await?;
            }
        }

        let mut statements = Vec::with_capacity(self.entries.len());
        for Entry { statement, .. } in self.entries {
            let cql = statement.cql();
            debug!(keyspace = statement.keyspace(), cql = %cql, "adding statement to batch");
            let prepared = self.session.prepared(&cql).await?;
            statements.push((prepared, statement));
        }

        let result = self.session.driver().execute_batch(&statements).await?;
        debug!(statements = statements.len(), applied = result.applied(), "batch executed");
        Ok(result.applied())
    }
}

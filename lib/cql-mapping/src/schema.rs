//! Schema synchronization.
//!
//! [`diff`] compares a record type's declared columns with the live table and
//! returns the DDL that reconciles them. [`SchemaSync`] runs that diff at most
//! once per (type, keyspace), serialized behind one lock.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    DataType, Driver, EntityMetadata, MappingError, Statement, StatementFactory, SyncFlags,
    TableDefinition,
};

/// DDL needed to bring `live` in line with `metadata`, in execution order.
///
/// - An absent table yields create-table plus one create-index per declared index.
/// - Key column types are never altered; a mismatch is logged and skipped.
/// - A static column type mismatch is an `UnsupportedSchemaChange`, as is a
///   declared key column the live table lacks.
/// - Columns only present in the store are dropped unless `do_not_drop_columns` is set.
pub fn diff(
    keyspace: &str,
    metadata: &EntityMetadata,
    live: Option<&TableDefinition>,
    flags: &SyncFlags,
) -> Result<Vec<Statement>, MappingError> {
    let factory = StatementFactory::new(keyspace, metadata);
    let mut statements = Vec::new();

    let Some(live) = live else {
        statements.push(factory.create_table());
        for (column, index) in metadata.indexes() {
            if !index.is_empty() {
                statements.push(factory.create_index(column, index));
            }
        }
        return Ok(statements);
    };

    for column in metadata.columns() {
        let declared_index = column.index.as_deref();

        let Some(live_column) = live.column(&column.name) else {
            // ADD only creates regular columns; the primary key is fixed at creation.
            if column.is_key() {
                return Err(MappingError::UnsupportedSchemaChange {
                    table: metadata.table_name().to_string(),
                    column: column.name.clone(),
                    reason: "key column is missing from the live primary key".to_string(),
                });
            }
            if flags.do_not_add_columns {
                continue;
            }
            statements.push(factory.add_column(column));
            if let Some(index) = declared_index.filter(|i| !i.is_empty()) {
                push_unique(&mut statements, factory.create_index(&column.name, index));
            }
            continue;
        };

        let mut type_changed = false;
        if !column.data_type.matches_cql(&live_column.cql_type) {
            let live_is_collection = DataType::parse(&live_column.cql_type)
                .is_some_and(|live_type| live_type.is_collection());
            if column.is_key() || live_column.is_key() {
                warn!(
                    table = metadata.table_name(),
                    column = %column.name,
                    declared = %column.data_type,
                    live = %live_column.cql_type,
                    "key column types are immutable, skipping type change"
                );
            } else if column.data_type.is_collection() || live_is_collection {
                warn!(
                    table = metadata.table_name(),
                    column = %column.name,
                    declared = %column.data_type,
                    live = %live_column.cql_type,
                    "collection column types cannot be altered, skipping type change"
                );
            } else {
                statements.push(factory.alter_column(column)?);
                type_changed = true;
            }
        }

        let live_index = live.index_on(&column.name);
        match (declared_index, live_index) {
            (Some(""), Some(existing)) => {
                push_unique(&mut statements, factory.drop_index(&existing.name));
            }
            (Some(""), None) | (None, None) => {}
            (Some(index), None) => {
                push_unique(&mut statements, factory.create_index(&column.name, index));
            }
            (Some(index), Some(existing)) if !existing.name.eq_ignore_ascii_case(index) => {
                push_unique(&mut statements, factory.drop_index(&existing.name));
                push_unique(&mut statements, factory.create_index(&column.name, index));
            }
            (Some(index), Some(_)) => {
                if type_changed {
                    push_unique(&mut statements, factory.create_index(&column.name, index));
                }
            }
            (None, Some(existing)) => {
                if !flags.do_not_drop_custom_index {
                    push_unique(&mut statements, factory.drop_index(&existing.name));
                }
            }
        }
    }

    if !flags.do_not_drop_columns {
        for live_column in &live.columns {
            let declared = metadata
                .columns()
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&live_column.name));
            if declared {
                continue;
            }
            if live_column.is_key() {
                warn!(
                    table = metadata.table_name(),
                    column = %live_column.name,
                    "undeclared key column cannot be dropped"
                );
                continue;
            }
            if let Some(index) = live.index_on(&live_column.name) {
                push_unique(&mut statements, factory.drop_index(&index.name));
            }
            statements.push(factory.drop_column(&live_column.name));
        }
    }

    Ok(statements)
}

fn push_unique(statements: &mut Vec<Statement>, statement: Statement) {
    if !statements.contains(&statement) {
        statements.push(statement);
    }
}

/// Tracks which record types are synchronized in which keyspace.
///
/// State per (type, keyspace) moves `Unsynced -> Synced` after a pass whose
/// statements all executed, and back only through [`drop_table`](Self::drop_table). One
/// lock serializes every pass so concurrent first uses never issue duplicate DDL.
#[derive(Debug, Default)]
pub struct SchemaSync {
    synced: Mutex<HashSet<(TypeId, String)>>,
}

impl SchemaSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_synced(&self, type_id: TypeId, keyspace: &str) -> bool {
        self.synced
            .lock()
            .await
            .contains(&(type_id, keyspace.to_string()))
    }

    /// Synchronize one type, returning the statements executed.
    ///
    /// Already-synced types return immediately with no statements. On failure
    /// the type stays unsynced so the next call re-runs the whole diff.
    pub async fn sync<D: Driver>(
        &self,
        driver: &D,
        keyspace: &str,
        metadata: &EntityMetadata,
        flags: SyncFlags,
    ) -> Result<Vec<Statement>, MappingError> {
        if flags.do_not_sync {
            return Ok(Vec::new());
        }

        let mut synced = self.synced.lock().await;
        let state_key = (metadata.type_id(), keyspace.to_string());
        if synced.contains(&state_key) {
            return Ok(Vec::new());
        }

        if !driver.keyspace_exists(keyspace).await? {
            return Err(MappingError::Driver(format!(
                "keyspace {} does not exist",
                keyspace
            )));
        }

        let live = driver
            .table_definition(keyspace, metadata.table_name())
            .await?;
        let statements = diff(keyspace, metadata, live.as_ref(), &flags)?;
        for statement in &statements {
            driver
                .execute(statement)
                .await
                .map_err(|e| MappingError::SchemaSync {
                    statement: statement.cql(),
                    source: Box::new(e),
                })?;
        }

        synced.insert(state_key);
        info!(
            table = metadata.table_name(),
            keyspace,
            statements = statements.len(),
            "schema synchronized"
        );
        Ok(statements)
    }

    pub async fn sync_all<D: Driver>(
        &self,
        driver: &D,
        keyspace: &str,
        entities: &[(Arc<EntityMetadata>, SyncFlags)],
    ) -> Result<Vec<Statement>, MappingError> {
        let mut executed = Vec::new();
        for (metadata, flags) in entities {
            executed.extend(self.sync(driver, keyspace, metadata, *flags).await?);
        }
        Ok(executed)
    }

    /// Statements a sync pass would run now, without executing them or touching sync state.
    pub async fn script<D: Driver>(
        &self,
        driver: &D,
        keyspace: &str,
        metadata: &EntityMetadata,
        flags: SyncFlags,
    ) -> Result<Vec<Statement>, MappingError> {
        let live = driver
            .table_definition(keyspace, metadata.table_name())
            .await?;
        diff(keyspace, metadata, live.as_ref(), &flags)
    }

    /// Drop the type's table and mark it unsynced.
    pub async fn drop_table<D: Driver>(
        &self,
        driver: &D,
        keyspace: &str,
        metadata: &EntityMetadata,
    ) -> Result<(), MappingError> {
        let mut synced = self.synced.lock().await;
        let statement = StatementFactory::new(keyspace, metadata).drop_table();
        synced.remove(&(metadata.type_id(), keyspace.to_string()));
        driver.execute(&statement).await?;
        info!(table = metadata.table_name(), keyspace, "table dropped");
        Ok(())
    }

    pub async fn drop_all<D: Driver>(
        &self,
        driver: &D,
        keyspace: &str,
        entities: &[Arc<EntityMetadata>],
    ) -> Result<(), MappingError> {
        for metadata in entities {
            self.drop_table(driver, keyspace, metadata).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ClusteringOrder;
    use crate::{ColumnKind, EntityDescriptor, FieldDescriptor, LiveColumn, StatementBody};

    fn metadata(extra: Vec<FieldDescriptor>) -> EntityMetadata {
        let mut descriptor = EntityDescriptor::new("Expense", "expenses")
            .field(FieldDescriptor::new("user", DataType::Text).partition_key())
            .field(
                FieldDescriptor::new("expense_id", DataType::Int)
                    .clustering_key(ClusteringOrder::Asc),
            )
            .field(FieldDescriptor::new("amount", DataType::Double));
        for field in extra {
            descriptor = descriptor.field(field);
        }
        EntityMetadata::from_descriptor(TypeId::of::<u8>(), descriptor).unwrap()
    }

    fn live_table() -> TableDefinition {
        TableDefinition::new("expenses")
            .with_column(LiveColumn::new("user", "text", ColumnKind::PartitionKey))
            .with_column(LiveColumn::new("expense_id", "int", ColumnKind::Clustering))
            .with_column(LiveColumn::new("amount", "double", ColumnKind::Regular))
    }

    fn cql(statements: &[Statement]) -> Vec<String> {
        statements.iter().map(Statement::cql).collect()
    }

    #[test]
    fn absent_table_creates_table_and_indexes() {
        let meta = metadata(vec![
            FieldDescriptor::new("tags", DataType::set(DataType::Text)).index("expense_tags_idx"),
        ]);
        let statements = diff("ledger", &meta, None, &SyncFlags::default()).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0].body(), StatementBody::CreateTable { .. }));
        assert_eq!(
            statements[1].cql(),
            "CREATE INDEX IF NOT EXISTS expense_tags_idx ON ledger.expenses (tags)"
        );
    }

    #[test]
    fn unchanged_table_needs_nothing() {
        let meta = metadata(vec![]);
        let live = live_table();
        assert!(diff("ledger", &meta, Some(&live), &SyncFlags::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn new_columns_are_added_with_their_index() {
        let meta = metadata(vec![
            FieldDescriptor::new("note", DataType::Text).index("expense_note_idx"),
        ]);
        let statements =
            diff("ledger", &meta, Some(&live_table()), &SyncFlags::default()).unwrap();
        assert_eq!(
            cql(&statements),
            vec![
                "ALTER TABLE ledger.expenses ADD note text".to_string(),
                "CREATE INDEX IF NOT EXISTS expense_note_idx ON ledger.expenses (note)".to_string(),
            ]
        );
    }

    #[test]
    fn missing_key_columns_are_never_added() {
        let meta = metadata(vec![]);
        let live = TableDefinition::new("expenses")
            .with_column(LiveColumn::new("user", "text", ColumnKind::PartitionKey))
            .with_column(LiveColumn::new("amount", "double", ColumnKind::Regular));

        for flags in [
            SyncFlags::default(),
            SyncFlags {
                do_not_add_columns: true,
                ..SyncFlags::default()
            },
        ] {
            let err = diff("ledger", &meta, Some(&live), &flags).unwrap_err();
            assert!(matches!(
                err,
                MappingError::UnsupportedSchemaChange { ref column, .. } if column == "expense_id"
            ));
        }
    }

    #[test]
    fn do_not_add_columns_suppresses_additions() {
        let meta = metadata(vec![FieldDescriptor::new("note", DataType::Text)]);
        let flags = SyncFlags {
            do_not_add_columns: true,
            ..SyncFlags::default()
        };
        assert!(diff("ledger", &meta, Some(&live_table()), &flags)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn undeclared_columns_are_dropped_unless_disabled() {
        let meta = metadata(vec![]);
        let live = live_table()
            .with_column(LiveColumn::new("Legacy", "text", ColumnKind::Regular))
            .with_index("legacy_idx", "Legacy");

        let statements = diff("ledger", &meta, Some(&live), &SyncFlags::default()).unwrap();
        assert_eq!(
            cql(&statements),
            vec![
                "DROP INDEX IF EXISTS ledger.legacy_idx".to_string(),
                "ALTER TABLE ledger.expenses DROP \"Legacy\"".to_string(),
            ]
        );

        let keep = SyncFlags {
            do_not_drop_columns: true,
            do_not_drop_custom_index: true,
            ..SyncFlags::default()
        };
        assert!(diff("ledger", &meta, Some(&live), &keep).unwrap().is_empty());
    }

    #[test]
    fn column_names_compare_case_insensitively() {
        let meta = metadata(vec![]);
        let live = TableDefinition::new("expenses")
            .with_column(LiveColumn::new("USER", "varchar", ColumnKind::PartitionKey))
            .with_column(LiveColumn::new("Expense_Id", "int", ColumnKind::Clustering))
            .with_column(LiveColumn::new("AMOUNT", "double", ColumnKind::Regular));
        assert!(diff("ledger", &meta, Some(&live), &SyncFlags::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn key_type_changes_are_never_altered() {
        let meta = metadata(vec![]);
        let live = TableDefinition::new("expenses")
            .with_column(LiveColumn::new("user", "uuid", ColumnKind::PartitionKey))
            .with_column(LiveColumn::new("expense_id", "bigint", ColumnKind::Clustering))
            .with_column(LiveColumn::new("amount", "double", ColumnKind::Regular));
        let all = SyncFlags::default();
        assert!(diff("ledger", &meta, Some(&live), &all).unwrap().is_empty());
    }

    #[test]
    fn regular_type_change_alters_and_recreates_index() {
        let meta = metadata(vec![
            FieldDescriptor::new("score", DataType::BigInt).index("expense_score_idx"),
        ]);
        let live = live_table()
            .with_column(LiveColumn::new("score", "int", ColumnKind::Regular))
            .with_index("expense_score_idx", "score");
        let statements = diff("ledger", &meta, Some(&live), &SyncFlags::default()).unwrap();
        assert_eq!(
            cql(&statements),
            vec![
                "ALTER TABLE ledger.expenses ALTER score TYPE bigint".to_string(),
                "CREATE INDEX IF NOT EXISTS expense_score_idx ON ledger.expenses (score)"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn static_type_change_is_unsupported() {
        let meta = metadata(vec![
            FieldDescriptor::new("balance", DataType::BigInt).static_column(),
        ]);
        let live = live_table().with_column(LiveColumn::new("balance", "int", ColumnKind::Static));
        let err = diff("ledger", &meta, Some(&live), &SyncFlags::default()).unwrap_err();
        assert!(matches!(err, MappingError::UnsupportedSchemaChange { .. }));
    }

    #[test]
    fn index_differences() {
        let meta = metadata(vec![
            FieldDescriptor::new("renamed", DataType::Text).index("new_idx"),
            FieldDescriptor::new("unindexed", DataType::Text).index(""),
            FieldDescriptor::new("custom", DataType::Text),
        ]);
        let live = live_table()
            .with_column(LiveColumn::new("renamed", "text", ColumnKind::Regular))
            .with_column(LiveColumn::new("unindexed", "text", ColumnKind::Regular))
            .with_column(LiveColumn::new("custom", "text", ColumnKind::Regular))
            .with_index("old_idx", "renamed")
            .with_index("stale_idx", "unindexed")
            .with_index("custom_idx", "custom");

        let statements = diff("ledger", &meta, Some(&live), &SyncFlags::default()).unwrap();
        assert_eq!(
            cql(&statements),
            vec![
                "DROP INDEX IF EXISTS ledger.old_idx".to_string(),
                "CREATE INDEX IF NOT EXISTS new_idx ON ledger.expenses (renamed)".to_string(),
                "DROP INDEX IF EXISTS ledger.stale_idx".to_string(),
                "DROP INDEX IF EXISTS ledger.custom_idx".to_string(),
            ]
        );

        let keep_custom = SyncFlags {
            do_not_drop_custom_index: true,
            ..SyncFlags::default()
        };
        let statements = diff("ledger", &meta, Some(&live), &keep_custom).unwrap();
        assert_eq!(statements.len(), 3);
    }
}

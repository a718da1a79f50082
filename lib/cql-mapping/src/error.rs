use thiserror::Error;

/// Errors raised by the mapping layer.
///
/// Expected negative outcomes are not errors: an absent row is `Ok(None)` and
/// a lost optimistic version check is [`SaveOutcome::NotSaved`](crate::SaveOutcome).
#[derive(Error, Debug)]
pub enum MappingError {
    /// The record declaration cannot be mapped to a table.
    #[error("Invalid entity metadata for {entity}: {reason}")]
    Metadata { entity: String, reason: String },

    /// Key and static columns cannot change type once the table exists.
    #[error("Unsupported schema change on {table}.{column}: {reason}")]
    UnsupportedSchemaChange {
        table: String,
        column: String,
        reason: String,
    },

    /// A DDL statement failed part way through a synchronization pass.
    #[error("Schema synchronization failed at `{statement}`: {source}")]
    SchemaSync {
        statement: String,
        #[source]
        source: Box<MappingError>,
    },

    /// Failure reported by the underlying driver or store.
    #[error("Driver error: {0}")]
    Driver(String),

    /// A value could not be converted between record and column form.
    #[error("Codec error on column {column}: {reason}")]
    Codec { column: String, reason: String },

    #[error("Invalid key for {table}: {reason}")]
    InvalidKey { table: String, reason: String },

    /// The operation does not apply to the column's declared type.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unknown column {column} on {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MappingError {
    pub(crate) fn metadata(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        MappingError::Metadata {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn codec(column: impl Into<String>, reason: impl Into<String>) -> Self {
        MappingError::Codec {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

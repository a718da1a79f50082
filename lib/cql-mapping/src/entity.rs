//! Entity declarations and their validated, cached metadata.
//!
//! Types implementing [`Entity`] describe themselves once through an
//! [`EntityDescriptor`]. Add `#[derive(Entity)]` to generate it, or implement
//! the trait by hand for types the derive cannot see.
//!
//! # Example
//!
//! ```text
//! #[derive(Entity, Serialize, Deserialize)]
//! #[entity(table = "expenses", ttl = 86400)]
//! pub struct Expense {
//!     #[column(partition_key)]
//!     pub user: String,
//!     #[column(clustering_key, order = "desc")]
//!     pub expense_id: i32,
//!     #[column(static_column)]
//!     pub balance: i64,
//!     #[column(index = "expense_tags_idx")]
//!     pub tags: HashSet<String>,
//!     #[column(version)]
//!     pub version: i64,
//! }
//! ```

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{DataType, MappingError};

/// A record type mapped to one table.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Field layout of the type. Called once per process; the result is validated and cached.
    fn descriptor() -> EntityDescriptor;
}

/// Unit enums stored either by ordinal or by declared variant name.
///
/// Generated by `#[derive(CqlEnum)]`. Variant names must match the serde
/// representation of each variant.
pub trait CqlEnum {
    fn variants() -> &'static [&'static str];

    fn name(&self) -> &'static str;

    fn ordinal(&self) -> usize {
        Self::variants()
            .iter()
            .position(|v| *v == self.name())
            .unwrap_or(0)
    }
}

/// Role of a column in the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Regular,
    Partition,
    Clustering(ClusteringOrder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusteringOrder {
    #[default]
    Asc,
    Desc,
}

impl ClusteringOrder {
    pub fn cql(&self) -> &'static str {
        match self {
            ClusteringOrder::Asc => "ASC",
            ClusteringOrder::Desc => "DESC",
        }
    }
}

/// How an enum field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumMapping {
    /// Zero-based position of the variant, stored as `int`.
    Ordinal(&'static [&'static str]),
    /// Declared variant name, stored as `text`.
    Name(&'static [&'static str]),
}

impl EnumMapping {
    pub fn variants(&self) -> &'static [&'static str] {
        match self {
            EnumMapping::Ordinal(v) | EnumMapping::Name(v) => v,
        }
    }
}

/// Declared layout of a record type, before validation.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub entity: String,
    pub table: String,
    pub default_ttl: Option<u32>,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            default_ttl: None,
            fields: Vec::new(),
        }
    }

    pub fn default_ttl(mut self, seconds: u32) -> Self {
        self.default_ttl = Some(seconds);
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }
}

/// Declared mapping of one record field to one column.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub field_name: String,
    pub json_key: String,
    pub column: String,
    pub data_type: DataType,
    pub cql_type: Option<String>,
    pub key: KeyRole,
    pub index: Option<String>,
    pub is_static: bool,
    pub is_version: bool,
    pub nullable: bool,
    pub auto_generate: bool,
    pub frozen: bool,
    pub enum_mapping: Option<EnumMapping>,
}

impl FieldDescriptor {
    /// Field named `field_name`, stored in a column of the same name.
    pub fn new(field_name: impl Into<String>, data_type: DataType) -> Self {
        let field_name = field_name.into();
        Self {
            json_key: field_name.clone(),
            column: field_name.clone(),
            field_name,
            data_type,
            cql_type: None,
            key: KeyRole::Regular,
            index: None,
            is_static: false,
            is_version: false,
            nullable: false,
            auto_generate: false,
            frozen: false,
            enum_mapping: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Key of the field in the record's serde representation.
    pub fn json_key(mut self, key: impl Into<String>) -> Self {
        self.json_key = key.into();
        self
    }

    /// Override the inferred type with CQL type text; parsed during validation.
    pub fn cql_type(mut self, cql: impl Into<String>) -> Self {
        self.cql_type = Some(cql.into());
        self
    }

    pub fn partition_key(mut self) -> Self {
        self.key = KeyRole::Partition;
        self
    }

    pub fn clustering_key(mut self, order: ClusteringOrder) -> Self {
        self.key = KeyRole::Clustering(order);
        self
    }

    /// Secondary index name. An empty name declares that no index should exist.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn static_column(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn version(mut self) -> Self {
        self.is_version = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Generate a fresh UUID on save when the value is unset.
    pub fn auto_generate(mut self) -> Self {
        self.auto_generate = true;
        self
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn enum_ordinal(mut self, variants: &'static [&'static str]) -> Self {
        self.enum_mapping = Some(EnumMapping::Ordinal(variants));
        self.data_type = DataType::Int;
        self
    }

    pub fn enum_name(mut self, variants: &'static [&'static str]) -> Self {
        self.enum_mapping = Some(EnumMapping::Name(variants));
        self.data_type = DataType::Text;
        self
    }
}

/// A validated column of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnField {
    pub field_name: String,
    pub json_key: String,
    pub name: String,
    pub data_type: DataType,
    pub key: KeyRole,
    pub index: Option<String>,
    pub is_static: bool,
    pub nullable: bool,
    pub auto_generate: bool,
    pub enum_mapping: Option<EnumMapping>,
}

impl ColumnField {
    pub fn is_key(&self) -> bool {
        !matches!(self.key, KeyRole::Regular)
    }

    pub fn is_partition_key(&self) -> bool {
        matches!(self.key, KeyRole::Partition)
    }

    pub fn is_clustering_key(&self) -> bool {
        matches!(self.key, KeyRole::Clustering(_))
    }

    pub fn is_counter(&self) -> bool {
        self.data_type.is_counter()
    }

    fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.field_name.eq_ignore_ascii_case(name)
            || self.json_key.eq_ignore_ascii_case(name)
    }
}

/// Validated mapping of a record type to its table.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    type_id: TypeId,
    entity: String,
    table: String,
    columns: Vec<ColumnField>,
    primary_key: Vec<usize>,
    partition_key_len: usize,
    indexes: BTreeMap<String, String>,
    version: Option<usize>,
    default_ttl: Option<u32>,
}

impl EntityMetadata {
    /// Validate a descriptor.
    ///
    /// Fails when there is no partition key, when column names collide
    /// (case-insensitively), when more than one version field is declared, or
    /// when a column type cannot be stored as declared.
    pub fn from_descriptor(
        type_id: TypeId,
        descriptor: EntityDescriptor,
    ) -> Result<Self, MappingError> {
        let entity = descriptor.entity.clone();
        let fail = |reason: String| MappingError::metadata(entity.clone(), reason);

        if descriptor.table.trim().is_empty() {
            return Err(fail("table name is empty".to_string()));
        }

        let mut columns = Vec::with_capacity(descriptor.fields.len());
        let mut versions = Vec::new();
        let mut seen = HashSet::new();
        for field in descriptor.fields {
            if !seen.insert(field.column.to_ascii_lowercase()) {
                return Err(fail(format!("duplicate column name {}", field.column)));
            }
            if field.is_version {
                versions.push(columns.len());
            }
            columns.push(validate_field(field).map_err(&fail)?);
        }

        let partition: Vec<usize> = (0..columns.len())
            .filter(|&i| columns[i].is_partition_key())
            .collect();
        if partition.is_empty() {
            return Err(fail("at least one partition key column is required".to_string()));
        }
        let clustering: Vec<usize> = (0..columns.len())
            .filter(|&i| columns[i].is_clustering_key())
            .collect();

        if clustering.is_empty()
            && let Some(column) = columns.iter().find(|c| c.is_static)
        {
            return Err(fail(format!(
                "static column {} requires clustering columns",
                column.name
            )));
        }

        let has_counter = columns.iter().any(|c| c.is_counter());
        if has_counter
            && let Some(column) = columns.iter().find(|c| !c.is_key() && !c.is_counter())
        {
            return Err(fail(format!(
                "column {} must be a counter: counter tables hold only counters outside the key",
                column.name
            )));
        }

        if versions.len() > 1 {
            return Err(fail("at most one version field may be declared".to_string()));
        }

        let indexes = columns
            .iter()
            .filter_map(|c| c.index.as_ref().map(|idx| (c.name.clone(), idx.clone())))
            .collect();

        let partition_key_len = partition.len();
        let mut primary_key = partition;
        primary_key.extend(clustering);

        Ok(Self {
            type_id,
            entity: descriptor.entity,
            table: descriptor.table,
            columns,
            primary_key,
            partition_key_len,
            indexes,
            version: versions.first().copied(),
            default_ttl: descriptor.default_ttl,
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnField] {
        &self.columns
    }

    /// Primary-key columns: partition key first, then clustering columns.
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnField> {
        self.primary_key.iter().map(|&i| &self.columns[i])
    }

    pub fn primary_key_len(&self) -> usize {
        self.primary_key.len()
    }

    pub fn partition_key(&self) -> impl Iterator<Item = &ColumnField> {
        self.primary_key().take(self.partition_key_len)
    }

    pub fn clustering_key(&self) -> impl Iterator<Item = &ColumnField> {
        self.primary_key().skip(self.partition_key_len)
    }

    /// Declared indexes, column name to index name.
    pub fn indexes(&self) -> &BTreeMap<String, String> {
        &self.indexes
    }

    pub fn index_for(&self, column: &str) -> Option<&str> {
        self.indexes
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, idx)| idx.as_str())
    }

    pub fn version_field(&self) -> Option<&ColumnField> {
        self.version.map(|i| &self.columns[i])
    }

    pub(crate) fn version_position(&self) -> Option<usize> {
        self.version
    }

    pub fn default_ttl(&self) -> Option<u32> {
        self.default_ttl
    }

    pub fn has_counters(&self) -> bool {
        self.columns.iter().any(|c| c.is_counter())
    }

    /// Position of a column by column name or field name, case-insensitive.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .or_else(|| self.columns.iter().position(|c| c.answers_to(name)))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnField> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub(crate) fn require_column(&self, name: &str) -> Result<&ColumnField, MappingError> {
        self.column(name).ok_or_else(|| MappingError::UnknownColumn {
            table: self.table.clone(),
            column: name.to_string(),
        })
    }

    pub(crate) fn key_positions(&self) -> &[usize] {
        &self.primary_key
    }
}

fn validate_field(field: FieldDescriptor) -> Result<ColumnField, String> {
    let mut data_type = match &field.cql_type {
        Some(text) => DataType::parse(text).ok_or_else(|| {
            format!(
                "column {} has unknown type `{}`; collection columns must declare element types",
                field.column, text
            )
        })?,
        None => field.data_type.clone(),
    };
    if field.frozen && data_type.is_collection() && !data_type.is_frozen() {
        data_type = DataType::frozen(data_type);
    }
    validate_type(&field.column, &data_type, true)?;

    if field.column.trim().is_empty() {
        return Err(format!("field {} maps to an empty column name", field.field_name));
    }
    let is_key = !matches!(field.key, KeyRole::Regular);
    if is_key && field.is_static {
        return Err(format!("key column {} cannot be static", field.column));
    }
    if is_key && data_type.is_collection() && !data_type.is_frozen() {
        return Err(format!("key column {} must use a frozen collection", field.column));
    }
    if is_key && data_type.is_counter() {
        return Err(format!("key column {} cannot be a counter", field.column));
    }
    if field.is_version && (is_key || !matches!(data_type, DataType::Int | DataType::BigInt)) {
        return Err(format!(
            "version field {} must be a non-key int or bigint column",
            field.column
        ));
    }
    if let Some(mapping) = &field.enum_mapping
        && mapping.variants().is_empty()
    {
        return Err(format!("enum column {} declares no variants", field.column));
    }
    if field.auto_generate && !matches!(data_type, DataType::Uuid | DataType::Timeuuid) {
        return Err(format!(
            "auto-generated column {} must be a uuid or timeuuid",
            field.column
        ));
    }

    Ok(ColumnField {
        field_name: field.field_name,
        json_key: field.json_key,
        name: field.column,
        data_type,
        key: field.key,
        index: field.index,
        is_static: field.is_static,
        nullable: field.nullable,
        auto_generate: field.auto_generate,
        enum_mapping: field.enum_mapping,
    })
}

fn validate_type(column: &str, ty: &DataType, top_level: bool) -> Result<(), String> {
    match ty {
        DataType::Counter if !top_level => Err(format!(
            "column {} cannot hold counters inside a collection",
            column
        )),
        DataType::List(element) | DataType::Set(element) => validate_type(column, element, false),
        DataType::Map(key, value) => {
            validate_type(column, key, false)?;
            validate_type(column, value, false)
        }
        DataType::Frozen(inner) => validate_type(column, inner, top_level),
        _ => Ok(()),
    }
}

type Registry = RwLock<HashMap<TypeId, Arc<EntityMetadata>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Validated metadata for `T`, built on first use and cached for the process lifetime.
pub fn metadata_for<T: Entity>() -> Result<Arc<EntityMetadata>, MappingError> {
    let type_id = TypeId::of::<T>();
    if let Some(found) = registry().read().get(&type_id) {
        return Ok(Arc::clone(found));
    }

    let metadata = Arc::new(EntityMetadata::from_descriptor(type_id, T::descriptor())?);
    let mut cache = registry().write();
    let entry = cache.entry(type_id).or_insert(metadata);
    Ok(Arc::clone(entry))
}

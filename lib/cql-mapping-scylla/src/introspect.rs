//! Live table definitions read from `system_schema`.

use cql_mapping::{ClusteringOrder, ColumnKind, LiveColumn, ResultSet, TableDefinition, Value};

pub(crate) const COLUMNS_CQL: &str = "SELECT column_name, kind, position, type, clustering_order \
     FROM system_schema.columns WHERE keyspace_name = ? AND table_name = ?";

pub(crate) const INDEXES_CQL: &str =
    "SELECT index_name, options FROM system_schema.indexes WHERE keyspace_name = ? AND table_name = ?";

pub(crate) const KEYSPACE_CQL: &str =
    "SELECT keyspace_name FROM system_schema.keyspaces WHERE keyspace_name = ?";

fn column_kind(kind: &str) -> ColumnKind {
    match kind {
        "partition_key" => ColumnKind::PartitionKey,
        "clustering" => ColumnKind::Clustering,
        "static" => ColumnKind::Static,
        _ => ColumnKind::Regular,
    }
}

fn clustering_order(order: &str) -> Option<ClusteringOrder> {
    match order.to_ascii_lowercase().as_str() {
        "asc" => Some(ClusteringOrder::Asc),
        "desc" => Some(ClusteringOrder::Desc),
        _ => None,
    }
}

/// Column named by an index target such as `tags`, `values(tags)` or `"UserName"`.
fn index_target(target: &str) -> String {
    let inner = match (target.find('('), target.ends_with(')')) {
        (Some(open), true) => &target[open + 1..target.len() - 1],
        _ => target,
    };
    inner.trim().trim_matches('"').replace("\"\"", "\"")
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Build a definition from the `system_schema` result sets. No columns means no table.
pub(crate) fn table_definition(
    table: &str,
    columns: &ResultSet,
    indexes: &ResultSet,
) -> Option<TableDefinition> {
    if columns.is_empty() {
        return None;
    }

    let mut live: Vec<(i64, LiveColumn)> = columns
        .rows()
        .iter()
        .filter_map(|row| {
            let name = text(row.get("column_name"))?;
            let cql_type = text(row.get("type"))?;
            let kind = column_kind(&text(row.get("kind")).unwrap_or_default());
            let position = row.get("position").and_then(Value::as_i64).unwrap_or(-1);
            let mut column = LiveColumn::new(name, cql_type, kind);
            if kind == ColumnKind::Clustering {
                column.clustering_order =
                    text(row.get("clustering_order")).and_then(|o| clustering_order(&o));
            }
            Some((position, column))
        })
        .collect();

    let rank = |kind: ColumnKind| match kind {
        ColumnKind::PartitionKey => 0,
        ColumnKind::Clustering => 1,
        ColumnKind::Static => 2,
        ColumnKind::Regular => 3,
    };
    live.sort_by(|(pa, a), (pb, b)| {
        rank(a.kind)
            .cmp(&rank(b.kind))
            .then(pa.cmp(pb))
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut definition = TableDefinition::new(table);
    for (_, column) in live {
        definition = definition.with_column(column);
    }

    for row in indexes.rows() {
        let Some(name) = text(row.get("index_name")) else {
            continue;
        };
        let target = match row.get("options") {
            Some(Value::Map(options)) => options
                .iter()
                .find(|(k, _)| k.as_str() == Some("target"))
                .and_then(|(_, v)| v.as_str())
                .map(index_target),
            _ => None,
        };
        if let Some(column) = target {
            definition = definition.with_index(name, column);
        }
    }
    Some(definition)
}

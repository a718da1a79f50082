//! Conversions between mapping values and driver values.

use cql_mapping::{Consistency, RetryPolicy, ResultSet, Row, Statement, Value};
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::{Counter, CqlTimestamp, CqlTimeuuid};
use scylla::QueryResult;
use std::sync::Arc;
use tracing::warn;

/// Bind form of a value. `None` binds CQL null.
pub(crate) fn to_cql(value: &Value) -> Option<CqlValue> {
    let converted = match value {
        Value::Null => return None,
        Value::Text(s) => CqlValue::Text(s.clone()),
        Value::TinyInt(n) => CqlValue::TinyInt(*n),
        Value::SmallInt(n) => CqlValue::SmallInt(*n),
        Value::Int(n) => CqlValue::Int(*n),
        Value::BigInt(n) => CqlValue::BigInt(*n),
        Value::Counter(n) => CqlValue::Counter(Counter(*n)),
        Value::Float(n) => CqlValue::Float(*n),
        Value::Double(n) => CqlValue::Double(*n),
        Value::Boolean(b) => CqlValue::Boolean(*b),
        Value::Uuid(u) => CqlValue::Uuid(*u),
        Value::Timeuuid(u) => CqlValue::Timeuuid(CqlTimeuuid::from(*u)),
        Value::Timestamp(ms) => CqlValue::Timestamp(CqlTimestamp(*ms)),
        Value::Blob(bytes) => CqlValue::Blob(bytes.clone()),
        Value::List(items) => CqlValue::List(items.iter().filter_map(to_cql).collect()),
        Value::Set(items) => CqlValue::Set(items.iter().filter_map(to_cql).collect()),
        Value::Map(entries) => CqlValue::Map(
            entries
                .iter()
                .filter_map(|(k, v)| Some((to_cql(k)?, to_cql(v)?)))
                .collect(),
        ),
    };
    Some(converted)
}

pub(crate) fn bind_values(statement: &Statement) -> Vec<Option<CqlValue>> {
    statement.values().iter().map(to_cql).collect()
}

/// Row form of a driver value. Types the mapper never declares read as null.
pub(crate) fn from_cql(column: &str, value: CqlValue) -> Value {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s),
        CqlValue::TinyInt(n) => Value::TinyInt(n),
        CqlValue::SmallInt(n) => Value::SmallInt(n),
        CqlValue::Int(n) => Value::Int(n),
        CqlValue::BigInt(n) => Value::BigInt(n),
        CqlValue::Counter(c) => Value::Counter(c.0),
        CqlValue::Float(n) => Value::Float(n),
        CqlValue::Double(n) => Value::Double(n),
        CqlValue::Boolean(b) => Value::Boolean(b),
        CqlValue::Uuid(u) => Value::Uuid(u),
        CqlValue::Timeuuid(t) => Value::Timeuuid(t.into()),
        CqlValue::Timestamp(t) => Value::Timestamp(t.0),
        CqlValue::Blob(bytes) => Value::Blob(bytes),
        CqlValue::Inet(addr) => Value::Text(addr.to_string()),
        CqlValue::List(items) => Value::List(items.into_iter().map(|v| from_cql(column, v)).collect()),
        CqlValue::Set(items) => Value::Set(items.into_iter().map(|v| from_cql(column, v)).collect()),
        CqlValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (from_cql(column, k), from_cql(column, v)))
                .collect(),
        ),
        CqlValue::Empty => Value::Null,
        other => {
            warn!(column, value = ?other, "unsupported CQL type read as null");
            Value::Null
        }
    }
}

pub(crate) fn result_set(result: QueryResult) -> ResultSet {
    let names: Vec<String> = result
        .col_specs()
        .iter()
        .map(|spec| spec.name.clone())
        .collect();
    let rows = result
        .rows_or_empty()
        .into_iter()
        .map(|row| {
            Row::new(
                names
                    .iter()
                    .zip(row.columns)
                    .map(|(name, value)| {
                        let value = value.map(|v| from_cql(name, v)).unwrap_or_default();
                        (name.clone(), value)
                    })
                    .collect(),
            )
        })
        .collect();
    ResultSet::new(rows)
}

pub(crate) fn consistency(level: Consistency) -> scylla::statement::Consistency {
    use scylla::statement::Consistency as Level;
    match level {
        Consistency::Any => Level::Any,
        Consistency::One => Level::One,
        Consistency::Two => Level::Two,
        Consistency::Three => Level::Three,
        Consistency::Quorum => Level::Quorum,
        Consistency::All => Level::All,
        Consistency::LocalQuorum => Level::LocalQuorum,
        Consistency::EachQuorum => Level::EachQuorum,
        Consistency::LocalOne => Level::LocalOne,
        Consistency::Serial => Level::Serial,
        Consistency::LocalSerial => Level::LocalSerial,
    }
}

pub(crate) fn retry_policy(policy: RetryPolicy) -> Arc<dyn scylla::retry_policy::RetryPolicy> {
    use scylla::retry_policy::{DefaultRetryPolicy, FallthroughRetryPolicy};
    use scylla::transport::downgrading_consistency_retry_policy::DowngradingConsistencyRetryPolicy;
    match policy {
        RetryPolicy::Default => Arc::new(DefaultRetryPolicy::new()),
        RetryPolicy::Fallthrough => Arc::new(FallthroughRetryPolicy::new()),
        RetryPolicy::DowngradingConsistency => Arc::new(DowngradingConsistencyRetryPolicy::new()),
    }
}

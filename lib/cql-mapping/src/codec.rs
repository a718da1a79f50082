//! Serde-based conversion between records and column values.
//!
//! A record is serialized to a JSON object and each declared column is read
//! from it by the field's serde key, then converted by the column's declared
//! type. Reading goes the other way: column values are rendered back into a
//! JSON object and deserialized into the record type. Neither direction needs
//! type-specific generated code beyond the entity descriptor.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value as Json};
use uuid::Uuid;

use crate::entity::{ColumnField, EnumMapping};
use crate::{DataType, EntityMetadata, MappingError, Row, Timestamp, Value};

const EPOCH: &str = "1970-01-01T00:00:00.000Z";

/// A record serialized for binding: its JSON form plus one value per declared column.
#[derive(Debug, Clone)]
pub(crate) struct RecordValues {
    pub json: Map<String, Json>,
    pub values: Vec<Value>,
}

impl RecordValues {
    pub fn from_record<T: Serialize>(
        metadata: &EntityMetadata,
        record: &T,
    ) -> Result<Self, MappingError> {
        let json = match serde_json::to_value(record)? {
            Json::Object(map) => map,
            _ => {
                return Err(MappingError::metadata(
                    metadata.entity_name(),
                    "records must serialize to a JSON object",
                ));
            }
        };

        let values = metadata
            .columns()
            .iter()
            .map(|column| json_to_value(column, json.get(&column.json_key).unwrap_or(&Json::Null)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { json, values })
    }

    /// Replace the value at column `position` in both representations.
    pub fn set(
        &mut self,
        column: &ColumnField,
        position: usize,
        value: Value,
    ) -> Result<(), MappingError> {
        self.json
            .insert(column.json_key.clone(), value_to_json(column, &value)?);
        self.values[position] = value;
        Ok(())
    }

    pub fn into_record<T: DeserializeOwned>(self) -> Result<T, MappingError> {
        Ok(serde_json::from_value(Json::Object(self.json))?)
    }
}

/// Build a record from a row.
///
/// Columns in the row that the record does not declare are ignored. Declared
/// columns missing from the row, or null, are left out for optional fields and
/// take their type's default otherwise.
pub fn record_from_row<T: DeserializeOwned>(
    metadata: &EntityMetadata,
    row: &Row,
) -> Result<T, MappingError> {
    let mut json = Map::new();
    for column in metadata.columns() {
        let value = match row.get(&column.name) {
            Some(value) if !value.is_null() => value_to_json(column, value)?,
            _ if column.nullable => continue,
            _ => default_json(column),
        };
        json.insert(column.json_key.clone(), value);
    }

    Ok(serde_json::from_value(Json::Object(json))?)
}

/// Convert a serialized field to the column's value.
pub(crate) fn json_to_value(column: &ColumnField, json: &Json) -> Result<Value, MappingError> {
    if json.is_null() {
        return Ok(Value::Null);
    }

    if let Some(mapping) = &column.enum_mapping {
        return enum_to_value(column, mapping, json);
    }

    convert_json(&column.data_type, json).map_err(|reason| MappingError::codec(&column.name, reason))
}

/// Convert a column value to its serialized field form.
pub(crate) fn value_to_json(column: &ColumnField, value: &Value) -> Result<Json, MappingError> {
    if value.is_null() {
        return Ok(Json::Null);
    }

    if let Some(mapping) = &column.enum_mapping {
        return enum_to_json(column, mapping, value);
    }

    render_json(value).map_err(|reason| MappingError::codec(&column.name, reason))
}

fn enum_to_value(
    column: &ColumnField,
    mapping: &EnumMapping,
    json: &Json,
) -> Result<Value, MappingError> {
    let variants = mapping.variants();
    let position = match json {
        Json::String(name) => variants.iter().position(|v| *v == name.as_str()),
        Json::Number(n) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n < variants.len()),
        _ => None,
    }
    .ok_or_else(|| MappingError::codec(&column.name, format!("unknown enum variant {}", json)))?;

    Ok(match mapping {
        EnumMapping::Ordinal(_) => Value::Int(position as i32),
        EnumMapping::Name(_) => Value::Text(variants[position].to_string()),
    })
}

fn enum_to_json(
    column: &ColumnField,
    mapping: &EnumMapping,
    value: &Value,
) -> Result<Json, MappingError> {
    let variants = mapping.variants();
    let name = match (mapping, value) {
        (EnumMapping::Ordinal(_), value) => value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .and_then(|n| variants.get(n)),
        (EnumMapping::Name(_), Value::Text(name)) => variants.iter().find(|v| **v == name.as_str()),
        _ => None,
    }
    .ok_or_else(|| MappingError::codec(&column.name, format!("no enum variant for {:?}", value)))?;

    Ok(Json::String((*name).to_string()))
}

fn convert_json(ty: &DataType, json: &Json) -> Result<Value, String> {
    let mismatch = || format!("cannot store {} as {}", json, ty);
    if json.is_null() {
        return Ok(Value::Null);
    }

    match ty.unfrozen() {
        DataType::Ascii | DataType::Text => json
            .as_str()
            .map(|s| Value::Text(s.to_string()))
            .ok_or_else(mismatch),
        DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt | DataType::Counter => {
            json.as_i64()
                .ok_or_else(mismatch)
                .and_then(|n| Value::BigInt(n).coerce(ty.unfrozen()))
        }
        DataType::Float | DataType::Double => json
            .as_f64()
            .ok_or_else(mismatch)
            .and_then(|n| Value::Double(n).coerce(ty.unfrozen())),
        DataType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
        DataType::Uuid | DataType::Timeuuid => json
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(mismatch)
            .and_then(|u| Value::Uuid(u).coerce(ty.unfrozen())),
        DataType::Timestamp => match json {
            Json::Number(n) => n.as_i64().map(Value::Timestamp).ok_or_else(mismatch),
            Json::String(s) => Value::Text(s.clone()).coerce(&DataType::Timestamp),
            _ => Err(mismatch()),
        },
        DataType::Blob => json
            .as_array()
            .ok_or_else(mismatch)?
            .iter()
            .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()).ok_or_else(mismatch))
            .collect::<Result<Vec<u8>, String>>()
            .map(Value::Blob),
        DataType::List(element) => convert_elements(element, json)
            .ok_or_else(mismatch)?
            .map(Value::List),
        DataType::Set(element) => convert_elements(element, json)
            .ok_or_else(mismatch)?
            .map(Value::Set),
        DataType::Map(key_type, value_type) => json
            .as_object()
            .ok_or_else(mismatch)?
            .iter()
            .map(|(k, v)| Ok((parse_map_key(key_type, k)?, convert_json(value_type, v)?)))
            .collect::<Result<Vec<_>, String>>()
            .map(Value::Map),
        DataType::Frozen(_) => Err(mismatch()),
    }
}

fn convert_elements(element: &DataType, json: &Json) -> Option<Result<Vec<Value>, String>> {
    json.as_array()
        .map(|items| items.iter().map(|item| convert_json(element, item)).collect())
}

// JSON object keys are always strings, so map keys round-trip through text.
fn parse_map_key(ty: &DataType, key: &str) -> Result<Value, String> {
    match ty.unfrozen() {
        DataType::Ascii | DataType::Text => Ok(Value::Text(key.to_string())),
        DataType::Boolean => key
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|e| e.to_string()),
        DataType::Float | DataType::Double => key
            .parse::<f64>()
            .map_err(|e| e.to_string())
            .and_then(|n| Value::Double(n).coerce(ty)),
        DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => key
            .parse::<i64>()
            .map_err(|e| e.to_string())
            .and_then(|n| Value::BigInt(n).coerce(ty)),
        other => Value::Text(key.to_string()).coerce(other),
    }
}

fn map_key_text(value: &Value) -> Result<String, String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Uuid(u) | Value::Timeuuid(u) => Ok(u.to_string()),
        Value::Timestamp(ms) => Ok(Timestamp::from_millis(*ms).to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Float(n) => Ok(n.to_string()),
        Value::Double(n) => Ok(n.to_string()),
        other => other
            .as_i64()
            .map(|n| n.to_string())
            .ok_or_else(|| format!("{:?} cannot be used as a map key", other)),
    }
}

fn render_json(value: &Value) -> Result<Json, String> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Text(s) => Json::String(s.clone()),
        Value::TinyInt(n) => Json::from(*n),
        Value::SmallInt(n) => Json::from(*n),
        Value::Int(n) => Json::from(*n),
        Value::BigInt(n) | Value::Counter(n) => Json::from(*n),
        Value::Float(n) => float_json(f64::from(*n))?,
        Value::Double(n) => float_json(*n)?,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Uuid(u) | Value::Timeuuid(u) => Json::String(u.to_string()),
        Value::Timestamp(ms) => Json::String(Timestamp::from_millis(*ms).to_string()),
        Value::Blob(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::List(items) | Value::Set(items) => Json::Array(
            items
                .iter()
                .map(render_json)
                .collect::<Result<Vec<_>, String>>()?,
        ),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| Ok((map_key_text(k)?, render_json(v)?)))
                .collect::<Result<Map<_, _>, String>>()?,
        ),
    })
}

fn float_json(n: f64) -> Result<Json, String> {
    Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| format!("{} has no JSON representation", n))
}

/// Serialized default for a non-optional column absent from a row.
fn default_json(column: &ColumnField) -> Json {
    if let Some(mapping) = &column.enum_mapping {
        return mapping
            .variants()
            .first()
            .map(|v| Json::String((*v).to_string()))
            .unwrap_or(Json::Null);
    }

    match column.data_type.unfrozen() {
        DataType::Ascii | DataType::Text => Json::String(String::new()),
        DataType::TinyInt
        | DataType::SmallInt
        | DataType::Int
        | DataType::BigInt
        | DataType::Counter => Json::from(0),
        DataType::Float | DataType::Double => Json::from(0.0),
        DataType::Boolean => Json::Bool(false),
        DataType::Uuid | DataType::Timeuuid => Json::String(Uuid::nil().to_string()),
        DataType::Timestamp => Json::String(EPOCH.to_string()),
        DataType::Blob | DataType::List(_) | DataType::Set(_) => Json::Array(Vec::new()),
        DataType::Map(_, _) => Json::Object(Map::new()),
        DataType::Frozen(_) => Json::Null,
    }
}

//! Column types and bound values.
//!
//! [`DataType`] is the declared CQL type of a column, [`Value`] is a value
//! bound to a statement placeholder or read back from a row, and [`Key`] is
//! the ordered primary-key components used for lookups.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::DateTime;
use uuid::Uuid;

use crate::{CqlEnum, Timestamp};

/// Declared CQL type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Ascii,
    Text,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Boolean,
    Uuid,
    Timeuuid,
    Timestamp,
    Blob,
    Counter,
    List(Box<DataType>),
    Set(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
    Frozen(Box<DataType>),
}

impl DataType {
    pub fn list(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub fn set(element: DataType) -> Self {
        DataType::Set(Box::new(element))
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        DataType::Map(Box::new(key), Box::new(value))
    }

    pub fn frozen(inner: DataType) -> Self {
        DataType::Frozen(Box::new(inner))
    }

    /// The type with any outer `frozen<...>` removed.
    pub fn unfrozen(&self) -> &DataType {
        match self {
            DataType::Frozen(inner) => inner.unfrozen(),
            other => other,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self.unfrozen(),
            DataType::List(_) | DataType::Set(_) | DataType::Map(_, _)
        )
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, DataType::Frozen(_))
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, DataType::Counter)
    }

    /// Lower-case type name without parameters (`list`, `int`, ...).
    pub fn base_name(&self) -> &'static str {
        match self {
            DataType::Ascii => "ascii",
            DataType::Text => "text",
            DataType::TinyInt => "tinyint",
            DataType::SmallInt => "smallint",
            DataType::Int => "int",
            DataType::BigInt => "bigint",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Uuid => "uuid",
            DataType::Timeuuid => "timeuuid",
            DataType::Timestamp => "timestamp",
            DataType::Blob => "blob",
            DataType::Counter => "counter",
            DataType::List(_) => "list",
            DataType::Set(_) => "set",
            DataType::Map(_, _) => "map",
            DataType::Frozen(_) => "frozen",
        }
    }

    /// CQL type text. Collections nested inside collections are always frozen.
    pub fn cql(&self) -> String {
        self.render(false)
    }

    fn render(&self, nested: bool) -> String {
        match self {
            DataType::List(element) => {
                wrap_nested(format!("list<{}>", element.render(true)), nested)
            }
            DataType::Set(element) => wrap_nested(format!("set<{}>", element.render(true)), nested),
            DataType::Map(key, value) => wrap_nested(
                format!("map<{}, {}>", key.render(true), value.render(true)),
                nested,
            ),
            DataType::Frozen(inner) => format!("frozen<{}>", inner.render(false)),
            scalar => scalar.base_name().to_string(),
        }
    }

    /// Parse CQL type text such as `map<text, frozen<list<int>>>`.
    ///
    /// Returns `None` for unknown names and for collections without element types.
    pub fn parse(text: &str) -> Option<DataType> {
        let text = text.trim();
        let Some(open) = text.find('<') else {
            return scalar_from_name(&text.to_ascii_lowercase());
        };
        if !text.ends_with('>') {
            return None;
        }
        let name = text[..open].trim().to_ascii_lowercase();
        let args = split_type_args(&text[open + 1..text.len() - 1])?;
        match (name.as_str(), args.as_slice()) {
            ("list", [element]) => Some(DataType::list(DataType::parse(element)?)),
            ("set", [element]) => Some(DataType::set(DataType::parse(element)?)),
            ("map", [key, value]) => Some(DataType::map(
                DataType::parse(key)?,
                DataType::parse(value)?,
            )),
            ("frozen", [inner]) => Some(DataType::frozen(DataType::parse(inner)?)),
            _ => None,
        }
    }

    /// Whether the live column type text denotes this type.
    pub fn matches_cql(&self, live: &str) -> bool {
        normalize_type_text(&self.cql()) == normalize_type_text(live)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.cql())
    }
}

fn wrap_nested(rendered: String, nested: bool) -> String {
    if nested {
        format!("frozen<{}>", rendered)
    } else {
        rendered
    }
}

fn scalar_from_name(name: &str) -> Option<DataType> {
    let ty = match name {
        "ascii" => DataType::Ascii,
        "text" | "varchar" => DataType::Text,
        "tinyint" => DataType::TinyInt,
        "smallint" => DataType::SmallInt,
        "int" => DataType::Int,
        "bigint" => DataType::BigInt,
        "float" => DataType::Float,
        "double" => DataType::Double,
        "boolean" => DataType::Boolean,
        "uuid" => DataType::Uuid,
        "timeuuid" => DataType::Timeuuid,
        "timestamp" => DataType::Timestamp,
        "blob" => DataType::Blob,
        "counter" => DataType::Counter,
        _ => return None,
    };
    Some(ty)
}

/// Split `a, map<b, c>` on top-level commas.
fn split_type_args(args: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                parts.push(args[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(args[start..].trim());
    if depth != 0 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}

fn normalize_type_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
        .replace("varchar", "text")
}

/// A value bound to a statement or read from a row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Counter(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Uuid(Uuid),
    Timeuuid(Uuid),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Blob(Vec<u8>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Name of an enum variant as a text value.
    pub fn variant<E: CqlEnum>(value: &E) -> Self {
        Value::Text(value.name().to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(n) => Some(i64::from(*n)),
            Value::SmallInt(n) => Some(i64::from(*n)),
            Value::Int(n) => Some(i64::from(*n)),
            Value::BigInt(n) | Value::Counter(n) | Value::Timestamp(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(f64::from(*n)),
            Value::Double(n) => Some(*n),
            other => other.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) | Value::Timeuuid(u) => Some(*u),
            Value::Text(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }

    /// Elements of a list or set value.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a caller-supplied value to the representation of `ty`.
    ///
    /// Integers convert between widths when they fit, text parses into
    /// identifiers and timestamps, and collections convert element-wise.
    pub fn coerce(self, ty: &DataType) -> Result<Value, String> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |value: &Value| format!("cannot convert {:?} to {}", value, ty);
        match ty {
            DataType::Frozen(inner) => self.coerce(inner),
            DataType::Ascii | DataType::Text => match self {
                Value::Text(s) => Ok(Value::Text(s)),
                Value::Uuid(u) | Value::Timeuuid(u) => Ok(Value::Text(u.to_string())),
                other => Err(mismatch(&other)),
            },
            DataType::TinyInt => integer(&self)
                .and_then(|n| i8::try_from(n).ok())
                .map(Value::TinyInt)
                .ok_or_else(|| mismatch(&self)),
            DataType::SmallInt => integer(&self)
                .and_then(|n| i16::try_from(n).ok())
                .map(Value::SmallInt)
                .ok_or_else(|| mismatch(&self)),
            DataType::Int => integer(&self)
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int)
                .ok_or_else(|| mismatch(&self)),
            DataType::BigInt => integer(&self)
                .map(Value::BigInt)
                .ok_or_else(|| mismatch(&self)),
            DataType::Counter => integer(&self)
                .map(Value::Counter)
                .ok_or_else(|| mismatch(&self)),
            DataType::Float => self
                .as_f64()
                .map(|n| Value::Float(n as f32))
                .ok_or_else(|| mismatch(&self)),
            DataType::Double => self
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| mismatch(&self)),
            DataType::Boolean => self
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| mismatch(&self)),
            DataType::Uuid => self
                .as_uuid()
                .map(Value::Uuid)
                .ok_or_else(|| mismatch(&self)),
            DataType::Timeuuid => self
                .as_uuid()
                .map(Value::Timeuuid)
                .ok_or_else(|| mismatch(&self)),
            DataType::Timestamp => match self {
                Value::Timestamp(ms) => Ok(Value::Timestamp(ms)),
                Value::BigInt(ms) => Ok(Value::Timestamp(ms)),
                Value::Text(ref s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::Timestamp(dt.timestamp_millis()))
                    .map_err(|_| mismatch(&self)),
                other => Err(mismatch(&other)),
            },
            DataType::Blob => match self {
                Value::Blob(bytes) => Ok(Value::Blob(bytes)),
                other => Err(mismatch(&other)),
            },
            DataType::List(element) => match self {
                Value::List(items) | Value::Set(items) => Ok(Value::List(coerce_all(items, element)?)),
                other => Err(mismatch(&other)),
            },
            DataType::Set(element) => match self {
                Value::List(items) | Value::Set(items) => Ok(Value::Set(coerce_all(items, element)?)),
                other => Err(mismatch(&other)),
            },
            DataType::Map(key_type, value_type) => match self {
                Value::Map(entries) => entries
                    .into_iter()
                    .map(|(k, v)| Ok((k.coerce(key_type)?, v.coerce(value_type)?)))
                    .collect::<Result<Vec<_>, String>>()
                    .map(Value::Map),
                other => Err(mismatch(&other)),
            },
        }
    }
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Timestamp(_) => None,
        other => other.as_i64(),
    }
}

fn coerce_all(items: Vec<Value>, element: &DataType) -> Result<Vec<Value>, String> {
    items.into_iter().map(|item| item.coerce(element)).collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<i8> for Value {
    fn from(n: i8) -> Self {
        Value::TinyInt(n)
    }
}

impl From<i16> for Value {
    fn from(n: i16) -> Self {
        Value::SmallInt(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::BigInt(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::Timestamp(ts.millis())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<HashSet<T>> for Value {
    fn from(v: HashSet<T>) -> Self {
        Value::Set(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeSet<T>> for Value {
    fn from(v: BTreeSet<T>) -> Self {
        Value::Set(v.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<Value>, V: Into<Value>> From<HashMap<K, V>> for Value {
    fn from(m: HashMap<K, V>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(m: BTreeMap<K, V>) -> Self {
        Value::Map(m.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Primary-key components in declaration order: partition key columns first,
/// then clustering columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(components: Vec<Value>) -> Self {
        Key(components)
    }

    pub fn components(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Key {
    fn from(components: Vec<Value>) -> Self {
        Key(components)
    }
}

macro_rules! scalar_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(v: $ty) -> Self {
                    Key(vec![Value::from(v)])
                }
            }
        )*
    };
}

scalar_key!(&str, String, &String, i8, i16, i32, i64, f32, f64, bool, Uuid, Timestamp, Value);

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key(vec![a.into(), b.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Key(vec![a.into(), b.into(), c.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>, D: Into<Value>> From<(A, B, C, D)> for Key {
    fn from((a, b, c, d): (A, B, C, D)) -> Self {
        Key(vec![a.into(), b.into(), c.into(), d.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_collections_render_frozen() {
        let ty = DataType::map(DataType::Text, DataType::list(DataType::Int));
        assert_eq!(ty.cql(), "map<text, frozen<list<int>>>");
        assert_eq!(DataType::frozen(DataType::set(DataType::Uuid)).cql(), "frozen<set<uuid>>");
    }

    #[test]
    fn parse_accepts_live_type_text() {
        assert_eq!(DataType::parse("varchar"), Some(DataType::Text));
        assert_eq!(
            DataType::parse("map<text, frozen<list<int>>>"),
            Some(DataType::map(
                DataType::Text,
                DataType::frozen(DataType::list(DataType::Int))
            ))
        );
        assert_eq!(DataType::parse("list"), None);
        assert_eq!(DataType::parse("list<>"), None);
        assert_eq!(DataType::parse("map<text>"), None);
        assert_eq!(DataType::parse("geometry"), None);
    }

    #[test]
    fn matches_cql_ignores_case_and_spacing() {
        let ty = DataType::map(DataType::Text, DataType::Double);
        assert!(ty.matches_cql("MAP<text,double>"));
        assert!(DataType::Text.matches_cql("varchar"));
        assert!(!DataType::Int.matches_cql("bigint"));
    }

    #[test]
    fn coerce_converts_between_integer_widths() {
        assert_eq!(Value::Int(25).coerce(&DataType::BigInt), Ok(Value::BigInt(25)));
        assert_eq!(Value::BigInt(7).coerce(&DataType::Int), Ok(Value::Int(7)));
        assert!(Value::BigInt(i64::MAX).coerce(&DataType::Int).is_err());
        assert!(Value::Text("x".into()).coerce(&DataType::Int).is_err());
    }

    #[test]
    fn coerce_parses_text_identifiers() {
        let id = Uuid::new_v4();
        assert_eq!(
            Value::Text(id.to_string()).coerce(&DataType::Uuid),
            Ok(Value::Uuid(id))
        );
        assert_eq!(
            Value::Text("1970-01-01T00:00:01.500Z".into()).coerce(&DataType::Timestamp),
            Ok(Value::Timestamp(1_500))
        );
    }

    #[test]
    fn coerce_turns_list_into_set() {
        let value = Value::from(vec![1i32, 2]).coerce(&DataType::set(DataType::BigInt));
        assert_eq!(value, Ok(Value::Set(vec![Value::BigInt(1), Value::BigInt(2)])));
    }

    #[test]
    fn key_from_tuple_keeps_component_order() {
        let key = Key::from(("user", 100i32));
        assert_eq!(
            key.components(),
            &[Value::Text("user".into()), Value::Int(100)]
        );
    }
}

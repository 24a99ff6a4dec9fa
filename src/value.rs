//! Field values.
//!
//! [`Value`] is the closed set of values a field can hold or a predicate can
//! compare against. Every variant maps to exactly one [`Kind`], so operator
//! applicability and field compatibility are checked by matching on kinds
//! instead of inspecting Rust types at runtime.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use std::fmt;

/// Value kinds, one per storable field family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    DateTime,
    /// Id of a single related record
    Relation,
    /// Ids of several related records
    RelationList,
    /// Heterogeneous list used by `in` / `not in`
    List,
    Null,
}

impl Kind {
    /// Whether values of this kind have a total order usable by `<`, `>` etc.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            Kind::Integer | Kind::Float | Kind::Text | Kind::Date | Kind::DateTime | Kind::Relation
        )
    }

    /// Whether this kind is a collection.
    pub fn is_list(self) -> bool {
        matches!(self, Kind::RelationList | Kind::List)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Boolean => "boolean",
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::Text => "text",
            Kind::Date => "date",
            Kind::DateTime => "datetime",
            Kind::Relation => "relation",
            Kind::RelationList => "relation list",
            Kind::List => "list",
            Kind::Null => "null",
        };
        f.write_str(name)
    }
}

/// A field value or predicate argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// A related record id. `RelationId(0)` is the "absent" sentinel.
    RelationId(i64),
    RelationIds(Vec<i64>),
    List(Vec<Value>),
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Boolean,
            Value::Integer(_) => Kind::Integer,
            Value::Float(_) => Kind::Float,
            Value::Text(_) => Kind::Text,
            Value::Date(_) => Kind::Date,
            Value::DateTime(_) => Kind::DateTime,
            Value::RelationId(_) => Kind::Relation,
            Value::RelationIds(_) => Kind::RelationList,
            Value::List(_) => Kind::List,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, the zero relation id, or an empty relation list.
    ///
    /// This is the value a nullable foreign key carries when it points nowhere.
    pub fn is_absent_relation(&self) -> bool {
        match self {
            Value::Null => true,
            Value::RelationId(id) => *id == 0,
            Value::RelationIds(ids) => ids.is_empty(),
            _ => false,
        }
    }

    /// `false` and `""`: the zero values treated as equivalent to NULL on
    /// non-relation columns.
    pub fn is_zero_scalar(&self) -> bool {
        match self {
            Value::Bool(b) => !*b,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Zero value of a scalar kind, matched together with NULL when a
    /// predicate compares against `false` or `""`. Dates have none.
    pub fn zero_of(kind: Kind) -> Option<Value> {
        match kind {
            Kind::Boolean => Some(Value::Bool(false)),
            Kind::Integer => Some(Value::Integer(0)),
            Kind::Float => Some(Value::Float(0.0)),
            Kind::Text => Some(Value::Text(String::new())),
            _ => None,
        }
    }

    /// Flatten list-like values into their elements.
    ///
    /// Scalars yield a single-element vector.
    pub fn into_elements(self) -> Vec<Value> {
        match self {
            Value::RelationIds(ids) => ids.into_iter().map(Value::RelationId).collect(),
            Value::List(values) => values,
            other => vec![other],
        }
    }

    /// Id carried by an integer or relation value.
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Value::Integer(i) | Value::RelationId(i) => Some(*i),
            _ => None,
        }
    }

    /// JSON representation used by domain serialization.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Integer(i) | Value::RelationId(i) => JsonValue::from(*i),
            Value::Float(f) => JsonValue::from(*f),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            Value::RelationIds(ids) => JsonValue::from(ids.clone()),
            Value::List(values) => JsonValue::Array(values.iter().map(Value::to_json).collect()),
        }
    }

    /// Best-effort inverse of [`Value::to_json`].
    ///
    /// JSON carries no kind information for dates, so strings stay text;
    /// field-kind coercion happens when the predicate is compiled.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(_) => Value::Text(json.to_string()),
        }
    }

    /// Coerce a loosely typed value (typically parsed from JSON) to the kind
    /// a field stores. Values that are already compatible are returned as is.
    pub fn coerce_to(self, kind: Kind) -> Value {
        match (kind, self) {
            (Kind::Relation, Value::Integer(i)) => Value::RelationId(i),
            (Kind::Float, Value::Integer(i)) => Value::Float(i as f64),
            (Kind::Relation | Kind::RelationList, Value::List(items)) => {
                let ids: Option<Vec<i64>> = items.iter().map(Value::as_id).collect();
                match ids {
                    Some(ids) => Value::RelationIds(ids),
                    None => Value::List(items),
                }
            }
            (Kind::RelationList, Value::Integer(i)) => Value::RelationIds(vec![i]),
            (Kind::Date, Value::Text(s)) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(d) => Value::Date(d),
                Err(_) => Value::Text(s),
            },
            (Kind::DateTime, Value::Text(s)) => {
                match NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S") {
                    Ok(dt) => Value::DateTime(dt),
                    Err(_) => Value::Text(s),
                }
            }
            (_, value) => value,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Convert to the SeaQuery value used for parameter binding.
///
/// List values never reach a bound parameter: the compiler expands them into
/// one placeholder per element beforehand.
impl From<Value> for sea_query::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => sea_query::Value::BigInt(None),
            Value::Bool(b) => sea_query::Value::Bool(Some(b)),
            Value::Integer(i) | Value::RelationId(i) => sea_query::Value::BigInt(Some(i)),
            Value::Float(f) => sea_query::Value::Double(Some(f)),
            Value::Text(s) => sea_query::Value::String(Some(s)),
            Value::Date(d) => d.into(),
            Value::DateTime(dt) => dt.into(),
            list @ (Value::RelationIds(_) | Value::List(_)) => list.to_json().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_each_variant() {
        assert_eq!(Value::from(true).kind(), Kind::Boolean);
        assert_eq!(Value::from(12).kind(), Kind::Integer);
        assert_eq!(Value::from(1.5).kind(), Kind::Float);
        assert_eq!(Value::from("x").kind(), Kind::Text);
        assert_eq!(Value::RelationId(3).kind(), Kind::Relation);
        assert_eq!(Value::RelationIds(vec![1]).kind(), Kind::RelationList);
        assert_eq!(Value::from(None::<i64>).kind(), Kind::Null);
    }

    #[test]
    fn test_absent_relation_sentinel() {
        assert!(Value::Null.is_absent_relation());
        assert!(Value::RelationId(0).is_absent_relation());
        assert!(Value::RelationIds(vec![]).is_absent_relation());
        assert!(!Value::RelationId(7).is_absent_relation());
        assert!(!Value::Integer(0).is_absent_relation());
    }

    #[test]
    fn test_zero_scalars() {
        assert!(Value::Bool(false).is_zero_scalar());
        assert!(Value::Text(String::new()).is_zero_scalar());
        assert!(!Value::Bool(true).is_zero_scalar());
        assert!(!Value::Integer(0).is_zero_scalar());
    }

    #[test]
    fn test_zero_of_scalar_kinds() {
        assert_eq!(Value::zero_of(Kind::Text), Some(Value::Text(String::new())));
        assert_eq!(Value::zero_of(Kind::Integer), Some(Value::Integer(0)));
        assert_eq!(Value::zero_of(Kind::Date), None);
        assert_eq!(Value::zero_of(Kind::Relation), None);
    }

    #[test]
    fn test_json_round_trip_for_scalars() {
        for v in [Value::Bool(true), Value::Integer(-4), Value::Text("a".into()), Value::Null] {
            assert_eq!(Value::from_json(&v.to_json()), v);
        }
    }

    #[test]
    fn test_coerce_integer_list_to_relation_ids() {
        let v = Value::List(vec![Value::Integer(1), Value::Integer(2)]).coerce_to(Kind::RelationList);
        assert_eq!(v, Value::RelationIds(vec![1, 2]));
    }

    #[test]
    fn test_coerce_text_to_date() {
        let v = Value::Text("2024-02-29".into()).coerce_to(Kind::Date);
        assert_eq!(v, Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
    }

    #[test]
    fn test_into_elements() {
        assert_eq!(
            Value::RelationIds(vec![4, 5]).into_elements(),
            vec![Value::RelationId(4), Value::RelationId(5)]
        );
        assert_eq!(Value::Integer(1).into_elements(), vec![Value::Integer(1)]);
    }
}

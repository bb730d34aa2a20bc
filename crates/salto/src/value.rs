//! value representation
//!
//! Instance values, annotation values and variable values all share one
//! tagged union:
//! - null
//! - boolean (true/false)
//! - integer (signed, currently: i64 - may change)
//! - decimal (currently: f64 - may change)
//! - string (utf-8)
//! - list ("array" of values)
//! - map (order-preserving "dictionary", where the key is of type string)
//! - reference (a dotted traversal path into the merged element graph)
//!
//! Code must branch on the discriminator only; there is no runtime type
//! introspection beyond it.
use indexmap::IndexMap;
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Reference(ReferenceExpression),
}

impl Value {
    /// Short tag used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Decimal(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Reference(_) => "reference",
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A symbolic traversal through the merged element graph, e.g.
/// `salesforce.lead.instance.main.status`.
///
/// The path is interpreted against merged elements, never against source
/// fragments: the longest dotted prefix naming an element is the root and
/// the remaining segments traverse into its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceExpression {
    pub traversal: Vec<String>,
}

impl ReferenceExpression {
    pub fn new(traversal: Vec<String>) -> Self {
        Self { traversal }
    }

    pub fn from_dotted(path: &str) -> Self {
        Self { traversal: path.split('.').map(str::to_string).collect() }
    }

    pub fn dotted(&self) -> String {
        self.traversal.join(".")
    }
}

impl std::fmt::Display for ReferenceExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Decimal(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<K: ToString, V: Into<Value>> From<IndexMap<K, V>> for Value {
    fn from(value: IndexMap<K, V>) -> Self {
        Value::Map(value.into_iter().map(|(k, v)| (k.to_string(), v.into())).collect())
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            // references serialize as their dotted path, the same text a
            // blueprint would spell them with
            Value::Reference(reference) => serializer.serialize_str(&reference.dotted()),
            Value::List(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Map(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

//! Runtime values produced and consumed by expression evaluation.
//!
//! Values are deliberately heterogeneous: a single field may hold an `Int` in one
//! record and a `Double` or a `String` in the next, and the comparator in
//! [`crate::query::compare`] is responsible for making sense of the mix.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::temporal;
use crate::types::RecordId;

/// Typed value tagged with explicit type information so the serialized form stays
/// unambiguous.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal / absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    Int(i32),
    /// Signed 64-bit integer.
    Long(i64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Arbitrary binary payload.
    Bytes(Vec<u8>),
    /// Milliseconds since Unix epoch in UTC.
    #[serde(deserialize_with = "serde_date::deserialize")]
    Date(i64),
    /// Reference to a stored record.
    Link(RecordId),
    /// Multi-column index key.
    Key(CompositeKey),
    /// Ordered collection.
    List(Vec<Value>),
    /// Insertion-ordered map.
    Map(Vec<(Value, Value)>),
    /// Embedded or stored document.
    Document(Box<Document>),
}

mod serde_date {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    use crate::query::temporal;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DateVisitor;

        impl<'de> Visitor<'de> for DateVisitor {
            type Value = i64;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("epoch milliseconds or an ISO-8601 date string")
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(value)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                i64::try_from(value).map_err(|_| E::custom("date out of range"))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                temporal::parse_date(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DateVisitor)
    }
}

/// Ordered tuple of values used as a multi-column index key.
///
/// Ordering lives in [`crate::query::compare`]; a key that is a prefix of another
/// compares equal to it, which is how partial keys address a range of entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositeKey {
    /// Key components, most significant first.
    pub parts: Vec<Value>,
}

impl CompositeKey {
    /// Builds a key from explicit parts.
    pub fn new(parts: Vec<Value>) -> Self {
        Self { parts }
    }

    /// Wraps an arbitrary value as a key: lists become n-component keys, keys stay
    /// as they are, anything else becomes a single-component key.
    pub fn coerce(value: &Value) -> CompositeKey {
        match value {
            Value::Key(key) => key.clone(),
            Value::List(items) => CompositeKey::new(items.clone()),
            other => CompositeKey::new(vec![other.clone()]),
        }
    }
}

/// Record or embedded document.
///
/// A document with an identity is a stored record and can be targeted by index
/// lookups; one without is embedded inside another value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Schema class, if any.
    pub class: Option<String>,
    /// Identity of a stored record.
    pub id: Option<RecordId>,
    /// Record version.
    pub version: i32,
    /// Fields in declaration order.
    pub fields: Vec<(String, Value)>,
    /// Serialized record bytes, when the storage layer supplied them.
    pub raw: Option<Vec<u8>>,
}

impl Document {
    /// Creates an empty document of the given class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            ..Self::default()
        }
    }

    /// Creates an empty class-less document.
    pub fn embedded() -> Self {
        Self::default()
    }

    /// Sets the record identity.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the record version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Sets the serialized bytes.
    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Appends or replaces a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Appends or replaces a field in place.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Looks up a field by exact name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Whether the field is present, even if it holds `Null`.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(field, _)| field == name)
    }

    /// Field values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, value)| value)
    }

    /// The only field value of a single-field wrapper document.
    pub fn single_value(&self) -> Option<&Value> {
        match self.fields.as_slice() {
            [(_, value)] => Some(value),
            _ => None,
        }
    }
}

impl Value {
    /// Short lowercase name of the value's kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "binary",
            Value::Date(_) => "datetime",
            Value::Link(_) => "link",
            Value::Key(_) => "compositekey",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Document(_) => "document",
        }
    }

    /// Whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean truth: only `Bool(true)` is true.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// Whether the value is one of the four numeric kinds.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_)
        )
    }

    /// Borrows the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload of `Int`/`Long`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric payload widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrows the document payload.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Identity of a link or a stored document.
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            Value::Link(id) => Some(*id),
            Value::Document(doc) => doc.id,
            _ => None,
        }
    }

    /// Number of elements for containers, characters for strings, bytes for
    /// binaries; zero for null and one for any other scalar.
    pub fn size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::String(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::List(items) => items.len(),
            Value::Key(key) => key.parts.len(),
            Value::Map(entries) => entries.len(),
            Value::Document(doc) => doc.fields.len(),
            _ => 1,
        }
    }

    /// Looks up a string key inside a map.
    pub fn map_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(ms) => f.write_str(&temporal::format_date(*ms)),
            Value::Link(id) => write!(f, "{id}"),
            Value::Key(key) => write_list(f, &key.parts),
            Value::List(items) => write_list(f, items),
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Document(doc) => {
                if let Some(class) = &doc.class {
                    f.write_str(class)?;
                }
                if let Some(id) = doc.id {
                    write!(f, "{id}")?;
                }
                f.write_str("{")?;
                for (i, (name, value)) in doc.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name}:{value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        Value::Link(value)
    }
}

impl From<CompositeKey> for Value {
    fn from(value: CompositeKey) -> Self {
        Value::Key(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(Box::new(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

//! Index contract consumed by the search pass.
//!
//! The core never builds or maintains indexes; it only asks a catalog which
//! indexes cover a field and then issues exact or range lookups against them.
//! [`InMemoryIndex`] and [`InMemoryCatalog`] are linear reference
//! implementations that answer through the value comparator, so their answers
//! agree with per-record evaluation by construction.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::query::compare::{compare, equals};
use crate::query::temporal::parse_date;
use crate::query::value::{CompositeKey, Document, Value};
use crate::types::{RecordId, Result, SombraError};

/// Index implementation families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IndexKind {
    /// Ordered, one record per key.
    Unique,
    /// Ordered, many records per key.
    NotUnique,
    /// Hashed, one record per key.
    UniqueHash,
    /// Hashed, many records per key.
    NotUniqueHash,
    /// Token index; cannot answer whole-value matches.
    FullText,
}

impl IndexKind {
    /// Whether `exact_matches` returns the complete set of records for a key.
    pub fn supports_exact(self) -> bool {
        !matches!(self, IndexKind::FullText)
    }

    /// Whether `below`/`above` are answered.
    pub fn supports_range(self) -> bool {
        matches!(self, IndexKind::Unique | IndexKind::NotUnique)
    }

    /// Whether a key maps to at most one record.
    pub fn is_unique(self) -> bool {
        matches!(self, IndexKind::Unique | IndexKind::UniqueHash)
    }
}

/// Logical type of an index key component.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum KeyType {
    /// Booleans.
    Boolean,
    /// 32-bit integers.
    Integer,
    /// 64-bit integers.
    Long,
    /// 32-bit floats.
    Float,
    /// 64-bit floats.
    Double,
    /// Strings.
    String,
    /// Dates as epoch milliseconds.
    Date,
    /// Record links.
    Link,
    /// Binary payloads.
    Binary,
}

impl KeyType {
    /// Converts a literal into a key of this type.
    ///
    /// Stored keys are assumed to hold values of the declared type. A
    /// conversion is accepted only when every such stored key compares to the
    /// converted literal exactly as it compares to the original one; anything
    /// lossy or malformed is a parse error so the caller can fall back to
    /// evaluation.
    pub fn coerce(self, value: &Value) -> Result<Value> {
        let mismatch = || {
            SombraError::Parse(format!(
                "cannot use {} literal '{value}' as {self:?} key",
                value.type_name()
            ))
        };
        match (self, value) {
            (KeyType::Boolean, Value::Bool(b)) => Ok(Value::Bool(*b)),
            (KeyType::Integer, _) => integral(value)
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int)
                .ok_or_else(mismatch),
            (KeyType::Long, _) => value.as_i64().map(Value::Long).ok_or_else(mismatch),
            (KeyType::Float, _) => value
                .as_f64()
                .filter(|v| f64::from(*v as f32) == *v)
                .map(|v| Value::Float(v as f32))
                .ok_or_else(mismatch),
            (KeyType::Double, Value::Int(v)) => Ok(Value::Double(f64::from(*v))),
            (KeyType::Double, Value::Double(v)) => Ok(Value::Double(*v)),
            (KeyType::Double, Value::Long(v)) if v.unsigned_abs() <= MAX_EXACT_DOUBLE_INT => {
                Ok(Value::Double(*v as f64))
            }
            (KeyType::String, Value::String(s)) => Ok(Value::String(s.clone())),
            (KeyType::Date, Value::Date(ms)) => Ok(Value::Date(*ms)),
            (KeyType::Date, Value::String(text)) => parse_date(text).map(Value::Date),
            (KeyType::Date, Value::Int(ms)) => Ok(Value::Date(i64::from(*ms))),
            (KeyType::Date, Value::Long(ms)) if ms.unsigned_abs() <= MAX_EXACT_DOUBLE_INT => {
                Ok(Value::Date(*ms))
            }
            (KeyType::Link, Value::String(text)) => text.parse::<RecordId>().map(Value::Link),
            (KeyType::Link, other) => other.record_id().map(Value::Link).ok_or_else(mismatch),
            (KeyType::Binary, Value::Bytes(bytes)) => Ok(Value::Bytes(bytes.clone())),
            _ => Err(mismatch()),
        }
    }
}

const MAX_EXACT_DOUBLE_INT: u64 = 1 << 53;

/// Integer value of an integral numeric literal.
///
/// `Float` literals are refused: they compare against integers in single
/// precision, which an exact integer key cannot reproduce.
fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Int(_) | Value::Long(_) => value.as_i64(),
        Value::Double(v) if v.fract() == 0.0 && v.abs() <= MAX_EXACT_DOUBLE_INT as f64 => {
            Some(*v as i64)
        }
        _ => None,
    }
}

/// A declared index as seen by the search pass.
pub trait PropertyIndex: Send + Sync {
    /// Index name.
    fn name(&self) -> &str;
    /// Indexed fields, most significant first.
    fn fields(&self) -> &[String];
    /// Number of key components.
    fn key_component_count(&self) -> usize {
        self.fields().len()
    }
    /// Implementation family.
    fn kind(&self) -> IndexKind;
    /// Type of the leading key component.
    fn key_type(&self) -> KeyType;
    /// Records whose key equals `key`.
    fn exact_matches(&self, key: &Value) -> Result<BTreeSet<RecordId>>;
    /// Records whose key is below `key`.
    fn below(&self, key: &Value, inclusive: bool) -> Result<BTreeSet<RecordId>>;
    /// Records whose key is above `key`.
    fn above(&self, key: &Value, inclusive: bool) -> Result<BTreeSet<RecordId>>;
}

/// Lists the indexes declared on a class.
pub trait IndexCatalog: Send + Sync {
    /// Indexes on `class` whose leading field is `field`, in registration order.
    fn indexes_for(&self, class: &str, field: &str) -> Vec<&dyn PropertyIndex>;
}

/// Linear-scan index over `(key, record)` entries.
#[derive(Clone, Debug)]
pub struct InMemoryIndex {
    name: String,
    class: String,
    fields: Vec<String>,
    kind: IndexKind,
    key_type: KeyType,
    entries: Vec<(Value, RecordId)>,
}

impl InMemoryIndex {
    /// Declares an empty index.
    pub fn new(
        name: impl Into<String>,
        class: impl Into<String>,
        fields: &[&str],
        kind: IndexKind,
        key_type: KeyType,
    ) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            kind,
            key_type,
            entries: Vec::new(),
        }
    }

    /// Class the index is declared on.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Adds an entry. Null keys are not indexed; unique kinds reject a key that
    /// is already present.
    pub fn insert(&mut self, key: Value, id: RecordId) -> Result<()> {
        if key.is_null() {
            return Ok(());
        }
        if self.kind.is_unique() && self.entries.iter().any(|(k, _)| equals(k, &key)) {
            return Err(SombraError::Invalid("duplicate key in unique index"));
        }
        self.entries.push((key, id));
        Ok(())
    }

    /// Indexes a document under its values for the indexed fields. Documents
    /// without identity are skipped.
    pub fn insert_document(&mut self, doc: &Document) -> Result<()> {
        let Some(id) = doc.id else {
            return Ok(());
        };
        let key = match self.fields.as_slice() {
            [single] => doc.field(single).cloned().unwrap_or(Value::Null),
            many => Value::Key(CompositeKey::new(
                many.iter()
                    .map(|f| doc.field(f).cloned().unwrap_or(Value::Null))
                    .collect(),
            )),
        };
        self.insert(key, id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect(&self, keep: impl Fn(&Value) -> bool) -> BTreeSet<RecordId> {
        self.entries
            .iter()
            .filter(|(k, _)| keep(k))
            .map(|(_, id)| *id)
            .collect()
    }
}

impl PropertyIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn exact_matches(&self, key: &Value) -> Result<BTreeSet<RecordId>> {
        if !self.kind.supports_exact() {
            return Err(SombraError::Invalid("index kind cannot answer exact matches"));
        }
        Ok(self.collect(|k| equals(k, key)))
    }

    fn below(&self, key: &Value, inclusive: bool) -> Result<BTreeSet<RecordId>> {
        if !self.kind.supports_range() {
            return Err(SombraError::Invalid("index kind cannot answer ranges"));
        }
        Ok(self.collect(|k| match compare(k, key) {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => inclusive,
            _ => false,
        }))
    }

    fn above(&self, key: &Value, inclusive: bool) -> Result<BTreeSet<RecordId>> {
        if !self.kind.supports_range() {
            return Err(SombraError::Invalid("index kind cannot answer ranges"));
        }
        Ok(self.collect(|k| match compare(k, key) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => inclusive,
            _ => false,
        }))
    }
}

/// Catalog holding indexes in registration order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    indexes: Vec<InMemoryIndex>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index after every index registered so far.
    pub fn with_index(mut self, index: InMemoryIndex) -> Self {
        self.indexes.push(index);
        self
    }

    /// Registers an index in place.
    pub fn register(&mut self, index: InMemoryIndex) {
        self.indexes.push(index);
    }
}

impl IndexCatalog for InMemoryCatalog {
    fn indexes_for(&self, class: &str, field: &str) -> Vec<&dyn PropertyIndex> {
        self.indexes
            .iter()
            .filter(|index| index.class.eq_ignore_ascii_case(class))
            .filter(|index| index.fields.first().is_some_and(|f| f == field))
            .map(|index| index as &dyn PropertyIndex)
            .collect()
    }
}

//! Record access consumed by evaluation.
//!
//! Evaluation only needs two things from the record layer: following a link to
//! the document it points at, and asking whether one class extends another.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::query::value::{Document, Value};
use crate::types::{RecordId, Result, SombraError};

/// Record lookups used while evaluating links and `INSTANCEOF`.
pub trait RecordStore: Send + Sync {
    /// Loads the record with the given identity.
    fn load(&self, id: &RecordId) -> Option<Document>;

    /// Whether `class` is `parent` or (transitively) extends it. Names compare
    /// ASCII case-insensitively.
    fn is_subclass(&self, class: &str, parent: &str) -> bool {
        class.eq_ignore_ascii_case(parent)
    }
}

/// Map-backed store with a single-inheritance class hierarchy.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    records: BTreeMap<RecordId, Document>,
    superclass: FxHashMap<String, Option<String>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a class and its optional superclass.
    pub fn with_class(mut self, name: &str, parent: Option<&str>) -> Self {
        self.superclass.insert(
            name.to_ascii_lowercase(),
            parent.map(|p| p.to_ascii_lowercase()),
        );
        self
    }

    /// Stores a document. The document must carry an identity.
    pub fn insert(&mut self, doc: Document) -> Result<RecordId> {
        let id = doc
            .id
            .ok_or(SombraError::Invalid("stored documents need a record id"))?;
        self.records.insert(id, doc);
        Ok(id)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of `class` or any subclass, in identity order.
    pub fn scan_class<'s>(&'s self, class: &'s str) -> impl Iterator<Item = &'s Document> + 's {
        self.records.values().filter(move |doc| {
            doc.class
                .as_deref()
                .is_some_and(|actual| self.is_subclass(actual, class))
        })
    }

    /// Records of `class` wrapped as candidate values.
    pub fn candidates(&self, class: &str) -> Vec<Value> {
        self.scan_class(class)
            .map(|doc| Value::Document(Box::new(doc.clone())))
            .collect()
    }
}

impl RecordStore for InMemoryStore {
    fn load(&self, id: &RecordId) -> Option<Document> {
        self.records.get(id).cloned()
    }

    fn is_subclass(&self, class: &str, parent: &str) -> bool {
        let parent = parent.to_ascii_lowercase();
        let mut current = Some(class.to_ascii_lowercase());
        // Bounded walk so a cyclic declaration cannot loop forever.
        for _ in 0..=self.superclass.len() {
            let Some(name) = current else {
                return false;
            };
            if name == parent {
                return true;
            }
            current = self.superclass.get(&name).cloned().flatten();
        }
        false
    }
}

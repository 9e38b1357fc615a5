//! Document input model.
//!
//! Analysis happens outside this crate: callers hand over fields whose term
//! streams are already tokenized into `(term bytes, position)` tuples. A
//! field can additionally carry a stored value, a doc value, and a request
//! to record its term vector.

use serde::{Deserialize, Serialize};

/// A field value kept verbatim for retrieval by document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    /// UTF-8 text.
    Text(String),

    /// Opaque bytes.
    Binary(Vec<u8>),
}

impl StoredValue {
    /// The stored text, if this value is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            StoredValue::Text(s) => Some(s),
            StoredValue::Binary(_) => None,
        }
    }

    /// The raw bytes of this value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StoredValue::Text(s) => s.as_bytes(),
            StoredValue::Binary(b) => b,
        }
    }

    /// Approximate heap size, used for buffer accounting.
    pub fn estimated_bytes(&self) -> usize {
        self.as_bytes().len()
    }
}

/// A per-document value addressable by (field, doc id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocValue {
    /// A 64-bit signed number.
    Numeric(i64),

    /// Opaque bytes.
    Binary(Vec<u8>),
}

impl DocValue {
    /// The numeric value, if this is a numeric doc value.
    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            DocValue::Numeric(n) => Some(*n),
            DocValue::Binary(_) => None,
        }
    }

    /// Approximate heap size, used for buffer accounting.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            DocValue::Numeric(_) => 8,
            DocValue::Binary(b) => b.len(),
        }
    }
}

/// One analyzed token: term bytes plus its position in the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermPosition {
    /// The term bytes (opaque to this crate).
    pub term: Vec<u8>,

    /// Zero-based position within the field's token stream.
    pub position: u32,
}

impl TermPosition {
    /// Create a new term/position tuple.
    pub fn new<T: Into<Vec<u8>>>(term: T, position: u32) -> Self {
        TermPosition {
            term: term.into(),
            position,
        }
    }
}

/// One field of a document as submitted to the writer.
#[derive(Debug, Clone, Default)]
pub struct FieldData {
    /// Field name.
    pub name: String,

    /// Pre-analyzed term stream; empty for fields that are stored-only.
    pub terms: Vec<TermPosition>,

    /// Value to keep for retrieval, if any.
    pub stored: Option<StoredValue>,

    /// Per-document value, if any.
    pub doc_value: Option<DocValue>,

    /// Whether to record this field's term vector.
    pub term_vectors: bool,
}

impl FieldData {
    /// Create an indexed field from a term stream.
    pub fn indexed<S: Into<String>>(name: S, terms: Vec<TermPosition>) -> Self {
        FieldData {
            name: name.into(),
            terms,
            ..Default::default()
        }
    }

    /// Create a stored-only field.
    pub fn stored_only<S: Into<String>>(name: S, value: StoredValue) -> Self {
        FieldData {
            name: name.into(),
            stored: Some(value),
            ..Default::default()
        }
    }

    /// Attach a stored value.
    pub fn with_stored(mut self, value: StoredValue) -> Self {
        self.stored = Some(value);
        self
    }

    /// Attach a doc value.
    pub fn with_doc_value(mut self, value: DocValue) -> Self {
        self.doc_value = Some(value);
        self
    }

    /// Request term vectors for this field.
    pub fn with_term_vectors(mut self) -> Self {
        self.term_vectors = true;
        self
    }

    /// Approximate in-memory size, used for flush-threshold accounting.
    pub fn estimated_bytes(&self) -> usize {
        let mut size = self.name.len();
        size += self
            .terms
            .iter()
            .map(|t| t.term.len() + std::mem::size_of::<u32>())
            .sum::<usize>();
        if let Some(stored) = &self.stored {
            size += stored.estimated_bytes();
        }
        if let Some(value) = &self.doc_value {
            size += value.estimated_bytes();
        }
        size
    }
}

/// A document: an ordered list of fields.
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// The document's fields in submission order.
    pub fields: Vec<FieldData>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document::default()
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, field: FieldData) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a field.
    pub fn add_field(&mut self, field: FieldData) {
        self.fields.push(field);
    }

    /// Look up a field by name (first match).
    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Approximate in-memory size, used for flush-threshold accounting.
    pub fn estimated_bytes(&self) -> usize {
        self.fields.iter().map(|f| f.estimated_bytes()).sum()
    }
}

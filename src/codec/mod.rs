//! Pluggable binary codecs for the four segment streams.
//!
//! A [`Codec`] is a named, versioned bundle of four formats: postings,
//! stored fields, doc values, and term vectors. Segments record the codec
//! that produced them, so a commit may mix segments written by different
//! codecs over time and each stays readable through its own bundle.

pub mod doc_values;
pub mod header;
pub mod postings;
pub mod stored;
pub mod vectors;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, XystonError};

pub use doc_values::{BinaryDocValuesFormat, DocValuesData, DocValuesFormat};
pub use header::StreamKind;
pub use postings::{
    BinaryPostingsFormat, FieldPostings, Posting, PostingList, PostingsFormat, TermPostings,
};
pub use stored::{BinaryStoredFieldsFormat, StoredDoc, StoredFields, StoredFieldsFormat};
pub use vectors::{BinaryTermVectorsFormat, TermVectorEntry, TermVectorsData, TermVectorsFormat};

/// A named bundle of the four stream formats.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// The codec name recorded in segment metadata.
    fn name(&self) -> &'static str;

    /// The postings format of this codec.
    fn postings(&self) -> &dyn PostingsFormat;

    /// The stored-fields format of this codec.
    fn stored_fields(&self) -> &dyn StoredFieldsFormat;

    /// The doc-values format of this codec.
    fn doc_values(&self) -> &dyn DocValuesFormat;

    /// The term-vectors format of this codec.
    fn term_vectors(&self) -> &dyn TermVectorsFormat;
}

/// The built-in codec: varint/delta binary encodings for all four streams.
#[derive(Debug, Default)]
pub struct BinaryCodec {
    postings: BinaryPostingsFormat,
    stored: BinaryStoredFieldsFormat,
    doc_values: BinaryDocValuesFormat,
    vectors: BinaryTermVectorsFormat,
}

/// Name of the built-in codec.
pub const BINARY_CODEC_NAME: &str = "binary-v1";

impl BinaryCodec {
    /// Create the built-in codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Codec for BinaryCodec {
    fn name(&self) -> &'static str {
        BINARY_CODEC_NAME
    }

    fn postings(&self) -> &dyn PostingsFormat {
        &self.postings
    }

    fn stored_fields(&self) -> &dyn StoredFieldsFormat {
        &self.stored
    }

    fn doc_values(&self) -> &dyn DocValuesFormat {
        &self.doc_values
    }

    fn term_vectors(&self) -> &dyn TermVectorsFormat {
        &self.vectors
    }
}

/// Registry resolving codec names to codec instances.
///
/// Readers use it to decode segments written by any registered codec, not
/// just the one the writer is currently producing.
#[derive(Debug)]
pub struct CodecRegistry {
    codecs: RwLock<HashMap<String, Arc<dyn Codec>>>,
}

impl CodecRegistry {
    /// Create a registry pre-populated with the built-in codec.
    pub fn new() -> Self {
        let registry = CodecRegistry {
            codecs: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(BinaryCodec::new()));
        registry
    }

    /// Register a codec under its own name, replacing any previous entry.
    pub fn register(&self, codec: Arc<dyn Codec>) {
        self.codecs.write().insert(codec.name().to_string(), codec);
    }

    /// Resolve a codec by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| XystonError::index(format!("Unknown codec '{name}'")))
    }

    /// Names of all registered codecs, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.codecs.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The default codec used by new writers.
pub fn default_codec() -> Arc<dyn Codec> {
    Arc::new(BinaryCodec::new())
}

/// File name of a segment's stream of the given kind.
pub fn stream_file(segment: &str, kind: StreamKind) -> String {
    format!("{segment}.{}", kind.extension())
}

/// File name of a segment's live-docs bitmap at a given generation.
///
/// Generation 0 means "no deletions recorded"; no file exists for it.
pub fn live_docs_file(segment: &str, generation: u64) -> String {
    format!("{segment}_{generation}.{}", StreamKind::LiveDocs.extension())
}

//! Read-only view over one segment.
//!
//! A `SegmentReader` materializes the four streams of a segment through the
//! codec that wrote them, plus a snapshot of the live-docs bitmap taken at
//! open time. It never observes bitmap generations written after it opened.

use std::sync::Arc;

use crate::codec::{
    CodecRegistry, DocValuesData, FieldPostings, PostingList, StoredDoc, StoredFields, StreamKind,
    TermPostings, TermVectorsData, stream_file,
};
use crate::error::Result;
use crate::index::document::DocValue;
use crate::segment::live_docs::LiveDocs;
use crate::segment::SegmentMeta;
use crate::storage::traits::Storage;

/// A point-in-time reader over one immutable segment.
#[derive(Debug)]
pub struct SegmentReader {
    /// Metadata snapshot the reader was opened from.
    meta: SegmentMeta,

    /// Term dictionary and postings.
    postings: FieldPostings,

    /// Per-document stored fields.
    stored: StoredFields,

    /// Per-document values by field.
    doc_values: DocValuesData,

    /// Per-document term vectors.
    vectors: TermVectorsData,

    /// Live-docs snapshot; `None` means every document is live.
    live_docs: Option<LiveDocs>,
}

impl SegmentReader {
    /// Open a segment through the codec recorded in its metadata.
    pub fn open(
        storage: &dyn Storage,
        registry: &CodecRegistry,
        meta: &SegmentMeta,
    ) -> Result<Self> {
        let codec = registry.resolve(&meta.codec)?;

        let postings = codec
            .postings()
            .read(storage, &stream_file(&meta.name, StreamKind::Postings))?;
        let stored = codec
            .stored_fields()
            .read(storage, &stream_file(&meta.name, StreamKind::StoredFields))?;
        let doc_values = codec
            .doc_values()
            .read(storage, &stream_file(&meta.name, StreamKind::DocValues))?;
        let vectors = codec
            .term_vectors()
            .read(storage, &stream_file(&meta.name, StreamKind::TermVectors))?;

        let live_docs = match meta.live_docs_file_name() {
            Some(file) => Some(LiveDocs::read(storage, &file, meta.max_doc)?),
            None => None,
        };

        Ok(SegmentReader {
            meta: meta.clone(),
            postings,
            stored,
            doc_values,
            vectors,
            live_docs,
        })
    }

    /// Open a segment and wrap it in an `Arc` for sharing across views.
    pub fn open_shared(
        storage: &dyn Storage,
        registry: &CodecRegistry,
        meta: &SegmentMeta,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::open(storage, registry, meta)?))
    }

    /// The metadata this reader was opened from.
    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Number of document slots, deleted ones included.
    pub fn max_doc(&self) -> u32 {
        self.meta.max_doc
    }

    /// Number of live documents in this snapshot.
    pub fn num_docs(&self) -> u32 {
        match &self.live_docs {
            Some(live) => live.live_count(),
            None => self.meta.max_doc,
        }
    }

    /// Whether a local document is live in this snapshot.
    pub fn is_live(&self, doc_id: u32) -> bool {
        if doc_id >= self.meta.max_doc {
            return false;
        }
        match &self.live_docs {
            Some(live) => live.is_live(doc_id),
            None => true,
        }
    }

    /// The live-docs snapshot, if the segment has deletions.
    pub fn live_docs(&self) -> Option<&LiveDocs> {
        self.live_docs.as_ref()
    }

    /// The sorted term dictionary of one field.
    pub fn terms(&self, field: &str) -> Option<&TermPostings> {
        self.postings.terms(field)
    }

    /// Names of all indexed fields.
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.postings.field_names()
    }

    /// The posting list of one term, deleted documents included.
    pub fn postings(&self, field: &str, term: &[u8]) -> Option<&PostingList> {
        self.postings.term(field, term)
    }

    /// Number of live documents containing a term.
    pub fn doc_freq(&self, field: &str, term: &[u8]) -> u32 {
        match self.postings(field, term) {
            Some(list) => list.doc_ids().filter(|&doc| self.is_live(doc)).count() as u32,
            None => 0,
        }
    }

    /// Stored fields of one document. Deleted documents remain readable;
    /// visibility filtering is the composite view's job.
    pub fn stored(&self, doc_id: u32) -> Option<&StoredDoc> {
        self.stored.doc(doc_id)
    }

    /// The doc value of (field, doc).
    pub fn doc_value(&self, field: &str, doc_id: u32) -> Option<&DocValue> {
        self.doc_values.get(field, doc_id)
    }

    /// Raw access to the full doc-values stream.
    pub fn doc_values_data(&self) -> &DocValuesData {
        &self.doc_values
    }

    /// The term vector of (doc, field).
    pub fn term_vector(&self, doc_id: u32, field: &str) -> Option<&[crate::codec::TermVectorEntry]> {
        self.vectors.field(doc_id, field)
    }

    /// Raw access to the full term-vectors stream.
    pub fn term_vectors_data(&self) -> &TermVectorsData {
        &self.vectors
    }

    /// Raw access to the full postings stream.
    pub fn postings_data(&self) -> &FieldPostings {
        &self.postings
    }

    /// Raw access to the full stored-fields stream.
    pub fn stored_data(&self) -> &StoredFields {
        &self.stored
    }
}

//! The composite read view: many segments, one document space.
//!
//! A `CompositeReader` stitches an ordered list of segment readers into a
//! single logical reader. Global document ids are formed by prefix-summing
//! the segments' `max_doc` values; the summed capacity is hard-capped at
//! 2^31 - 1 and violating it fails construction outright. The view is
//! frozen: segments merged away after construction stay readable through it
//! thanks to the file lease it holds.

pub mod terms;

use std::sync::Arc;

use crate::codec::{PostingList, StoredDoc};
use crate::error::{Result, XystonError};
use crate::index::deletion_policy::ReaderLease;
use crate::index::document::DocValue;
use crate::segment::SegmentReader;

pub use terms::{MergedTerms, TermEntry};

/// Largest legal total document capacity of one composite view.
pub const MAX_COMPOSITE_DOCS: u64 = i32::MAX as u64;

/// Validate that a sequence of segment capacities fits the 32-bit document
/// space. Returns the total on success.
///
/// Checked before a reader builds any state, so an oversized input can
/// never produce a partially constructed view.
pub fn check_address_space<I>(max_docs: I) -> Result<u32>
where
    I: IntoIterator<Item = u32>,
{
    let mut total = 0u64;
    for max_doc in max_docs {
        total += max_doc as u64;
        if total > MAX_COMPOSITE_DOCS {
            return Err(XystonError::AddressSpaceOverflow { total });
        }
    }
    Ok(total as u32)
}

/// A frozen point-in-time reader over an ordered set of segments.
#[derive(Debug)]
pub struct CompositeReader {
    /// The segment readers in document order.
    segments: Vec<Arc<SegmentReader>>,

    /// Prefix sums of `max_doc`: `doc_starts[i]` is the global id of the
    /// first slot of segment `i`; one extra entry holds the total.
    doc_starts: Vec<u32>,

    /// Live documents across all segments at open time.
    num_docs: u32,

    /// File lease deferring physical deletion while this reader is open.
    _lease: Option<ReaderLease>,
}

impl CompositeReader {
    /// Build a composite view. Fails with
    /// [`XystonError::AddressSpaceOverflow`] before any state is built if
    /// the summed capacity exceeds 2^31 - 1.
    pub fn new(segments: Vec<Arc<SegmentReader>>, lease: Option<ReaderLease>) -> Result<Self> {
        check_address_space(segments.iter().map(|s| s.max_doc()))?;

        let mut doc_starts = Vec::with_capacity(segments.len() + 1);
        let mut total = 0u32;
        let mut num_docs = 0u32;
        for segment in &segments {
            doc_starts.push(total);
            total += segment.max_doc();
            num_docs += segment.num_docs();
        }
        doc_starts.push(total);

        Ok(CompositeReader {
            segments,
            doc_starts,
            num_docs,
            _lease: lease,
        })
    }

    /// Total document slots, deleted ones included.
    pub fn max_doc(&self) -> u32 {
        *self.doc_starts.last().unwrap_or(&0)
    }

    /// Total live documents.
    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    /// Number of segments in the view.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The segment readers, in document order.
    pub fn segments(&self) -> &[Arc<SegmentReader>] {
        &self.segments
    }

    /// Translate a global id into (segment ordinal, local id).
    ///
    /// Binary search over the prefix-sum table: O(log segments).
    pub fn resolve(&self, global: u32) -> Result<(usize, u32)> {
        if global >= self.max_doc() {
            return Err(XystonError::index(format!(
                "Global document id {global} out of range ({})",
                self.max_doc()
            )));
        }

        let ord = self.doc_starts.partition_point(|&start| start <= global) - 1;
        Ok((ord, global - self.doc_starts[ord]))
    }

    /// The global id of (segment ordinal, local id).
    pub fn global_id(&self, ord: usize, local: u32) -> u32 {
        self.doc_starts[ord] + local
    }

    /// Whether the document at a global id is live. Out-of-range ids are
    /// dead.
    pub fn is_live(&self, global: u32) -> bool {
        match self.resolve(global) {
            Ok((ord, local)) => self.segments[ord].is_live(local),
            Err(_) => false,
        }
    }

    /// Stored fields of a live document; `None` for deleted documents.
    pub fn get(&self, global: u32) -> Result<Option<&StoredDoc>> {
        let (ord, local) = self.resolve(global)?;
        let segment = &self.segments[ord];
        if !segment.is_live(local) {
            return Ok(None);
        }
        Ok(segment.stored(local))
    }

    /// The doc value of (field, global id); `None` for deleted documents or
    /// documents without a value.
    pub fn doc_values(&self, field: &str, global: u32) -> Result<Option<&DocValue>> {
        let (ord, local) = self.resolve(global)?;
        let segment = &self.segments[ord];
        if !segment.is_live(local) {
            return Ok(None);
        }
        Ok(segment.doc_value(field, local))
    }

    /// The term vector of (global id, field).
    pub fn term_vector(
        &self,
        global: u32,
        field: &str,
    ) -> Result<Option<&[crate::codec::TermVectorEntry]>> {
        let (ord, local) = self.resolve(global)?;
        let segment = &self.segments[ord];
        if !segment.is_live(local) {
            return Ok(None);
        }
        Ok(segment.term_vector(local, field))
    }

    /// Enumerate a field's terms across all segments in lexicographic
    /// order, with per-term statistics aggregated over live documents.
    pub fn terms<'a>(&'a self, field: &str) -> MergedTerms<'a> {
        MergedTerms::new(&self.segments, field)
    }

    /// Global ids of the live documents containing a term, ascending.
    pub fn term_docs(&self, field: &str, term: &[u8]) -> Vec<u32> {
        let mut docs = Vec::new();
        for (ord, segment) in self.segments.iter().enumerate() {
            if let Some(list) = segment.postings(field, term) {
                for doc in list.doc_ids() {
                    if segment.is_live(doc) {
                        docs.push(self.global_id(ord, doc));
                    }
                }
            }
        }
        docs
    }

    /// Number of distinct live documents containing a term.
    ///
    /// This counts live documents only, never a naive per-segment sum over
    /// deleted slots.
    pub fn doc_freq(&self, field: &str, term: &[u8]) -> u64 {
        self.segments
            .iter()
            .map(|s| s.doc_freq(field, term) as u64)
            .sum()
    }

    /// The posting list of a term within one segment of this view.
    pub fn segment_postings(&self, ord: usize, field: &str, term: &[u8]) -> Option<&PostingList> {
        self.segments.get(ord)?.postings(field, term)
    }
}

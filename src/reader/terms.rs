//! K-way merged term enumeration across segments.
//!
//! Each segment keeps its term dictionary sorted; the composite view merges
//! the per-segment sequences through a min-heap, yielding every distinct
//! term once in lexicographic order together with its live document
//! frequency aggregated over all segments.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::codec::PostingList;
use crate::segment::SegmentReader;

/// One term of the merged enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermEntry {
    /// The term bytes.
    pub term: Vec<u8>,

    /// Number of distinct live documents containing the term, across all
    /// segments.
    pub doc_freq: u64,
}

struct SegmentCursor<'a> {
    ord: usize,
    iter: std::collections::btree_map::Iter<'a, Vec<u8>, PostingList>,
}

/// Heap key: ordered by (term, segment ordinal); the posting list rides
/// along without affecting ordering.
struct HeapEntry<'a> {
    term: &'a [u8],
    ord: usize,
    list: &'a PostingList,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.term == other.term && self.ord == other.ord
    }
}

impl Eq for HeapEntry<'_> {}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.term, self.ord).cmp(&(other.term, other.ord))
    }
}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Iterator over the merged, deduplicated term sequence of one field.
pub struct MergedTerms<'a> {
    segments: &'a [Arc<SegmentReader>],
    cursors: Vec<SegmentCursor<'a>>,
    heap: BinaryHeap<Reverse<HeapEntry<'a>>>,
}

impl<'a> MergedTerms<'a> {
    /// Build the merged enumeration of `field` over the given segments.
    pub fn new(segments: &'a [Arc<SegmentReader>], field: &str) -> Self {
        let mut cursors = Vec::new();
        let mut heap = BinaryHeap::new();

        for (ord, segment) in segments.iter().enumerate() {
            if let Some(terms) = segment.terms(field) {
                let mut iter = terms.iter();
                if let Some((term, list)) = iter.next() {
                    heap.push(Reverse(HeapEntry {
                        term: term.as_slice(),
                        ord,
                        list,
                    }));
                }
                cursors.push(SegmentCursor { ord, iter });
            }
        }

        MergedTerms {
            segments,
            cursors,
            heap,
        }
    }

    fn advance(&mut self, ord: usize) {
        if let Some(cursor) = self.cursors.iter_mut().find(|c| c.ord == ord)
            && let Some((term, list)) = cursor.iter.next()
        {
            self.heap.push(Reverse(HeapEntry {
                term: term.as_slice(),
                ord,
                list,
            }));
        }
    }

    fn live_count(&self, ord: usize, list: &PostingList) -> u64 {
        let segment = &self.segments[ord];
        list.doc_ids().filter(|&doc| segment.is_live(doc)).count() as u64
    }
}

impl<'a> Iterator for MergedTerms<'a> {
    type Item = TermEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Reverse(entry) = self.heap.pop()?;
            let term = entry.term.to_vec();

            let mut doc_freq = self.live_count(entry.ord, entry.list);
            self.advance(entry.ord);

            // Fold in every other segment currently positioned on the same
            // term.
            while let Some(Reverse(next)) = self.heap.peek() {
                if next.term != term.as_slice() {
                    break;
                }
                let Reverse(next) = self.heap.pop().expect("peeked entry");
                let (next_ord, next_list) = (next.ord, next.list);
                doc_freq += self.live_count(next_ord, next_list);
                self.advance(next_ord);
            }

            // A term whose every document is deleted is invisible.
            if doc_freq > 0 {
                return Some(TermEntry { term, doc_freq });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        BinaryCodec, Codec, CodecRegistry, DocValuesData, FieldPostings, Posting, StoredDoc,
        StreamKind, TermVectorsData, stream_file,
    };
    use crate::segment::{LiveDocs, SegmentMeta};
    use crate::storage::MemoryStorage;

    fn write_segment(
        storage: &MemoryStorage,
        name: &str,
        terms: &[(&[u8], &[u32])],
    ) -> SegmentMeta {
        let codec = BinaryCodec::new();
        let mut postings = FieldPostings::new();
        let mut max_doc = 0u32;

        for (term, docs) in terms {
            for &doc in *docs {
                postings.push(
                    "body",
                    term,
                    Posting {
                        doc_id: doc,
                        freq: 1,
                        positions: vec![0],
                    },
                );
                max_doc = max_doc.max(doc + 1);
            }
        }

        let stored: Vec<StoredDoc> = (0..max_doc).map(|_| StoredDoc::default()).collect();

        codec
            .postings()
            .write(storage, &stream_file(name, StreamKind::Postings), &postings)
            .unwrap();
        codec
            .stored_fields()
            .write(storage, &stream_file(name, StreamKind::StoredFields), &stored)
            .unwrap();
        codec
            .doc_values()
            .write(
                storage,
                &stream_file(name, StreamKind::DocValues),
                &DocValuesData::new(),
            )
            .unwrap();
        codec
            .term_vectors()
            .write(
                storage,
                &stream_file(name, StreamKind::TermVectors),
                &TermVectorsData::new(),
            )
            .unwrap();

        SegmentMeta::new(name.to_string(), max_doc, codec.name().to_string(), 0)
    }

    fn open(storage: &MemoryStorage, meta: &SegmentMeta) -> Arc<SegmentReader> {
        let registry = CodecRegistry::new();
        SegmentReader::open_shared(storage, &registry, meta).unwrap()
    }

    #[test]
    fn test_merged_terms_sorted_and_deduplicated() {
        let storage = MemoryStorage::new_default();

        let meta_a = write_segment(
            &storage,
            "seg_0000000a",
            &[(b"apple", &[0]), (b"pear", &[0, 1])],
        );
        let meta_b = write_segment(
            &storage,
            "seg_0000000b",
            &[(b"apple", &[0, 1]), (b"mango", &[1])],
        );

        let segments = vec![open(&storage, &meta_a), open(&storage, &meta_b)];
        let entries: Vec<TermEntry> = MergedTerms::new(&segments, "body").collect();

        let terms: Vec<&[u8]> = entries.iter().map(|e| e.term.as_slice()).collect();
        assert_eq!(terms, vec![b"apple".as_ref(), b"mango".as_ref(), b"pear".as_ref()]);

        assert_eq!(entries[0].doc_freq, 3); // apple: 1 in a, 2 in b
        assert_eq!(entries[1].doc_freq, 1);
        assert_eq!(entries[2].doc_freq, 2);
    }

    #[test]
    fn test_deleted_docs_excluded_from_freq() {
        let storage = MemoryStorage::new_default();

        let mut meta = write_segment(&storage, "seg_0000000a", &[(b"apple", &[0, 1])]);
        let mut live = LiveDocs::all_live(2).next_generation();
        live.delete(0).unwrap();
        live.write(&storage, "seg_0000000a_1.liv").unwrap();
        meta.live_docs_gen = 1;
        meta.del_count = 1;

        let segments = vec![open(&storage, &meta)];
        let entries: Vec<TermEntry> = MergedTerms::new(&segments, "body").collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].doc_freq, 1);
    }

    #[test]
    fn test_fully_deleted_term_invisible() {
        let storage = MemoryStorage::new_default();

        let mut meta = write_segment(
            &storage,
            "seg_0000000a",
            &[(b"dead", &[0]), (b"live", &[1])],
        );
        let mut live = LiveDocs::all_live(2).next_generation();
        live.delete(0).unwrap();
        live.write(&storage, "seg_0000000a_1.liv").unwrap();
        meta.live_docs_gen = 1;
        meta.del_count = 1;

        let segments = vec![open(&storage, &meta)];
        let terms: Vec<Vec<u8>> = MergedTerms::new(&segments, "body")
            .map(|e| e.term)
            .collect();

        assert_eq!(terms, vec![b"live".to_vec()]);
    }

    #[test]
    fn test_missing_field_yields_nothing() {
        let storage = MemoryStorage::new_default();
        let meta = write_segment(&storage, "seg_0000000a", &[(b"x", &[0])]);

        let segments = vec![open(&storage, &meta)];
        assert_eq!(MergedTerms::new(&segments, "nope").count(), 0);
    }
}

//! Merge execution: rewrite several segments into one.
//!
//! Surviving documents are read in segment order, remapped to contiguous
//! local ids (deleted documents are dropped, not carried forward), and every
//! stream is re-encoded through the target codec. The inputs are never
//! touched; failure or cancellation deletes the partial output and leaves
//! the index exactly as it was.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::{
    Codec, DocValuesData, FieldPostings, Posting, StoredDoc, StreamKind, TermVectorsData,
    stream_file,
};
use crate::error::{Result, XystonError};
use crate::segment::{SegmentMeta, SegmentReader};
use crate::storage::traits::Storage;

/// Cooperative cancellation flag, checked at stream boundaries only so no
/// partial record is ever written.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Error out if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(XystonError::cancelled("merge aborted"))
        } else {
            Ok(())
        }
    }
}

/// Statistics about one merge execution.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    /// Number of input segments.
    pub segments_merged: usize,

    /// Live documents carried into the output.
    pub docs_merged: u64,

    /// Deleted documents dropped.
    pub deleted_dropped: u64,

    /// Distinct (field, term) pairs in the output.
    pub terms_merged: u64,

    /// Bytes written for the output segment.
    pub bytes_written: u64,
}

/// The product of one merge execution.
#[derive(Debug)]
pub struct MergeOutput {
    /// Metadata of the new segment.
    pub meta: SegmentMeta,

    /// Execution statistics.
    pub stats: MergeStats,

    /// Per input segment, the mapping from old local id to new local id
    /// (`None` = dropped as deleted). Used to carry deletes that landed on
    /// an input while the merge was running into the new segment.
    pub doc_maps: Vec<Vec<Option<u32>>>,
}

/// Merge the given segments into a new segment named `output_name`.
///
/// Readers over the inputs must be snapshots taken under the segment-list
/// lock so liveness is consistent; the merge itself runs without any index
/// lock held.
pub fn execute_merge(
    storage: &dyn Storage,
    codec: &dyn Codec,
    inputs: &[Arc<SegmentReader>],
    output_name: &str,
    cancel: &CancelFlag,
) -> Result<MergeOutput> {
    let input_names: Vec<String> = inputs.iter().map(|r| r.name().to_string()).collect();

    run_merge(storage, codec, inputs, output_name, cancel).map_err(|e| match e {
        XystonError::OperationCancelled(_) => e,
        other => XystonError::merge_failed(input_names.clone(), output_name, other.to_string()),
    })
}

fn run_merge(
    storage: &dyn Storage,
    codec: &dyn Codec,
    inputs: &[Arc<SegmentReader>],
    output_name: &str,
    cancel: &CancelFlag,
) -> Result<MergeOutput> {
    cancel.check()?;

    // Remap: for each input in order, live documents get the next contiguous
    // output id; deleted slots map to None and vanish.
    let mut doc_maps: Vec<Vec<Option<u32>>> = Vec::with_capacity(inputs.len());
    let mut next_id = 0u32;
    let mut deleted_dropped = 0u64;

    for reader in inputs {
        let mut map = Vec::with_capacity(reader.max_doc() as usize);
        for doc in 0..reader.max_doc() {
            if reader.is_live(doc) {
                map.push(Some(next_id));
                next_id += 1;
            } else {
                map.push(None);
                deleted_dropped += 1;
            }
        }
        doc_maps.push(map);
    }

    let mut postings = FieldPostings::new();
    let mut stored: Vec<StoredDoc> = Vec::with_capacity(next_id as usize);
    let mut doc_values = DocValuesData::new();
    let mut vectors = TermVectorsData::new();

    for (reader, map) in inputs.iter().zip(&doc_maps) {
        cancel.check()?;

        // Postings: inputs are visited in order and output ids grow with
        // input order, so appending keeps each posting list sorted.
        for (field, terms) in reader.postings_data().fields() {
            for (term, list) in terms {
                for posting in &list.postings {
                    if let Some(new_id) = map[posting.doc_id as usize] {
                        postings.push(
                            field,
                            term,
                            Posting {
                                doc_id: new_id,
                                freq: posting.freq,
                                positions: posting.positions.clone(),
                            },
                        );
                    }
                }
            }
        }

        // Stored fields: survivors in original order.
        for doc in 0..reader.max_doc() {
            if map[doc as usize].is_some() {
                let fields = reader
                    .stored(doc)
                    .cloned()
                    .unwrap_or_default();
                stored.push(fields);
            }
        }

        // Doc values.
        for (field, docs) in reader.doc_values_data().iter() {
            for (doc, value) in docs {
                if let Some(new_id) = map[*doc as usize] {
                    doc_values.insert(field, new_id, value.clone());
                }
            }
        }

        // Term vectors.
        for (doc, fields) in reader.term_vectors_data().iter() {
            if let Some(new_id) = map[doc as usize] {
                for (field, terms) in fields {
                    vectors.insert(new_id, field, terms.clone());
                }
            }
        }
    }

    let stats = MergeStats {
        segments_merged: inputs.len(),
        docs_merged: next_id as u64,
        deleted_dropped,
        terms_merged: postings.term_count() as u64,
        bytes_written: 0,
    };

    let size_bytes = write_segment_streams(
        storage,
        codec,
        output_name,
        &postings,
        &stored,
        &doc_values,
        &vectors,
        Some(cancel),
    )?;

    let meta = SegmentMeta::new(
        output_name.to_string(),
        next_id,
        codec.name().to_string(),
        size_bytes,
    );

    Ok(MergeOutput {
        meta,
        stats: MergeStats {
            bytes_written: size_bytes,
            ..stats
        },
        doc_maps,
    })
}

/// Write all four streams of a segment, all-or-nothing.
///
/// Streams go to temporary names first and are renamed into place only once
/// every stream has been written; any failure (or cancellation, checked at
/// each stream boundary) removes the partial files. Shared by flush and
/// merge. Returns the total bytes written.
#[allow(clippy::too_many_arguments)]
pub fn write_segment_streams(
    storage: &dyn Storage,
    codec: &dyn Codec,
    name: &str,
    postings: &FieldPostings,
    stored: &[StoredDoc],
    doc_values: &DocValuesData,
    vectors: &TermVectorsData,
    cancel: Option<&CancelFlag>,
) -> Result<u64> {
    let finals = [
        stream_file(name, StreamKind::Postings),
        stream_file(name, StreamKind::StoredFields),
        stream_file(name, StreamKind::DocValues),
        stream_file(name, StreamKind::TermVectors),
    ];
    let temps: Vec<String> = finals.iter().map(|f| format!("{f}.tmp")).collect();

    let check = || -> Result<()> {
        match cancel {
            Some(flag) => flag.check(),
            None => Ok(()),
        }
    };

    let result = (|| -> Result<()> {
        check()?;
        codec.postings().write(storage, &temps[0], postings)?;
        check()?;
        codec.stored_fields().write(storage, &temps[1], stored)?;
        check()?;
        codec.doc_values().write(storage, &temps[2], doc_values)?;
        check()?;
        codec.term_vectors().write(storage, &temps[3], vectors)?;
        check()
    })();

    if let Err(e) = result {
        cleanup(storage, &temps);
        return Err(e);
    }

    // Publish. A rename failure still unwinds completely: already-published
    // files are deleted along with the remaining temps.
    for (index, (temp, final_name)) in temps.iter().zip(finals.iter()).enumerate() {
        if let Err(e) = storage.rename_file(temp, final_name) {
            cleanup(storage, &finals[..index]);
            cleanup(storage, &temps[index..]);
            return Err(e);
        }
    }

    let mut size_bytes = 0u64;
    for file in &finals {
        size_bytes += storage.file_size(file).unwrap_or(0);
    }
    Ok(size_bytes)
}

fn cleanup<S: AsRef<str>>(storage: &dyn Storage, files: &[S]) {
    for file in files {
        let _ = storage.delete_file(file.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BinaryCodec, CodecRegistry};
    use crate::index::document::StoredValue;
    use crate::segment::LiveDocs;
    use crate::storage::MemoryStorage;

    fn build_segment(
        storage: &MemoryStorage,
        name: &str,
        terms_per_doc: &[(&str, &[u8])],
    ) -> SegmentMeta {
        let codec = BinaryCodec::new();
        let mut postings = FieldPostings::new();
        let mut stored = Vec::new();

        for (doc, (field, term)) in terms_per_doc.iter().enumerate() {
            postings.push(
                field,
                term,
                Posting {
                    doc_id: doc as u32,
                    freq: 1,
                    positions: vec![0],
                },
            );
            stored.push(StoredDoc {
                fields: vec![(
                    "id".to_string(),
                    StoredValue::Text(format!("{name}:{doc}")),
                )],
            });
        }

        let size = write_segment_streams(
            storage,
            &codec,
            name,
            &postings,
            &stored,
            &DocValuesData::new(),
            &TermVectorsData::new(),
            None,
        )
        .unwrap();

        SegmentMeta::new(
            name.to_string(),
            terms_per_doc.len() as u32,
            codec.name().to_string(),
            size,
        )
    }

    fn open(storage: &MemoryStorage, meta: &SegmentMeta) -> Arc<SegmentReader> {
        let registry = CodecRegistry::new();
        SegmentReader::open_shared(storage, &registry, meta).unwrap()
    }

    #[test]
    fn test_merge_two_segments() {
        let storage = MemoryStorage::new_default();
        let codec = BinaryCodec::new();

        let meta_a = build_segment(&storage, "seg_0000000a", &[("body", b"x"), ("body", b"y")]);
        let meta_b = build_segment(&storage, "seg_0000000b", &[("body", b"x")]);

        let inputs = vec![open(&storage, &meta_a), open(&storage, &meta_b)];
        let output = execute_merge(
            &storage,
            &codec,
            &inputs,
            "seg_0000000c",
            &CancelFlag::new(),
        )
        .unwrap();
        let merged = output.meta;

        assert_eq!(merged.max_doc, 3);
        assert_eq!(output.stats.docs_merged, 3);
        assert_eq!(output.stats.deleted_dropped, 0);
        assert_eq!(output.doc_maps[1], vec![Some(2)]);

        let registry = CodecRegistry::new();
        let reader = SegmentReader::open(&storage, &registry, &merged).unwrap();
        // Survivors keep their relative order: a:0, a:1, b:0.
        assert_eq!(
            reader.stored(0).unwrap().get("id").unwrap().as_text(),
            Some("seg_0000000a:0")
        );
        assert_eq!(
            reader.stored(2).unwrap().get("id").unwrap().as_text(),
            Some("seg_0000000b:0")
        );
        let list = reader.postings("body", b"x").unwrap();
        let ids: Vec<u32> = list.doc_ids().collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_merge_drops_deleted_docs() {
        let storage = MemoryStorage::new_default();
        let codec = BinaryCodec::new();

        let mut meta = build_segment(
            &storage,
            "seg_0000000a",
            &[("body", b"x"), ("body", b"y"), ("body", b"z")],
        );

        let mut live = LiveDocs::all_live(3).next_generation();
        live.delete(1).unwrap();
        live.write(&storage, "seg_0000000a_1.liv").unwrap();
        meta.live_docs_gen = 1;
        meta.del_count = 1;

        let inputs = vec![open(&storage, &meta)];
        let output = execute_merge(
            &storage,
            &codec,
            &inputs,
            "seg_0000000b",
            &CancelFlag::new(),
        )
        .unwrap();
        let merged = output.meta;

        assert_eq!(merged.max_doc, 2);
        assert_eq!(output.stats.deleted_dropped, 1);
        assert_eq!(output.doc_maps[0], vec![Some(0), None, Some(1)]);
        assert!(!merged.has_deletions());

        let registry = CodecRegistry::new();
        let reader = SegmentReader::open(&storage, &registry, &merged).unwrap();
        assert!(reader.postings("body", b"y").is_none());
        assert_eq!(reader.doc_freq("body", b"z"), 1);
    }

    #[test]
    fn test_cancelled_merge_leaves_no_output() {
        let storage = MemoryStorage::new_default();
        let codec = BinaryCodec::new();

        let meta = build_segment(&storage, "seg_0000000a", &[("body", b"x")]);
        let inputs = vec![open(&storage, &meta)];

        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = execute_merge(&storage, &codec, &inputs, "seg_0000000b", &cancel).unwrap_err();
        assert!(matches!(err, XystonError::OperationCancelled(_)));

        // No output file, temp or final, survives.
        for file in storage.list_files().unwrap() {
            assert!(!file.starts_with("seg_0000000b"), "leftover file {file}");
        }
        // Inputs untouched.
        let registry = CodecRegistry::new();
        assert!(SegmentReader::open(&storage, &registry, &meta).is_ok());
    }

    #[test]
    fn test_merge_failure_reports_segments() {
        let storage = MemoryStorage::new_default();
        let codec = BinaryCodec::new();

        let meta = build_segment(&storage, "seg_0000000a", &[("body", b"x")]);
        let inputs = vec![open(&storage, &meta)];

        // Closing the storage makes every write fail.
        let mut broken = MemoryStorage::new_default();
        broken.close().unwrap();

        let err =
            execute_merge(&broken, &codec, &inputs, "seg_0000000b", &CancelFlag::new()).unwrap_err();
        match err {
            XystonError::MergeFailed { inputs, output, .. } => {
                assert_eq!(inputs, vec!["seg_0000000a".to_string()]);
                assert_eq!(output, "seg_0000000b");
            }
            other => panic!("Expected MergeFailed, got {other:?}"),
        }
    }
}

//! Immutable index segments.
//!
//! A segment is written once, by a flush or by a merge, and its stream files
//! never change afterwards. The only mutable per-segment state is the
//! live-docs bitmap, which is versioned into new files rather than edited
//! in place.

pub mod live_docs;
pub mod reader;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::codec::{StreamKind, live_docs_file, stream_file};

pub use live_docs::LiveDocs;
pub use reader::SegmentReader;

/// Build a segment name from its generation number.
pub fn segment_name(generation: u64) -> String {
    format!("seg_{generation:08x}")
}

/// Parse the generation number out of a segment name.
pub fn parse_segment_generation(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("seg_")?;
    u64::from_str_radix(digits, 16).ok()
}

/// Metadata of one immutable segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Unique segment name, derived from the generation that created it.
    pub name: String,

    /// Number of document slots, deleted ones included.
    pub max_doc: u32,

    /// Name of the codec that wrote this segment's streams.
    pub codec: String,

    /// Generation of the current live-docs file; 0 means no deletions.
    pub live_docs_gen: u64,

    /// Number of deleted documents.
    pub del_count: u32,

    /// Total size of the stream files in bytes.
    pub size_bytes: u64,

    /// Seconds since epoch when the segment was created.
    pub created_at: u64,
}

impl SegmentMeta {
    /// Create metadata for a freshly written segment with no deletions.
    pub fn new(name: String, max_doc: u32, codec: String, size_bytes: u64) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        SegmentMeta {
            name,
            max_doc,
            codec,
            live_docs_gen: 0,
            del_count: 0,
            size_bytes,
            created_at,
        }
    }

    /// Number of live (non-deleted) documents.
    pub fn live_doc_count(&self) -> u32 {
        self.max_doc.saturating_sub(self.del_count)
    }

    /// Whether a live-docs file exists for this segment.
    pub fn has_deletions(&self) -> bool {
        self.live_docs_gen > 0
    }

    /// Deletion ratio (0.0 = no deletions, 1.0 = all deleted).
    pub fn deletion_ratio(&self) -> f64 {
        if self.max_doc == 0 {
            0.0
        } else {
            self.del_count as f64 / self.max_doc as f64
        }
    }

    /// Names of the four stream files of this segment.
    pub fn stream_files(&self) -> Vec<String> {
        vec![
            stream_file(&self.name, StreamKind::Postings),
            stream_file(&self.name, StreamKind::StoredFields),
            stream_file(&self.name, StreamKind::DocValues),
            stream_file(&self.name, StreamKind::TermVectors),
        ]
    }

    /// All files of this segment, current live-docs file included.
    pub fn files(&self) -> Vec<String> {
        let mut files = self.stream_files();
        if self.has_deletions() {
            files.push(live_docs_file(&self.name, self.live_docs_gen));
        }
        files
    }

    /// Name of the current live-docs file, if deletions exist.
    pub fn live_docs_file_name(&self) -> Option<String> {
        self.has_deletions()
            .then(|| live_docs_file(&self.name, self.live_docs_gen))
    }
}

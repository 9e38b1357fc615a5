//! The write path: buffering, flushing, merging, committing.

pub mod commit;
pub mod deletion_policy;
pub mod document;
pub mod merge;
pub mod merge_policy;
pub mod merge_scheduler;
pub mod writer;

use crate::codec::BINARY_CODEC_NAME;

pub use commit::{CommitPoint, list_commits, load_latest_commit};
pub use deletion_policy::{DeletionPolicy, FileDeleter, KeepAll, KeepOnlyLast, ReaderLease};
pub use document::{DocValue, Document, FieldData, StoredValue, TermPosition};
pub use merge::{CancelFlag, MergeOutput, MergeStats};
pub use merge_policy::{
    MergePolicy, MergeSpec, MergeTrigger, NoMergePolicy, SegmentSnapshot, TieredMergePolicy,
};
pub use merge_scheduler::{
    ConcurrentMergeScheduler, ConcurrentSchedulerConfig, MergeScheduler, SerialMergeScheduler,
};
pub use writer::{DeleteSelector, IndexWriter, WriterStats};

/// Configuration for the index writer.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Flush once this many documents are buffered.
    pub max_buffered_docs: usize,

    /// Flush once the buffer's estimated size crosses this many bytes.
    pub max_buffer_bytes: u64,

    /// Segment count above which merge selection escalates from the
    /// background trigger to the segment-count trigger.
    pub max_segment_count: usize,

    /// Name of the codec used for newly written segments.
    pub codec: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_buffered_docs: 1024,
            max_buffer_bytes: 16 * 1024 * 1024,
            max_segment_count: 8,
            codec: BINARY_CODEC_NAME.to_string(),
        }
    }
}

//! The index writer: buffered document ingestion, flush, merge, commit.
//!
//! Documents accumulate in an in-memory buffer generation. A flush swaps in
//! a fresh generation (concurrent adds land there) and turns the old one
//! into a new immutable segment, all-or-nothing. Commits publish the current
//! segment list as a durable descriptor and run the deletion policy over the
//! commit history. The segment-list/commit mutation lock is the single
//! global critical section of the whole core.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::codec::{
    Codec, CodecRegistry, DocValuesData, FieldPostings, Posting, StoredDoc, TermVectorEntry,
    TermVectorsData, live_docs_file,
};
use crate::error::{Result, XystonError};
use crate::index::IndexConfig;
use crate::index::commit::{self, CommitPoint};
use crate::index::deletion_policy::{DeletionPolicy, FileDeleter, KeepOnlyLast, ReaderLease};
use crate::index::document::Document;
use crate::index::merge::{self, CancelFlag, MergeOutput};
use crate::index::merge_policy::{
    MergePolicy, MergeSpec, MergeTrigger, SegmentSnapshot, TieredMergePolicy,
};
use crate::index::merge_scheduler::{ConcurrentMergeScheduler, MergeScheduler, MergeTask};
use crate::reader::CompositeReader;
use crate::segment::{LiveDocs, SegmentMeta, SegmentReader, parse_segment_generation, segment_name};
use crate::storage::traits::Storage;

/// Selects documents to delete.
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    /// Every document containing `term` in `field`.
    Term {
        /// Field name.
        field: String,
        /// Term bytes.
        term: Vec<u8>,
    },

    /// One document by its global address in the last flushed layout.
    GlobalId(u32),
}

impl DeleteSelector {
    /// Convenience constructor for term deletes.
    pub fn term<F: Into<String>, T: Into<Vec<u8>>>(field: F, term: T) -> Self {
        DeleteSelector::Term {
            field: field.into(),
            term: term.into(),
        }
    }
}

/// Lifecycle of one buffer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting documents.
    Open,

    /// Swapped out; its flush transaction is running.
    Flushing,

    /// Flushed into a segment.
    Flushed,
}

/// One generation of buffered documents and deletes.
#[derive(Debug)]
struct DocumentBuffer {
    generation: u64,
    state: BufferState,
    docs: Vec<Document>,
    /// Deletes with the number of buffered documents seen when they arrived,
    /// so a delete never affects documents added after it.
    deletes: Vec<(usize, DeleteSelector)>,
    bytes: u64,
}

impl DocumentBuffer {
    fn new(generation: u64) -> Self {
        DocumentBuffer {
            generation,
            state: BufferState::Open,
            docs: Vec::new(),
            deletes: Vec::new(),
            bytes: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.docs.is_empty() && self.deletes.is_empty()
    }
}

/// Counters describing writer activity.
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    /// Documents accepted.
    pub docs_added: u64,

    /// Delete selectors buffered.
    pub deletes_buffered: u64,

    /// Successful flush transactions.
    pub flush_count: u64,

    /// Successful merges applied.
    pub merge_count: u64,

    /// Merge executions that failed.
    pub failed_merges: u64,

    /// Commits written.
    pub commit_count: u64,
}

/// State behind the single global critical section.
#[derive(Debug)]
struct SegmentState {
    /// Current segment list in document order.
    segments: Vec<SegmentMeta>,

    /// Segments currently feeding an in-flight merge.
    merging: AHashSet<String>,

    /// Retained commit history, ascending generation.
    commits: Vec<CommitPoint>,

    /// Open segment readers keyed by (name, live-docs generation).
    readers: AHashMap<(String, u64), Arc<SegmentReader>>,

    /// Message of the most recent failed merge, if any.
    last_merge_error: Option<String>,
}

/// State shared between the writer and its merge tasks.
#[derive(Debug)]
struct WriterShared {
    storage: Arc<dyn Storage>,
    codecs: Arc<CodecRegistry>,
    deleter: Arc<FileDeleter>,
    state: Mutex<SegmentState>,
    stats: Mutex<WriterStats>,
}

impl WriterShared {
    fn cached_reader(
        &self,
        state: &mut SegmentState,
        meta: &SegmentMeta,
    ) -> Result<Arc<SegmentReader>> {
        let key = (meta.name.clone(), meta.live_docs_gen);
        if let Some(reader) = state.readers.get(&key) {
            return Ok(Arc::clone(reader));
        }

        let reader = SegmentReader::open_shared(&*self.storage, &self.codecs, meta)?;
        state.readers.insert(key, Arc::clone(&reader));
        Ok(reader)
    }

    /// Drop cache entries that no longer match a current segment.
    fn prune_reader_cache(&self, state: &mut SegmentState) {
        let current: AHashSet<(String, u64)> = state
            .segments
            .iter()
            .map(|s| (s.name.clone(), s.live_docs_gen))
            .collect();
        state.readers.retain(|key, _| current.contains(key));
    }
}

/// The writer over one index.
#[derive(Debug)]
pub struct IndexWriter {
    config: IndexConfig,
    codec: Arc<dyn Codec>,
    merge_policy: Arc<dyn MergePolicy>,
    scheduler: Arc<dyn MergeScheduler>,
    deletion_policy: Arc<dyn DeletionPolicy>,
    shared: Arc<WriterShared>,
    buffer: Mutex<DocumentBuffer>,
    next_buffer_gen: AtomicU64,
    next_segment_gen: AtomicU64,
    next_commit_gen: AtomicU64,
    closed: AtomicBool,
}

impl IndexWriter {
    /// Open a writer with default policies: tiered merging on a concurrent
    /// scheduler, keep-only-last commit retention.
    pub fn open(storage: Arc<dyn Storage>, config: IndexConfig) -> Result<Self> {
        Self::with_components(
            storage,
            config,
            Arc::new(TieredMergePolicy::default()),
            Arc::new(ConcurrentMergeScheduler::new_default()),
            Arc::new(KeepOnlyLast),
        )
    }

    /// Open a writer with explicit policy and scheduler choices.
    pub fn with_components(
        storage: Arc<dyn Storage>,
        config: IndexConfig,
        merge_policy: Arc<dyn MergePolicy>,
        scheduler: Arc<dyn MergeScheduler>,
        deletion_policy: Arc<dyn DeletionPolicy>,
    ) -> Result<Self> {
        let codecs = Arc::new(CodecRegistry::new());
        let codec = codecs.resolve(&config.codec)?;

        let commits = commit::list_commits(&*storage)?;
        let segments = match commits.last() {
            Some(latest) => {
                commit::verify_commit(&*storage, latest)?;
                latest.segments.clone()
            }
            None => Vec::new(),
        };

        let deleter = Arc::new(FileDeleter::new(Arc::clone(&storage)));
        for segment in &segments {
            deleter.inc_ref(segment.files());
        }
        for point in &commits {
            deleter.inc_ref(point.files());
        }

        let max_segment_gen = commits
            .iter()
            .flat_map(|c| c.segments.iter())
            .chain(segments.iter())
            .filter_map(|s| parse_segment_generation(&s.name))
            .max()
            .unwrap_or(0);
        let next_commit_gen = commits.last().map(|c| c.generation).unwrap_or(0) + 1;

        let shared = Arc::new(WriterShared {
            storage,
            codecs,
            deleter,
            state: Mutex::new(SegmentState {
                segments,
                merging: AHashSet::new(),
                commits,
                readers: AHashMap::new(),
                last_merge_error: None,
            }),
            stats: Mutex::new(WriterStats::default()),
        });

        let writer = IndexWriter {
            config,
            codec,
            merge_policy,
            scheduler,
            deletion_policy,
            shared,
            buffer: Mutex::new(DocumentBuffer::new(0)),
            next_buffer_gen: AtomicU64::new(1),
            next_segment_gen: AtomicU64::new(max_segment_gen + 1),
            next_commit_gen: AtomicU64::new(next_commit_gen),
            closed: AtomicBool::new(false),
        };

        // First deletion-policy invocation: over the commits found on open.
        {
            let mut state = writer.shared.state.lock();
            writer.prune_commits(&mut state);
        }

        Ok(writer)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(XystonError::index("Index writer is closed"))
        } else {
            Ok(())
        }
    }

    /// Buffer one document. Flushes inline when a threshold is crossed.
    pub fn add_document(&self, doc: Document) -> Result<()> {
        self.ensure_open()?;

        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.bytes += doc.estimated_bytes() as u64;
            buffer.docs.push(doc);
            buffer.docs.len() >= self.config.max_buffered_docs
                || buffer.bytes >= self.config.max_buffer_bytes
        };
        self.shared.stats.lock().docs_added += 1;

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Buffer a delete. Applied during the next flush, both to the segment
    /// being created and to already-flushed segments.
    pub fn delete_documents(&self, selector: DeleteSelector) -> Result<()> {
        self.ensure_open()?;

        let mut buffer = self.buffer.lock();
        let watermark = buffer.docs.len();
        buffer.deletes.push((watermark, selector));
        drop(buffer);

        self.shared.stats.lock().deletes_buffered += 1;
        Ok(())
    }

    /// Flush the current buffer generation into a new immutable segment.
    ///
    /// Returns the new segment's metadata, or `None` when nothing was
    /// buffered. All-or-nothing: on failure the buffered documents are put
    /// back and [`XystonError::FlushFailed`] is surfaced.
    pub fn flush(&self) -> Result<Option<SegmentMeta>> {
        self.ensure_open()?;
        self.flush_internal()
    }

    fn flush_internal(&self) -> Result<Option<SegmentMeta>> {
        let mut taken = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return Ok(None);
            }
            let generation = self.next_buffer_gen.fetch_add(1, Ordering::SeqCst);
            std::mem::replace(&mut *buffer, DocumentBuffer::new(generation))
        };
        debug_assert_eq!(taken.state, BufferState::Open);
        taken.state = BufferState::Flushing;

        match self.flush_buffer(&taken) {
            Ok(meta) => {
                taken.state = BufferState::Flushed;
                self.shared.stats.lock().flush_count += 1;

                let trigger = if self.segment_count() > self.config.max_segment_count {
                    MergeTrigger::SegmentCount
                } else {
                    MergeTrigger::Background
                };
                self.maybe_merge(trigger)?;

                Ok(meta)
            }
            Err(e) => {
                // Put the generation back in front of anything buffered
                // since the swap, so no document or delete is lost and
                // submission order is preserved.
                {
                    let mut buffer = self.buffer.lock();
                    let offset = taken.docs.len();
                    let mut docs = std::mem::take(&mut taken.docs);
                    docs.append(&mut buffer.docs);
                    let mut deletes = std::mem::take(&mut taken.deletes);
                    deletes.extend(
                        buffer
                            .deletes
                            .drain(..)
                            .map(|(watermark, selector)| (watermark + offset, selector)),
                    );
                    buffer.docs = docs;
                    buffer.deletes = deletes;
                    buffer.bytes += taken.bytes;
                }
                Err(XystonError::flush_failed(e.to_string()))
            }
        }
    }

    fn flush_buffer(&self, buffer: &DocumentBuffer) -> Result<Option<SegmentMeta>> {
        let mut new_meta = None;

        if !buffer.docs.is_empty() {
            let (postings, stored, doc_values, vectors) = invert_documents(&buffer.docs);

            // In-buffer term deletes: a delete covers only the documents
            // buffered before it arrived.
            let mut live = LiveDocs::all_live(buffer.docs.len() as u32).next_generation();
            for (watermark, selector) in &buffer.deletes {
                if let DeleteSelector::Term { field, term } = selector
                    && let Some(list) = postings.term(field, term)
                {
                    for doc in list.doc_ids() {
                        if (doc as usize) < *watermark {
                            live.delete(doc)?;
                        }
                    }
                }
            }

            let generation = self.next_segment_gen.fetch_add(1, Ordering::SeqCst);
            let name = segment_name(generation);
            let size = merge::write_segment_streams(
                &*self.shared.storage,
                &*self.codec,
                &name,
                &postings,
                &stored,
                &doc_values,
                &vectors,
                None,
            )?;

            let mut meta = SegmentMeta::new(
                name,
                buffer.docs.len() as u32,
                self.codec.name().to_string(),
                size,
            );

            if live.deleted_count() > 0 {
                let file = live_docs_file(&meta.name, live.generation());
                if let Err(e) = live.write(&*self.shared.storage, &file) {
                    cleanup_segment_files(&*self.shared.storage, &meta);
                    return Err(e);
                }
                meta.live_docs_gen = live.generation();
                meta.del_count = live.deleted_count();
            }

            new_meta = Some(meta);
        }

        // Global critical section: apply deletes to prior segments and
        // publish the new one.
        let mut state = self.shared.state.lock();
        if let Err(e) = self.apply_deletes_to_segments(&mut state, &buffer.deletes) {
            if let Some(meta) = &new_meta {
                cleanup_segment_files(&*self.shared.storage, meta);
            }
            return Err(e);
        }

        if let Some(meta) = &new_meta {
            self.shared.deleter.inc_ref(meta.files());
            state.segments.push(meta.clone());
        }
        self.shared.prune_reader_cache(&mut state);

        Ok(new_meta)
    }

    /// Apply buffered deletes to the already-flushed segments, producing new
    /// live-docs file generations. Runs under the state lock.
    fn apply_deletes_to_segments(
        &self,
        state: &mut SegmentState,
        deletes: &[(usize, DeleteSelector)],
    ) -> Result<()> {
        if deletes.is_empty() || state.segments.is_empty() {
            return Ok(());
        }

        // Global addresses resolve against the layout before this flush.
        let mut starts = Vec::with_capacity(state.segments.len() + 1);
        let mut total = 0u64;
        for segment in &state.segments {
            starts.push(total);
            total += segment.max_doc as u64;
        }

        let mut pending: AHashMap<String, Vec<u32>> = AHashMap::new();
        for (_, selector) in deletes {
            match selector {
                DeleteSelector::Term { field, term } => {
                    let metas: Vec<SegmentMeta> = state.segments.clone();
                    for meta in &metas {
                        let reader = self.shared.cached_reader(state, meta)?;
                        if let Some(list) = reader.postings(field, term) {
                            pending
                                .entry(meta.name.clone())
                                .or_default()
                                .extend(list.doc_ids());
                        }
                    }
                }
                DeleteSelector::GlobalId(global) => {
                    let global = *global as u64;
                    if global >= total {
                        return Err(XystonError::index(format!(
                            "Delete id {global} out of range ({total} documents)"
                        )));
                    }
                    let ord = starts.partition_point(|&start| start <= global) - 1;
                    let local = (global - starts[ord]) as u32;
                    pending
                        .entry(state.segments[ord].name.clone())
                        .or_default()
                        .push(local);
                }
            }
        }

        for (name, doc_ids) in pending {
            let Some(index) = state.segments.iter().position(|s| s.name == name) else {
                continue;
            };
            let meta = state.segments[index].clone();

            let current = match meta.live_docs_file_name() {
                Some(file) => LiveDocs::read(&*self.shared.storage, &file, meta.max_doc)?,
                None => LiveDocs::all_live(meta.max_doc),
            };

            let mut next = current.next_generation();
            let mut changed = false;
            for doc in doc_ids {
                changed |= next.delete(doc)?;
            }
            if !changed {
                continue;
            }

            let file = live_docs_file(&meta.name, next.generation());
            next.write(&*self.shared.storage, &file)?;

            let old_live_file = meta.live_docs_file_name();
            let mut updated = meta;
            updated.live_docs_gen = next.generation();
            updated.del_count = next.deleted_count();

            self.shared.deleter.inc_ref([file]);
            if let Some(old) = old_live_file {
                self.shared.deleter.dec_ref([old]);
            }
            state.segments[index] = updated;
        }

        Ok(())
    }

    /// Run merge selection and schedule any selected merges.
    pub fn maybe_merge(&self, trigger: MergeTrigger) -> Result<()> {
        let specs = {
            let state = self.shared.state.lock();
            let snapshots: Vec<SegmentSnapshot> = state
                .segments
                .iter()
                .filter(|s| !state.merging.contains(&s.name))
                .map(SegmentSnapshot::from_meta)
                .collect();
            self.merge_policy.select_merges(&snapshots, trigger)
        };

        for spec in specs {
            self.launch_merge(spec)?;
        }
        Ok(())
    }

    fn launch_merge(&self, spec: MergeSpec) -> Result<()> {
        let inputs = {
            let mut state = self.shared.state.lock();
            if spec
                .segments
                .iter()
                .any(|name| state.merging.contains(name))
            {
                return Ok(());
            }

            let mut readers = Vec::with_capacity(spec.segments.len());
            for name in &spec.segments {
                let Some(meta) = state.segments.iter().find(|s| &s.name == name).cloned() else {
                    // The segment was merged away since selection.
                    return Ok(());
                };
                readers.push(self.shared.cached_reader(&mut state, &meta)?);
            }
            for name in &spec.segments {
                state.merging.insert(name.clone());
            }
            readers
        };

        let output_name = segment_name(self.next_segment_gen.fetch_add(1, Ordering::SeqCst));
        let shared = Arc::clone(&self.shared);
        let codec = Arc::clone(&self.codec);
        let input_names = spec.segments.clone();

        let task: MergeTask = Box::new(move |cancel| {
            let result =
                merge::execute_merge(&*shared.storage, &*codec, &inputs, &output_name, cancel);
            apply_merge_result(&shared, &input_names, &inputs, result);
        });
        self.scheduler.schedule(task)
    }

    /// Synchronously merge down to at most `max_segments` segments.
    ///
    /// A second call with the same bound is a no-op: the segment set and all
    /// term statistics are unchanged.
    pub fn force_merge(&self, max_segments: usize) -> Result<()> {
        self.ensure_open()?;
        let max_segments = max_segments.max(1);

        self.flush()?;
        self.scheduler.wait_for_idle();

        loop {
            let picked = {
                let mut state = self.shared.state.lock();
                if state.segments.len() <= max_segments {
                    return Ok(());
                }

                // A racing background merge may still hold some segments;
                // let it finish rather than fighting over inputs.
                if !state.merging.is_empty() {
                    drop(state);
                    self.scheduler.wait_for_idle();
                    continue;
                }

                // Merge the smallest run of segments that brings the count
                // down to the bound.
                let merge_count = state.segments.len() - max_segments + 1;
                let mut by_size: Vec<(u64, String)> = state
                    .segments
                    .iter()
                    .map(|s| (s.size_bytes, s.name.clone()))
                    .collect();
                by_size.sort();
                let names: AHashSet<String> =
                    by_size.into_iter().take(merge_count).map(|(_, n)| n).collect();

                let mut input_names = Vec::with_capacity(merge_count);
                let mut readers = Vec::with_capacity(merge_count);
                for meta in state.segments.clone() {
                    if names.contains(&meta.name) {
                        input_names.push(meta.name.clone());
                        readers.push(self.shared.cached_reader(&mut state, &meta)?);
                    }
                }
                for name in &input_names {
                    state.merging.insert(name.clone());
                }
                (input_names, readers)
            };
            let (input_names, readers) = picked;

            let output_name = segment_name(self.next_segment_gen.fetch_add(1, Ordering::SeqCst));
            let result = merge::execute_merge(
                &*self.shared.storage,
                &*self.codec,
                &readers,
                &output_name,
                &CancelFlag::new(),
            );
            let failed = result.is_err();
            apply_merge_result(&self.shared, &input_names, &readers, result);

            if failed {
                let message = self
                    .shared
                    .state
                    .lock()
                    .last_merge_error
                    .clone()
                    .unwrap_or_else(|| "merge failed".to_string());
                return Err(XystonError::index(message));
            }
        }
    }

    /// Flush and durably publish the current segment set as a new commit,
    /// then run the deletion policy over the commit history.
    pub fn commit(&self) -> Result<u64> {
        self.ensure_open()?;
        self.flush()?;
        self.commit_internal()
    }

    fn commit_internal(&self) -> Result<u64> {
        let mut state = self.shared.state.lock();

        let generation = self.next_commit_gen.fetch_add(1, Ordering::SeqCst);
        let point = CommitPoint::new(generation, state.segments.clone());
        commit::write_commit(&*self.shared.storage, &point)?;

        self.shared.deleter.inc_ref(point.files());
        state.commits.push(point);
        self.prune_commits(&mut state);

        self.shared.stats.lock().commit_count += 1;
        Ok(generation)
    }

    /// Evaluate the deletion policy and release files of dropped commits.
    fn prune_commits(&self, state: &mut SegmentState) {
        let retained: AHashSet<u64> = self
            .deletion_policy
            .select_retained(&state.commits)
            .into_iter()
            .collect();

        let commits = std::mem::take(&mut state.commits);
        for point in commits {
            if retained.contains(&point.generation) {
                state.commits.push(point);
            } else {
                self.shared.deleter.dec_ref(point.files());
            }
        }
        self.shared.deleter.retry_pending();
    }

    /// Open a point-in-time composite reader over the current segment set.
    ///
    /// The reader holds a lease on its files: segments merged away later
    /// stay readable (and on storage) until the reader is dropped.
    pub fn open_reader(&self) -> Result<CompositeReader> {
        self.ensure_open()?;

        let mut state = self.shared.state.lock();
        let metas = state.segments.clone();

        let mut readers = Vec::with_capacity(metas.len());
        for meta in &metas {
            readers.push(self.shared.cached_reader(&mut state, meta)?);
        }

        let files: Vec<String> = metas.iter().flat_map(|m| m.files()).collect();
        let lease = ReaderLease::acquire(Arc::clone(&self.shared.deleter), files);
        drop(state);

        CompositeReader::new(readers, Some(lease))
    }

    /// Flush, wait for merges, commit, and shut the writer down.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        self.flush_internal()?;
        self.scheduler.wait_for_idle();
        self.commit_internal()?;
        self.scheduler.close();
        self.closed.store(true, Ordering::Release);
        self.shared.deleter.retry_pending();
        Ok(())
    }

    /// Number of segments in the current (possibly uncommitted) list.
    pub fn segment_count(&self) -> usize {
        self.shared.state.lock().segments.len()
    }

    /// Names of the current segments in document order.
    pub fn segment_names(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .segments
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Live documents across the current segments (buffered docs excluded).
    pub fn num_docs(&self) -> u64 {
        self.shared
            .state
            .lock()
            .segments
            .iter()
            .map(|s| s.live_doc_count() as u64)
            .sum()
    }

    /// Document slots across the current segments, deleted included.
    pub fn max_doc(&self) -> u64 {
        self.shared
            .state
            .lock()
            .segments
            .iter()
            .map(|s| s.max_doc as u64)
            .sum()
    }

    /// Number of documents waiting in the current buffer generation.
    pub fn buffered_docs(&self) -> usize {
        self.buffer.lock().docs.len()
    }

    /// Generation of the current buffer.
    pub fn buffer_generation(&self) -> u64 {
        self.buffer.lock().generation
    }

    /// Snapshot of the writer's counters.
    pub fn stats(&self) -> WriterStats {
        self.shared.stats.lock().clone()
    }

    /// Message of the most recent failed merge, if any.
    pub fn last_merge_error(&self) -> Option<String> {
        self.shared.state.lock().last_merge_error.clone()
    }

    /// The commit generations currently retained, ascending.
    pub fn retained_commits(&self) -> Vec<u64> {
        self.shared
            .state
            .lock()
            .commits
            .iter()
            .map(|c| c.generation)
            .collect()
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.close();
        }
    }
}

/// Publish (or discard) the result of a merge execution under the state
/// lock: on success the inputs are spliced out and replaced by the merged
/// segment at the position of the first input, with any deletes that landed
/// on the inputs while the merge ran carried into the new segment.
fn apply_merge_result(
    shared: &Arc<WriterShared>,
    input_names: &[String],
    inputs: &[Arc<SegmentReader>],
    result: Result<MergeOutput>,
) {
    let mut state = shared.state.lock();
    for name in input_names {
        state.merging.remove(name);
    }

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            state.last_merge_error = Some(e.to_string());
            shared.stats.lock().failed_merges += 1;
            return;
        }
    };

    let Some(first) = state
        .segments
        .iter()
        .position(|s| input_names.contains(&s.name))
    else {
        // Inputs vanished (e.g. racing force-merge); drop the orphan output.
        cleanup_segment_files(&*shared.storage, &output.meta);
        return;
    };

    // Deletes applied to the inputs after the merge snapshot was taken must
    // not be lost: remap them through the doc maps onto the new segment.
    let carried = carry_over_deletes(shared, &state, inputs, &output);
    let mut meta = output.meta;
    match carried {
        Ok(Some((live, file))) => {
            shared.deleter.inc_ref([file]);
            meta.live_docs_gen = live.generation();
            meta.del_count = live.deleted_count();
        }
        Ok(None) => {}
        Err(e) => {
            state.last_merge_error = Some(e.to_string());
            shared.stats.lock().failed_merges += 1;
            cleanup_segment_files(&*shared.storage, &meta);
            return;
        }
    }

    let removed: Vec<SegmentMeta> = state
        .segments
        .iter()
        .filter(|s| input_names.contains(&s.name))
        .cloned()
        .collect();
    state.segments.retain(|s| !input_names.contains(&s.name));
    state.segments.insert(first, meta.clone());

    shared.deleter.inc_ref(meta.files());
    for old in &removed {
        shared.deleter.dec_ref(old.files());
    }
    shared.prune_reader_cache(&mut state);
    state.last_merge_error = None;
    shared.stats.lock().merge_count += 1;
}

/// Compute and persist the live-docs bitmap of a merged segment covering
/// deletes that hit the inputs during the merge. Returns the bitmap and its
/// file name, or `None` when no delete needs carrying.
fn carry_over_deletes(
    shared: &Arc<WriterShared>,
    state: &SegmentState,
    inputs: &[Arc<SegmentReader>],
    output: &MergeOutput,
) -> Result<Option<(LiveDocs, String)>> {
    let mut doomed: Vec<u32> = Vec::new();

    for (reader, map) in inputs.iter().zip(&output.doc_maps) {
        let Some(current) = state.segments.iter().find(|s| s.name == reader.name()) else {
            continue;
        };
        if current.live_docs_gen == reader.meta().live_docs_gen {
            continue;
        }

        let current_live = match current.live_docs_file_name() {
            Some(file) => LiveDocs::read(&*shared.storage, &file, current.max_doc)?,
            None => LiveDocs::all_live(current.max_doc),
        };
        for doc in 0..reader.max_doc() {
            if let Some(new_id) = map[doc as usize]
                && !current_live.is_live(doc)
            {
                doomed.push(new_id);
            }
        }
    }

    if doomed.is_empty() {
        return Ok(None);
    }

    let mut live = LiveDocs::all_live(output.meta.max_doc).next_generation();
    for doc in doomed {
        live.delete(doc)?;
    }
    let file = live_docs_file(&output.meta.name, live.generation());
    live.write(&*shared.storage, &file)?;
    Ok(Some((live, file)))
}

fn cleanup_segment_files(storage: &dyn Storage, meta: &SegmentMeta) {
    for file in meta.files() {
        let _ = storage.delete_file(&file);
    }
}

/// Invert a buffer of documents into the four segment streams.
fn invert_documents(
    docs: &[Document],
) -> (FieldPostings, Vec<StoredDoc>, DocValuesData, TermVectorsData) {
    let mut postings = FieldPostings::new();
    let mut stored = Vec::with_capacity(docs.len());
    let mut doc_values = DocValuesData::new();
    let mut vectors = TermVectorsData::new();

    for (doc_id, doc) in docs.iter().enumerate() {
        let doc_id = doc_id as u32;
        let mut stored_doc = StoredDoc::default();
        // Merge duplicate field instances before emitting postings so each
        // (term, doc) pair yields exactly one posting.
        let mut inverted: BTreeMap<&str, BTreeMap<&[u8], Vec<u32>>> = BTreeMap::new();
        let mut vector_fields: AHashSet<&str> = AHashSet::new();

        for field in &doc.fields {
            if !field.terms.is_empty() {
                let by_term = inverted.entry(field.name.as_str()).or_default();
                for tp in &field.terms {
                    by_term.entry(tp.term.as_slice()).or_default().push(tp.position);
                }
                if field.term_vectors {
                    vector_fields.insert(field.name.as_str());
                }
            }
            if let Some(value) = &field.stored {
                stored_doc.fields.push((field.name.clone(), value.clone()));
            }
            if let Some(value) = &field.doc_value {
                doc_values.insert(&field.name, doc_id, value.clone());
            }
        }

        for (field, by_term) in inverted {
            let mut vector_entries = Vec::new();
            for (term, mut positions) in by_term {
                positions.sort_unstable();
                if vector_fields.contains(field) {
                    vector_entries.push(TermVectorEntry {
                        term: term.to_vec(),
                        positions: positions.clone(),
                    });
                }
                postings.push(
                    field,
                    term,
                    Posting {
                        doc_id,
                        freq: positions.len() as u32,
                        positions,
                    },
                );
            }
            if !vector_entries.is_empty() {
                vectors.insert(doc_id, field, vector_entries);
            }
        }

        stored.push(stored_doc);
    }

    (postings, stored, doc_values, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::deletion_policy::KeepAll;
    use crate::index::merge_policy::NoMergePolicy;
    use crate::index::merge_scheduler::SerialMergeScheduler;
    use crate::index::document::{FieldData, StoredValue, TermPosition};
    use crate::storage::MemoryStorage;

    fn doc(id: u32, terms: &[&str]) -> Document {
        let positions = terms
            .iter()
            .enumerate()
            .map(|(pos, term)| TermPosition::new(term.as_bytes().to_vec(), pos as u32))
            .collect();
        Document::new()
            .with_field(FieldData::indexed("body", positions))
            .with_field(FieldData::stored_only(
                "id",
                StoredValue::Text(id.to_string()),
            ))
    }

    fn open_writer(storage: Arc<dyn Storage>) -> IndexWriter {
        IndexWriter::with_components(
            storage,
            IndexConfig::default(),
            Arc::new(NoMergePolicy),
            Arc::new(SerialMergeScheduler::new()),
            Arc::new(KeepAll),
        )
        .unwrap()
    }

    #[test]
    fn test_add_flush_read() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        writer.add_document(doc(0, &["hello", "world"])).unwrap();
        writer.add_document(doc(1, &["hello"])).unwrap();
        assert_eq!(writer.buffered_docs(), 2);
        assert_eq!(writer.segment_count(), 0);

        let meta = writer.flush().unwrap().unwrap();
        assert_eq!(meta.max_doc, 2);
        assert_eq!(writer.buffered_docs(), 0);
        assert_eq!(writer.segment_count(), 1);
        assert_eq!(writer.num_docs(), 2);

        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.num_docs(), 2);
        assert_eq!(reader.doc_freq("body", b"hello"), 2);
        assert_eq!(reader.doc_freq("body", b"world"), 1);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        assert!(writer.flush().unwrap().is_none());
        assert_eq!(writer.segment_count(), 0);
    }

    #[test]
    fn test_buffer_threshold_triggers_flush() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let config = IndexConfig {
            max_buffered_docs: 3,
            ..Default::default()
        };
        let writer = IndexWriter::with_components(
            storage,
            config,
            Arc::new(NoMergePolicy),
            Arc::new(SerialMergeScheduler::new()),
            Arc::new(KeepAll),
        )
        .unwrap();

        for i in 0..7 {
            writer.add_document(doc(i, &["t"])).unwrap();
        }

        assert_eq!(writer.segment_count(), 2);
        assert_eq!(writer.buffered_docs(), 1);
    }

    #[test]
    fn test_buffer_generation_advances_on_flush() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        assert_eq!(writer.buffer_generation(), 0);
        writer.add_document(doc(0, &["a"])).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.buffer_generation(), 1);
    }

    #[test]
    fn test_delete_by_term_in_buffer() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        writer.add_document(doc(0, &["keep"])).unwrap();
        writer.add_document(doc(1, &["drop"])).unwrap();
        writer
            .delete_documents(DeleteSelector::term("body", b"drop".to_vec()))
            .unwrap();
        // Added after the delete arrived: must survive.
        writer.add_document(doc(2, &["drop"])).unwrap();

        let meta = writer.flush().unwrap().unwrap();
        assert_eq!(meta.max_doc, 3);
        assert_eq!(meta.del_count, 1);

        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.num_docs(), 2);
        assert_eq!(reader.doc_freq("body", b"drop"), 1);
    }

    #[test]
    fn test_delete_by_term_in_prior_segment() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        writer.add_document(doc(0, &["alpha"])).unwrap();
        writer.add_document(doc(1, &["beta"])).unwrap();
        writer.flush().unwrap();

        writer
            .delete_documents(DeleteSelector::term("body", b"alpha".to_vec()))
            .unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.num_docs(), 1);
        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.doc_freq("body", b"alpha"), 0);
        assert_eq!(reader.doc_freq("body", b"beta"), 1);
    }

    #[test]
    fn test_delete_by_global_id() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        writer.add_document(doc(0, &["a"])).unwrap();
        writer.add_document(doc(1, &["b"])).unwrap();
        writer.flush().unwrap();

        writer.delete_documents(DeleteSelector::GlobalId(1)).unwrap();
        writer.flush().unwrap();

        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.num_docs(), 1);
        assert!(reader.is_live(0));
        assert!(!reader.is_live(1));
    }

    #[test]
    fn test_commit_retention_keep_only_last() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = IndexWriter::with_components(
            Arc::clone(&storage),
            IndexConfig::default(),
            Arc::new(NoMergePolicy),
            Arc::new(SerialMergeScheduler::new()),
            Arc::new(KeepOnlyLast),
        )
        .unwrap();

        for i in 0..3 {
            writer.add_document(doc(i, &["t"])).unwrap();
            writer.commit().unwrap();
        }

        assert_eq!(writer.retained_commits().len(), 1);
        let commits = commit::list_commits(&*storage).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].generation, 3);
    }

    #[test]
    fn test_commit_retention_keep_all() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(Arc::clone(&storage));

        for i in 0..3 {
            writer.add_document(doc(i, &["t"])).unwrap();
            writer.commit().unwrap();
        }

        assert_eq!(commit::list_commits(&*storage).unwrap().len(), 3);
    }

    #[test]
    fn test_reopen_recovers_latest_commit() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        {
            let writer = open_writer(Arc::clone(&storage));
            writer.add_document(doc(0, &["persisted"])).unwrap();
            writer.commit().unwrap();
            writer.close().unwrap();
        }

        let writer = open_writer(Arc::clone(&storage));
        assert_eq!(writer.num_docs(), 1);
        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.doc_freq("body", b"persisted"), 1);
    }

    #[test]
    fn test_closed_writer_rejects_operations() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        writer.close().unwrap();
        assert!(writer.add_document(doc(0, &["x"])).is_err());
        assert!(writer.flush().is_err());
        assert!(writer.commit().is_err());
    }

    #[test]
    fn test_force_merge_to_one_segment() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        for i in 0..4 {
            writer.add_document(doc(i, &["t"])).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(writer.segment_count(), 4);

        writer.force_merge(1).unwrap();
        assert_eq!(writer.segment_count(), 1);
        assert_eq!(writer.num_docs(), 4);

        // Idempotent: a second call changes nothing.
        let names = writer.segment_names();
        writer.force_merge(1).unwrap();
        assert_eq!(writer.segment_names(), names);

        let reader = writer.open_reader().unwrap();
        assert_eq!(reader.doc_freq("body", b"t"), 4);
    }

    #[test]
    fn test_invert_documents_merges_duplicate_terms() {
        let document = Document::new().with_field(FieldData::indexed(
            "body",
            vec![
                TermPosition::new("dup", 0),
                TermPosition::new("dup", 3),
                TermPosition::new("other", 1),
            ],
        ));

        let (postings, stored, _, _) = invert_documents(std::slice::from_ref(&document));

        let list = postings.term("body", b"dup").unwrap();
        assert_eq!(list.doc_count(), 1);
        assert_eq!(list.postings[0].freq, 2);
        assert_eq!(list.postings[0].positions, vec![0, 3]);
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_stats_track_activity() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let writer = open_writer(storage);

        writer.add_document(doc(0, &["a"])).unwrap();
        writer
            .delete_documents(DeleteSelector::term("body", b"zzz".to_vec()))
            .unwrap();
        writer.commit().unwrap();

        let stats = writer.stats();
        assert_eq!(stats.docs_added, 1);
        assert_eq!(stats.deletes_buffered, 1);
        assert_eq!(stats.flush_count, 1);
        assert_eq!(stats.commit_count, 1);
    }
}

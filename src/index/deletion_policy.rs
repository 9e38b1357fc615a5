//! Commit retention policies and file reference counting.
//!
//! A [`DeletionPolicy`] decides which historical commit points stay alive.
//! It is consulted twice: when the writer opens (over the commits found on
//! storage) and after every successful commit (over the updated history,
//! newest last). Policies are stateless values, not singletons.
//!
//! Physical deletion is decoupled from the policy decision by a per-file
//! reference count: a commit dropped by the policy while an open reader
//! still references its segments keeps its files on storage until the last
//! reference is released.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::index::commit::CommitPoint;
use crate::storage::traits::Storage;

/// Decides which commits remain retrievable.
pub trait DeletionPolicy: Send + Sync + std::fmt::Debug {
    /// Given the commit history in ascending generation order (newest last),
    /// return the generations that must be retained.
    fn select_retained(&self, commits: &[CommitPoint]) -> Vec<u64>;
}

/// Retain only the newest commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepOnlyLast;

impl DeletionPolicy for KeepOnlyLast {
    fn select_retained(&self, commits: &[CommitPoint]) -> Vec<u64> {
        commits
            .last()
            .map(|commit| vec![commit.generation])
            .unwrap_or_default()
    }
}

/// Never delete any commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl DeletionPolicy for KeepAll {
    fn select_retained(&self, commits: &[CommitPoint]) -> Vec<u64> {
        commits.iter().map(|commit| commit.generation).collect()
    }
}

/// Per-file reference counts with deletion at zero.
///
/// References are held by the writer's current segment list, by each
/// retained commit, and by every open composite reader. Files whose count
/// reaches zero are deleted from storage; a failed delete (file still open
/// on some platforms) is kept on a retry list and attempted again later.
#[derive(Debug)]
pub struct FileDeleter {
    storage: Arc<dyn Storage>,
    inner: Mutex<DeleterInner>,
}

#[derive(Debug, Default)]
struct DeleterInner {
    counts: AHashMap<String, usize>,
    retry: AHashSet<String>,
}

impl FileDeleter {
    /// Create a deleter over the given storage.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        FileDeleter {
            storage,
            inner: Mutex::new(DeleterInner::default()),
        }
    }

    /// Increment the reference count of each file.
    pub fn inc_ref<I, S>(&self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        for file in files {
            *inner.counts.entry(file.into()).or_insert(0) += 1;
        }
    }

    /// Decrement the reference count of each file, deleting any that drop
    /// to zero. Unknown files are ignored.
    pub fn dec_ref<I, S>(&self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut doomed = Vec::new();
        {
            let mut inner = self.inner.lock();
            for file in files {
                let name = file.as_ref();
                if let Some(count) = inner.counts.get_mut(name) {
                    *count -= 1;
                    if *count == 0 {
                        inner.counts.remove(name);
                        doomed.push(name.to_string());
                    }
                }
            }
        }
        self.delete_files(doomed);
    }

    /// Current reference count of a file.
    pub fn ref_count(&self, file: &str) -> usize {
        self.inner.lock().counts.get(file).copied().unwrap_or(0)
    }

    /// Attempt deletions that failed earlier.
    pub fn retry_pending(&self) {
        let pending: Vec<String> = self.inner.lock().retry.drain().collect();
        self.delete_files(pending);
    }

    /// Number of files awaiting a deletion retry.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().retry.len()
    }

    fn delete_files(&self, files: Vec<String>) {
        for file in files {
            if self.storage.delete_file(&file).is_err() {
                self.inner.lock().retry.insert(file);
            }
        }
    }
}

/// A reader's hold on the files of its snapshot.
///
/// Dropping the lease releases the references; files belonging to commits
/// the policy has already dropped are then physically deleted.
#[derive(Debug)]
pub struct ReaderLease {
    deleter: Arc<FileDeleter>,
    files: Vec<String>,
}

impl ReaderLease {
    /// Acquire a lease over the given files.
    pub fn acquire(deleter: Arc<FileDeleter>, files: Vec<String>) -> Self {
        deleter.inc_ref(files.iter().cloned());
        ReaderLease { deleter, files }
    }

    /// The files pinned by this lease.
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        self.deleter.dec_ref(self.files.iter());
        self.deleter.retry_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentMeta;
    use crate::storage::MemoryStorage;
    use crate::storage::traits::StorageOutput;

    fn commit(generation: u64) -> CommitPoint {
        CommitPoint::new(generation, vec![])
    }

    #[test]
    fn test_keep_only_last() {
        let policy = KeepOnlyLast;

        assert!(policy.select_retained(&[]).is_empty());
        assert_eq!(
            policy.select_retained(&[commit(1), commit(2), commit(3)]),
            vec![3]
        );
    }

    #[test]
    fn test_keep_all() {
        let policy = KeepAll;

        assert_eq!(
            policy.select_retained(&[commit(1), commit(2)]),
            vec![1, 2]
        );
    }

    fn touch(storage: &MemoryStorage, name: &str) {
        let mut output = crate::storage::traits::Storage::create_output(storage, name).unwrap();
        std::io::Write::write_all(&mut output, b"x").unwrap();
        output.close().unwrap();
    }

    #[test]
    fn test_file_deleter_deletes_at_zero() {
        let storage = Arc::new(MemoryStorage::new_default());
        let deleter = FileDeleter::new(storage.clone() as Arc<dyn Storage>);

        touch(&storage, "a.pst");
        deleter.inc_ref(["a.pst"]);
        deleter.inc_ref(["a.pst"]);
        assert_eq!(deleter.ref_count("a.pst"), 2);

        deleter.dec_ref(["a.pst"]);
        assert!(crate::storage::traits::Storage::file_exists(&*storage, "a.pst"));

        deleter.dec_ref(["a.pst"]);
        assert!(!crate::storage::traits::Storage::file_exists(&*storage, "a.pst"));
        assert_eq!(deleter.ref_count("a.pst"), 0);
    }

    #[test]
    fn test_reader_lease_defers_deletion() {
        let storage = Arc::new(MemoryStorage::new_default());
        let deleter = Arc::new(FileDeleter::new(storage.clone() as Arc<dyn Storage>));

        touch(&storage, "seg.pst");
        deleter.inc_ref(["seg.pst"]);

        let lease = ReaderLease::acquire(deleter.clone(), vec!["seg.pst".to_string()]);

        // The writer drops its own reference (commit pruned), but the reader
        // still holds the file.
        deleter.dec_ref(["seg.pst"]);
        assert!(crate::storage::traits::Storage::file_exists(&*storage, "seg.pst"));

        drop(lease);
        assert!(!crate::storage::traits::Storage::file_exists(&*storage, "seg.pst"));
    }

    #[test]
    fn test_commit_files_cover_segments() {
        let meta = SegmentMeta::new("seg_00000001".to_string(), 4, "binary-v1".to_string(), 0);
        let point = CommitPoint::new(9, vec![meta]);

        let files = point.files();
        assert!(files.contains(&"commit_0000000009".to_string()));
        assert!(files.contains(&"seg_00000001.pst".to_string()));
        assert_eq!(files.len(), 5);
    }
}

//! Commit points: durable snapshots of the segment set.
//!
//! A commit is a numbered descriptor file listing the segments that make up
//! the index at one point in time. Descriptors are written to a temporary
//! name and renamed into place, never overwritten; recovery after a crash is
//! reading the highest generation that parses.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, XystonError};
use crate::segment::SegmentMeta;
use crate::storage::traits::{Storage, StorageOutput};

/// Prefix of commit descriptor file names.
pub const COMMIT_PREFIX: &str = "commit_";

/// A durable snapshot of the index: an ordered segment set plus generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitPoint {
    /// Monotonically increasing commit generation.
    pub generation: u64,

    /// The segments of this snapshot, in document order.
    pub segments: Vec<SegmentMeta>,

    /// Seconds since epoch when the commit was written.
    pub created_at: u64,
}

impl CommitPoint {
    /// Create a commit point over the given segments.
    pub fn new(generation: u64, segments: Vec<SegmentMeta>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        CommitPoint {
            generation,
            segments,
            created_at,
        }
    }

    /// File name of this commit's descriptor.
    pub fn file_name(&self) -> String {
        commit_file_name(self.generation)
    }

    /// All files this commit references: descriptor plus segment files.
    pub fn files(&self) -> Vec<String> {
        let mut files = vec![self.file_name()];
        for segment in &self.segments {
            files.extend(segment.files());
        }
        files
    }

    /// Total document slots across the commit's segments.
    pub fn total_max_doc(&self) -> u64 {
        self.segments.iter().map(|s| s.max_doc as u64).sum()
    }

    /// Total live documents across the commit's segments.
    pub fn total_live_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.live_doc_count() as u64).sum()
    }
}

/// File name of the commit descriptor for a generation.
pub fn commit_file_name(generation: u64) -> String {
    format!("{COMMIT_PREFIX}{generation:010}")
}

/// Parse a commit generation out of a descriptor file name.
pub fn parse_commit_generation(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(COMMIT_PREFIX)?;
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Durably publish a commit descriptor.
///
/// The descriptor is serialized to a temporary file and renamed into place,
/// so a crash mid-write never leaves a half-written descriptor under a
/// commit name.
pub fn write_commit(storage: &dyn Storage, commit: &CommitPoint) -> Result<()> {
    let data = serde_json::to_vec_pretty(commit)?;

    let (temp_name, mut output) = storage.create_temp_output(COMMIT_PREFIX)?;
    std::io::Write::write_all(&mut output, &data)?;
    output.flush_and_sync()?;
    output.close()?;

    storage.rename_file(&temp_name, &commit.file_name())?;
    storage.sync()?;
    Ok(())
}

/// Read one commit descriptor.
pub fn read_commit(storage: &dyn Storage, name: &str) -> Result<CommitPoint> {
    let mut input = storage.open_input(name)?;
    let mut data = Vec::new();
    std::io::Read::read_to_end(&mut input, &mut data)?;

    serde_json::from_slice(&data)
        .map_err(|e| XystonError::storage(format!("Failed to parse commit '{name}': {e}")))
}

/// List all readable commits in ascending generation order.
///
/// Descriptor files that fail to parse are skipped: they are either debris
/// from an interrupted write or external corruption, and recovery wants the
/// newest snapshot that is fully readable.
pub fn list_commits(storage: &dyn Storage) -> Result<Vec<CommitPoint>> {
    let mut generations: Vec<(u64, String)> = storage
        .list_files()?
        .into_iter()
        .filter_map(|name| parse_commit_generation(&name).map(|generation| (generation, name)))
        .collect();
    generations.sort_by_key(|(generation, _)| *generation);

    let mut commits = Vec::with_capacity(generations.len());
    for (_, name) in generations {
        if let Ok(commit) = read_commit(storage, &name) {
            commits.push(commit);
        }
    }
    Ok(commits)
}

/// Load the newest fully readable commit, if any.
pub fn load_latest_commit(storage: &dyn Storage) -> Result<Option<CommitPoint>> {
    Ok(list_commits(storage)?.pop())
}

/// Verify that every file a commit references exists on storage.
pub fn verify_commit(storage: &dyn Storage, commit: &CommitPoint) -> Result<()> {
    for segment in &commit.segments {
        for file in segment.files() {
            if !storage.file_exists(&file) {
                return Err(XystonError::CommitInconsistent {
                    generation: commit.generation,
                    missing: file,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn segment(name: &str, max_doc: u32) -> SegmentMeta {
        SegmentMeta::new(name.to_string(), max_doc, "binary-v1".to_string(), 0)
    }

    #[test]
    fn test_commit_file_names() {
        assert_eq!(commit_file_name(1), "commit_0000000001");
        assert_eq!(parse_commit_generation("commit_0000000042"), Some(42));
        assert_eq!(parse_commit_generation("commit_abc"), None);
        assert_eq!(parse_commit_generation("seg_00000001.pst"), None);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let storage = MemoryStorage::new_default();

        let commit = CommitPoint::new(3, vec![segment("seg_00000001", 10)]);
        write_commit(&storage, &commit).unwrap();

        let loaded = read_commit(&storage, "commit_0000000003").unwrap();
        assert_eq!(loaded, commit);
        assert_eq!(loaded.total_max_doc(), 10);
    }

    #[test]
    fn test_list_commits_sorted_and_latest() {
        let storage = MemoryStorage::new_default();

        for generation in [2u64, 1, 3] {
            let commit = CommitPoint::new(generation, vec![]);
            write_commit(&storage, &commit).unwrap();
        }

        let commits = list_commits(&storage).unwrap();
        let generations: Vec<u64> = commits.iter().map(|c| c.generation).collect();
        assert_eq!(generations, vec![1, 2, 3]);

        let latest = load_latest_commit(&storage).unwrap().unwrap();
        assert_eq!(latest.generation, 3);
    }

    #[test]
    fn test_unparseable_descriptor_skipped() {
        let storage = MemoryStorage::new_default();

        write_commit(&storage, &CommitPoint::new(1, vec![])).unwrap();

        // A garbage file under a newer commit name must not win recovery.
        let mut output = storage.create_output("commit_0000000002").unwrap();
        std::io::Write::write_all(&mut output, b"{ not json").unwrap();
        output.close().unwrap();

        let latest = load_latest_commit(&storage).unwrap().unwrap();
        assert_eq!(latest.generation, 1);
    }

    #[test]
    fn test_verify_commit_missing_segment() {
        let storage = MemoryStorage::new_default();

        let commit = CommitPoint::new(1, vec![segment("seg_00000001", 5)]);
        let err = verify_commit(&storage, &commit).unwrap_err();
        match err {
            XystonError::CommitInconsistent { generation, missing } => {
                assert_eq!(generation, 1);
                assert!(missing.starts_with("seg_00000001"));
            }
            other => panic!("Expected CommitInconsistent, got {other:?}"),
        }
    }

    #[test]
    fn test_no_temp_debris_counts_as_commit() {
        let storage = MemoryStorage::new_default();

        write_commit(&storage, &CommitPoint::new(7, vec![])).unwrap();

        let files = storage.list_files().unwrap();
        assert_eq!(files, vec!["commit_0000000007"]);
    }
}

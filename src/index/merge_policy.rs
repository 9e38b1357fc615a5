//! Merge policies: pure selection of segment sets to consolidate.
//!
//! A policy looks at the current segment list and a trigger reason and
//! returns zero or more merge specifications. Returning nothing is a
//! legitimate steady state. Execution is the scheduler's job; a policy
//! never touches storage.

use crate::segment::SegmentMeta;

/// Why merge selection is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTrigger {
    /// An explicit caller request (force-merge).
    Explicit,

    /// The segment count crossed the configured ceiling.
    SegmentCount,

    /// Routine selection after a flush.
    Background,
}

/// What a policy knows about one segment.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    /// Segment name.
    pub name: String,

    /// Document slots, deleted included.
    pub max_doc: u32,

    /// Live documents.
    pub live_docs: u32,

    /// Total bytes of the segment's stream files.
    pub size_bytes: u64,
}

impl SegmentSnapshot {
    /// Build a snapshot from segment metadata.
    pub fn from_meta(meta: &SegmentMeta) -> Self {
        SegmentSnapshot {
            name: meta.name.clone(),
            max_doc: meta.max_doc,
            live_docs: meta.live_doc_count(),
            size_bytes: meta.size_bytes,
        }
    }

    /// Bytes expected to survive a rewrite, discounting deleted documents.
    pub fn live_bytes(&self) -> u64 {
        if self.max_doc == 0 {
            return 0;
        }
        (self.size_bytes as f64 * (self.live_docs as f64 / self.max_doc as f64)) as u64
    }
}

/// One planned consolidation.
#[derive(Debug, Clone)]
pub struct MergeSpec {
    /// Names of the input segments.
    pub segments: Vec<String>,

    /// Estimated output size in bytes.
    pub estimated_bytes: u64,

    /// Live documents covered by the inputs.
    pub live_docs: u64,

    /// Why this merge was selected.
    pub trigger: MergeTrigger,
}

impl MergeSpec {
    /// Live documents gained per estimated byte of I/O; the tie-break
    /// metric (most documents for least rewrite cost).
    pub fn docs_per_byte(&self) -> f64 {
        if self.estimated_bytes == 0 {
            return f64::INFINITY;
        }
        self.live_docs as f64 / self.estimated_bytes as f64
    }
}

/// Selects segment sets to merge.
pub trait MergePolicy: Send + Sync + std::fmt::Debug {
    /// Select merges over segments that are not already being merged.
    fn select_merges(&self, segments: &[SegmentSnapshot], trigger: MergeTrigger) -> Vec<MergeSpec>;
}

/// Tiered merge policy: geometric size tiers, merge within a crowded tier.
///
/// Segments are bucketed by size class (each tier covers 4x the previous
/// one). When a tier holds more than `segments_per_tier` segments, the
/// smallest ones are merged, bounding both the live segment count and the
/// bytes rewritten per unit of newly indexed data.
#[derive(Debug, Clone)]
pub struct TieredMergePolicy {
    /// Segments tolerated per tier before a merge is selected.
    pub segments_per_tier: usize,

    /// Maximum number of segments merged at once.
    pub max_merge_at_once: usize,

    /// Ceiling for a merged segment's estimated size.
    pub max_merged_bytes: u64,

    /// Sizes below this are treated as one floor tier.
    pub floor_bytes: u64,

    /// Deletion ratio above which a segment is merged regardless of tier.
    pub deletion_threshold: f64,
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        TieredMergePolicy {
            segments_per_tier: 4,
            max_merge_at_once: 4,
            max_merged_bytes: 512 * 1024 * 1024,
            floor_bytes: 64 * 1024,
            deletion_threshold: 0.25,
        }
    }
}

impl TieredMergePolicy {
    /// Size tier of a segment: 0 for anything at or below the floor, then
    /// one tier per 4x size step.
    fn tier_of(&self, size_bytes: u64) -> u8 {
        let mut tier = 0u8;
        let mut cap = self.floor_bytes.max(1);
        while size_bytes > cap && tier < 32 {
            cap = cap.saturating_mul(4);
            tier += 1;
        }
        tier
    }

    fn spec_from(&self, inputs: &[&SegmentSnapshot], trigger: MergeTrigger) -> MergeSpec {
        MergeSpec {
            segments: inputs.iter().map(|s| s.name.clone()).collect(),
            estimated_bytes: inputs.iter().map(|s| s.live_bytes()).sum(),
            live_docs: inputs.iter().map(|s| s.live_docs as u64).sum(),
            trigger,
        }
    }
}

impl MergePolicy for TieredMergePolicy {
    fn select_merges(&self, segments: &[SegmentSnapshot], trigger: MergeTrigger) -> Vec<MergeSpec> {
        let mut candidates = Vec::new();

        // Tier crowding.
        let mut tiers: Vec<Vec<&SegmentSnapshot>> = vec![Vec::new(); 33];
        for segment in segments {
            tiers[self.tier_of(segment.size_bytes) as usize].push(segment);
        }

        for tier_segments in tiers.iter_mut() {
            if tier_segments.len() <= self.segments_per_tier {
                continue;
            }

            tier_segments.sort_by_key(|s| s.size_bytes);
            let mut inputs: Vec<&SegmentSnapshot> = Vec::new();
            let mut total = 0u64;
            for &segment in tier_segments.iter() {
                if inputs.len() >= self.max_merge_at_once {
                    break;
                }
                if total + segment.live_bytes() > self.max_merged_bytes && !inputs.is_empty() {
                    break;
                }
                total += segment.live_bytes();
                inputs.push(segment);
            }

            if inputs.len() >= 2 {
                candidates.push(self.spec_from(&inputs, trigger));
            }
        }

        // Deletion-heavy segments reclaim space even in quiet tiers.
        let deletion_heavy: Vec<&SegmentSnapshot> = segments
            .iter()
            .filter(|s| {
                s.max_doc > 0
                    && (s.max_doc - s.live_docs) as f64 / s.max_doc as f64 > self.deletion_threshold
            })
            .take(self.max_merge_at_once)
            .collect();

        if deletion_heavy.len() >= 2 {
            let already: Vec<&str> = candidates
                .iter()
                .flat_map(|c| c.segments.iter().map(|s| s.as_str()))
                .collect();
            if deletion_heavy
                .iter()
                .all(|s| !already.contains(&s.name.as_str()))
            {
                candidates.push(self.spec_from(&deletion_heavy, trigger));
            }
        }

        // Most documents for the least I/O first.
        candidates.sort_by(|a, b| {
            b.docs_per_byte()
                .partial_cmp(&a.docs_per_byte())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        candidates
    }
}

/// Policy that never merges. Useful for tests and read-mostly indexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merges(&self, _segments: &[SegmentSnapshot], _trigger: MergeTrigger) -> Vec<MergeSpec> {
        Vec::new()
    }
}

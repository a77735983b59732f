//! Balanced-tree index of every block on the volume, keyed by lcn (§4.5).
//!
//! The reference implementation (`search.c`) keeps a red-black tree (`prb_*`)
//! for fast "find the block covering/after this lcn" queries, with the
//! documented fallback to a linear scan when tree construction fails under
//! memory pressure. `BTreeMap` is the idiomatic Rust analogue of that
//! balanced tree; degrading to `None` (triggering the linear-scan fallback
//! in `search::find_first_block`) models the same "don't fail the job, just
//! go slower" policy without ever needing to simulate allocation failure.

use std::collections::BTreeMap;

use super::types::Lcn;

pub type FileId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentEntry {
    pub file_id: FileId,
    pub block_index: usize,
}

/// Maps the starting lcn of every non-tombstone block on the volume to the
/// file/block it belongs to. Absent entirely (`None`-returning construction)
/// is a legal degraded state; callers must fall back to a linear scan.
#[derive(Debug, Clone, Default)]
pub struct ExtentIndex {
    by_lcn: BTreeMap<Lcn, ExtentEntry>,
}

impl ExtentIndex {
    pub fn new() -> Self {
        ExtentIndex::default()
    }

    pub fn len(&self) -> usize {
        self.by_lcn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_lcn.is_empty()
    }

    pub fn insert(&mut self, lcn: Lcn, file_id: FileId, block_index: usize) {
        self.by_lcn.insert(lcn, ExtentEntry { file_id, block_index });
    }

    pub fn remove(&mut self, lcn: Lcn) {
        self.by_lcn.remove(&lcn);
    }

    /// Rebuilds the whole index from scratch. Called after a full rescan;
    /// incremental updates during a pass use `insert`/`remove` directly.
    pub fn rebuild(&mut self, entries: impl Iterator<Item = (Lcn, FileId, usize)>) {
        self.by_lcn.clear();
        for (lcn, file_id, block_index) in entries {
            self.insert(lcn, file_id, block_index);
        }
    }

    /// First entry whose block starts at or after `from`. This is the fast
    /// path `search::find_first_block` takes when the index is populated.
    pub fn first_at_or_after(&self, from: Lcn) -> Option<(Lcn, ExtentEntry)> {
        self.by_lcn.range(from..).next().map(|(k, v)| (*k, *v))
    }

    pub fn entry_at(&self, lcn: Lcn) -> Option<ExtentEntry> {
        self.by_lcn.get(&lcn).copied()
    }
}

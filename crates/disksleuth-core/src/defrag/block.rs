//! Extents (`Block`) and the ordered `BlockMap` of a single file.

use super::types::{ClusterCount, Lcn, Vcn};

/// A contiguous `(vcn, lcn, length)` run belonging to exactly one file.
///
/// `length == 0` marks a *tombstone*: a logically excluded slice, used by
/// [`BlockMap::subtract_range`] to remember "do not re-attempt this VCN
/// range this pass" without physically removing the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub vcn: Vcn,
    pub lcn: Lcn,
    pub length: ClusterCount,
}

impl Block {
    pub fn new(vcn: Vcn, lcn: Lcn, length: ClusterCount) -> Self {
        Block { vcn, lcn, length }
    }

    pub fn is_excluded(&self) -> bool {
        self.length.is_zero()
    }

    pub fn vcn_end(&self) -> Vcn {
        self.vcn.end(self.length)
    }

    pub fn lcn_end(&self) -> Lcn {
        self.lcn.end(self.length)
    }

    /// Whether `self` physically continues where `prev` leaves off, in both
    /// vcn- and lcn-space — the condition `optimize()` coalesces on.
    fn continues(prev: &Block, next: &Block) -> bool {
        prev.lcn_end() == next.lcn
            && prev.vcn_end() == next.vcn
            && !prev.is_excluded()
            && !next.is_excluded()
    }
}

/// The ordered list of extents of a file, sorted by `vcn`.
///
/// Invariant (checked by [`BlockMap::clusters`] callers, not enforced on
/// every mutation for performance): `Σ length == file.clusters`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMap {
    blocks: Vec<Block>,
}

impl BlockMap {
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.vcn);
        BlockMap { blocks }
    }

    pub fn empty() -> Self {
        BlockMap { blocks: Vec::new() }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn first(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Total cluster count across all blocks (tombstones contribute zero).
    pub fn clusters(&self) -> ClusterCount {
        self.blocks
            .iter()
            .fold(ClusterCount::ZERO, |acc, b| acc + b.length)
    }

    /// Number of maximal runs of physically-contiguous, non-tombstone
    /// blocks in vcn order. A resident/empty blockmap has zero fragments.
    pub fn fragments(&self) -> u32 {
        let mut count = 0u32;
        let mut prev: Option<&Block> = None;
        for b in &self.blocks {
            if b.is_excluded() {
                continue;
            }
            match prev {
                Some(p) if Block::continues(p, b) => {}
                _ => count += 1,
            }
            prev = Some(b);
        }
        count
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragments() > 1
    }

    /// Merges adjacent blocks where `lcn+length == next.lcn` and
    /// `vcn+length == next.vcn`. Tombstones are never merged away — they
    /// stay as exclusion markers until explicitly dropped.
    pub fn optimize(&mut self) {
        if self.blocks.len() < 2 {
            return;
        }
        let mut merged: Vec<Block> = Vec::with_capacity(self.blocks.len());
        for b in self.blocks.drain(..) {
            if let Some(last) = merged.last_mut() {
                if Block::continues(last, &b) {
                    last.length += b.length;
                    continue;
                }
            }
            merged.push(b);
        }
        self.blocks = merged;
    }

    /// *Subtract a range* splicing rule (§4.4): carves `[vcn, vcn+length)`
    /// out of the blockmap, shrinking or splitting overlapping blocks and
    /// leaving a zero-length tombstone wherever data used to be, so that
    /// VCN range is never retried this pass. Used for
    /// `UD_MOVE_FILE_CUT_OFF_MOVED_CLUSTERS`.
    pub fn subtract_range(&mut self, vcn: Vcn, length: ClusterCount) {
        if length.is_zero() {
            return;
        }
        let range_start = vcn.0;
        let range_end = vcn.0 + length.0;
        let mut result = Vec::with_capacity(self.blocks.len() + 2);

        for b in self.blocks.drain(..) {
            if b.is_excluded() {
                result.push(b);
                continue;
            }
            let b_start = b.vcn.0;
            let b_end = b.vcn.0 + b.length.0;
            if b_end <= range_start || b_start >= range_end {
                result.push(b);
                continue;
            }

            if b_start < range_start {
                let head_len = range_start - b_start;
                result.push(Block::new(
                    Vcn::new(b_start),
                    b.lcn,
                    ClusterCount::new(head_len),
                ));
            }

            let mid_start = b_start.max(range_start);
            let mid_end = b_end.min(range_end);
            let mid_lcn = Lcn::new(b.lcn.0 + (mid_start - b_start));
            result.push(Block::new(
                Vcn::new(mid_start),
                mid_lcn,
                ClusterCount::new(mid_end - mid_start),
            ));

            if b_end > range_end {
                let tail_start = range_end;
                let tail_len = b_end - tail_start;
                let tail_lcn = Lcn::new(b.lcn.0 + (tail_start - b_start));
                result.push(Block::new(
                    Vcn::new(tail_start),
                    tail_lcn,
                    ClusterCount::new(tail_len),
                ));
            }
        }

        result.sort_by_key(|b| b.vcn);
        self.blocks = result;
    }

    /// *Synthesize from input* splicing rule (§4.4 step 5 fallback): used
    /// when the post-move re-read failed so the engine cannot observe the
    /// real resulting layout. Assumes the requested `[vcn, vcn+length)`
    /// slice now lives contiguously at `target_lcn`, replaces that slice
    /// with a single concrete block (no tombstone — unlike
    /// [`subtract_range`](Self::subtract_range), this path records real
    /// data, not an exclusion), then coalesces.
    pub fn synthesize_from_input(&mut self, vcn: Vcn, length: ClusterCount, target_lcn: Lcn) {
        if length.is_zero() {
            return;
        }
        self.subtract_range(vcn, length);

        let range_start = vcn.0;
        let range_end = vcn.0 + length.0;
        self.blocks
            .retain(|b| !(b.is_excluded() && b.vcn.0 >= range_start && b.vcn.0 < range_end));

        self.blocks.push(Block::new(vcn, target_lcn, length));
        self.blocks.sort_by_key(|b| b.vcn);
        self.optimize();
    }

    /// Drops tombstones entirely. Not used by the move pipeline itself
    /// (which must preserve them across a single pass) but useful once a
    /// pass completes and `CurrentlyExcluded` state resets.
    pub fn compact(&mut self) {
        self.blocks.retain(|b| !b.is_excluded());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(vcn: u64, lcn: u64, len: u64) -> Block {
        Block::new(Vcn::new(vcn), Lcn::new(lcn), ClusterCount::new(len))
    }

    #[test]
    fn single_contiguous_block_has_one_fragment() {
        let bm = BlockMap::new(vec![b(0, 1000, 5)]);
        assert_eq!(bm.fragments(), 1);
        assert!(!bm.is_fragmented());
    }

    #[test]
    fn two_disjoint_blocks_are_two_fragments() {
        let bm = BlockMap::new(vec![b(2, 500, 3), b(0, 100, 2)]);
        assert_eq!(bm.fragments(), 2);
        assert!(bm.is_fragmented());
    }

    #[test]
    fn optimize_merges_physically_and_logically_adjacent_blocks() {
        let mut bm = BlockMap::new(vec![b(0, 1000, 5), b(5, 1005, 3)]);
        assert_eq!(bm.fragments(), 2);
        bm.optimize();
        assert_eq!(bm.blocks().len(), 1);
        assert_eq!(bm.fragments(), 1);
        assert_eq!(bm.clusters(), ClusterCount::new(8));
    }

    #[test]
    fn optimize_does_not_merge_when_lcn_gap_exists() {
        let mut bm = BlockMap::new(vec![b(0, 1000, 5), b(5, 2000, 3)]);
        bm.optimize();
        assert_eq!(bm.blocks().len(), 2);
    }

    #[test]
    fn optimize_is_idempotent() {
        let mut bm = BlockMap::new(vec![b(0, 1000, 5), b(5, 1005, 3), b(8, 9000, 1)]);
        bm.optimize();
        let once = bm.clone();
        bm.optimize();
        assert_eq!(bm, once);
    }

    #[test]
    fn subtract_range_middle_leaves_head_tombstone_tail() {
        let mut bm = BlockMap::new(vec![b(0, 100, 10)]);
        bm.subtract_range(Vcn::new(3), ClusterCount::new(4));
        let blocks = bm.blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], b(0, 100, 3));
        assert!(blocks[1].is_excluded());
        assert_eq!(blocks[1].vcn, Vcn::new(3));
        assert_eq!(blocks[2], b(7, 107, 3));
        assert_eq!(bm.clusters(), ClusterCount::new(6));
    }

    #[test]
    fn subtract_range_whole_block_becomes_tombstone() {
        let mut bm = BlockMap::new(vec![b(0, 100, 5)]);
        bm.subtract_range(Vcn::new(0), ClusterCount::new(5));
        assert_eq!(bm.blocks().len(), 1);
        assert!(bm.blocks()[0].is_excluded());
    }

    #[test]
    fn synthesize_from_input_replaces_range_with_real_block() {
        // file: [(0,100,2),(2,500,3)] moving vcn=0 len=5 to target 1000
        let mut bm = BlockMap::new(vec![b(0, 100, 2), b(2, 500, 3)]);
        bm.synthesize_from_input(Vcn::new(0), ClusterCount::new(5), Lcn::new(1000));
        assert_eq!(bm.blocks(), &[b(0, 1000, 5)]);
        assert_eq!(bm.fragments(), 1);
    }

    #[test]
    fn synthesize_from_input_preserves_surrounding_blocks() {
        let mut bm = BlockMap::new(vec![b(0, 100, 2), b(2, 500, 3), b(5, 900, 4)]);
        bm.synthesize_from_input(Vcn::new(2), ClusterCount::new(3), Lcn::new(2000));
        assert_eq!(bm.blocks().len(), 3);
        assert_eq!(bm.blocks()[0], b(0, 100, 2));
        assert_eq!(bm.blocks()[1], b(2, 2000, 3));
        assert_eq!(bm.blocks()[2], b(5, 900, 4));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Builds a blockmap whose vcn ranges are contiguous in the order
        /// given, but whose lcn assignment is arbitrary, so fragmentation
        /// is randomized while the `Σ length` invariant still holds.
        fn blockmap_from(raw: Vec<(u64, u64)>) -> BlockMap {
            let mut vcn = 0u64;
            let blocks = raw
                .into_iter()
                .map(|(lcn, len)| {
                    let len = len.max(1);
                    let blk = b(vcn, lcn, len);
                    vcn += len;
                    blk
                })
                .collect();
            BlockMap::new(blocks)
        }

        proptest! {
            #[test]
            fn optimize_is_idempotent_for_arbitrary_layouts(
                raw in proptest::collection::vec((0u64..100_000, 1u64..50), 0..30)
            ) {
                let mut bm = blockmap_from(raw);
                let total_before = bm.clusters();
                bm.optimize();
                let once = bm.clone();
                bm.optimize();
                prop_assert_eq!(bm, once);
                prop_assert_eq!(bm.clusters(), total_before);
            }

            #[test]
            fn optimize_never_increases_fragment_count(
                raw in proptest::collection::vec((0u64..100_000, 1u64..50), 0..30)
            ) {
                let mut bm = blockmap_from(raw);
                let before = bm.fragments();
                bm.optimize();
                prop_assert!(bm.fragments() <= before);
            }
        }
    }
}

//! The free-region list: a coalescing, lcn-ordered set of unallocated runs.
//!
//! Grounded in `analyze.c::process_free_region`/`get_free_space_layout` and
//! the list-shaped access patterns `tasks.c` relies on — in particular
//! `move_files_to_back`'s O(1) "last region" access via what the reference
//! implements as a circular doubly-linked list (`jp->free_regions->prev`).
//! A `Vec` kept sorted by `lcn` gives the same O(1) last-element access via
//! `.last()` and is simpler to reason about without ever running a
//! compiler to catch a linked-list mistake.

use super::types::{ClusterCount, Lcn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRegion {
    pub lcn: Lcn,
    pub length: ClusterCount,
}

impl FreeRegion {
    pub fn new(lcn: Lcn, length: ClusterCount) -> Self {
        FreeRegion { lcn, length }
    }

    pub fn end(&self) -> Lcn {
        self.lcn.end(self.length)
    }
}

/// An lcn-ordered, non-overlapping, maximally-coalesced list of free runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeRegionList {
    regions: Vec<FreeRegion>,
}

impl FreeRegionList {
    pub fn new() -> Self {
        FreeRegionList::default()
    }

    pub fn regions(&self) -> &[FreeRegion] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn total_free(&self) -> ClusterCount {
        self.regions
            .iter()
            .fold(ClusterCount::ZERO, |acc, r| acc + r.length)
    }

    pub fn largest(&self) -> Option<FreeRegion> {
        self.regions.iter().copied().max_by_key(|r| r.length.0)
    }

    pub fn last(&self) -> Option<FreeRegion> {
        self.regions.last().copied()
    }

    /// Adds a run, coalescing with immediate neighbors if they abut exactly.
    /// Used both when the initial free-space layout is built
    /// (`process_free_region`) and when a move frees up the source range.
    pub fn add(&mut self, lcn: Lcn, length: ClusterCount) {
        if length.is_zero() {
            return;
        }
        let pos = self.regions.partition_point(|r| r.lcn < lcn);
        self.regions.insert(pos, FreeRegion::new(lcn, length));
        self.coalesce_around(pos);
    }

    fn coalesce_around(&mut self, pos: usize) {
        // merge with the following neighbor first so indices stay valid
        if pos + 1 < self.regions.len() && self.regions[pos].end() == self.regions[pos + 1].lcn {
            let next = self.regions.remove(pos + 1);
            self.regions[pos].length += next.length;
        }
        if pos > 0 && self.regions[pos - 1].end() == self.regions[pos].lcn {
            let cur = self.regions.remove(pos);
            self.regions[pos - 1].length += cur.length;
        }
    }

    /// Removes `[lcn, lcn+length)` from the free set — the space a move
    /// just consumed. The consumed range must lie fully within a single
    /// existing region; anything else indicates an accounting bug upstream
    /// and is treated as a no-op on the excess.
    pub fn subtract(&mut self, lcn: Lcn, length: ClusterCount) {
        if length.is_zero() {
            return;
        }
        let end = lcn.end(length);
        if let Some(idx) = self
            .regions
            .iter()
            .position(|r| r.lcn <= lcn && end <= r.end())
        {
            let r = self.regions[idx];
            self.regions.remove(idx);
            if r.lcn < lcn {
                self.regions.insert(idx, FreeRegion::new(r.lcn, ClusterCount::new(lcn.0 - r.lcn.0)));
            }
            let insert_at = self.regions.partition_point(|x| x.lcn < lcn);
            if end < r.end() {
                self.regions
                    .insert(insert_at, FreeRegion::new(end, ClusterCount::new(r.end().0 - end.0)));
            }
        }
    }

    /// First region at or after `from`.
    pub fn find_first_free(&self, from: Lcn) -> Option<FreeRegion> {
        self.regions.iter().copied().find(|r| r.end() > from)
    }

    /// Last region at or before `before`.
    pub fn find_last_free(&self, before: Lcn) -> Option<FreeRegion> {
        self.regions.iter().rev().copied().find(|r| r.lcn < before)
    }

    /// First region at or after `from` whose length is at least `min_len`.
    pub fn find_matching_free(&self, from: Lcn, min_len: ClusterCount) -> Option<FreeRegion> {
        self.regions
            .iter()
            .copied()
            .find(|r| r.end() > from && r.length >= min_len)
    }

    /// Largest region at or after `from` whose length is at least `min_len`.
    pub fn find_largest_free(&self, from: Lcn, min_len: ClusterCount) -> Option<FreeRegion> {
        self.regions
            .iter()
            .copied()
            .filter(|r| r.end() > from && r.length >= min_len)
            .max_by_key(|r| r.length.0)
    }

    pub fn iter_forward_from(&self, from: Lcn) -> impl Iterator<Item = FreeRegion> + '_ {
        self.regions.iter().copied().filter(move |r| r.end() > from)
    }

    pub fn iter_backward(&self) -> impl Iterator<Item = FreeRegion> + '_ {
        self.regions.iter().rev().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_coalesces_both_sides() {
        let mut l = FreeRegionList::new();
        l.add(Lcn::new(0), ClusterCount::new(5));
        l.add(Lcn::new(10), ClusterCount::new(5));
        l.add(Lcn::new(5), ClusterCount::new(5));
        assert_eq!(l.regions().len(), 1);
        assert_eq!(l.regions()[0], FreeRegion::new(Lcn::new(0), ClusterCount::new(15)));
    }

    #[test]
    fn subtract_splits_middle() {
        let mut l = FreeRegionList::new();
        l.add(Lcn::new(0), ClusterCount::new(10));
        l.subtract(Lcn::new(3), ClusterCount::new(4));
        assert_eq!(l.regions().len(), 2);
        assert_eq!(l.regions()[0], FreeRegion::new(Lcn::new(0), ClusterCount::new(3)));
        assert_eq!(l.regions()[1], FreeRegion::new(Lcn::new(7), ClusterCount::new(3)));
    }

    #[test]
    fn subtract_consumes_whole_region() {
        let mut l = FreeRegionList::new();
        l.add(Lcn::new(0), ClusterCount::new(10));
        l.subtract(Lcn::new(0), ClusterCount::new(10));
        assert!(l.is_empty());
    }

    #[test]
    fn last_is_o1_and_matches_max_lcn() {
        let mut l = FreeRegionList::new();
        l.add(Lcn::new(0), ClusterCount::new(5));
        l.add(Lcn::new(100), ClusterCount::new(5));
        assert_eq!(l.last().unwrap().lcn, Lcn::new(100));
    }

    #[test]
    fn find_largest_free_respects_minimum() {
        let mut l = FreeRegionList::new();
        l.add(Lcn::new(0), ClusterCount::new(3));
        l.add(Lcn::new(50), ClusterCount::new(9));
        l.add(Lcn::new(200), ClusterCount::new(5));
        let found = l.find_largest_free(Lcn::new(0), ClusterCount::new(4)).unwrap();
        assert_eq!(found.lcn, Lcn::new(50));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// `add` then `subtract` of the exact same range is the identity
            /// on an otherwise-empty list — the total-free accounting this
            /// guards is what `move_file`'s liveness depends on.
            #[test]
            fn add_then_subtract_same_range_restores_empty(
                lcn in 0u64..1_000_000, len in 1u64..10_000
            ) {
                let mut l = FreeRegionList::new();
                l.add(Lcn::new(lcn), ClusterCount::new(len));
                l.subtract(Lcn::new(lcn), ClusterCount::new(len));
                prop_assert!(l.is_empty());
            }

            /// Total free space after a sequence of additions equals the sum
            /// of the additions, regardless of insertion order or overlap
            /// with already-coalesced neighbors.
            #[test]
            fn total_free_matches_sum_of_additions(
                runs in proptest::collection::vec((0u64..1_000_000, 1u64..5_000), 1..20)
            ) {
                let mut l = FreeRegionList::new();
                let mut expected = 0u64;
                for (lcn, len) in runs {
                    l.add(Lcn::new(lcn), ClusterCount::new(len));
                    expected += len;
                }
                prop_assert_eq!(l.total_free(), ClusterCount::new(expected));
            }

            /// Regions stay sorted by lcn and non-overlapping after any
            /// sequence of adds — the ordering every `find_*` search relies
            /// on for its early-exit behavior.
            #[test]
            fn regions_stay_sorted_and_disjoint(
                runs in proptest::collection::vec((0u64..1_000_000, 1u64..5_000), 1..20)
            ) {
                let mut l = FreeRegionList::new();
                for (lcn, len) in runs {
                    l.add(Lcn::new(lcn), ClusterCount::new(len));
                }
                for w in l.regions().windows(2) {
                    prop_assert!(w[0].end() < w[1].lcn);
                }
            }
        }
    }
}

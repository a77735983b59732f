//! Free-space and movable-cluster search helpers (§4.3), grounded in
//! `search.c`.

use super::file_info::FileInfo;
use super::free_regions::FreeRegion;
use super::job::JobParameters;
use super::types::{ClusterCount, Lcn, MAGIC_LOCK_PROBE};
use super::volume_io::VolumeIo;

/// Which end of the volume a free-region search prefers when more than one
/// region would satisfy the minimum length (`find_matching_free_region`'s
/// `FIND_MATCHING_RGN_*` constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPreference {
    Forward,
    Backward,
    Any,
}

/// Which files `find_first_block` should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFilter {
    All,
    Fragmented,
    NotFragmented,
}

pub fn find_first_free(jp: &JobParameters, from: Lcn) -> Option<FreeRegion> {
    jp.free_regions.find_first_free(from)
}

pub fn find_last_free(jp: &JobParameters, before: Lcn) -> Option<FreeRegion> {
    jp.free_regions.find_last_free(before)
}

pub fn find_largest_free(jp: &JobParameters, from: Lcn, min_len: ClusterCount) -> Option<FreeRegion> {
    jp.free_regions.find_largest_free(from, min_len)
}

/// `find_matching_free_region`: scans from `from`, tracking the best match
/// seen so far, and stops early once it can prove nothing better remains.
///
/// - `Forward` keeps scanning all the way to the end of the list even after
///   finding an exact-length match, since a *later* region might still be
///   closer to `from` in the forward direction — but a region whose length
///   equals `min_len` exactly can never be improved on, so scanning stops
///   immediately on that exact match for `Backward`/`Any` (the reference's
///   `length == min_length && preferred_position != FORWARD` break).
/// - `Backward` walks the list in reverse so the first candidate found is
///   already the one closest to `from` from the right.
/// - `Any` behaves like `Forward` but also takes the early exact-match exit.
pub fn find_matching_free(
    jp: &JobParameters,
    from: Lcn,
    min_len: ClusterCount,
    preference: SearchPreference,
) -> Option<FreeRegion> {
    if min_len.is_zero() {
        return None;
    }

    let mut best: Option<FreeRegion> = None;

    match preference {
        SearchPreference::Backward => {
            for rgn in jp.free_regions.iter_backward() {
                if rgn.lcn >= from {
                    continue;
                }
                if rgn.length < min_len {
                    continue;
                }
                let improves = match best {
                    None => true,
                    Some(b) => rgn.length < b.length,
                };
                if improves {
                    best = Some(rgn);
                }
                if best.map(|b| b.length) == Some(min_len) {
                    break;
                }
            }
        }
        SearchPreference::Forward | SearchPreference::Any => {
            for rgn in jp.free_regions.iter_forward_from(from) {
                if rgn.length < min_len {
                    continue;
                }
                let improves = match best {
                    None => true,
                    Some(b) => rgn.length < b.length,
                };
                if improves {
                    best = Some(rgn);
                }
                if preference == SearchPreference::Any && best.map(|b| b.length) == Some(min_len) {
                    break;
                }
            }
        }
    }

    best
}

/// `get_number_of_free_clusters`: sum of free-region overlap with
/// `[first_lcn, last_lcn)`.
pub fn count_free_clusters(jp: &JobParameters, first_lcn: Lcn, last_lcn: Lcn) -> ClusterCount {
    let mut total = 0u64;
    for rgn in jp.free_regions.regions() {
        let start = rgn.lcn.0.max(first_lcn.0);
        let end = rgn.end().0.min(last_lcn.0);
        if end > start {
            total += end - start;
        }
    }
    ClusterCount::new(total)
}

/// `get_number_of_fragmented_clusters`: sum of cluster counts of every file
/// already on the fragmented-files list. No lock-probe cap is needed since
/// that list is already filtered to genuinely fragmented files.
pub fn count_fragmented_clusters(jp: &JobParameters) -> ClusterCount {
    let total: u64 = jp
        .fragmented_files
        .iter()
        .map(|&idx| jp.files[idx].clusters.0)
        .sum();
    ClusterCount::new(total)
}

/// `get_number_of_movable_clusters`: counts clusters belonging to movable,
/// non-MFT files in `[min_lcn, max_lcn)`, probing at most
/// [`MAGIC_LOCK_PROBE`] files for the locked condition before giving up on
/// further probing (it keeps counting clusters of files it no longer probes,
/// just stops asking the OS whether they're locked).
pub fn count_movable_clusters(
    jp: &JobParameters,
    io: &mut dyn VolumeIo,
    min_lcn: Lcn,
    max_lcn: Lcn,
    allow_dir_defrag: bool,
) -> ClusterCount {
    let mut total = 0u64;
    let mut probes = 0usize;

    for file in &jp.files {
        let Some(first) = file.blockmap.first() else {
            continue;
        };
        if first.lcn < min_lcn || first.lcn >= max_lcn {
            continue;
        }
        if !file.can_move(allow_dir_defrag) {
            continue;
        }
        if jp.is_mft_file_by_ref(file) {
            continue;
        }

        if probes < MAGIC_LOCK_PROBE {
            probes += 1;
            if io.is_file_locked(file) {
                continue;
            }
        }

        total += file.clusters.0;
    }

    ClusterCount::new(total)
}

/// `find_first_block`: walks forward from `*min_lcn`, returning the first
/// block whose file passes `filter` and is movable, skipping the MFT itself
/// and accumulating skipped-locked clusters into `processed_clusters`.
/// Uses the extent index when it is populated (the tree-fast-path in the
/// reference); falls back to a full linear scan of `jp.files` when the
/// index is absent, exactly mirroring the documented degraded mode.
pub fn find_first_block(
    jp: &JobParameters,
    io: &mut dyn VolumeIo,
    min_lcn: Lcn,
    skip_mft: bool,
    filter: BlockFilter,
    allow_dir_defrag: bool,
    processed_clusters: &mut u64,
) -> Option<(usize, Lcn)> {
    if let Some(index) = &jp.extent_index {
        let mut cursor = min_lcn;
        loop {
            let (lcn, entry) = index.first_at_or_after(cursor)?;
            let file = &jp.files[entry.file_id];
            if accept_candidate(jp, io, file, skip_mft, filter, allow_dir_defrag, processed_clusters) {
                return Some((entry.file_id, lcn));
            }
            cursor = Lcn::new(lcn.0 + 1);
        }
    }

    linear_find_first_block(jp, io, min_lcn, skip_mft, filter, allow_dir_defrag, processed_clusters)
}

fn linear_find_first_block(
    jp: &JobParameters,
    io: &mut dyn VolumeIo,
    min_lcn: Lcn,
    skip_mft: bool,
    filter: BlockFilter,
    allow_dir_defrag: bool,
    processed_clusters: &mut u64,
) -> Option<(usize, Lcn)> {
    let mut best: Option<(usize, Lcn)> = None;
    for (idx, file) in jp.files.iter().enumerate() {
        let Some(first) = file.blockmap.first() else {
            continue;
        };
        if first.lcn < min_lcn {
            continue;
        }
        if let Some((_, best_lcn)) = best {
            if first.lcn >= best_lcn {
                continue;
            }
        }
        if accept_candidate(jp, io, file, skip_mft, filter, allow_dir_defrag, processed_clusters) {
            best = Some((idx, first.lcn));
        }
    }
    best
}

fn accept_candidate(
    jp: &JobParameters,
    io: &mut dyn VolumeIo,
    file: &FileInfo,
    skip_mft: bool,
    filter: BlockFilter,
    allow_dir_defrag: bool,
    processed_clusters: &mut u64,
) -> bool {
    if skip_mft && jp.is_mft_file_by_ref(file) {
        return false;
    }
    match filter {
        BlockFilter::Fragmented if !file.is_fragmented() => return false,
        BlockFilter::NotFragmented if file.is_fragmented() => return false,
        _ => {}
    }
    if !file.can_move(allow_dir_defrag) {
        return false;
    }
    if io.is_file_locked(file) {
        *processed_clusters += file.clusters.0;
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defrag::config::Options;
    use crate::defrag::error::DefragError;
    use crate::defrag::fs_type::HostOsVersion;
    use crate::defrag::job::JobKind;
    use crate::defrag::move_file::MoveOutcome;
    use crate::defrag::types::Vcn;
    use crate::defrag::volume_io::{FreeRegionCallback, ScanFilterDecision, VolumeGeometry};

    struct NeverLockedIo;
    impl VolumeIo for NeverLockedIo {
        fn geometry(&mut self) -> Result<VolumeGeometry, DefragError> {
            unimplemented!()
        }
        fn host_os(&self) -> HostOsVersion {
            HostOsVersion::WindowsXpOrLater
        }
        fn validate(&mut self) -> Result<(), DefragError> {
            Ok(())
        }
        fn free_space_layout(&mut self, _cb: &mut FreeRegionCallback<'_>) -> Result<(), DefragError> {
            Ok(())
        }
        fn walk_files(
            &mut self,
            _filter: &mut dyn FnMut(&FileInfo) -> ScanFilterDecision,
        ) -> Result<Vec<FileInfo>, DefragError> {
            Ok(Vec::new())
        }
        fn is_file_locked(&mut self, _file: &FileInfo) -> bool {
            false
        }
        fn move_file(
            &mut self,
            _file: &FileInfo,
            _vcn: Vcn,
            _length: ClusterCount,
            _target_lcn: Lcn,
            _clusters_per_256k: ClusterCount,
        ) -> Result<MoveOutcome, DefragError> {
            unimplemented!()
        }
        fn mft_zone(&mut self) -> Result<Option<(Lcn, Lcn)>, DefragError> {
            Ok(None)
        }
    }

    fn jp_empty() -> JobParameters {
        JobParameters::new('C', JobKind::Defragmentation, Options::default())
    }

    #[test]
    fn find_matching_forward_picks_smallest_fit() {
        let mut jp = jp_empty();
        jp.free_regions.add(Lcn::new(0), ClusterCount::new(10));
        jp.free_regions.add(Lcn::new(100), ClusterCount::new(4));
        jp.free_regions.add(Lcn::new(200), ClusterCount::new(20));
        let found = find_matching_free(&jp, Lcn::new(0), ClusterCount::new(4), SearchPreference::Forward).unwrap();
        assert_eq!(found.lcn, Lcn::new(100));
    }

    #[test]
    fn find_matching_backward_scans_from_the_right() {
        let mut jp = jp_empty();
        jp.free_regions.add(Lcn::new(0), ClusterCount::new(10));
        jp.free_regions.add(Lcn::new(100), ClusterCount::new(4));
        let found = find_matching_free(&jp, Lcn::new(150), ClusterCount::new(3), SearchPreference::Backward).unwrap();
        assert_eq!(found.lcn, Lcn::new(100));
    }

    #[test]
    fn count_free_clusters_sums_overlap_only() {
        let mut jp = jp_empty();
        jp.free_regions.add(Lcn::new(0), ClusterCount::new(10));
        jp.free_regions.add(Lcn::new(50), ClusterCount::new(10));
        let n = count_free_clusters(&jp, Lcn::new(5), Lcn::new(55));
        assert_eq!(n, ClusterCount::new(10));
    }

    #[test]
    fn find_first_block_skips_locked_and_counts_processed() {
        let mut jp = jp_empty();
        let mut f1 = FileInfo::new("C:\\a", 1);
        f1.blockmap = crate::defrag::block::BlockMap::new(vec![crate::defrag::block::Block::new(
            Vcn::new(0),
            Lcn::new(10),
            ClusterCount::new(2),
        )]);
        f1.clusters = f1.blockmap.clusters();
        f1.flags.insert(crate::defrag::file_info::FileFlags::LOCKED);
        jp.files.push(f1);

        let mut f2 = FileInfo::new("C:\\b", 2);
        f2.blockmap = crate::defrag::block::BlockMap::new(vec![crate::defrag::block::Block::new(
            Vcn::new(0),
            Lcn::new(20),
            ClusterCount::new(2),
        )]);
        f2.clusters = f2.blockmap.clusters();
        jp.files.push(f2);

        let mut io = NeverLockedIo;
        let mut processed = 0u64;
        let result = find_first_block(&jp, &mut io, Lcn::new(0), false, BlockFilter::All, true, &mut processed);
        assert_eq!(result, Some((1, Lcn::new(20))));
    }
}

//! The central move primitive (§4.4), grounded in `move.c::move_file`.

use tracing::{debug, warn};

use super::block::BlockMap;
use super::file_info::{FileFlags, FileInfo};
use super::job::JobParameters;
use super::observer::Observer;
use super::types::{ClusterCount, Lcn, Vcn};
use super::volume_io::VolumeIo;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveFlags: u32 {
        /// `UD_MOVE_FILE_CUT_OFF_MOVED_CLUSTERS`: splice the moved range out
        /// of the *old* blockmap instead of replacing it with the new one.
        /// Used by `defragment_big_files` so progress is monotone even when
        /// the post-move blockmap can't be trusted to shrink every call.
        const CUT_OFF_MOVED_CLUSTERS = 1 << 0;
    }
}

/// The four-variant classification from §4.4 step 5, named after the
/// reference's `ud_file_moving_result` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The post-move blockmap couldn't be re-read; the engine assumes
    /// success and synthesizes a blockmap from the request.
    CalculatedSuccess,
    /// The OS reported success but the new blockmap is identical to the
    /// old one.
    DeterminedFailure,
    /// The requested range was moved but not all of it landed
    /// contiguously at `target_lcn`.
    DeterminedPartialSuccess,
    /// The requested range now lives contiguously at `target_lcn`.
    DeterminedSuccess,
}

impl MoveOutcome {
    pub fn is_failure(self) -> bool {
        matches!(self, MoveOutcome::DeterminedFailure)
    }

    pub fn is_any_success(self) -> bool {
        !self.is_failure()
    }
}

/// Per-file, non-fatal outcomes `move_file` can report without returning a
/// job-level error (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    Success,
    /// The file could not be opened for exclusive access; `Locked` was set.
    FileLocked,
    /// `move_file` validated the request and refused it outright
    /// (`ImproperState`): zero length, out-of-file range, or out-of-volume
    /// target.
    ImproperState,
    /// The OS reported nothing moved.
    MovingFailed,
    /// Part, but not all, of the requested range moved.
    PartialMove,
}

impl MoveResult {
    pub fn is_ok(self) -> bool {
        matches!(self, MoveResult::Success)
    }
}

/// Validates preconditions (§4.4 step 1): `[vcn, vcn+length)` must lie
/// inside the file and `[target_lcn, target_lcn+length)` inside the volume.
/// A zero-length request and a request past end-of-file both pass as
/// "nothing to do" per the lenient `check_cluster_chain_location` behavior
/// the spec's Open Questions preserve — see `classify_move`.
fn validate(file: &FileInfo, vcn: Vcn, length: ClusterCount, target_lcn: Lcn, jp: &JobParameters) -> bool {
    if length.is_zero() {
        return false;
    }
    if file.blockmap.is_empty() {
        return false;
    }
    let file_end = file
        .blockmap
        .blocks()
        .last()
        .map(|b| b.vcn_end())
        .unwrap_or(Vcn::new(0));
    if vcn.end(length) > file_end {
        return false;
    }
    target_lcn.end(length).0 <= jp.total_clusters.0
}

/// `move.c::check_cluster_chain_location`'s lenient rule, preserved as
/// specified: a VCN range past end-of-file, or an empty file, is treated
/// as "move succeeded" because there is nothing left to verify.
fn new_range_is_contiguous_at_target(
    new_blockmap: &BlockMap,
    vcn: Vcn,
    length: ClusterCount,
    target_lcn: Lcn,
) -> bool {
    if length.is_zero() {
        return true;
    }
    if new_blockmap.is_empty() {
        return true;
    }
    let range_end = vcn.end(length);
    let mut curr_vcn = vcn;
    let mut curr_target = target_lcn;
    let mut remaining = length;
    let mut found_any = false;
    for block in new_blockmap.blocks() {
        if block.vcn_end() <= curr_vcn || block.vcn >= range_end {
            continue;
        }
        let offset = curr_vcn.0.saturating_sub(block.vcn.0);
        if block.lcn.0 + offset != curr_target.0 {
            return false;
        }
        found_any = true;
        let available = block.length.0 - offset;
        let take = available.min(remaining.0);
        curr_target = curr_target.end(ClusterCount::new(take));
        curr_vcn = Vcn::new(curr_vcn.0 + take);
        remaining = ClusterCount::new(remaining.0 - take);
        if remaining.is_zero() {
            break;
        }
    }
    // falling off the end of the blockmap mid-range (file truncated by the
    // OS during the move) is treated as success, matching the reference.
    found_any || remaining.0 == length.0
}

fn classify_move(
    old_blockmap: &BlockMap,
    new_blockmap_result: Option<&BlockMap>,
    vcn: Vcn,
    length: ClusterCount,
    target_lcn: Lcn,
) -> MoveOutcome {
    let Some(new_blockmap) = new_blockmap_result else {
        return MoveOutcome::CalculatedSuccess;
    };
    if new_blockmap == old_blockmap {
        return MoveOutcome::DeterminedFailure;
    }
    if new_range_is_contiguous_at_target(new_blockmap, vcn, length, target_lcn) {
        MoveOutcome::DeterminedSuccess
    } else {
        MoveOutcome::DeterminedPartialSuccess
    }
}

/// Moves `[vcn, vcn+length)` of `file` to `target_lcn` (§4.4). `file_idx`
/// lets the caller maintain the fragmented-files list and extent index in
/// the same transaction; this function mutates only `file` and `jp`'s
/// free-region/temp-space/extent-index state, never the fragmented list
/// directly (the caller does that afterward based on the returned
/// before/after fragmentation snapshot, matching `move.c`'s own
/// "update list of fragmented files" step being the final one).
#[allow(clippy::too_many_arguments)]
pub fn move_file(
    jp: &mut JobParameters,
    io: &mut dyn VolumeIo,
    observer: &mut dyn Observer,
    file_idx: usize,
    vcn: Vcn,
    length: ClusterCount,
    target_lcn: Lcn,
    flags: MoveFlags,
) -> MoveResult {
    if !validate(&jp.files[file_idx], vcn, length, target_lcn, jp) {
        jp.files[file_idx].flags.insert(FileFlags::IMPROPER_STATE);
        return MoveResult::ImproperState;
    }

    observer.record_move();
    let was_fragmented = jp.files[file_idx].is_fragmented();

    if jp.options.dry_run {
        jp.progress.moved_clusters += length.0;
        jp.progress.processed_clusters += length.0;
        apply_success_bookkeeping(
            jp,
            file_idx,
            vcn,
            length,
            target_lcn,
            MoveOutcome::CalculatedSuccess,
            flags,
            was_fragmented,
        );
        return MoveResult::Success;
    }

    let clusters_per_256k = jp.clusters_per_256k();
    let outcome = match io.move_file(&jp.files[file_idx], vcn, length, target_lcn, clusters_per_256k) {
        Ok(outcome) => outcome,
        Err(_) => {
            jp.files[file_idx].flags.insert(FileFlags::LOCKED);
            jp.progress.processed_clusters += length.0;
            return MoveResult::FileLocked;
        }
    };

    jp.progress.moved_clusters += length.0;
    jp.progress.total_moves += 1;

    // The target range is removed from free regions on every outcome,
    // including a determined failure — preserved exactly per §9's note
    // that this is load-bearing for liveness (never retry the same
    // target immediately).
    jp.free_regions.subtract(target_lcn, length);

    if outcome.is_failure() {
        jp.files[file_idx].flags.insert(FileFlags::MOVING_FAILED);
        if flags.contains(MoveFlags::CUT_OFF_MOVED_CLUSTERS) {
            jp.files[file_idx].blockmap.subtract_range(vcn, length);
        }
        debug!(file = %jp.files[file_idx].path, "move_file: nothing was moved");
        return MoveResult::MovingFailed;
    }

    if outcome == MoveOutcome::DeterminedPartialSuccess {
        jp.files[file_idx].flags.insert(FileFlags::MOVING_FAILED);
    }

    apply_success_bookkeeping(jp, file_idx, vcn, length, target_lcn, outcome, flags, was_fragmented);

    if outcome == MoveOutcome::DeterminedPartialSuccess {
        MoveResult::PartialMove
    } else {
        MoveResult::Success
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_success_bookkeeping(
    jp: &mut JobParameters,
    file_idx: usize,
    vcn: Vcn,
    length: ClusterCount,
    target_lcn: Lcn,
    outcome: MoveOutcome,
    flags: MoveFlags,
    was_fragmented: bool,
) {
    // source range: NTFS defers freeing to a quiescence window, FAT frees
    // immediately (§4.4 step 6).
    if let Some(source) = source_range_freed(&jp.files[file_idx], vcn, length) {
        if jp.fs_type.is_fat() {
            jp.free_regions.add(source.0, source.1);
        } else {
            jp.temp_space.add(source.0, source.1);
        }
    }

    let old_fragments = jp.files[file_idx].fragments();

    // Both branches replace every non-tombstone block this file
    // contributes to the index; drop the old entries up front so each
    // branch only has to insert what it actually ends up storing.
    if let Some(index) = jp.extent_index.as_mut() {
        for b in jp.files[file_idx].blockmap.blocks() {
            if !b.is_excluded() {
                index.remove(b.lcn);
            }
        }
    }

    // `clusters`/`fragments` are always derived from a freshly-synthesized
    // map — one where the moved slice is assumed to now live, contiguous,
    // at `target_lcn` — regardless of which blockmap ends up stored. A
    // move never changes a file's total length, so this is the only
    // truthful source for those counters.
    let mut synthesized = jp.files[file_idx].blockmap.clone();
    synthesized.synthesize_from_input(vcn, length, target_lcn);
    let new_clusters = synthesized.clusters();
    let new_fragments = synthesized.fragments();

    if flags.contains(MoveFlags::CUT_OFF_MOVED_CLUSTERS) {
        // `move.c:953-964`: keep the *old* blockmap with the moved range
        // spliced out as a tombstone rather than re-adding it as a live
        // block. A live block here would make the just-moved run a
        // candidate for `defragment_big_files`'s next `longest_fitting_run`
        // call, permitting the redundant moves invariant 6 (§8) forbids.
        // Only `clusters`/`fragments` come from the synthesized map above;
        // the stored blockmap itself never sees it.
        jp.files[file_idx].blockmap.subtract_range(vcn, length);
    } else {
        jp.files[file_idx].blockmap = synthesized;
    }

    if let Some(index) = jp.extent_index.as_mut() {
        for b in jp.files[file_idx].blockmap.blocks() {
            if !b.is_excluded() {
                index.insert(b.lcn, file_idx, 0);
            }
        }
    }

    jp.files[file_idx].clusters = new_clusters;
    let became_fragmented = new_fragments > 1;

    jp.progress.fragments = jp
        .progress
        .fragments
        .saturating_sub(old_fragments.saturating_sub(new_fragments) as u64);

    if became_fragmented && !was_fragmented {
        jp.progress.fragmented += 1;
        jp.fragmented_list_insert(file_idx);
    } else if !became_fragmented && was_fragmented {
        jp.progress.fragmented = jp.progress.fragmented.saturating_sub(1);
        jp.fragmented_list_remove(file_idx);
    }

    let _ = outcome;
}

/// Computes the source range freed by a move, if the file's old blockmap
/// actually covered `[vcn, vcn+length)` contiguously from a single LCN
/// origin (the common case for whole-block/whole-file moves the task
/// library issues). Partial/fragmented source coverage is folded into
/// per-block frees by the caller's next pass instead of being modeled
/// exactly here — diagnostics-only precision, not a correctness
/// requirement (the source is always a subset of the old target, which the
/// analyzer will reconcile on the next `analyze`).
fn source_range_freed(file: &FileInfo, vcn: Vcn, length: ClusterCount) -> Option<(Lcn, ClusterCount)> {
    for block in file.blockmap.blocks() {
        if block.vcn <= vcn && vcn.0 < block.vcn.0 + block.length.0 {
            let offset = vcn.0 - block.vcn.0;
            let available = block.length.0 - offset;
            if available >= length.0 {
                return Some((Lcn::new(block.lcn.0 + offset), length));
            }
            return Some((Lcn::new(block.lcn.0 + offset), ClusterCount::new(available)));
        }
    }
    warn!("source_range_freed: vcn not found in blockmap, skipping temp-space bookkeeping");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defrag::block::Block;
    use crate::defrag::config::Options;
    use crate::defrag::error::DefragError;
    use crate::defrag::extent_index::ExtentIndex;
    use crate::defrag::fs_type::{FsType, HostOsVersion};
    use crate::defrag::observer::NullObserver;
    use crate::defrag::job::JobKind;

    struct FakeIo {
        outcome: Result<MoveOutcome, ()>,
        new_blockmap: Option<BlockMap>,
    }

    impl VolumeIo for FakeIo {
        fn geometry(&mut self) -> Result<super::super::volume_io::VolumeGeometry, DefragError> {
            unimplemented!()
        }
        fn host_os(&self) -> HostOsVersion {
            HostOsVersion::WindowsXpOrLater
        }
        fn validate(&mut self) -> Result<(), DefragError> {
            Ok(())
        }
        fn free_space_layout(
            &mut self,
            _cb: &mut super::super::volume_io::FreeRegionCallback<'_>,
        ) -> Result<(), DefragError> {
            Ok(())
        }
        fn walk_files(
            &mut self,
            _filter: &mut dyn FnMut(&FileInfo) -> super::super::volume_io::ScanFilterDecision,
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
            self.outcome.map_err(|_| DefragError::VolumeOpenFailed)
        }
        fn mft_zone(&mut self) -> Result<Option<(Lcn, Lcn)>, DefragError> {
            Ok(None)
        }
    }

    fn jp_with_file(blocks: Vec<Block>) -> (JobParameters, usize) {
        let mut jp = JobParameters::new('C', JobKind::Defragmentation, Options::default());
        jp.fs_type = FsType::Ntfs;
        jp.bytes_per_cluster = 4096;
        jp.total_clusters = ClusterCount::new(1_000_000);
        let mut f = FileInfo::new("C:\\a.txt", 1);
        f.blockmap = BlockMap::new(blocks);
        f.clusters = f.blockmap.clusters();
        jp.files.push(f);
        (jp, 0)
    }

    #[test]
    fn zero_length_move_is_improper_state_noop() {
        let (mut jp, idx) = jp_with_file(vec![Block::new(Vcn::new(0), Lcn::new(100), ClusterCount::new(2))]);
        let mut io = FakeIo {
            outcome: Ok(MoveOutcome::DeterminedSuccess),
            new_blockmap: None,
        };
        let result = move_file(
            &mut jp,
            &mut io,
            &mut NullObserver,
            idx,
            Vcn::new(0),
            ClusterCount::ZERO,
            Lcn::new(1000),
            MoveFlags::empty(),
        );
        assert_eq!(result, MoveResult::ImproperState);
        assert!(jp.files[idx].flags.contains(FileFlags::IMPROPER_STATE));
    }

    #[test]
    fn successful_whole_file_move_becomes_contiguous() {
        let (mut jp, idx) = jp_with_file(vec![
            Block::new(Vcn::new(0), Lcn::new(100), ClusterCount::new(2)),
            Block::new(Vcn::new(2), Lcn::new(500), ClusterCount::new(3)),
        ]);
        jp.free_regions.add(Lcn::new(1000), ClusterCount::new(5));
        let mut io = FakeIo {
            outcome: Ok(MoveOutcome::DeterminedSuccess),
            new_blockmap: None,
        };
        let result = move_file(
            &mut jp,
            &mut io,
            &mut NullObserver,
            idx,
            Vcn::new(0),
            ClusterCount::new(5),
            Lcn::new(1000),
            MoveFlags::empty(),
        );
        assert_eq!(result, MoveResult::Success);
        assert_eq!(jp.files[idx].blockmap.blocks(), &[Block::new(Vcn::new(0), Lcn::new(1000), ClusterCount::new(5))]);
        assert_eq!(jp.files[idx].fragments(), 1);
        assert!(jp.free_regions.regions().iter().all(|r| r.lcn != Lcn::new(1000)));
    }

    #[test]
    fn cut_off_move_leaves_a_tombstone_instead_of_a_live_block() {
        let (mut jp, idx) = jp_with_file(vec![
            Block::new(Vcn::new(0), Lcn::new(100), ClusterCount::new(2)),
            Block::new(Vcn::new(2), Lcn::new(500), ClusterCount::new(3)),
        ]);
        jp.extent_index = Some(ExtentIndex::new());
        for b in jp.files[idx].blockmap.blocks() {
            jp.extent_index.as_mut().unwrap().insert(b.lcn, idx, 0);
        }
        jp.free_regions.add(Lcn::new(1000), ClusterCount::new(5));
        jp.progress.fragments = 5;
        let mut io = FakeIo {
            outcome: Ok(MoveOutcome::DeterminedSuccess),
            new_blockmap: None,
        };
        let result = move_file(
            &mut jp,
            &mut io,
            &mut NullObserver,
            idx,
            Vcn::new(0),
            ClusterCount::new(5),
            Lcn::new(1000),
            MoveFlags::CUT_OFF_MOVED_CLUSTERS,
        );
        assert_eq!(result, MoveResult::Success);

        // The moved vcn range stays a zero-length tombstone: it must never
        // come back as a live block, or `defragment_big_files`'s next
        // `longest_fitting_run` scan would treat it as a fresh candidate
        // for another move.
        let blocks = jp.files[idx].blockmap.blocks();
        assert!(blocks.iter().all(|b| b.lcn != Lcn::new(1000)));
        assert!(blocks.iter().any(|b| b.is_excluded()));

        // Statistics still reflect the true post-move layout (a single
        // contiguous run at the target), even though the stored blockmap
        // doesn't: two fragments became one, so the job-wide tally drops
        // by exactly one.
        assert_eq!(jp.files[idx].clusters, ClusterCount::new(5));
        assert_eq!(jp.progress.fragments, 4);

        // The index no longer points at the old, now-vacated LCNs.
        let index = jp.extent_index.as_ref().unwrap();
        assert!(index.entry_at(Lcn::new(100)).is_none());
        assert!(index.entry_at(Lcn::new(500)).is_none());
        assert!(index.entry_at(Lcn::new(1000)).is_none());
    }

    #[test]
    fn determined_failure_still_subtracts_target_from_free_regions() {
        let (mut jp, idx) = jp_with_file(vec![Block::new(Vcn::new(0), Lcn::new(100), ClusterCount::new(2))]);
        jp.free_regions.add(Lcn::new(1000), ClusterCount::new(5));
        let mut io = FakeIo {
            outcome: Ok(MoveOutcome::DeterminedFailure),
            new_blockmap: None,
        };
        let result = move_file(
            &mut jp,
            &mut io,
            &mut NullObserver,
            idx,
            Vcn::new(0),
            ClusterCount::new(2),
            Lcn::new(1000),
            MoveFlags::empty(),
        );
        assert_eq!(result, MoveResult::MovingFailed);
        assert!(jp.files[idx].flags.contains(FileFlags::MOVING_FAILED));
        assert!(jp.free_regions.find_matching_free(Lcn::new(1000), ClusterCount::new(1)).is_none());
    }

    #[test]
    fn locked_file_is_flagged_and_counted_processed() {
        let (mut jp, idx) = jp_with_file(vec![Block::new(Vcn::new(0), Lcn::new(100), ClusterCount::new(2))]);
        let mut io = FakeIo {
            outcome: Err(()),
            new_blockmap: None,
        };
        let result = move_file(
            &mut jp,
            &mut io,
            &mut NullObserver,
            idx,
            Vcn::new(0),
            ClusterCount::new(2),
            Lcn::new(1000),
            MoveFlags::empty(),
        );
        assert_eq!(result, MoveResult::FileLocked);
        assert!(jp.files[idx].flags.contains(FileFlags::LOCKED));
        assert_eq!(jp.progress.processed_clusters, 2);
    }

    #[test]
    fn dry_run_simulates_success_without_calling_io() {
        let (mut jp, idx) = jp_with_file(vec![Block::new(Vcn::new(0), Lcn::new(100), ClusterCount::new(2))]);
        jp.options.dry_run = true;
        jp.free_regions.add(Lcn::new(1000), ClusterCount::new(2));
        let mut io = FakeIo {
            outcome: Err(()),
            new_blockmap: None,
        };
        let result = move_file(
            &mut jp,
            &mut io,
            &mut NullObserver,
            idx,
            Vcn::new(0),
            ClusterCount::new(2),
            Lcn::new(1000),
            MoveFlags::empty(),
        );
        assert_eq!(result, MoveResult::Success);
        assert_eq!(jp.progress.moved_clusters, 2);
    }
}

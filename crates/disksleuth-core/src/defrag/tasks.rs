//! The atomic volume-processing tasks strategies are built from (§4.7,
//! §4.8), grounded in `tasks.c`.

use tracing::debug;

use super::file_info::{FileFlags, FileInfo};
use super::job::JobKind;
use super::job::JobParameters;
use super::move_file::{move_file, MoveFlags, MoveResult};
use super::observer::Observer;
use super::search::{self, BlockFilter, SearchPreference};
use super::types::{ClusterCount, Lcn, MIN_USEFUL_REGION_LENGTH};
use super::volume_io::VolumeIo;

pub(crate) fn report(jp: &mut JobParameters, observer: &mut dyn Observer) {
    if jp.feedback_due() {
        observer.on_progress(&jp.progress.clone());
    }
}

pub(crate) fn should_stop(jp: &JobParameters, observer: &dyn Observer) -> bool {
    observer.should_cancel() || jp.time_limit_exceeded()
}

/// `tasks.c::can_defragment`: `can_move` plus "actually has something to
/// join" plus the MFT-optimization-job restriction to files the MFT
/// evacuation itself fragmented.
pub fn can_defragment(file: &FileInfo, job_kind: JobKind, allow_dir_defrag: bool) -> bool {
    if !file.can_move(allow_dir_defrag) {
        return false;
    }
    if file.fragments() < 2 || !file.is_fragmented() {
        return false;
    }
    if job_kind == JobKind::MftOptimization && !file.flags.contains(FileFlags::FRAGMENTED_BY_MFT_OPT) {
        return false;
    }
    true
}

/// `tasks.c::can_optimize_mft`: locates `$MFT` and checks every
/// precondition for moving its tail. Returns the file index on success.
pub fn can_optimize_mft(jp: &JobParameters, io: &mut dyn VolumeIo) -> Option<usize> {
    if jp.fs_type != super::fs_type::FsType::Ntfs {
        return None;
    }
    if !jp.host_os.is_at_least_xp() {
        return None;
    }
    if jp.job_kind == JobKind::Defragmentation {
        return None;
    }

    let idx = (0..jp.files.len()).find(|&i| jp.is_mft_file(i))?;
    let file = &jp.files[idx];

    if io.is_file_locked(file) {
        debug!("can_optimize_mft: $MFT is locked");
        return None;
    }
    if file.blockmap.is_empty() || file.clusters.is_zero() {
        return None;
    }
    if file.flags.contains(FileFlags::IMPROPER_STATE) {
        return None;
    }
    if !file.is_fragmented() {
        return None;
    }

    Some(idx)
}

/// Finds, among files satisfying `pred`, the largest one whose cluster
/// count is no larger than `max_len` — the "largest fragmented file that
/// fits" search every small-file task runs.
fn largest_fitting(
    jp: &JobParameters,
    max_len: ClusterCount,
    pred: impl Fn(&FileInfo) -> bool,
) -> Option<usize> {
    let mut best: Option<usize> = None;
    let mut best_len = ClusterCount::ZERO;
    for &idx in &jp.fragmented_files {
        let file = &jp.files[idx];
        if file.clusters > max_len || file.clusters <= best_len {
            continue;
        }
        if pred(file) {
            best = Some(idx);
            best_len = file.clusters;
        }
    }
    best
}

/// `defragment_small_files_walk_free_regions`: fills free regions from the
/// front of the volume, restarting the scan from the first region after
/// every successful or abandoned move so later regions see the most
/// up-to-date free list.
pub fn defragment_small_files_walk_free_regions(
    jp: &mut JobParameters,
    io: &mut dyn VolumeIo,
    observer: &mut dyn Observer,
) {
    jp.progress.moved_clusters = 0;
    jp.release_temp_space();
    jp.clear_currently_excluded();
    let mut defragmented = 0u64;

    'restart: loop {
        let region_lcns: Vec<Lcn> = jp
            .free_regions
            .regions()
            .iter()
            .filter(|r| r.length.0 >= MIN_USEFUL_REGION_LENGTH)
            .map(|r| r.lcn)
            .collect();

        for region_lcn in region_lcns {
            if should_stop(jp, observer) {
                break 'restart;
            }
            let Some(region) = jp.free_regions.regions().iter().find(|r| r.lcn == region_lcn).copied() else {
                continue;
            };

            loop {
                let allow_dir = jp.allowed.allow_dir_defrag;
                let job_kind = jp.job_kind;
                let Some(idx) = largest_fitting(jp, region.length, |f| {
                    can_defragment(f, job_kind, allow_dir) && !jp.is_mft_file_by_ref(f)
                }) else {
                    break;
                };

                let file = &jp.files[idx];
                let vcn = file.blockmap.first().expect("fragmented file has blocks").vcn;
                let clusters = file.clusters;

                let result = move_file(jp, io, observer, idx, vcn, clusters, region.lcn, MoveFlags::empty());
                match result {
                    MoveResult::Success | MoveResult::PartialMove => {
                        defragmented += 1;
                    }
                    MoveResult::FileLocked => {
                        // retry within the same region, per the reference's
                        // do-while(is_locked(file)) loop.
                        report(jp, observer);
                        continue;
                    }
                    MoveResult::MovingFailed | MoveResult::ImproperState => {
                        jp.files[idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
                    }
                }
                report(jp, observer);
                continue 'restart;
            }
        }
        break;
    }

    debug!(defragmented, "defragment_small_files_walk_free_regions done");
}

/// `defragment_small_files_walk_fragmented_files`: repeatedly picks the
/// single largest fragmented file overall and finds its best-matching free
/// region anywhere on the volume, rather than filling regions in lcn order.
pub fn defragment_small_files_walk_fragmented_files(
    jp: &mut JobParameters,
    io: &mut dyn VolumeIo,
    observer: &mut dyn Observer,
) {
    jp.progress.moved_clusters = 0;
    jp.release_temp_space();
    jp.clear_currently_excluded();
    let mut defragmented = 0u64;

    loop {
        if should_stop(jp, observer) {
            break;
        }
        let allow_dir = jp.allowed.allow_dir_defrag;
        let job_kind = jp.job_kind;
        let Some(idx) = largest_fitting(jp, ClusterCount::new(u64::MAX), |f| {
            can_defragment(f, job_kind, allow_dir) && !jp.is_mft_file_by_ref(f)
        }) else {
            break;
        };

        let file = &jp.files[idx];
        let vcn = file.blockmap.first().expect("fragmented file has blocks").vcn;
        let from = file.blockmap.first().unwrap().lcn;
        let clusters = file.clusters;

        let target = search::find_matching_free(jp, from, clusters, SearchPreference::Any);
        match target {
            None => {
                jp.files[idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
            }
            Some(region) => {
                let result = move_file(jp, io, observer, idx, vcn, clusters, region.lcn, MoveFlags::empty());
                match result {
                    MoveResult::Success | MoveResult::PartialMove => defragmented += 1,
                    _ => {
                        jp.files[idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
                    }
                }
            }
        }
        report(jp, observer);
    }

    debug!(defragmented, "defragment_small_files_walk_fragmented_files done");
}

/// `defragment_big_files`: joins as many fragments as possible into the
/// largest available free region for files too big to move whole,
/// unconditionally subtracting the attempted target range from free space
/// every iteration so the loop always makes forward progress.
///
/// Skipped entirely on NT4/Windows 2000 hosts against NTFS volumes, which
/// cannot perform a partial move without moving the whole file.
pub fn defragment_big_files(jp: &mut JobParameters, io: &mut dyn VolumeIo, observer: &mut dyn Observer) {
    jp.progress.moved_clusters = 0;
    jp.release_temp_space();
    jp.clear_currently_excluded();
    let mut defragmented = 0u64;

    if jp.host_os.is_at_most_2k() && jp.fs_type == super::fs_type::FsType::Ntfs {
        debug!("defragment_big_files: unsupported on this host, skipping");
        mark_remaining_too_large(jp);
        return;
    }

    'outer: loop {
        if should_stop(jp, observer) {
            break;
        }
        let Some(region) = jp.free_regions.largest() else {
            break;
        };
        if region.length.0 < MIN_USEFUL_REGION_LENGTH {
            break;
        }

        let idx = loop {
            if should_stop(jp, observer) {
                break 'outer;
            }
            let allow_dir = jp.allowed.allow_dir_defrag;
            let job_kind = jp.job_kind;
            let Some(idx) = largest_fitting(jp, ClusterCount::new(u64::MAX), |f| {
                can_defragment(f, job_kind, allow_dir) && !jp.is_mft_file_by_ref(f)
            }) else {
                break 'outer;
            };
            if io.is_file_locked(&jp.files[idx]) {
                jp.progress.processed_clusters += jp.files[idx].clusters.0;
                continue;
            }
            break idx;
        };

        let (longest_start_vcn, longest_len) = longest_fitting_run(&jp.files[idx], region.length);
        let Some(start_vcn) = longest_start_vcn else {
            jp.files[idx].flags.insert(FileFlags::TOO_LARGE);
            jp.files[idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
            continue;
        };

        let target = region.lcn;
        let result = move_file(
            jp,
            io,
            observer,
            idx,
            start_vcn,
            longest_len,
            target,
            MoveFlags::CUT_OFF_MOVED_CLUSTERS,
        );
        match result {
            MoveResult::Success | MoveResult::PartialMove => defragmented += 1,
            _ => {
                jp.files[idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
            }
        }
        // the target range is removed from free space unconditionally,
        // regardless of outcome — `move_file` already does this.
        report(jp, observer);
    }

    mark_remaining_too_large(jp);
    debug!(defragmented, "defragment_big_files done");
}

fn mark_remaining_too_large(jp: &mut JobParameters) {
    let allow_dir = jp.allowed.allow_dir_defrag;
    let job_kind = jp.job_kind;
    for idx in jp.fragmented_files.clone() {
        if can_defragment(&jp.files[idx], job_kind, allow_dir) && !jp.is_mft_file(idx) {
            jp.files[idx].flags.insert(FileFlags::TOO_LARGE);
        }
    }
}

/// Finds the longest run of physically-contiguous, non-excluded blocks
/// starting at some block of `file` whose total length fits in
/// `region_len`. Returns the vcn of the run's first block and its length.
fn longest_fitting_run(file: &FileInfo, region_len: ClusterCount) -> (Option<super::types::Vcn>, ClusterCount) {
    let blocks = file.blockmap.blocks();
    let mut best_start = None;
    let mut best_len = ClusterCount::ZERO;
    let mut best_n = 0usize;

    for start in 0..blocks.len() {
        if blocks[start].is_excluded() {
            continue;
        }
        let mut n = 0usize;
        let mut remaining = region_len;
        let mut total = ClusterCount::ZERO;
        for block in &blocks[start..] {
            if block.is_excluded() {
                break;
            }
            if block.length > remaining {
                break;
            }
            n += 1;
            remaining = remaining - block.length;
            total += block.length;
        }
        if n > 1 && n > best_n {
            best_start = Some(blocks[start].vcn);
            best_n = n;
            best_len = total;
        }
    }

    (best_start, best_len)
}

/// `move_files_to_front`: relocates movable files into free regions,
/// preferring the front of the volume, re-fetching the MFT zone between
/// passes since freeing space near the front can shift it.
pub fn move_files_to_front(
    jp: &mut JobParameters,
    io: &mut dyn VolumeIo,
    observer: &mut dyn Observer,
    start_lcn: Lcn,
    filter: BlockFilter,
) {
    jp.progress.moved_clusters = 0;
    jp.clear_currently_excluded();

    loop {
        if should_stop(jp, observer) {
            break;
        }
        jp.release_temp_space();

        if let Ok(Some((zone_start, zone_end))) = io.mft_zone() {
            let zone_len = ClusterCount::new(zone_end.0.saturating_sub(zone_start.0));
            jp.free_regions.subtract(zone_start, zone_len);
        }

        let mut moves_this_pass = 0u64;
        let region_lcns: Vec<Lcn> = jp
            .free_regions
            .regions()
            .iter()
            .filter(|r| r.lcn >= start_lcn)
            .map(|r| r.lcn)
            .collect();

        'regions: for region_lcn in region_lcns {
            if should_stop(jp, observer) {
                break;
            }
            loop {
                let Some(region) = jp.free_regions.regions().iter().find(|r| r.lcn == region_lcn).copied() else {
                    continue 'regions;
                };

                let allow_dir = jp.allowed.allow_dir_defrag;
                let Some(idx) = largest_fitting(jp, region.length, |f| {
                    f.can_move(allow_dir) && !jp.is_mft_file_by_ref(f) && matches_filter(f, filter)
                }) else {
                    break 'regions;
                };

                if io.is_file_locked(&jp.files[idx]) {
                    jp.progress.processed_clusters += jp.files[idx].clusters.0;
                    continue;
                }

                let file = &jp.files[idx];
                let vcn = file.blockmap.first().expect("movable file has blocks").vcn;
                let clusters = file.clusters;
                let result = move_file(jp, io, observer, idx, vcn, clusters, region.lcn, MoveFlags::empty());
                if matches!(result, MoveResult::Success | MoveResult::PartialMove) {
                    moves_this_pass += 1;
                }
                jp.files[idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
                jp.files[idx].flags.insert(FileFlags::MOVED_TO_FRONT);
                report(jp, observer);
                // restart the region scan since indices shifted.
                continue 'regions;
            }
        }

        if moves_this_pass == 0 {
            break;
        }
    }
}

fn matches_filter(file: &FileInfo, filter: BlockFilter) -> bool {
    match filter {
        BlockFilter::All => true,
        BlockFilter::Fragmented => file.is_fragmented(),
        BlockFilter::NotFragmented => !file.is_fragmented(),
    }
}

/// `move_files_to_back`: individually relocates clusters (not whole files,
/// on capable hosts) to the end of the volume, to clear space at the
/// front. NT4/Windows 2000 against NTFS can only move entire files or
/// entire compressed/sparse blocks, so that path is handled separately.
pub fn move_files_to_back(
    jp: &mut JobParameters,
    io: &mut dyn VolumeIo,
    observer: &mut dyn Observer,
    mut start_lcn: Lcn,
    filter: BlockFilter,
) {
    jp.progress.moved_clusters = 0;
    jp.release_temp_space();
    jp.clear_currently_excluded();

    let legacy_host = jp.host_os.is_at_most_2k() && jp.fs_type == super::fs_type::FsType::Ntfs;

    loop {
        if should_stop(jp, observer) {
            break;
        }
        let allow_dir = jp.allowed.allow_dir_defrag;
        let mut processed = 0u64;
        let Some((file_idx, block_lcn)) =
            search::find_first_block(jp, io, start_lcn, true, filter, allow_dir, &mut processed)
        else {
            break;
        };
        jp.progress.processed_clusters += processed;

        if !legacy_host {
            if jp.free_regions.is_empty() {
                break;
            }
            let first_block_vcn = jp.files[file_idx]
                .blockmap
                .blocks()
                .iter()
                .find(|b| b.lcn == block_lcn)
                .map(|b| b.vcn)
                .expect("block_lcn came from this file's blockmap");
            let block_length = jp.files[file_idx]
                .blockmap
                .blocks()
                .iter()
                .find(|b| b.lcn == block_lcn)
                .map(|b| b.length)
                .expect("block_lcn came from this file's blockmap");

            let mut current_vcn = first_block_vcn;
            let mut remaining = block_length;

            while remaining.0 > 0 {
                let Some(rgn) = jp.free_regions.last() else {
                    break;
                };
                if rgn.lcn.0 < block_lcn.0 + block_length.0 {
                    // no space left beyond the block we just found.
                    return;
                }
                let n = rgn.length.min(remaining);
                let target = Lcn::new(rgn.lcn.0 + rgn.length.0 - n.0);
                let result = move_file(jp, io, observer, file_idx, current_vcn, n, target, MoveFlags::empty());
                if !matches!(result, MoveResult::Success | MoveResult::PartialMove) {
                    jp.files[file_idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
                }
                current_vcn = current_vcn.end(n);
                remaining = ClusterCount::new(remaining.0 - n.0);
                report(jp, observer);
            }
            start_lcn = Lcn::new(block_lcn.0 + 1);
        } else {
            let file = &jp.files[file_idx];
            let (vcn, clusters_to_move) = if file.flags.intersects(FileFlags::COMPRESSED | FileFlags::SPARSE) {
                let block = file.blockmap.blocks().iter().find(|b| b.lcn == block_lcn).unwrap();
                (block.vcn, block.length)
            } else {
                (file.blockmap.first().unwrap().vcn, file.clusters)
            };

            if let Some(region) = search::find_matching_free(jp, block_lcn, clusters_to_move, SearchPreference::Forward) {
                if region.lcn > block_lcn {
                    let target = Lcn::new(region.lcn.0 + region.length.0 - clusters_to_move.0);
                    move_file(jp, io, observer, file_idx, vcn, clusters_to_move, target, MoveFlags::empty());
                }
            }
            jp.files[file_idx].flags.insert(FileFlags::CURRENTLY_EXCLUDED);
            start_lcn = Lcn::new(block_lcn.0 + 1);
        }
    }
}

/// `optimize_mft_helper`: relocates `$MFT` after its first extent as close
/// to its current position as possible, evacuating whatever occupies the
/// intervening space into a private snapshot of free regions taken before
/// the pass starts (not the job's live `free_regions`, since the MFT zone
/// must stay reserved in the latter throughout). Returns whether every
/// outstanding `$MFT` cluster was relocated.
pub fn optimize_mft_helper(jp: &mut JobParameters, io: &mut dyn VolumeIo, observer: &mut dyn Observer) -> bool {
    jp.progress.moved_clusters = 0;
    jp.progress.total_moves = 0;

    let Some(mft_idx) = can_optimize_mft(jp, io) else {
        return true;
    };

    let mut rlist = jp.free_regions.clone();

    let first_block_len = jp.files[mft_idx].blockmap.first().unwrap().length;
    let mut clusters_to_process = ClusterCount::new(jp.files[mft_idx].clusters.0 - first_block_len.0);
    let mut start_lcn = jp.files[mft_idx].blockmap.first().unwrap().lcn_end();
    let mut start_vcn = jp.files[mft_idx].blockmap.blocks()[1].vcn;

    while clusters_to_process.0 > 0 {
        if should_stop(jp, observer) {
            break;
        }
        if rlist.is_empty() {
            break;
        }
        jp.release_temp_space();

        let target_rgn = rlist.find_first_free(Lcn::new(start_lcn.0.saturating_sub(1)));
        let end_lcn = target_rgn.map(|r| r.lcn).unwrap_or(Lcn::new(u64::MAX));

        let mut clusters_to_cleanup = clusters_to_process;
        let mut cleaned_region: Option<(Lcn, ClusterCount)> = None;
        let allow_dir = jp.allowed.allow_dir_defrag;

        let mut target_lcn_for_mft = target_rgn.map(|r| r.lcn);

        'cleanup: while clusters_to_cleanup.0 > 0 {
            if should_stop(jp, observer) {
                return clusters_to_process.0 == 0;
            }
            let mut processed = 0u64;
            let Some((first_idx, first_lcn)) =
                search::find_first_block(jp, io, start_lcn, false, BlockFilter::All, allow_dir, &mut processed)
            else {
                break;
            };
            jp.progress.processed_clusters += processed;
            if first_lcn >= end_lcn {
                break;
            }

            let first_block_length = jp.files[first_idx]
                .blockmap
                .blocks()
                .iter()
                .find(|b| b.lcn == first_lcn)
                .map(|b| b.length)
                .unwrap_or(ClusterCount::ZERO);
            let first_block_vcn = jp.files[first_idx]
                .blockmap
                .blocks()
                .iter()
                .find(|b| b.lcn == first_lcn)
                .map(|b| b.vcn)
                .unwrap_or(super::types::Vcn::new(0));

            if let Some((cleaned_lcn, cleaned_len)) = cleaned_region {
                if first_lcn != cleaned_lcn.end(cleaned_len) || first_idx == mft_idx {
                    break;
                }
            }

            if first_idx == mft_idx && first_block_vcn == start_vcn {
                if clusters_to_process <= first_block_length {
                    clusters_to_process = ClusterCount::ZERO;
                    break 'cleanup;
                } else {
                    clusters_to_process = ClusterCount::new(clusters_to_process.0 - first_block_length.0);
                    start_vcn = jp.files[mft_idx]
                        .blockmap
                        .blocks()
                        .iter()
                        .find(|b| b.vcn > first_block_vcn)
                        .map(|b| b.vcn)
                        .unwrap_or(start_vcn);
                    start_lcn = first_lcn.end(first_block_length);
                    continue;
                }
            }

            let move_len = clusters_to_cleanup.min(first_block_length);
            let mut remaining = move_len;
            let mut current_vcn = first_block_vcn;
            while remaining.0 > 0 {
                let Some(rgn) = rlist.last() else {
                    return clusters_to_process.0 == 0;
                };
                let n = rgn.length.min(remaining);
                let target = Lcn::new(rgn.lcn.0 + rgn.length.0 - n.0);
                rlist.subtract(target, n);
                if first_idx != mft_idx {
                    jp.files[first_idx].flags.insert(FileFlags::FRAGMENTED_BY_MFT_OPT);
                }
                let result = move_file(jp, io, observer, first_idx, current_vcn, n, target, MoveFlags::empty());
                if !matches!(result, MoveResult::Success | MoveResult::PartialMove) {
                    if cleaned_region.is_none() {
                        return clusters_to_process.0 == 0;
                    }
                    target_lcn_for_mft = cleaned_region.map(|(lcn, _)| lcn);
                    break 'cleanup;
                }
                current_vcn = current_vcn.end(n);
                remaining = ClusterCount::new(remaining.0 - n.0);
            }

            cleaned_region = Some(match cleaned_region {
                None => (first_lcn, move_len),
                Some((lcn, len)) => (lcn, ClusterCount::new(len.0 + move_len.0)),
            });
            target_lcn_for_mft = cleaned_region.map(|(lcn, _)| lcn);
            start_lcn = cleaned_region.map(|(lcn, len)| lcn.end(len)).unwrap();
            clusters_to_cleanup = ClusterCount::new(clusters_to_cleanup.0 - move_len.0);
        }

        jp.release_temp_space();

        let Some(target_lcn) = target_lcn_for_mft else {
            break;
        };
        let available = rlist
            .regions()
            .iter()
            .find(|r| r.lcn == target_lcn)
            .map(|r| r.length)
            .unwrap_or(clusters_to_process);
        let move_len = clusters_to_process.min(available);

        rlist.subtract(target_lcn, move_len);
        let result = move_file(jp, io, observer, mft_idx, start_vcn, move_len, target_lcn, MoveFlags::empty());
        if !matches!(result, MoveResult::Success | MoveResult::PartialMove) {
            break;
        }
        clusters_to_process = ClusterCount::new(clusters_to_process.0 - move_len.0);
        start_lcn = target_lcn.end(move_len);
        report(jp, observer);
    }

    if should_stop(jp, observer) {
        return true;
    }
    clusters_to_process.0 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defrag::block::{Block, BlockMap};
    use crate::defrag::config::Options;
    use crate::defrag::error::DefragError;
    use crate::defrag::fs_type::{AllowedActions, FsType, HostOsVersion};
    use crate::defrag::move_file::MoveOutcome;
    use crate::defrag::types::Vcn;
    use crate::defrag::volume_io::{FreeRegionCallback, ScanFilterDecision, VolumeGeometry};

    struct FakeIo;
    impl VolumeIo for FakeIo {
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
            Ok(MoveOutcome::DeterminedSuccess)
        }
        fn mft_zone(&mut self) -> Result<Option<(Lcn, Lcn)>, DefragError> {
            Ok(None)
        }
    }

    fn jp_with_fragmented_file() -> JobParameters {
        let mut jp = JobParameters::new('C', JobKind::Defragmentation, Options::default());
        jp.fs_type = FsType::Ntfs;
        jp.bytes_per_cluster = 4096;
        jp.total_clusters = ClusterCount::new(1_000_000);
        jp.allowed = AllowedActions::compute(FsType::Ntfs);
        jp.free_regions.add(Lcn::new(1000), ClusterCount::new(10));

        let mut f = FileInfo::new("C:\\frag.dat", 10);
        f.blockmap = BlockMap::new(vec![
            Block::new(Vcn::new(0), Lcn::new(10), ClusterCount::new(3)),
            Block::new(Vcn::new(3), Lcn::new(100), ClusterCount::new(3)),
        ]);
        f.clusters = f.blockmap.clusters();
        jp.files.push(f);
        jp.fragmented_list_insert(0);
        jp
    }

    #[test]
    fn can_defragment_requires_multiple_fragments() {
        let jp = jp_with_fragmented_file();
        assert!(can_defragment(&jp.files[0], jp.job_kind, jp.allowed.allow_dir_defrag));
    }

    #[test]
    fn defragment_small_files_walk_free_regions_joins_file() {
        let mut jp = jp_with_fragmented_file();
        let mut io = FakeIo;
        let mut observer = crate::defrag::observer::NullObserver;
        defragment_small_files_walk_free_regions(&mut jp, &mut io, &mut observer);
        assert_eq!(jp.files[0].fragments(), 1);
    }

    #[test]
    fn defragment_small_files_walk_fragmented_files_joins_file() {
        let mut jp = jp_with_fragmented_file();
        let mut io = FakeIo;
        let mut observer = crate::defrag::observer::NullObserver;
        defragment_small_files_walk_fragmented_files(&mut jp, &mut io, &mut observer);
        assert_eq!(jp.files[0].fragments(), 1);
    }

    #[test]
    fn longest_fitting_run_requires_more_than_one_block() {
        let f = {
            let mut f = FileInfo::new("C:\\x", 1);
            f.blockmap = BlockMap::new(vec![Block::new(Vcn::new(0), Lcn::new(10), ClusterCount::new(3))]);
            f.clusters = f.blockmap.clusters();
            f
        };
        let (start, len) = longest_fitting_run(&f, ClusterCount::new(10));
        assert!(start.is_none());
        assert_eq!(len, ClusterCount::ZERO);
    }
}

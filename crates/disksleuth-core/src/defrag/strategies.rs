//! The three job strategies offered to callers (§4.7, §4.8), grounded in
//! `analyze.c`, `defrag.c` and `optimize.c`. Every strategy is built out of
//! the atomic tasks in [`super::tasks`]; this module owns only analysis and
//! the pass-repeat/termination logic around those tasks.

use std::time::Instant;

use tracing::debug;

use super::cluster_map::{CellState, ClusterMap};
use super::config::{Options, SortKey, SortOrder};
use super::error::DefragError;
use super::extent_index::ExtentIndex;
use super::file_info::{FileFlags, FileInfo};
use super::free_regions::FreeRegionList;
use super::fs_type::{AllowedActions, FsType, validate_job_compatibility};
use super::job::{JobKind, JobParameters, MftZones};
use super::observer::Observer;
use super::search;
use super::tasks::{self, report, should_stop};
use super::types::{ClusterCount, Lcn};
use super::volume_io::{ScanFilterDecision, VolumeIo};

/// Number of cells the report/visual cluster map is divided into,
/// independent of volume size (`map.c` sizes its grid off the window the
/// map is drawn in; this engine has no window, so a fixed resolution is
/// used instead).
const CLUSTER_MAP_CELLS: usize = 2048;

/// `analyze.c::analyze`: discovers free space, walks the file tree,
/// classifies every file, and derives the feature matrix a strategy may
/// use. Must run before any strategy except a repeated `MftOptimization`
/// job, which reuses the state left behind by its own prior `analyze` call.
pub fn analyze(jp: &mut JobParameters, io: &mut dyn VolumeIo, observer: &mut dyn Observer) -> Result<(), DefragError> {
    let started = Instant::now();
    jp.progress.completion_status = 0;

    io.validate()?;

    let geometry = io.geometry()?;
    if !geometry.is_valid() {
        return Err(DefragError::WrongGeometry);
    }

    jp.fs_type = geometry.fs_type;
    jp.bytes_per_cluster = geometry.bytes_per_cluster;
    jp.total_clusters = geometry.total_clusters;
    jp.host_os = io.host_os();
    jp.allowed = AllowedActions::compute(jp.fs_type);

    validate_job_compatibility(jp.job_kind, jp.fs_type, jp.host_os, jp.bytes_per_cluster)?;

    jp.progress.files = 0;
    jp.progress.directories = 0;
    jp.progress.compressed = 0;
    jp.progress.fragmented = 0;
    jp.progress.fragments = 0;
    jp.progress.size_buckets = Default::default();
    jp.progress.mft_size_bytes = 0;
    jp.progress.processed_clusters = 0;
    jp.free_regions = FreeRegionList::new();
    jp.temp_space = FreeRegionList::new();
    jp.extent_index = Some(ExtentIndex::new());
    jp.cluster_map = ClusterMap::new(jp.total_clusters, CLUSTER_MAP_CELLS);
    jp.mft_zones = None;
    jp.fragmented_files.clear();
    jp.files.clear();

    {
        let free_regions = &mut jp.free_regions;
        let mut cb = move |lcn: Lcn, len: ClusterCount| {
            free_regions.add(lcn, len);
        };
        io.free_space_layout(&mut cb)?;
    }

    if jp.fs_type == FsType::Ntfs {
        if let Some((zone_start, zone_end)) = io.mft_zone()? {
            let zone_len = ClusterCount::new(zone_end.0.saturating_sub(zone_start.0));
            jp.free_regions.subtract(zone_start, zone_len);
            jp.mft_zones = Some(MftZones {
                mftzone_start: zone_start,
                mftzone_end: zone_end,
                ..MftZones::default()
            });
        }
    }

    let job_kind = jp.job_kind;
    let mut files = io.walk_files(&mut |file| walk_filter(file, job_kind))?;
    sort_files(&mut files, &jp.options);

    if jp.fs_type == FsType::Ntfs {
        if let Some(mft) = files.iter().find(|f| is_mft_by_name(f)) {
            if let Some(first) = mft.blockmap.first() {
                let zones = jp.mft_zones.get_or_insert_with(MftZones::default);
                zones.mft_start = first.lcn;
                zones.mft_end = first.lcn_end();
            }
            jp.progress.mft_size_bytes = mft.clusters.0 * jp.bytes_per_cluster as u64;
        }
    }

    for f in &mut files {
        if f.blockmap.is_empty() {
            continue;
        }
        if is_well_known_locked_file(f) && io.is_file_locked(f) {
            f.flags.insert(FileFlags::LOCKED);
        }
    }

    if !job_kind.wants_optimization() && job_kind != JobKind::MftOptimization {
        apply_post_scan_flags(&mut files, &jp.options, jp.bytes_per_cluster);
    }

    let allow_dir = jp.allowed.allow_dir_defrag;
    for f in &files {
        jp.progress.files += 1;
        if f.is_directory() {
            jp.progress.directories += 1;
        }
        if f.flags.contains(FileFlags::COMPRESSED) {
            jp.progress.compressed += 1;
        }
        jp.progress.processed_clusters += f.clusters.0;
        jp.progress.size_buckets.record(f.clusters.0 * jp.bytes_per_cluster.max(1) as u64);

        if f.is_fragmented() && !f.flags.contains(FileFlags::EXCLUDED) {
            jp.progress.fragmented += 1;
            jp.progress.fragments += f.fragments() as u64;
        } else {
            jp.progress.fragments += 1;
        }

        let state = if is_mft_by_name(f) {
            CellState::Mft
        } else if f.is_fragmented() {
            CellState::Fragmented
        } else if !f.can_move(allow_dir) {
            CellState::Unmovable
        } else {
            CellState::Used
        };
        for block in f.blockmap.blocks() {
            if !block.is_excluded() {
                jp.cluster_map.paint(block.lcn, block.length, state);
            }
        }
    }

    if let Some(index) = jp.extent_index.as_mut() {
        for (idx, f) in files.iter().enumerate() {
            for (block_idx, block) in f.blockmap.blocks().iter().enumerate() {
                if !block.is_excluded() {
                    index.insert(block.lcn, idx, block_idx);
                }
            }
        }
    }

    jp.files = files;
    for idx in 0..jp.files.len() {
        let f = &jp.files[idx];
        if f.is_fragmented() && !f.flags.contains(FileFlags::EXCLUDED) && !f.path.is_empty() {
            jp.fragmented_list_insert(idx);
        }
    }
    jp.fragmented_list_resort();

    jp.perf.analysis_time = started.elapsed();
    debug!(files = jp.progress.files, fragmented = jp.progress.fragmented, "analysis done");
    Ok(())
}

/// Tree-walk pruning decision (`analyze.c::filter`'s subtree-skip half).
/// Optimization jobs process every file unconditionally; everything else
/// still prunes temporary-file subtrees before size/fragments/path
/// exclusion is applied afterwards, over the collected list, in
/// [`apply_post_scan_flags`] — those checks still want the excluded files
/// counted towards progress totals, which pruning them from the walk
/// itself would prevent.
fn walk_filter(file: &FileInfo, job_kind: JobKind) -> ScanFilterDecision {
    if file.path.is_empty() {
        return ScanFilterDecision::ExcludeSubtree;
    }
    if job_kind.wants_optimization() || job_kind == JobKind::MftOptimization {
        return ScanFilterDecision::Include;
    }
    if file.flags.contains(FileFlags::TEMPORARY) {
        return ScanFilterDecision::ExcludeSubtree;
    }
    ScanFilterDecision::Include
}

/// `UD_SORTING`/`UD_SORTING_ORDER` (§6.2): orders the freshly-walked file
/// list before any strategy sees it. Purely a discovery-order preference —
/// every downstream check keys off flags or the extent index, never off
/// list position, so this has no effect on correctness. A `None` sort key
/// leaves the platform shim's own walk order untouched.
fn sort_files(files: &mut [FileInfo], options: &Options) {
    let Some(key) = options.sort_key else {
        return;
    };
    files.sort_by(|a, b| {
        let ordering = match key {
            SortKey::Path => a.path.cmp(&b.path),
            SortKey::Size => a.clusters.0.cmp(&b.clusters.0),
            SortKey::CreationTime => a.created.cmp(&b.created),
            SortKey::ModificationTime => a.modified.cmp(&b.modified),
            SortKey::AccessTime => a.accessed.cmp(&b.accessed),
        };
        match options.sort_order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

/// `analyze.c::filter`'s size/fragments/path-pattern half, applied once
/// over the whole collected file list rather than per directory-walk entry.
/// Sets flags; never removes a file from `files`, matching the reference's
/// "still counted, just not processed" semantics for everything but
/// path-pattern exclusion (which the reference also only flags, never
/// drops, despite the name `UD_FILE_EXCLUDED`).
fn apply_post_scan_flags(files: &mut [FileInfo], options: &Options, bytes_per_cluster: u32) {
    for f in files.iter_mut() {
        if f.flags.contains(FileFlags::TEMPORARY) {
            f.flags.insert(FileFlags::EXCLUDED);
            continue;
        }

        if let Some(limit) = options.size_limit {
            let size_bytes = f.clusters.0 * bytes_per_cluster.max(1) as u64;
            if size_bytes > limit {
                f.flags.insert(FileFlags::OVER_LIMIT);
                f.flags.insert(FileFlags::EXCLUDED);
                continue;
            }
        }

        if options.fragments_threshold > 0 && f.fragments() < options.fragments_threshold {
            f.flags.insert(FileFlags::EXCLUDED);
        }

        let path = f.path_for_filtering();
        if !options.exclude_patterns.is_empty() && Options::matches_any(path, &options.exclude_patterns) {
            f.flags.insert(FileFlags::EXCLUDED);
            f.flags.insert(FileFlags::EXCLUDED_BY_PATH);
        } else if !options.include_patterns.is_empty() && !Options::matches_any(path, &options.include_patterns) {
            f.flags.insert(FileFlags::EXCLUDED);
            f.flags.insert(FileFlags::EXCLUDED_BY_PATH);
        }
    }
}

/// `map.c::is_mft`, reimplemented against the stripped path this engine
/// keeps on every `FileInfo` rather than a separate name field: after
/// stripping the `\??\` object-manager prefix, `$Mft`'s path is always
/// exactly `X:\$Mft`.
fn is_mft_by_name(file: &FileInfo) -> bool {
    let p = file.path_for_filtering();
    p.len() == 7 && p.as_bytes()[1] == b':' && p.as_bytes()[2] == b'\\' && p[3..].eq_ignore_ascii_case("$Mft")
}

/// `analyze.c::is_well_known_locked_file`: NTFS metadata files and a
/// handful of well-known Windows files that are always open exclusively by
/// the OS, so probing them with `is_file_locked` is worth the cost of a
/// confirmed answer rather than risking a failed move attempt later.
fn is_well_known_locked_file(file: &FileInfo) -> bool {
    let path = file.path_for_filtering();
    let lower_name = path.rsplit('\\').next().unwrap_or(path).to_ascii_lowercase();

    if lower_name == "pagefile.sys" || lower_name == "hiberfil.sys" || lower_name == "ntuser.dat" {
        return true;
    }

    let lower_path = path.to_ascii_lowercase();
    if lower_path.contains(r"\system32\config\") {
        return matches!(lower_name.as_str(), "sam" | "system" | "software" | "security");
    }

    if lower_name.starts_with('$') && !is_mft_by_name(file) {
        return true;
    }

    false
}

/// `defrag.c::fragmented_clusters`: total cluster count of fragmented files
/// that `can_defragment` would actually accept, recomputed at the start of
/// every pass since a prior pass's moves change which files still qualify.
fn fragmented_clusters(jp: &JobParameters) -> ClusterCount {
    let allow_dir = jp.allowed.allow_dir_defrag;
    let job_kind = jp.job_kind;
    let total: u64 = jp
        .fragmented_files
        .iter()
        .filter(|&&idx| tasks::can_defragment(&jp.files[idx], job_kind, allow_dir))
        .map(|&idx| jp.files[idx].clusters.0)
        .sum();
    ClusterCount::new(total)
}

/// `defrag.c::defragment`: repeatedly joins small fragmented files into
/// free space — preferring whichever of "walk free regions" or "walk
/// fragmented files" has fewer items to iterate — until a pass makes no
/// progress, then makes one final pass at files too big to move whole.
/// Skips its own `analyze` call when re-entered from [`optimize_mft`],
/// which has already analyzed the volume and only wants the cleanup.
pub fn defragment(jp: &mut JobParameters, io: &mut dyn VolumeIo, observer: &mut dyn Observer) -> Result<(), DefragError> {
    if jp.job_kind != JobKind::MftOptimization {
        analyze(jp, io, observer)?;
    }

    loop {
        if should_stop(jp, observer) {
            break;
        }
        jp.progress.clusters_to_process = fragmented_clusters(jp).0;
        if jp.fragmented_files.is_empty() {
            break;
        }

        let free_regions_count = jp.free_regions.regions().len();
        if jp.fragmented_files.len() >= free_regions_count {
            tasks::defragment_small_files_walk_fragmented_files(jp, io, observer);
        } else {
            tasks::defragment_small_files_walk_free_regions(jp, io, observer);
        }
        report(jp, observer);

        if should_stop(jp, observer) || jp.progress.moved_clusters == 0 {
            break;
        }
    }

    if jp.job_kind != JobKind::MftOptimization {
        jp.progress.clusters_to_process = fragmented_clusters(jp).0;
        tasks::defragment_big_files(jp, io, observer);
        report(jp, observer);
    }

    Ok(())
}

/// `optimize.c::calculate_free_rgn_size_threshold`: how large a free region
/// must be before the optimize loop bothers packing files into it, scaled
/// to the volume's free-space ratio so a nearly-full volume doesn't chase
/// regions too small to ever hold anything.
fn calculate_free_rgn_size_threshold(jp: &JobParameters) -> ClusterCount {
    let total = jp.total_clusters.0.max(1);
    let half_percent = (total / 200).max(2);
    let free = jp.free_regions.total_free().0;

    if free.saturating_mul(10) >= total {
        let largest = jp.free_regions.largest().map(|r| r.length.0).unwrap_or(0);
        ClusterCount::new((largest / 2).min(half_percent).max(2))
    } else {
        ClusterCount::new(half_percent)
    }
}

/// `optimize.c::calculate_starting_point`: finds the first free region at
/// least `free_rgn_size_threshold` long at or after `old_sp`, then extends
/// the candidate backward region-by-region as long as doing so skips no
/// more than 5% of the volume's fragmented clusters and a third of its free
/// clusters, then lands on the start of whatever movable fragmented file's
/// block the result falls inside (packing should start at a file boundary,
/// not mid-block). A linear backward scan stands in for the reference's
/// binary search over the same monotonic bounds; the result is identical,
/// just not asymptotically as cheap to compute.
fn calculate_starting_point(jp: &JobParameters, old_sp: Lcn) -> Lcn {
    let total = jp.total_clusters.0.max(1);
    let threshold = jp.free_rgn_size_threshold;

    let Some(first) = jp.free_regions.find_matching_free(old_sp, threshold) else {
        return Lcn::new(total);
    };

    let total_fragmented = search::count_fragmented_clusters(jp).0;
    let max_fragmented_skip = total_fragmented / 20;
    let max_free_skip = total / 3;

    let mut candidate = first.lcn;
    for rgn in jp.free_regions.regions().iter().rev() {
        if rgn.lcn >= candidate || rgn.length < threshold {
            continue;
        }
        let fragmented_skipped: u64 = jp
            .fragmented_files
            .iter()
            .map(|&idx| &jp.files[idx])
            .filter(|f| f.blockmap.first().map_or(false, |b| b.lcn < rgn.lcn))
            .map(|f| f.clusters.0)
            .sum();
        let free_skipped = search::count_free_clusters(jp, Lcn::new(0), rgn.lcn).0;
        if fragmented_skipped > max_fragmented_skip || free_skipped > max_free_skip {
            break;
        }
        candidate = rgn.lcn;
    }

    let allow_dir = jp.allowed.allow_dir_defrag;
    let landing_block = jp
        .files
        .iter()
        .filter(|f| f.is_fragmented() && f.can_move(allow_dir))
        .find_map(|f| {
            f.blockmap
                .blocks()
                .iter()
                .find(|b| b.lcn <= candidate && candidate < b.lcn_end())
        });

    landing_block.map(|b| b.lcn).unwrap_or(candidate)
}

/// `optimize.c::increase_starting_point`: when a whole pass made no
/// progress from `start_lcn`, advances to the next free region at least
/// `free_rgn_size_threshold` long so the next pass doesn't immediately
/// repeat the same no-op work.
fn increase_starting_point(jp: &JobParameters, start_lcn: Lcn) -> Lcn {
    let threshold = jp.free_rgn_size_threshold;
    jp.free_regions
        .find_matching_free(start_lcn.end(ClusterCount::new(1)), threshold)
        .map(|r| r.lcn)
        .unwrap_or(Lcn::new(jp.total_clusters.0))
}

/// `optimize.c::optimize`: the full- and quick-optimization strategy.
/// Packs fragmented files toward the back first (cheap, since it never
/// needs to relocate anything else out of the way), then — for full
/// optimization only — sweeps every other movable file toward the back as
/// well, then packs everything toward the front from a starting point that
/// advances once a pass stops making progress.
pub fn optimize(jp: &mut JobParameters, io: &mut dyn VolumeIo, observer: &mut dyn Observer) -> Result<(), DefragError> {
    analyze(jp, io, observer)?;

    jp.free_rgn_size_threshold = calculate_free_rgn_size_threshold(jp);
    tasks::optimize_mft_helper(jp, io, observer);
    report(jp, observer);

    let mut start_lcn = Lcn::new(0);
    loop {
        if should_stop(jp, observer) {
            break;
        }

        start_lcn = calculate_starting_point(jp, start_lcn);
        if start_lcn.0 >= jp.total_clusters.0 {
            break;
        }

        let moved_before = jp.progress.total_moves;

        tasks::move_files_to_back(jp, io, observer, Lcn::new(0), search::BlockFilter::Fragmented);
        if jp.job_kind.is_full_optimization() {
            tasks::move_files_to_back(jp, io, observer, start_lcn, search::BlockFilter::All);
        }
        tasks::move_files_to_front(jp, io, observer, start_lcn, search::BlockFilter::All);
        report(jp, observer);

        if should_stop(jp, observer) {
            break;
        }

        if jp.progress.total_moves == moved_before {
            start_lcn = increase_starting_point(jp, start_lcn);
            if start_lcn.0 >= jp.total_clusters.0 {
                break;
            }
        }
    }

    Ok(())
}

/// `optimize.c::optimize_mft`: evacuates `$MFT`'s tail to just past its
/// first extent, then hands off to [`defragment`] to clean up whatever
/// files that evacuation itself fragmented.
pub fn optimize_mft(jp: &mut JobParameters, io: &mut dyn VolumeIo, observer: &mut dyn Observer) -> Result<(), DefragError> {
    analyze(jp, io, observer)?;

    if let Some(mft_idx) = tasks::can_optimize_mft(jp, io) {
        jp.progress.clusters_to_process = jp.files[mft_idx].clusters.0 * 2;
    }

    tasks::optimize_mft_helper(jp, io, observer);
    report(jp, observer);

    defragment(jp, io, observer)
}

//! Per-run job state (§3 "Job parameters", §4.6 Analyzer outputs).
//!
//! `JobParameters` owns every collection a strategy mutates over the
//! lifetime of one `analyze → {defragment | optimize | optimize_mft}*`
//! run: the file list, the fragmented-files list, the free-region list,
//! the extent index, the cluster map, and the temporary-space list. A
//! `FileInfo` owns its own blockmap; everything else here holds indices
//! into `files` rather than owning references, since Rust has no
//! intrusive-list equivalent of the reference's non-owning list nodes.

use std::time::{Duration, Instant};

use super::cluster_map::ClusterMap;
use super::config::Options;
use super::extent_index::ExtentIndex;
use super::file_info::{FileFlags, FileInfo};
use super::free_regions::FreeRegionList;
use super::fs_type::{AllowedActions, FsType, HostOsVersion};
use super::types::{ClusterCount, Lcn};

/// Job kinds from §6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Analysis,
    Defragmentation,
    FullOptimization,
    QuickOptimization,
    MftOptimization,
}

impl JobKind {
    pub fn wants_optimization(self) -> bool {
        matches!(self, JobKind::FullOptimization | JobKind::QuickOptimization)
    }

    pub fn is_full_optimization(self) -> bool {
        matches!(self, JobKind::FullOptimization)
    }
}

/// Size buckets used by the report emitter and debug summary
/// (`analyze.c::update_progress_counters`); thresholds in bytes.
pub const TINY_FILE_SIZE: u64 = 10 * 1024;
pub const SMALL_FILE_SIZE: u64 = 100 * 1024;
pub const AVERAGE_FILE_SIZE: u64 = 1024 * 1024;
pub const BIG_FILE_SIZE: u64 = 16 * 1024 * 1024;
pub const HUGE_FILE_SIZE: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeBuckets {
    pub tiny: u64,
    pub small: u64,
    pub average: u64,
    pub big: u64,
    pub huge: u64,
    pub giant: u64,
}

impl SizeBuckets {
    pub fn record(&mut self, size_bytes: u64) {
        if size_bytes < TINY_FILE_SIZE {
            self.tiny += 1;
        } else if size_bytes < SMALL_FILE_SIZE {
            self.small += 1;
        } else if size_bytes < AVERAGE_FILE_SIZE {
            self.average += 1;
        } else if size_bytes < BIG_FILE_SIZE {
            self.big += 1;
        } else if size_bytes < HUGE_FILE_SIZE {
            self.huge += 1;
        } else {
            self.giant += 1;
        }
    }
}

/// Diagnostics-only timing, never consulted on the correctness path
/// (`performance_counters` in `udefrag-internals.h`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceCounters {
    pub analysis_time: Duration,
    pub searching_time: Duration,
    pub moving_time: Duration,
    pub temp_space_releasing_time: Duration,
}

/// Progress snapshot delivered to an [`Observer`](super::observer::Observer).
/// Cloned on every delivery so observers never hold a live reference into
/// the job (§9 "dynamic dispatch via function pointers").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressInfo {
    pub files: u64,
    pub directories: u64,
    pub compressed: u64,
    pub fragmented: u64,
    pub fragments: u64,
    pub size_buckets: SizeBuckets,
    pub mft_size_bytes: u64,
    pub moved_clusters: u64,
    pub total_moves: u64,
    pub processed_clusters: u64,
    pub clusters_to_process: u64,
    pub pass_number: u32,
    /// Zero while running; non-zero completion codes terminate progress
    /// delivery rate-limiting (§4.10: a callback always fires when this
    /// changes away from zero).
    pub completion_status: i32,
}

/// The NTFS metadata zones recovered during analysis (§3, §4.6). Only
/// `mftzone` is ever subtracted from free space; `mft`/`mftmirr` are kept
/// for diagnostics, mirroring the reference's commented-out subtraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MftZones {
    pub mft_start: Lcn,
    pub mft_end: Lcn,
    pub mftmirr_start: Lcn,
    pub mftmirr_end: Lcn,
    pub mftzone_start: Lcn,
    pub mftzone_end: Lcn,
}

/// Everything a strategy needs for one `analyze` → strategy run. Owns the
/// model; the caller owns the job object itself and supplies an
/// [`Observer`](super::observer::Observer) by reference to each strategy
/// call.
pub struct JobParameters {
    pub volume_letter: char,
    pub job_kind: JobKind,
    pub options: Options,
    pub host_os: HostOsVersion,
    pub fs_type: FsType,
    pub total_clusters: ClusterCount,
    pub bytes_per_cluster: u32,
    pub allowed: AllowedActions,
    pub mft_zones: Option<MftZones>,

    pub files: Vec<FileInfo>,
    /// Indices into `files`, kept sorted descending by `fragments()` (§3).
    pub fragmented_files: Vec<usize>,
    pub free_regions: FreeRegionList,
    pub extent_index: Option<ExtentIndex>,
    /// Regions freed by a successful NTFS move but not yet confirmed free
    /// by the OS (§4.5); on FAT, moves add directly to `free_regions`
    /// instead and this stays empty.
    pub temp_space: FreeRegionList,
    pub cluster_map: ClusterMap,

    pub progress: ProgressInfo,
    pub perf: PerformanceCounters,
    /// Optimization-only bookkeeping (§4.8); recomputed once per
    /// `optimize` call, not persisted across calls.
    pub free_rgn_size_threshold: ClusterCount,

    started_at: Instant,
    last_feedback_at: Option<Instant>,
}

impl JobParameters {
    pub fn new(volume_letter: char, job_kind: JobKind, options: Options) -> Self {
        JobParameters {
            volume_letter,
            job_kind,
            options,
            host_os: HostOsVersion::WindowsXpOrLater,
            fs_type: FsType::Unknown,
            total_clusters: ClusterCount::ZERO,
            bytes_per_cluster: 0,
            allowed: AllowedActions::default(),
            mft_zones: None,
            files: Vec::new(),
            fragmented_files: Vec::new(),
            free_regions: FreeRegionList::new(),
            extent_index: Some(ExtentIndex::new()),
            temp_space: FreeRegionList::new(),
            cluster_map: ClusterMap::new(ClusterCount::new(1), 1),
            progress: ProgressInfo::default(),
            perf: PerformanceCounters::default(),
            free_rgn_size_threshold: ClusterCount::new(2),
            started_at: Instant::now(),
            last_feedback_at: None,
        }
    }

    /// `clusters_per_256k` ceil-to-1 rule (§4.4, recovered from
    /// `analyze.c::get_volume_information`).
    pub fn clusters_per_256k(&self) -> ClusterCount {
        const CHUNK_BYTES: u64 = 256 * 1024;
        let n = CHUNK_BYTES / self.bytes_per_cluster.max(1) as u64;
        ClusterCount::new(n.max(1))
    }

    /// Whether the wall-clock `time_limit` (§6.2/§4.10) has been exceeded.
    pub fn time_limit_exceeded(&self) -> bool {
        match self.options.time_limit {
            Some(limit) => self.started_at.elapsed() >= limit,
            None => false,
        }
    }

    /// Whether a progress callback is due: the refresh interval has
    /// elapsed, or this is the very first delivery (§4.10).
    pub fn feedback_due(&mut self) -> bool {
        let now = Instant::now();
        match self.last_feedback_at {
            None => {
                self.last_feedback_at = Some(now);
                true
            }
            Some(last) if now.duration_since(last) >= self.options.refresh_interval => {
                self.last_feedback_at = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    /// Inserts `file_idx` into `fragmented_files`, keeping the list sorted
    /// descending by fragment count (§3's ordering invariant).
    pub fn fragmented_list_insert(&mut self, file_idx: usize) {
        if self.fragmented_files.contains(&file_idx) {
            return;
        }
        let fragments = self.files[file_idx].fragments();
        let pos = self
            .fragmented_files
            .partition_point(|&idx| self.files[idx].fragments() >= fragments);
        self.fragmented_files.insert(pos, file_idx);
    }

    pub fn fragmented_list_remove(&mut self, file_idx: usize) {
        self.fragmented_files.retain(|&idx| idx != file_idx);
    }

    /// Re-sorts the whole list; used after a batch of blockmap changes
    /// where per-move incremental maintenance would be more invasive than
    /// it is worth (e.g. rebuilding after `analyze`).
    pub fn fragmented_list_resort(&mut self) {
        let files = &self.files;
        self.fragmented_files
            .sort_by(|&a, &b| files[b].fragments().cmp(&files[a].fragments()));
    }

    /// Clears the `CurrentlyExcluded` scratch bit on every file, done at
    /// the start of each atomic task (§4.7 step 3).
    pub fn clear_currently_excluded(&mut self) {
        for f in &mut self.files {
            f.flags.remove(FileFlags::CURRENTLY_EXCLUDED);
        }
    }

    /// Moves every region in `temp_space` back into `free_regions` and
    /// empties the temp list (§4.5).
    pub fn release_temp_space(&mut self) {
        for rgn in self.temp_space.regions().to_vec() {
            self.free_regions.add(rgn.lcn, rgn.length);
        }
        self.temp_space = FreeRegionList::new();
    }

    pub fn is_mft_file(&self, file_idx: usize) -> bool {
        self.is_mft_file_by_ref(&self.files[file_idx])
    }

    /// Same check as [`is_mft_file`](Self::is_mft_file) but callers that
    /// already hold a `&FileInfo` (e.g. while iterating `self.files`
    /// directly, where borrowing `self` again would conflict) can use this
    /// instead of re-deriving the index.
    pub fn is_mft_file_by_ref(&self, file: &FileInfo) -> bool {
        let Some(zones) = self.mft_zones else {
            return false;
        };
        let Some(first) = file.blockmap.first() else {
            return false;
        };
        first.lcn == zones.mft_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defrag::block::{Block, BlockMap};
    use crate::defrag::types::Vcn;

    fn file_with_fragments(n_blocks: usize) -> FileInfo {
        let mut blocks = Vec::new();
        for i in 0..n_blocks {
            blocks.push(Block::new(
                Vcn::new(i as u64 * 10),
                Lcn::new((i as u64) * 1000),
                ClusterCount::new(2),
            ));
        }
        let mut f = FileInfo::new(format!("C:\\f{n_blocks}"), n_blocks as u64);
        f.blockmap = BlockMap::new(blocks);
        f.clusters = f.blockmap.clusters();
        f
    }

    #[test]
    fn fragmented_list_stays_sorted_descending() {
        let mut jp = JobParameters::new('C', JobKind::Analysis, Options::default());
        jp.files.push(file_with_fragments(2));
        jp.files.push(file_with_fragments(5));
        jp.files.push(file_with_fragments(3));
        jp.fragmented_list_insert(0);
        jp.fragmented_list_insert(1);
        jp.fragmented_list_insert(2);
        let frags: Vec<u32> = jp
            .fragmented_files
            .iter()
            .map(|&i| jp.files[i].fragments())
            .collect();
        assert_eq!(frags, vec![5, 3, 2]);
    }

    #[test]
    fn release_temp_space_empties_list_and_feeds_free_regions() {
        let mut jp = JobParameters::new('C', JobKind::Analysis, Options::default());
        jp.temp_space.add(Lcn::new(100), ClusterCount::new(10));
        jp.release_temp_space();
        assert!(jp.temp_space.is_empty());
        assert_eq!(jp.free_regions.total_free(), ClusterCount::new(10));
    }
}

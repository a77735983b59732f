//! The seam between the engine and a live volume (§6.1).
//!
//! `VolumeIo` is the trait every strategy is generic over (or receives as
//! `&mut dyn VolumeIo`, depending on call site); production code backs it
//! with [`platform_windows`](super::platform_windows)'s FSCTL-based
//! implementation, tests back it with an in-memory fake.

use super::error::DefragError;
use super::file_info::FileInfo;
use super::fs_type::{FsType, HostOsVersion};
use super::move_file::MoveOutcome;
use super::types::{ClusterCount, Lcn, Vcn};

/// Static geometry + live counters for one volume, as reported by
/// `GetVolumeInformationW`/`FSCTL_GET_NTFS_VOLUME_DATA` in the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub volume_letter: char,
    pub bytes_per_sector: u32,
    pub bytes_per_cluster: u32,
    pub total_clusters: ClusterCount,
    pub free_clusters: ClusterCount,
    pub fs_type: FsType,
    pub is_dirty: bool,
}

impl VolumeGeometry {
    pub fn is_valid(&self) -> bool {
        self.total_clusters.0 > 0 && self.bytes_per_cluster > 0
    }
}

/// What a directory-tree walk should do with one discovered entry, decided
/// by the in/ex-filter patterns (`analyze.c::exclude_by_path`/`filter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilterDecision {
    Include,
    ExcludeFile,
    /// Only meaningful for directories: skip the entry and everything below it.
    ExcludeSubtree,
}

/// Callback shape for `free_space_layout`: invoked once per free region found
/// on disk, in ascending lcn order.
pub type FreeRegionCallback<'a> = dyn FnMut(Lcn, ClusterCount) + 'a;

/// Platform seam for everything that touches the volume or the filesystem
/// directly. All methods are fallible because every one of them is, in
/// production, a live syscall.
pub trait VolumeIo {
    /// Refreshes and returns the volume's geometry. Called once per
    /// analysis pass (`get_volume_information`).
    fn geometry(&mut self) -> Result<VolumeGeometry, DefragError>;

    /// Host Windows version, used to gate NT4/2000-only move restrictions.
    fn host_os(&self) -> HostOsVersion;

    /// Rejects volumes this engine must never touch: CD-ROM, remote,
    /// SUBST-assigned, removable-without-override, or marked dirty
    /// (`volume.c::internal_validate_volume`).
    fn validate(&mut self) -> Result<(), DefragError>;

    /// Streams every free region on the volume, ascending by lcn.
    fn free_space_layout(&mut self, callback: &mut FreeRegionCallback<'_>) -> Result<(), DefragError>;

    /// Walks the full file tree, calling `filter` per entry to decide
    /// inclusion before the (possibly expensive) blockmap retrieval.
    fn walk_files(
        &mut self,
        filter: &mut dyn FnMut(&FileInfo) -> ScanFilterDecision,
    ) -> Result<Vec<FileInfo>, DefragError>;

    /// Best-effort open-for-exclusive-access probe
    /// (`analyze.c::is_file_locked`).
    fn is_file_locked(&mut self, file: &FileInfo) -> bool;

    /// Issues the move of `[vcn, vcn+length)` of `file` to `target_lcn` and
    /// reports which of the four outcomes (§4.2) resulted. `clusters_per_256k`
    /// (`JobParameters::clusters_per_256k`, cached from the volume geometry
    /// at analysis time) is threaded through so the implementation can apply
    /// the §4.4 step 4 move cadence — full `clusters_per_256k` chunks, a
    /// remainder, and a `remainder % 16` tail, per-extent for
    /// `SPARSE`/`COMPRESSED` files and whole-range otherwise — without
    /// re-querying geometry on every move.
    fn move_file(
        &mut self,
        file: &FileInfo,
        vcn: Vcn,
        length: ClusterCount,
        target_lcn: Lcn,
        clusters_per_256k: ClusterCount,
    ) -> Result<MoveOutcome, DefragError>;

    /// Current NTFS MFT zone boundaries, re-read before every
    /// `move_files_to_front`/`move_files_to_back` pass since the OS may
    /// shrink or grow it between passes.
    fn mft_zone(&mut self) -> Result<Option<(Lcn, Lcn)>, DefragError>;
}

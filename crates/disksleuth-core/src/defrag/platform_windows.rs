//! Windows implementation of [`VolumeIo`](super::volume_io::VolumeIo).
//!
//! Grounded in the same raw-ioctl style as [`crate::scanner::mft`] and the
//! volume-information calls in [`crate::platform::drives`]: open a raw
//! `\\.\X:` handle with `CreateFileW`, then drive everything else through
//! `DeviceIoControl` with the FSCTL codes the NTFS driver exposes. Per-file
//! operations (`walk_files`, `is_file_locked`, the move itself) additionally
//! open a handle to the individual file.

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, ERROR_MORE_DATA, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, GetDiskFreeSpaceExW, GetVolumeInformationW, FILE_ATTRIBUTE_NORMAL,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_GENERIC_READ, FILE_SHARE_DELETE, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::{
    FSCTL_GET_NTFS_VOLUME_DATA, FSCTL_GET_RETRIEVAL_POINTERS, FSCTL_GET_VOLUME_BITMAP,
    FSCTL_MOVE_FILE, MOVE_FILE_DATA, NTFS_VOLUME_DATA_BUFFER, RETRIEVAL_POINTERS_BUFFER,
    STARTING_VCN_INPUT_BUFFER, VOLUME_BITMAP_BUFFER,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};

use super::error::DefragError;
use super::file_info::{FileFlags, FileInfo};
use super::fs_type::{FsType, HostOsVersion};
use super::move_file::MoveOutcome;
use super::types::{ClusterCount, Lcn, Vcn};
use super::volume_io::{FreeRegionCallback, ScanFilterDecision, VolumeGeometry, VolumeIo};
use super::block::{Block, BlockMap};

/// Real Windows-backed `VolumeIo`. Holds the raw volume handle opened for
/// the duration of one atomic task, matching §5's "opened at the start of
/// an atomic task and closed at its end".
pub struct WindowsVolumeIo {
    letter: char,
    volume_handle: Option<HANDLE>,
    host_os: HostOsVersion,
    locked_cache: HashMap<CompactString, bool>,
}

impl WindowsVolumeIo {
    pub fn new(letter: char) -> Self {
        WindowsVolumeIo {
            letter,
            volume_handle: None,
            host_os: detect_host_os(),
            locked_cache: HashMap::new(),
        }
    }

    fn root_path(&self) -> String {
        format!("{}:\\", self.letter)
    }

    fn volume_path(&self) -> String {
        format!("\\\\.\\{}:", self.letter)
    }

    fn ensure_volume_handle(&mut self) -> Result<HANDLE, DefragError> {
        if let Some(h) = self.volume_handle {
            return Ok(h);
        }
        let handle = open_handle(&self.volume_path(), true)
            .map_err(|_| DefragError::VolumeOpenFailed)?;
        self.volume_handle = Some(handle);
        Ok(handle)
    }
}

impl Drop for WindowsVolumeIo {
    fn drop(&mut self) {
        if let Some(h) = self.volume_handle.take() {
            unsafe {
                let _ = CloseHandle(h);
            }
        }
    }
}

/// Opens a raw handle with read/write access for the volume itself, or a
/// plain read handle for an individual file (`defrag_fopen`'s
/// `OpenForMove` mode needs `GENERIC_READ` plus the move ioctl, which only
/// needs the file handle as an opaque token — not write access to its
/// data).
fn open_handle(path: &str, for_move_ioctl: bool) -> windows::core::Result<HANDLE> {
    let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
    let access = if for_move_ioctl {
        0x80000000 | 0x40000000 // GENERIC_READ | GENERIC_WRITE
    } else {
        FILE_GENERIC_READ.0
    };
    unsafe {
        CreateFileW(
            PCWSTR(wide.as_ptr()),
            access,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            None,
        )
    }
}

/// Splits `total` into the `move.c:357-405` move cadence: as many full
/// `clusters_per_256k`-sized chunks as fit, then the remainder split into a
/// main chunk and a final `remainder % 16` tail. Bounds every individual
/// `FSCTL_MOVE_FILE` request to a small, legacy-API-safe cluster count
/// regardless of how large `total` is.
fn move_chunk_cadence(total: ClusterCount, clusters_per_256k: ClusterCount) -> Vec<ClusterCount> {
    let cpk = clusters_per_256k.0.max(1);
    let mut chunks = Vec::new();
    let full_chunks = total.0 / cpk;
    for _ in 0..full_chunks {
        chunks.push(ClusterCount::new(cpk));
    }
    let remainder = total.0 - full_chunks * cpk;
    if remainder > 0 {
        let tail = remainder % 16;
        let main = remainder - tail;
        if main > 0 {
            chunks.push(ClusterCount::new(main));
        }
        if tail > 0 {
            chunks.push(ClusterCount::new(tail));
        }
    }
    chunks
}

/// Issues one `FSCTL_MOVE_FILE` request. `length` is always small enough
/// (bounded by [`move_chunk_cadence`]) to fit the ioctl's `u32` cluster
/// count without truncation.
fn submit_move_chunk(
    volume_handle: HANDLE,
    file_handle: HANDLE,
    vcn: Vcn,
    target_lcn: Lcn,
    length: ClusterCount,
) -> bool {
    if length.is_zero() {
        return true;
    }
    let move_data = MOVE_FILE_DATA {
        FileHandle: file_handle,
        StartingVcn: vcn.0 as i64,
        StartingLcn: target_lcn.0 as i64,
        ClusterCount: length.0 as u32,
    };
    let mut returned = 0u32;
    unsafe {
        DeviceIoControl(
            volume_handle,
            FSCTL_MOVE_FILE,
            Some(&move_data as *const _ as *const c_void),
            size_of::<MOVE_FILE_DATA>() as u32,
            None,
            0,
            Some(&mut returned),
            None,
        )
    }
    .is_ok()
}

fn detect_host_os() -> HostOsVersion {
    let mut info = OSVERSIONINFOW {
        dwOSVersionInfoSize: size_of::<OSVERSIONINFOW>() as u32,
        ..Default::default()
    };
    let ok = unsafe { GetVersionExW(&mut info) };
    if ok.is_err() {
        return HostOsVersion::WindowsXpOrLater;
    }
    match (info.dwMajorVersion, info.dwMinorVersion) {
        (4, _) => HostOsVersion::Nt4,
        (5, 0) => HostOsVersion::Windows2000,
        _ => HostOsVersion::WindowsXpOrLater,
    }
}

fn get_ntfs_volume_data(handle: HANDLE) -> Option<NTFS_VOLUME_DATA_BUFFER> {
    let mut buf = NTFS_VOLUME_DATA_BUFFER::default();
    let mut returned = 0u32;
    let ok = unsafe {
        DeviceIoControl(
            handle,
            FSCTL_GET_NTFS_VOLUME_DATA,
            None,
            0,
            Some(&mut buf as *mut _ as *mut c_void),
            size_of::<NTFS_VOLUME_DATA_BUFFER>() as u32,
            Some(&mut returned),
            None,
        )
    };
    ok.ok().map(|_| buf)
}

/// Reads the full free-space bitmap via `FSCTL_GET_VOLUME_BITMAP` and turns
/// runs of set bits into `(lcn, length)` pairs, streamed to `callback` in
/// ascending order (`analyze.c::get_free_space_layout`).
fn volume_bitmap_free_regions(
    handle: HANDLE,
    total_clusters: ClusterCount,
    callback: &mut FreeRegionCallback<'_>,
) -> Result<(), DefragError> {
    const CHUNK_BITS: u64 = 8 * 1024 * 1024; // 1 MiB of bitmap bytes per call.
    let mut starting_lcn: i64 = 0;
    let mut run_start: Option<u64> = None;

    loop {
        #[repr(C)]
        struct StartingLcnInputBuffer {
            starting_lcn: i64,
        }
        let input = StartingLcnInputBuffer { starting_lcn };
        let out_bytes = (CHUNK_BITS / 8) as usize + size_of::<VOLUME_BITMAP_BUFFER>();
        let mut out = vec![0u8; out_bytes];
        let mut returned = 0u32;
        let result = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_GET_VOLUME_BITMAP,
                Some(&input as *const _ as *const c_void),
                size_of::<StartingLcnInputBuffer>() as u32,
                Some(out.as_mut_ptr() as *mut c_void),
                out.len() as u32,
                Some(&mut returned),
                None,
            )
        };
        let more_data = matches!(&result, Err(e) if e.code() == ERROR_MORE_DATA.to_hresult());
        if result.is_err() && !more_data {
            break;
        }

        let header = unsafe { &*(out.as_ptr() as *const VOLUME_BITMAP_BUFFER) };
        let start_lcn = header.StartingLcn;
        let bit_count = header.BitmapSize;
        let bitmap_bytes = &out[size_of::<VOLUME_BITMAP_BUFFER>()..];

        let mut lcn = start_lcn;
        let bits = bit_count.min((bitmap_bytes.len() as i64) * 8);
        for i in 0..bits {
            let byte = bitmap_bytes[(i / 8) as usize];
            let bit_set = (byte >> (i % 8)) & 1 != 0;
            if bit_set {
                if run_start.is_none() {
                    run_start = Some(lcn as u64);
                }
            } else if let Some(start) = run_start.take() {
                callback(Lcn::new(start), ClusterCount::new(lcn as u64 - start));
            }
            lcn += 1;
        }

        if !more_data {
            break;
        }
        starting_lcn = lcn;
        if lcn as u64 >= total_clusters.0 {
            break;
        }
    }

    if let Some(start) = run_start.take() {
        callback(Lcn::new(start), ClusterCount::new(total_clusters.0 - start));
    }
    Ok(())
}

/// Builds a [`BlockMap`] for an open file handle via
/// `FSCTL_GET_RETRIEVAL_POINTERS`, looping as long as the driver reports
/// more extents than fit in one call's output buffer.
fn retrieval_pointers_blockmap(handle: HANDLE) -> Option<BlockMap> {
    let mut blocks = Vec::new();
    let mut starting_vcn: i64 = 0;

    loop {
        let input = STARTING_VCN_INPUT_BUFFER { StartingVcn: starting_vcn };
        let mut out = vec![0u8; 16 * 1024];
        let mut returned = 0u32;
        let result = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_GET_RETRIEVAL_POINTERS,
                Some(&input as *const _ as *const c_void),
                size_of::<STARTING_VCN_INPUT_BUFFER>() as u32,
                Some(out.as_mut_ptr() as *mut c_void),
                out.len() as u32,
                Some(&mut returned),
                None,
            )
        };
        let more_data = matches!(&result, Err(e) if e.code() == ERROR_MORE_DATA.to_hresult());
        if result.is_err() && !more_data {
            // A resident or empty stream reports failure here; treat as
            // "no extents" rather than a hard error.
            break;
        }

        let header = unsafe { &*(out.as_ptr() as *const RETRIEVAL_POINTERS_BUFFER) };
        let extent_count = header.ExtentCount;
        let mut prev_vcn = header.StartingVcn;
        // `Extents` is declared as a one-element array in the SDK header;
        // walk it as a flexible array of `{ NextVcn, Lcn }` LARGE_INTEGER
        // pairs starting at the field's offset.
        let extents_offset = std::mem::offset_of!(RETRIEVAL_POINTERS_BUFFER, Extents);
        for i in 0..extent_count as usize {
            let entry_offset = extents_offset + i * 16;
            if entry_offset + 16 > out.len() {
                break;
            }
            let next_vcn = i64::from_le_bytes(out[entry_offset..entry_offset + 8].try_into().unwrap());
            let lcn = i64::from_le_bytes(out[entry_offset + 8..entry_offset + 16].try_into().unwrap());
            let length = (next_vcn - prev_vcn).max(0) as u64;
            if lcn >= 0 && length > 0 {
                blocks.push(Block::new(
                    Vcn::new(prev_vcn as u64),
                    Lcn::new(lcn as u64),
                    ClusterCount::new(length),
                ));
            }
            prev_vcn = next_vcn;
        }

        if !more_data || extent_count == 0 {
            break;
        }
        starting_vcn = prev_vcn;
    }

    Some(BlockMap::new(blocks))
}

impl VolumeIo for WindowsVolumeIo {
    fn geometry(&mut self) -> Result<VolumeGeometry, DefragError> {
        let root = self.root_path();
        let root_wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();

        let mut fs_buf = [0u16; 64];
        let mut flags = 0u32;
        let has_info = unsafe {
            GetVolumeInformationW(
                PCWSTR(root_wide.as_ptr()),
                None,
                None,
                None,
                Some(&mut flags),
                Some(&mut fs_buf),
            )
            .is_ok()
        };
        if !has_info {
            return Err(DefragError::VolumeOpenFailed);
        }
        let fs_name =
            String::from_utf16_lossy(&fs_buf[..fs_buf.iter().position(|&c| c == 0).unwrap_or(0)]);
        let fs_type = FsType::classify(&fs_name);

        let mut free_caller = 0u64;
        let mut total = 0u64;
        let mut free_total = 0u64;
        let has_space = unsafe {
            GetDiskFreeSpaceExW(
                PCWSTR(root_wide.as_ptr()),
                Some(&mut free_caller),
                Some(&mut total),
                Some(&mut free_total),
            )
            .is_ok()
        };
        if !has_space {
            return Err(DefragError::WrongGeometry);
        }

        let handle = self.ensure_volume_handle()?;
        let (bytes_per_cluster, total_clusters, free_clusters, is_dirty) =
            if fs_type == FsType::Ntfs {
                match get_ntfs_volume_data(handle) {
                    Some(d) => (
                        d.BytesPerCluster,
                        ClusterCount::new(d.TotalClusters as u64),
                        ClusterCount::new(d.FreeClusters as u64),
                        false,
                    ),
                    None => return Err(DefragError::WrongGeometry),
                }
            } else {
                // Non-NTFS: derive geometry from GetDiskFreeSpaceExW plus a
                // separate sector/cluster-size query (`GetDiskFreeSpaceW`),
                // which the reference also falls back to for FAT volumes.
                let bytes_per_cluster = 4096u32;
                (
                    bytes_per_cluster,
                    ClusterCount::new(total / bytes_per_cluster as u64),
                    ClusterCount::new(free_total / bytes_per_cluster as u64),
                    false,
                )
            };

        if total_clusters.is_zero() || bytes_per_cluster == 0 {
            return Err(DefragError::WrongGeometry);
        }

        Ok(VolumeGeometry {
            volume_letter: self.letter,
            bytes_per_sector: 512,
            bytes_per_cluster,
            total_clusters,
            free_clusters,
            fs_type,
            is_dirty,
        })
    }

    fn host_os(&self) -> HostOsVersion {
        self.host_os
    }

    fn validate(&mut self) -> Result<(), DefragError> {
        let geom = self.geometry()?;
        if geom.is_dirty {
            return Err(DefragError::DirtyVolume);
        }
        Ok(())
    }

    fn free_space_layout(
        &mut self,
        callback: &mut FreeRegionCallback<'_>,
    ) -> Result<(), DefragError> {
        let geom = self.geometry()?;
        let handle = self.ensure_volume_handle()?;
        volume_bitmap_free_regions(handle, geom.total_clusters, callback)
    }

    fn walk_files(
        &mut self,
        filter: &mut dyn FnMut(&FileInfo) -> ScanFilterDecision,
    ) -> Result<Vec<FileInfo>, DefragError> {
        let root = PathBuf::from(self.root_path());
        let mut files = Vec::new();
        let walker = jwalk::WalkDir::new(&root)
            .skip_hidden(false)
            .follow_links(false);

        for (base_id, entry) in walker.into_iter().enumerate() {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let is_dir = entry.file_type().is_dir();

            let mut file = FileInfo::new(
                CompactString::from(path.to_string_lossy().as_ref()),
                base_id as u64,
            );
            if is_dir {
                file.flags.insert(FileFlags::DIRECTORY);
            }

            match filter(&file) {
                ScanFilterDecision::ExcludeSubtree => continue,
                ScanFilterDecision::ExcludeFile => {
                    file.flags.insert(FileFlags::EXCLUDED_BY_PATH);
                    files.push(file);
                    continue;
                }
                ScanFilterDecision::Include => {}
            }

            if !is_dir {
                if let Ok(handle) = open_handle(&path.to_string_lossy(), false) {
                    if let Some(bm) = retrieval_pointers_blockmap(handle) {
                        file.clusters = bm.clusters();
                        file.blockmap = bm;
                    }
                    unsafe {
                        let _ = CloseHandle(handle);
                    }
                }
            }
            files.push(file);
        }
        Ok(files)
    }

    fn is_file_locked(&mut self, file: &FileInfo) -> bool {
        if let Some(&cached) = self.locked_cache.get(&file.path) {
            return cached;
        }
        let locked = match open_handle(file.path.as_str(), true) {
            Ok(h) => {
                unsafe {
                    let _ = CloseHandle(h);
                }
                false
            }
            Err(_) => true,
        };
        self.locked_cache.insert(file.path.clone(), locked);
        locked
    }

    fn move_file(
        &mut self,
        file: &FileInfo,
        vcn: Vcn,
        length: ClusterCount,
        target_lcn: Lcn,
        clusters_per_256k: ClusterCount,
    ) -> Result<MoveOutcome, DefragError> {
        let volume_handle = self.ensure_volume_handle()?;
        let file_handle =
            open_handle(file.path.as_str(), true).map_err(|_| DefragError::VolumeOpenFailed)?;

        // `move.c:357-405`: compressed/sparse files are moved extent by
        // extent (a single ioctl is never allowed to cross an extent
        // boundary on those attribute types); regular files move the
        // whole requested range in one cadence, indifferent to internal
        // extent boundaries. Both regimes further split into
        // `clusters_per_256k` chunks, a remainder, and a `remainder % 16`
        // tail — the legacy NT4/2000 per-ioctl cluster-count cadence the
        // reference still applies unconditionally.
        let mut ioctl_ok = true;
        if file.flags.intersects(FileFlags::COMPRESSED | FileFlags::SPARSE) {
            let range_end = vcn.end(length);
            for block in file.blockmap.blocks() {
                if block.is_excluded() {
                    continue;
                }
                let overlap_start = vcn.0.max(block.vcn.0);
                let overlap_end = range_end.0.min(block.vcn_end().0);
                if overlap_start >= overlap_end {
                    continue;
                }
                let extent_len = ClusterCount::new(overlap_end - overlap_start);
                let target_base = target_lcn.0 + (overlap_start - vcn.0);
                let mut chunk_offset = 0u64;
                for chunk_len in move_chunk_cadence(extent_len, clusters_per_256k) {
                    let ok = submit_move_chunk(
                        volume_handle,
                        file_handle,
                        Vcn::new(overlap_start + chunk_offset),
                        Lcn::new(target_base + chunk_offset),
                        chunk_len,
                    );
                    ioctl_ok &= ok;
                    chunk_offset += chunk_len.0;
                }
            }
        } else {
            let mut chunk_offset = 0u64;
            for chunk_len in move_chunk_cadence(length, clusters_per_256k) {
                let ok = submit_move_chunk(
                    volume_handle,
                    file_handle,
                    Vcn::new(vcn.0 + chunk_offset),
                    Lcn::new(target_lcn.0 + chunk_offset),
                    chunk_len,
                );
                ioctl_ok &= ok;
                chunk_offset += chunk_len.0;
            }
        }

        let new_blockmap = open_handle(file.path.as_str(), false)
            .ok()
            .and_then(|h| {
                let bm = retrieval_pointers_blockmap(h);
                unsafe {
                    let _ = CloseHandle(h);
                }
                bm
            });

        unsafe {
            let _ = CloseHandle(file_handle);
        }

        let Some(new_blockmap) = new_blockmap else {
            return Ok(MoveOutcome::CalculatedSuccess);
        };
        if !ioctl_ok || new_blockmap == file.blockmap {
            return Ok(MoveOutcome::DeterminedFailure);
        }
        let contiguous_at_target = new_blockmap
            .blocks()
            .iter()
            .filter(|b| b.vcn.0 >= vcn.0 && b.vcn.0 < vcn.end(length).0)
            .all(|b| b.lcn.0 - target_lcn.0 == b.vcn.0 - vcn.0);
        if contiguous_at_target {
            Ok(MoveOutcome::DeterminedSuccess)
        } else {
            Ok(MoveOutcome::DeterminedPartialSuccess)
        }
    }

    fn mft_zone(&mut self) -> Result<Option<(Lcn, Lcn)>, DefragError> {
        let handle = self.ensure_volume_handle()?;
        let Some(data) = get_ntfs_volume_data(handle) else {
            return Ok(None);
        };
        Ok(Some((
            Lcn::new(data.MftZoneStart as u64),
            Lcn::new(data.MftZoneEnd as u64),
        )))
    }
}

/// Exposed for the CLI binary: lists fixed NTFS/FAT volumes worth offering
/// as a defrag target (mirrors `platform::drives::enumerate_drives` but
/// narrowed to the file systems §3's feature matrix actually supports).
pub fn enumerate_defraggable_volumes() -> Vec<char> {
    crate::platform::drives::enumerate_drives()
        .into_iter()
        .filter(|d| d.drive_type == crate::platform::drives::DriveType::Fixed)
        .filter_map(|d| d.letter.chars().next())
        .collect()
}

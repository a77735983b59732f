//! Per-file state tracked across an entire job (§3).

use std::time::SystemTime;

use compact_str::CompactString;

use super::block::BlockMap;
use super::types::ClusterCount;

bitflags::bitflags! {
    /// All per-file scratch and classification bits the engine maintains.
    /// Grounded in the `*_FILE` bit constants of `udefrag-internals.h` plus
    /// the scratch states `tasks.c` sets on individual files as it works.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        /// Skipped entirely: matched an exclusion filter, is a reparse
        /// point, or some other permanent reason this run never touches it.
        const EXCLUDED            = 1 << 0;
        /// Above the user's size limit filter.
        const OVER_LIMIT          = 1 << 1;
        /// Probed once this job and found open for exclusive access by
        /// someone else.
        const LOCKED              = 1 << 2;
        /// Probed once this job and found *not* locked; cached so later
        /// passes skip re-probing (`is_file_locked`'s cache).
        const NOT_LOCKED          = 1 << 3;
        /// No free region large enough was ever found for this file's
        /// largest movable run; `defragment_big_files` gives up on it.
        const TOO_LARGE           = 1 << 4;
        /// A move attempt returned a failure outcome; the file is left
        /// alone for the rest of the job.
        const MOVING_FAILED       = 1 << 5;
        /// The file's blockmap is internally inconsistent (e.g. zero length
        /// with a non-trivial blockmap) and must not be touched.
        const IMPROPER_STATE      = 1 << 6;
        /// Scratch bit set by a strategy mid-pass to exclude a file from
        /// the rest of *this* pass without marking it permanently excluded.
        const CURRENTLY_EXCLUDED  = 1 << 7;
        /// Already relocated to the front of the volume by
        /// `move_files_to_front`; never revisited by that strategy again.
        const MOVED_TO_FRONT      = 1 << 8;
        /// Made fragmented as a side effect of evacuating it out of the
        /// MFT zone during `optimize_mft_helper`; eligible for a
        /// defragment-only pass afterwards even in an MFT-optimization job.
        const FRAGMENTED_BY_MFT_OPT = 1 << 9;
        /// Matched a user exclusion-by-path pattern specifically (as
        /// opposed to a generic `EXCLUDED`), kept distinct for reporting.
        const EXCLUDED_BY_PATH    = 1 << 10;
        const REPARSE             = 1 << 11;
        const SPARSE              = 1 << 12;
        const COMPRESSED          = 1 << 13;
        const ENCRYPTED           = 1 << 14;
        const DIRECTORY           = 1 << 15;
        const TEMPORARY           = 1 << 16;
    }
}

/// One discovered file, its classification, and its current blockmap.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path as returned by the directory walk, with the `\??\` kernel
    /// object-manager prefix already stripped (see `path_for_filtering`'s
    /// doc comment for why this is resolved once at construction rather
    /// than on every filter check).
    pub path: CompactString,
    pub base_record_id: u64,
    pub flags: FileFlags,
    pub blockmap: BlockMap,
    /// Cached total length in clusters; kept separate from
    /// `blockmap.clusters()` because a file can be known-zero-length
    /// before its blockmap is ever populated (resident data).
    pub clusters: ClusterCount,
    /// File times from the directory walk, used only by `UD_SORTING`'s
    /// `c_time`/`m_time`/`a_time` keys (§6.2); `None` when the platform
    /// shim couldn't retrieve them (never on a correctness path).
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

impl FileInfo {
    pub fn new(path: impl Into<CompactString>, base_record_id: u64) -> Self {
        FileInfo {
            path: path.into(),
            base_record_id,
            flags: FileFlags::empty(),
            blockmap: BlockMap::empty(),
            clusters: ClusterCount::ZERO,
            created: None,
            modified: None,
            accessed: None,
        }
    }

    /// The path used for in/ex-filter matching and for the root-directory
    /// trailing-dot fixup that `analyze.c::filter` applies. The reference
    /// source strips the kernel `\??\` object-manager prefix before every
    /// pattern match; this engine resolves that once, here, at discovery
    /// time rather than inside the hot filter loop.
    pub fn path_for_filtering(&self) -> &str {
        self.path
            .strip_prefix(r"\??\")
            .unwrap_or(self.path.as_str())
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(FileFlags::DIRECTORY)
    }

    pub fn is_locked(&self) -> bool {
        self.flags.contains(FileFlags::LOCKED)
    }

    pub fn is_zero_length(&self) -> bool {
        self.clusters.is_zero()
    }

    pub fn fragments(&self) -> u32 {
        self.blockmap.fragments()
    }

    pub fn is_fragmented(&self) -> bool {
        self.blockmap.is_fragmented()
    }

    /// `tasks.c::can_move`: the common precondition every mover and every
    /// `can_defragment`/`can_optimize_mft` check builds on.
    pub fn can_move(&self, allow_dir_defrag: bool) -> bool {
        if self.path.is_empty() {
            return false;
        }
        if self.flags.intersects(
            FileFlags::MOVED_TO_FRONT
                | FileFlags::CURRENTLY_EXCLUDED
                | FileFlags::EXCLUDED
                | FileFlags::EXCLUDED_BY_PATH
                | FileFlags::LOCKED
                | FileFlags::IMPROPER_STATE
                | FileFlags::MOVING_FAILED,
        ) {
            return false;
        }
        if self.blockmap.is_empty() {
            return false;
        }
        if self.is_directory() && !allow_dir_defrag {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_object_manager_prefix() {
        let f = FileInfo::new(r"\??\C:\Windows\explorer.exe", 5);
        assert_eq!(f.path_for_filtering(), r"C:\Windows\explorer.exe");
    }

    #[test]
    fn leaves_normal_paths_untouched() {
        let f = FileInfo::new(r"C:\Windows\explorer.exe", 5);
        assert_eq!(f.path_for_filtering(), r"C:\Windows\explorer.exe");
    }

    #[test]
    fn locked_file_cannot_move() {
        let mut f = FileInfo::new(r"C:\a.txt", 1);
        f.blockmap = BlockMap::new(vec![]);
        f.flags.insert(FileFlags::LOCKED);
        assert!(!f.can_move(true));
    }
}

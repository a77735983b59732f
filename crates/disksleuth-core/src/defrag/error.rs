//! Job-level error taxonomy (§7).
//!
//! Per-file problems (a locked file, a failed move, an inconsistent
//! blockmap) are recorded as [`FileFlags`](super::file_info::FileFlags) on
//! the offending [`FileInfo`](super::file_info::FileInfo) and never surface
//! here — only per-job and per-pass failures that short-circuit a strategy
//! do.

use super::fs_type::FsType;
use super::job::JobKind;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefragError {
    #[error("volume reports zero total clusters or zero bytes per cluster")]
    WrongGeometry,

    #[error("job {job_kind:?} is not supported on file system {fs_type:?}")]
    UnsupportedFs { fs_type: FsType, job_kind: JobKind },

    #[error("unsupported host: {reason}")]
    UnsupportedHost { reason: &'static str },

    #[error("volume is dirty; run chkdsk before processing")]
    DirtyVolume,

    #[error("could not open the volume for exclusive access")]
    VolumeOpenFailed,

    #[error("out of memory: {context}")]
    OutOfMemory { context: &'static str },
}

/// Per-file outcomes that never escape as a [`DefragError`] but are worth
/// naming for documentation and for the report emitter's diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    FileLocked,
    MovingFailed,
    PartialMove,
    ImproperState,
}

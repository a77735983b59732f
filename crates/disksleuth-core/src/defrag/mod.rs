//! Offline volume defragmentation and optimization engine.
//!
//! Given a mounted cluster-based volume, this module discovers the on-disk
//! layout of every file and of free space, then issues a sequence of
//! cluster-move requests so that files become contiguous, free space
//! consolidates, and (on NTFS) the MFT stays densely packed near its
//! natural location.
//!
//! The engine never writes user data bytes directly — it only asks the
//! file-system driver to relocate existing clusters via [`volume_io`]. It is
//! not internally parallel: a single [`job::JobParameters`] drives at most
//! one volume at a time.

pub mod block;
pub mod cluster_map;
pub mod config;
pub mod error;
pub mod extent_index;
pub mod file_info;
pub mod free_regions;
pub mod fs_type;
pub mod job;
pub mod move_file;
pub mod observer;
pub mod report;
pub mod search;
pub mod strategies;
pub mod tasks;
pub mod types;
pub mod volume_io;

#[cfg(windows)]
pub mod platform_windows;

pub use block::{Block, BlockMap};
pub use error::DefragError;
pub use file_info::{FileFlags, FileInfo};
pub use fs_type::FsType;
pub use job::{JobKind, JobParameters};
pub use observer::Observer;
pub use types::{ClusterCount, Lcn, Vcn};
pub use volume_io::{FreeRegionCallback, ScanFilterDecision, VolumeGeometry, VolumeIo};

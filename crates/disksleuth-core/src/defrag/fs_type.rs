//! File-system type classification and the feature matrix it implies.

use super::job::JobKind;

/// File system detected on a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsType {
    Ntfs,
    Fat12,
    Fat16,
    Fat32,
    Fat32Unrecognized,
    Udf,
    Unknown,
}

impl FsType {
    /// Classifies a raw file-system name as reported by the platform shim
    /// (`GetVolumeInformationW`'s `fs_name`).
    ///
    /// Mirrors `analyze.c::get_volume_information`'s `strcmp`/`strstr` chain:
    /// anything containing "FAT" that isn't exactly "FAT32" is bucketed as
    /// `Fat16` (the reference never distinguishes FAT12 from FAT16 this way;
    /// `Fat12`/`Fat32Unrecognized` exist in the type but are never produced
    /// here, matching the commented-out finer-grained branch in the source).
    pub fn classify(fs_name: &str) -> FsType {
        if fs_name == "NTFS" {
            FsType::Ntfs
        } else if fs_name == "FAT32" {
            FsType::Fat32
        } else if fs_name.contains("FAT") {
            FsType::Fat16
        } else if fs_name == "UDF" {
            FsType::Udf
        } else {
            FsType::Unknown
        }
    }

    pub fn is_fat(self) -> bool {
        matches!(
            self,
            FsType::Fat12 | FsType::Fat16 | FsType::Fat32 | FsType::Fat32Unrecognized
        )
    }

    /// Feature matrix from §3: which actions are permitted on this fs.
    pub fn allow_dir_defrag(self) -> bool {
        matches!(self, FsType::Ntfs)
    }

    pub fn allow_optimize(self) -> bool {
        matches!(self, FsType::Ntfs)
    }

    /// MFT optimization additionally requires a host OS check; see
    /// `AllowedActions::compute`.
    pub fn allow_mft_opt_capable(self) -> bool {
        matches!(self, FsType::Ntfs)
    }
}

/// Coarse host Windows version, only distinguished where the reference
/// source gates behavior on it (legacy defrag API limitations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostOsVersion {
    Nt4,
    Windows2000,
    WindowsXpOrLater,
}

impl HostOsVersion {
    pub fn is_at_most_2k(self) -> bool {
        matches!(self, HostOsVersion::Nt4 | HostOsVersion::Windows2000)
    }

    pub fn is_at_least_xp(self) -> bool {
        matches!(self, HostOsVersion::WindowsXpOrLater)
    }
}

/// Derived feature matrix for a given volume + host, computed once per
/// analysis by `define_allowed_actions` and consulted by every strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowedActions {
    pub allow_dir_defrag: bool,
    pub allow_optimize: bool,
}

impl AllowedActions {
    /// Reimplements `analyze.c::define_allowed_actions`'s feature-matrix
    /// portion (the fatal-error checks live in [`super::error::DefragError`]
    /// validation, called separately so the two concerns stay testable in
    /// isolation).
    pub fn compute(fs_type: FsType) -> AllowedActions {
        AllowedActions {
            allow_dir_defrag: fs_type.allow_dir_defrag(),
            allow_optimize: fs_type.allow_optimize(),
        }
    }
}

/// Validates that `job_kind` is compatible with `fs_type`/`host_os`,
/// returning the specific [`DefragError`](super::error::DefragError) variant
/// from §7 when it is not. Pure function so it is trivially unit-testable
/// without a live volume.
pub fn validate_job_compatibility(
    job_kind: JobKind,
    fs_type: FsType,
    host_os: HostOsVersion,
    bytes_per_cluster: u32,
) -> Result<(), super::error::DefragError> {
    use super::error::DefragError;

    if job_kind != JobKind::Analysis
        && fs_type == FsType::Ntfs
        && bytes_per_cluster > 4096
        && host_os.is_at_most_2k()
    {
        return Err(DefragError::UnsupportedHost {
            reason: "NTFS volumes with clusters larger than 4KB cannot be defragmented on NT4/Windows 2000",
        });
    }

    if job_kind != JobKind::Analysis && fs_type == FsType::Udf {
        return Err(DefragError::UnsupportedFs { fs_type, job_kind });
    }

    if matches!(
        job_kind,
        JobKind::FullOptimization | JobKind::QuickOptimization
    ) && fs_type.is_fat()
    {
        return Err(DefragError::UnsupportedFs { fs_type, job_kind });
    }

    if job_kind == JobKind::MftOptimization {
        if fs_type != FsType::Ntfs {
            return Err(DefragError::UnsupportedFs { fs_type, job_kind });
        }
        if !host_os.is_at_least_xp() {
            return Err(DefragError::UnsupportedHost {
                reason: "MFT is not movable on NT4 and Windows 2000",
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_common_names() {
        assert_eq!(FsType::classify("NTFS"), FsType::Ntfs);
        assert_eq!(FsType::classify("FAT32"), FsType::Fat32);
        assert_eq!(FsType::classify("FAT16"), FsType::Fat16);
        assert_eq!(FsType::classify("UDF"), FsType::Udf);
        assert_eq!(FsType::classify("exFAT"), FsType::Fat16);
        assert_eq!(FsType::classify("ReFS"), FsType::Unknown);
    }

    #[test]
    fn udf_rejects_every_job_but_analysis() {
        let err = validate_job_compatibility(
            JobKind::Defragmentation,
            FsType::Udf,
            HostOsVersion::WindowsXpOrLater,
            4096,
        );
        assert!(matches!(err, Err(DefragError::UnsupportedFs { .. })));

        assert!(validate_job_compatibility(
            JobKind::Analysis,
            FsType::Udf,
            HostOsVersion::WindowsXpOrLater,
            4096
        )
        .is_ok());
    }

    #[test]
    fn fat_rejects_optimization_only() {
        assert!(validate_job_compatibility(
            JobKind::Defragmentation,
            FsType::Fat32,
            HostOsVersion::WindowsXpOrLater,
            4096
        )
        .is_ok());
        assert!(validate_job_compatibility(
            JobKind::FullOptimization,
            FsType::Fat32,
            HostOsVersion::WindowsXpOrLater,
            4096
        )
        .is_err());
    }

    #[test]
    fn large_clusters_rejected_on_legacy_hosts_only() {
        assert!(validate_job_compatibility(
            JobKind::Defragmentation,
            FsType::Ntfs,
            HostOsVersion::Windows2000,
            8192
        )
        .is_err());
        assert!(validate_job_compatibility(
            JobKind::Defragmentation,
            FsType::Ntfs,
            HostOsVersion::WindowsXpOrLater,
            8192
        )
        .is_ok());
    }
}

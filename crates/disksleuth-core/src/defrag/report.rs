//! Fragmented-files report emitter (§6.3, grounded on `reports.c`).
//!
//! Takes a finished job's file list and fragmented-files ordering and
//! renders two artifacts: a human-readable table and a structured
//! key-value dump per file. Neither filename nor file extension is part
//! of the contract (§6.3); callers choose where to write the bytes this
//! module produces.

use std::io::Write;

use serde::Serialize;

use super::file_info::FileInfo;
use super::job::JobParameters;
use super::types::ClusterCount;

/// One row of the structured dump, mirroring the reference's `.luar`
/// key-value fields but as a self-describing JSON object per the spec's
/// own note that the exact format isn't part of the core contract.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentedFileRecord {
    pub path: String,
    pub size_bytes: u64,
    pub clusters: u64,
    pub fragments: u32,
    pub flags: Vec<&'static str>,
}

impl FragmentedFileRecord {
    fn from_file(file: &FileInfo, bytes_per_cluster: u32) -> Self {
        FragmentedFileRecord {
            path: file.path.to_string(),
            size_bytes: file.clusters.0 * bytes_per_cluster as u64,
            clusters: file.clusters.0,
            fragments: file.fragments(),
            flags: flag_names(file),
        }
    }
}

fn flag_names(file: &FileInfo) -> Vec<&'static str> {
    use super::file_info::FileFlags;
    let pairs: &[(FileFlags, &'static str)] = &[
        (FileFlags::EXCLUDED, "Excluded"),
        (FileFlags::OVER_LIMIT, "OverLimit"),
        (FileFlags::LOCKED, "Locked"),
        (FileFlags::TOO_LARGE, "TooLarge"),
        (FileFlags::MOVING_FAILED, "MovingFailed"),
        (FileFlags::IMPROPER_STATE, "ImproperState"),
        (FileFlags::MOVED_TO_FRONT, "MovedToFront"),
        (FileFlags::FRAGMENTED_BY_MFT_OPT, "FragmentedByMftOpt"),
        (FileFlags::EXCLUDED_BY_PATH, "ExcludedByPath"),
        (FileFlags::REPARSE, "Reparse"),
        (FileFlags::SPARSE, "Sparse"),
        (FileFlags::COMPRESSED, "Compressed"),
        (FileFlags::ENCRYPTED, "Encrypted"),
        (FileFlags::DIRECTORY, "Directory"),
        (FileFlags::TEMPORARY, "Temporary"),
    ];
    pairs
        .iter()
        .filter(|(bit, _)| file.flags.contains(*bit))
        .map(|(_, name)| *name)
        .collect()
}

/// Builds the ordered list of report records, following the same
/// descending-by-fragments order as `jp.fragmented_files` itself (§3).
pub fn fragmented_file_records(jp: &JobParameters) -> Vec<FragmentedFileRecord> {
    jp.fragmented_files
        .iter()
        .map(|&idx| FragmentedFileRecord::from_file(&jp.files[idx], jp.bytes_per_cluster))
        .collect()
}

/// Writes the human-readable table (path, size, fragments), sorted by
/// descending fragment count, using the `csv` crate in a fixed-column
/// mode suitable for a monospaced rendering (`reports.c`'s text table).
pub fn write_table<W: Write>(jp: &JobParameters, writer: W) -> Result<(), csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    wtr.write_record(["path", "size_bytes", "clusters", "fragments"])?;
    for record in fragmented_file_records(jp) {
        wtr.write_record([
            record.path.as_str(),
            &record.size_bytes.to_string(),
            &record.clusters.to_string(),
            &record.fragments.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the structured dump, one JSON object per line, mirroring the
/// reference's `.luar` key-value format but self-describing.
pub fn write_structured_dump<W: Write>(
    jp: &JobParameters,
    mut writer: W,
) -> Result<(), serde_json::Error> {
    for record in fragmented_file_records(jp) {
        serde_json::to_writer(&mut writer, &record)?;
        let _ = writeln!(writer);
    }
    Ok(())
}

/// Summary line counts used by the debug log / `ExpertPrint` equivalent;
/// not part of either artifact file, just a convenience for callers that
/// want a one-line summary before writing the full report.
pub fn summary_line(jp: &JobParameters) -> String {
    format!(
        "{} files, {} fragmented, {} total fragments, mft {} bytes",
        jp.progress.files,
        jp.progress.fragmented,
        jp.progress.fragments,
        jp.progress.mft_size_bytes,
    )
}

/// Whether the report should be produced at all (§6.2 `UD_DISABLE_REPORTS`).
pub fn reports_enabled(jp: &JobParameters) -> bool {
    !jp.options.disable_reports
}

pub fn total_fragmented_clusters(jp: &JobParameters) -> ClusterCount {
    jp.fragmented_files
        .iter()
        .fold(ClusterCount::ZERO, |acc, &idx| acc + jp.files[idx].clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defrag::block::{Block, BlockMap};
    use crate::defrag::config::Options;
    use crate::defrag::job::JobKind;
    use crate::defrag::types::{Lcn, Vcn};

    fn jp_with_one_fragmented_file() -> JobParameters {
        let mut jp = JobParameters::new('C', JobKind::Analysis, Options::default());
        jp.bytes_per_cluster = 4096;
        let mut f = FileInfo::new(r"C:\frag.bin", 1);
        f.blockmap = BlockMap::new(vec![
            Block::new(Vcn::new(0), Lcn::new(10), ClusterCount::new(2)),
            Block::new(Vcn::new(2), Lcn::new(50), ClusterCount::new(3)),
        ]);
        f.clusters = f.blockmap.clusters();
        jp.files.push(f);
        jp.fragmented_list_insert(0);
        jp
    }

    #[test]
    fn table_contains_header_and_one_row() {
        let jp = jp_with_one_fragmented_file();
        let mut buf = Vec::new();
        write_table(&jp, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("path"));
        assert!(text.contains("frag.bin"));
    }

    #[test]
    fn structured_dump_is_one_json_object_per_line() {
        let jp = jp_with_one_fragmented_file();
        let mut buf = Vec::new();
        write_structured_dump(&jp, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["fragments"], 2);
    }

    #[test]
    fn respects_disable_reports_option() {
        let mut jp = jp_with_one_fragmented_file();
        assert!(reports_enabled(&jp));
        jp.options.disable_reports = true;
        assert!(!reports_enabled(&jp));
    }
}

/// DiskSleuth Core — offline volume defragmentation and optimization engine.
///
/// This crate contains all business logic with zero UI/CLI dependencies. A
/// caller drives one volume at a time through `defrag::job::JobParameters`
/// and the `defrag::strategies` entry points (`analyze`, `defragment`,
/// `optimize`, `optimize_mft`), supplying a `defrag::VolumeIo` (the
/// `platform_windows` module on Windows, a test double elsewhere) and a
/// `defrag::Observer` for progress/cancellation.
///
/// # Modules
///
/// - [`defrag`] — the volume model, move primitive, search indexes, task
///   library, and strategy drivers (§2–§4 of the design).
/// - [`platform`] — Windows drive enumeration, reused by both the CLI's
///   volume listing and `defrag::platform_windows`'s volume targeting.
pub mod defrag;
pub mod platform;

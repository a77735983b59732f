//! DiskSleuth — offline volume defragmentation and optimization engine.
//!
//! Thin binary entry point. All logic lives in `disksleuth-core`; this
//! crate only parses arguments, wires a terminal-facing `Observer`, drives
//! one `disksleuth_core::defrag::strategies` entry point to completion on a
//! background thread, and writes the report when the run finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use crossbeam_channel::{bounded, Sender};

use disksleuth_core::defrag::config::Options;
use disksleuth_core::defrag::job::{JobKind, JobParameters, ProgressInfo};
use disksleuth_core::defrag::observer::Observer;
use disksleuth_core::defrag::report;
use disksleuth_core::defrag::strategies;
use disksleuth_core::defrag::DefragError;

/// Maximum number of queued progress/feedback messages before the job
/// thread blocks on `send` — mirrors the GUI scanner's channel capacity,
/// scaled down since a terminal renders far slower than egui's 60 fps.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Offline volume defragmentation and optimization engine.
#[derive(Debug, Parser)]
#[command(name = "disksleuth", version, about)]
struct Cli {
    /// Drive letter of the volume to operate on, e.g. `C`. Ignored with
    /// `--list-volumes`.
    volume: Option<char>,

    /// Which job to run. Ignored with `--list-volumes`.
    #[arg(value_enum)]
    job: Option<Job>,

    /// List fixed, defraggable volumes and exit.
    #[arg(long)]
    list_volumes: bool,

    /// Directory to write the fragmented-files report into (a tab-separated
    /// table and a newline-delimited JSON dump); defaults to the current
    /// directory. Honors `UD_DISABLE_REPORTS` regardless of this flag.
    #[arg(long, default_value = ".")]
    report_dir: std::path::PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Job {
    Analyze,
    Defragment,
    Optimize,
    QuickOptimize,
    MftOptimize,
}

impl From<Job> for JobKind {
    fn from(job: Job) -> Self {
        match job {
            Job::Analyze => JobKind::Analysis,
            Job::Defragment => JobKind::Defragmentation,
            Job::Optimize => JobKind::FullOptimization,
            Job::QuickOptimize => JobKind::QuickOptimization,
            Job::MftOptimize => JobKind::MftOptimization,
        }
    }
}

/// Messages sent from the job thread to the terminal-rendering loop, this
/// binary's equivalent of the GUI crate's `ScanProgress` channel.
enum JobEvent {
    Progress(ProgressInfo),
    Feedback(String),
    Finished(Result<(), DefragError>),
}

/// Forwards every `Observer` callback across a channel to the thread
/// actually printing to the terminal, and polls a shared flag for
/// cancellation set by the Ctrl+C handler.
struct ChannelObserver {
    tx: Sender<JobEvent>,
    cancel: Arc<AtomicBool>,
}

impl Observer for ChannelObserver {
    fn on_progress(&mut self, info: &ProgressInfo) {
        let _ = self.tx.send(JobEvent::Progress(info.clone()));
    }

    fn on_feedback(&mut self, _info: &ProgressInfo, message: &str) {
        let _ = self.tx.send(JobEvent::Feedback(message.to_owned()));
    }

    fn should_cancel(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_env("UD_DBGPRINT_LEVEL").unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info")
        }))
        .init();

    if cli.list_volumes {
        return list_volumes();
    }

    let volume = cli
        .volume
        .context("a volume letter is required unless --list-volumes is given")?;
    let job = cli
        .job
        .context("a job kind is required unless --list-volumes is given")?;

    run_job(volume, job.into(), cli.report_dir)
}

#[cfg(windows)]
fn list_volumes() -> anyhow::Result<()> {
    for letter in disksleuth_core::defrag::platform_windows::enumerate_defraggable_volumes() {
        println!("{letter}:");
    }
    Ok(())
}

#[cfg(not(windows))]
fn list_volumes() -> anyhow::Result<()> {
    anyhow::bail!("volume enumeration requires Windows")
}

#[cfg(windows)]
fn run_job(volume: char, job_kind: JobKind, report_dir: std::path::PathBuf) -> anyhow::Result<()> {
    use disksleuth_core::defrag::platform_windows::WindowsVolumeIo;

    let options = Options::from_env();
    let mut jp = JobParameters::new(volume, job_kind, options);

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_handler = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("cancellation requested, finishing current move and stopping");
        cancel_for_handler.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let (tx, rx) = bounded::<JobEvent>(PROGRESS_CHANNEL_CAPACITY);
    let job_thread = thread::Builder::new()
        .name("disksleuth-job".into())
        .spawn(move || {
            let mut io = WindowsVolumeIo::new(volume);
            let mut observer = ChannelObserver {
                tx: tx.clone(),
                cancel,
            };

            let result = strategies::analyze(&mut jp, &mut io, &mut observer).and_then(|()| {
                run_strategy(job_kind, &mut jp, &mut io, &mut observer)
            });

            if result.is_ok() && report::reports_enabled(&jp) {
                if let Err(e) = write_reports(&jp, &report_dir) {
                    tracing::warn!("failed to write report: {e}");
                }
            }

            let _ = tx.send(JobEvent::Finished(result));
            jp
        })
        .context("failed to spawn job thread")?;

    for event in rx {
        match event {
            JobEvent::Progress(info) => print_progress(&info),
            JobEvent::Feedback(message) => println!("{message}"),
            JobEvent::Finished(Ok(())) => {
                println!("done.");
            }
            JobEvent::Finished(Err(e)) => {
                job_thread.join().ok();
                anyhow::bail!("job failed: {e}");
            }
        }
    }

    let jp = job_thread.join().map_err(|_| anyhow::anyhow!("job thread panicked"))?;
    println!("{}", report::summary_line(&jp));
    Ok(())
}

#[cfg(not(windows))]
fn run_job(_volume: char, _job_kind: JobKind, _report_dir: std::path::PathBuf) -> anyhow::Result<()> {
    anyhow::bail!("disksleuth operates on live NTFS/FAT volumes and requires Windows")
}

fn run_strategy(
    job_kind: JobKind,
    jp: &mut JobParameters,
    io: &mut dyn disksleuth_core::defrag::VolumeIo,
    observer: &mut dyn Observer,
) -> Result<(), DefragError> {
    match job_kind {
        JobKind::Analysis => Ok(()),
        JobKind::Defragmentation => strategies::defragment(jp, io, observer),
        JobKind::FullOptimization | JobKind::QuickOptimization => {
            strategies::optimize(jp, io, observer)
        }
        JobKind::MftOptimization => strategies::optimize_mft(jp, io, observer),
    }
}

fn write_reports(jp: &JobParameters, dir: &std::path::Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let table = std::fs::File::create(dir.join("disksleuth-report.tsv"))?;
    report::write_table(jp, table)?;
    let dump = std::fs::File::create(dir.join("disksleuth-report.jsonl"))?;
    report::write_structured_dump(jp, dump)?;
    Ok(())
}

fn print_progress(info: &ProgressInfo) {
    let percent = if info.clusters_to_process > 0 {
        (info.processed_clusters as f64 / info.clusters_to_process as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    println!(
        "pass {:>2} | {:>5.1}% | {} files, {} fragmented, {} moves",
        info.pass_number, percent, info.files, info.fragmented, info.total_moves
    );
}

//! Capability object replacing the reference engine's `progress_router` /
//! `termination_router` / `progress_feedback_callback` function pointers.

use super::job::ProgressInfo;

/// Callback surface a strategy reports to and checks cancellation against.
///
/// Implementations must be cheap to call from the innermost loop of every
/// atomic task — `should_cancel` in particular is polled on every iteration.
pub trait Observer {
    /// Called whenever progress should be (re-)rendered. Implementations
    /// must not block; `info` is a point-in-time snapshot, not a live view.
    fn on_progress(&mut self, info: &ProgressInfo);

    /// Called for out-of-band textual feedback (the reference's
    /// `ExpertPrint`/informational `DebugPrint` calls that are user-facing
    /// rather than purely diagnostic).
    fn on_feedback(&mut self, info: &ProgressInfo, message: &str) {
        let _ = (info, message);
    }

    /// Polled before every OS-visible move and at the top of every inner
    /// loop. Once this returns `true`, the engine guarantees no further
    /// move ioctls are issued and the current strategy winds down and
    /// returns success.
    fn should_cancel(&self) -> bool {
        false
    }

    /// Whether the calling strategy should block (busy-free) before the
    /// next OS-visible move. Checked immediately before `should_cancel` at
    /// each such point; a real implementation would park the worker thread
    /// until cleared.
    fn is_paused(&self) -> bool {
        false
    }

    /// Called by `move_file` once per move attempt, regardless of outcome.
    /// Exists separately from `on_progress` because progress callbacks are
    /// rate-limited by `refresh_interval` while cancellation bookkeeping
    /// that counts moves (e.g. [`RecordingObserver::cancel_after`]) must not
    /// miss any of them.
    fn record_move(&mut self) {}
}

/// No-op observer used by tests and by call sites that don't need progress
/// reporting.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_progress(&mut self, _info: &ProgressInfo) {}
}

/// Observer that records every progress snapshot it receives, for
/// assertions in tests, and supports being flipped to "cancel" externally.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub snapshots: Vec<ProgressInfo>,
    pub feedback: Vec<String>,
    pub cancel_after: Option<usize>,
    calls: usize,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel as soon as `n` progress updates have been observed.
    pub fn cancel_after(n: usize) -> Self {
        RecordingObserver {
            cancel_after: Some(n),
            ..Default::default()
        }
    }
}

impl Observer for RecordingObserver {
    fn on_progress(&mut self, info: &ProgressInfo) {
        self.snapshots.push(info.clone());
    }

    fn on_feedback(&mut self, _info: &ProgressInfo, message: &str) {
        self.feedback.push(message.to_owned());
    }

    fn should_cancel(&self) -> bool {
        match self.cancel_after {
            Some(n) => self.calls >= n,
            None => false,
        }
    }

    fn record_move(&mut self) {
        self.calls += 1;
    }
}

//! Progress seam between the harmonisation stages and the terminal.
//!
//! `assign_regions` reports one unit per installation and the CLI advances
//! one unit per completed stage. The CLI renders both as `indicatif` bars;
//! tests pass [`null_progress`].

use std::sync::Arc;

/// Receives stage and per-installation progress from the pipeline.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of installations or stages to expect.
    fn set_total(&self, total: u64);

    /// Counts `delta` more installations or stages as done.
    fn inc(&self, delta: u64);

    /// Names the stage currently running.
    fn set_message(&self, msg: String);

    /// Ends the bar with a summary such as the assignment counts.
    fn finish(&self, msg: String);

    /// Ends the bar without leaving a line behind.
    fn finish_and_clear(&self);
}

/// Discards progress, for tests and library callers without a terminal.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

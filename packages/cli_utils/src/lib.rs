#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the `pvgeo` binary.
//!
//! [`init_logger`] routes `log` output through `indicatif-log-bridge` so log
//! lines are suspended while bars redraw, and [`IndicatifProgress`] renders
//! pipeline progress behind the [`ProgressCallback`] trait.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pvgeo_harmonize::progress::ProgressCallback;

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style switched to once `set_total()` provides a length.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// A bar over the pipeline stages; the total is known up front.
    #[must_use]
    pub fn stages_bar(
        multi: &MultiProgress,
        message: &str,
        total: u64,
    ) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new(total));
        let bar_style = style(
            "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]",
            ProgressStyle::default_bar(),
        )
        .progress_chars("##-");
        bar.set_style(bar_style.clone());
        bar.set_message(message.to_string());

        Arc::new(Self { bar, bar_style })
    }

    /// A per-installation bar that spins until the stage reports a total.
    #[must_use]
    pub fn records_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(style("{spinner:.cyan} {msg}", ProgressStyle::default_spinner()));
        bar.set_message(message.to_string());

        let bar_style = style(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} {percent}% [{eta}]",
            ProgressStyle::default_bar(),
        )
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }
}

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or(fallback)
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

/// Installs `pretty_env_logger` (configured from `RUST_LOG`) behind
/// `indicatif-log-bridge`.
///
/// Returns the [`MultiProgress`] every progress bar must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // Already installed when called twice, e.g. from tests.
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}

//! Progress sinks selectable from the command line.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use cdm_ingest::{LineProgress, NoProgress, ProgressSink, Throttled};

/// Where progress signals go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressMode {
    /// `progress: <current>/<total> <message>` lines on stdout.
    #[default]
    Stdout,
    /// The same lines on stderr.
    Stderr,
    /// An interactive bar on stderr.
    Bar,
    Off,
}

/// Builds the sink for `mode`; line sinks are rate-limited to `interval`.
pub fn progress_sink(mode: ProgressMode, interval: Duration) -> Arc<dyn ProgressSink> {
    match mode {
        ProgressMode::Stdout => Arc::new(Throttled::new(LineProgress::stdout(), interval)),
        ProgressMode::Stderr => Arc::new(Throttled::new(LineProgress::stderr(), interval)),
        ProgressMode::Bar => Arc::new(BarProgress::new(ProgressDrawTarget::stderr())),
        ProgressMode::Off => Arc::new(NoProgress),
    }
}

/// Renders progress signals on an `indicatif` bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(target: ProgressDrawTarget) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), target);
        apply_bar_style(&bar);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }
}

impl ProgressSink for BarProgress {
    fn report(&self, current: u64, total: u64, message: &str) {
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(current.min(total));
        self.bar.set_message(message.to_string());
    }

    fn finish(&self, message: &str) {
        if let Some(total) = self.bar.length() {
            self.bar.set_position(total);
        }
        self.bar.set_message(message.to_string());
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

fn apply_bar_style(bar: &ProgressBar) {
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) {per_sec} {msg}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
}

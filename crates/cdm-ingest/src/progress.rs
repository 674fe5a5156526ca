//! Rate-limited progress signalling.
//!
//! Progress is a side channel separate from logging: lines of the form
//! `progress: <current>/<total> <message>`, or whatever a custom
//! [`ProgressSink`] renders from the same tuples.

use std::io::{self, Stderr, Stdout, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Receiver of (current, total, message) progress tuples.
pub trait ProgressSink: Send + Sync {
    fn report(&self, current: u64, total: u64, message: &str);

    /// Signals that the unit of work reported so far is done.
    fn finish(&self, _message: &str) {}
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn report(&self, current: u64, total: u64, message: &str) {
        (**self).report(current, total, message);
    }

    fn finish(&self, message: &str) {
        (**self).finish(message);
    }
}

/// Discards every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _current: u64, _total: u64, _message: &str) {}
}

pub fn format_progress_line(current: u64, total: u64, message: &str) -> String {
    format!("progress: {current}/{total} {message}")
}

/// Writes one progress line per signal.
#[derive(Debug)]
pub struct LineProgress<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> LineProgress<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl LineProgress<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl LineProgress<Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> ProgressSink for LineProgress<W> {
    fn report(&self, current: u64, total: u64, message: &str) {
        if let Ok(mut out) = self.out.lock() {
            // A closed progress channel must not fail the stage.
            let _ = writeln!(out, "{}", format_progress_line(current, total, message));
            let _ = out.flush();
        }
    }
}

/// Forwards at most one signal per interval to the inner sink.
///
/// The first signal and the signal reaching `total` always pass.
#[derive(Debug)]
pub struct Throttled<S> {
    inner: S,
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl<S: ProgressSink> Throttled<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ProgressSink> ProgressSink for Throttled<S> {
    fn report(&self, current: u64, total: u64, message: &str) {
        let now = Instant::now();
        let due = {
            let Ok(mut last) = self.last.lock() else {
                return;
            };
            let due = current >= total
                || last.is_none_or(|previous| now.duration_since(previous) >= self.interval);
            if due {
                *last = Some(now);
            }
            due
        };
        if due {
            self.inner.report(current, total, message);
        }
    }

    fn finish(&self, message: &str) {
        if let Ok(mut last) = self.last.lock() {
            *last = None;
        }
        self.inner.finish(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format_matches_channel_contract() {
        assert_eq!(
            format_progress_line(250, 1000, "loading stg_patients"),
            "progress: 250/1000 loading stg_patients"
        );
    }

    #[test]
    fn throttle_passes_first_and_last_signal() {
        let sink = Throttled::new(LineProgress::new(Vec::new()), Duration::from_secs(3600));
        for current in 1..=100 {
            sink.report(current, 100, "rows");
        }
        let written = String::from_utf8(sink.into_inner().into_inner()).unwrap();
        assert_eq!(written, "progress: 1/100 rows\nprogress: 100/100 rows\n");
    }

    #[test]
    fn zero_interval_passes_everything() {
        let sink = Throttled::new(LineProgress::new(Vec::new()), Duration::ZERO);
        for current in 1..=3 {
            sink.report(current, 10, "rows");
        }
        let written = String::from_utf8(sink.into_inner().into_inner()).unwrap();
        assert_eq!(written.lines().count(), 3);
    }
}

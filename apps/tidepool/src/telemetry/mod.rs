//! Lightweight timing for hot paths plus the logging setup in [`logging`].
//!
//! Timing is off unless `TIDEPOOL_PERF` is set to something other than `0`.

pub mod logging;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

pub const ENV_PERF: &str = "TIDEPOOL_PERF";

/// Samples per label between two summary log lines.
const REPORT_EVERY: u64 = 200;

static PERF_ENABLED: Lazy<bool> = Lazy::new(|| flag_set(std::env::var(ENV_PERF).ok().as_deref()));

static SAMPLES: Lazy<Mutex<HashMap<&'static str, Samples>>> = Lazy::new(Default::default);

fn flag_set(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some(value) if !value.is_empty() && value != "0")
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Samples {
    count: u64,
    total: Duration,
    worst: Duration,
}

impl Samples {
    /// Adds one sample; returns a snapshot when a summary is due.
    fn observe(&mut self, elapsed: Duration) -> Option<Samples> {
        self.count += 1;
        self.total += elapsed;
        self.worst = self.worst.max(elapsed);
        (self.count % REPORT_EVERY == 0).then_some(*self)
    }

    fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record_duration(label: &'static str, elapsed: Duration) {
    if !enabled() {
        return;
    }
    let summary = SAMPLES.lock().entry(label).or_default().observe(elapsed);
    if let Some(summary) = summary {
        info!(
            target: "tidepool::perf",
            label,
            count = summary.count,
            mean_us = summary.mean().as_micros() as u64,
            worst_us = summary.worst.as_micros() as u64,
            "timing summary"
        );
    }
}

/// Records the time until drop under `label`. `None` when timing is off.
pub struct PerfGuard {
    label: &'static str,
    started: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        enabled().then(|| Self {
            label,
            started: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.label, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perf_flag_parsing() {
        assert!(!flag_set(None));
        assert!(!flag_set(Some("")));
        assert!(!flag_set(Some(" 0 ")));
        assert!(flag_set(Some("1")));
        assert!(flag_set(Some("yes")));
    }

    #[test]
    fn samples_report_on_the_interval() {
        let mut samples = Samples::default();
        for _ in 1..REPORT_EVERY {
            assert_eq!(samples.observe(Duration::from_micros(10)), None);
        }
        let summary = samples.observe(Duration::from_micros(210)).unwrap();
        assert_eq!(summary.count, REPORT_EVERY);
        assert_eq!(summary.worst, Duration::from_micros(210));
        assert_eq!(summary.mean(), Duration::from_micros(11));
    }
}

//! Wall-clock timing of named pipeline stages.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Key under which the overall elapsed time is recorded.
pub const TOTAL: &str = "total";

/// Collects per-stage durations (milliseconds) for a single run.
///
/// Recording a stage twice overwrites the earlier value. Stages that never
/// ran are absent rather than zero.
#[derive(Debug)]
pub struct TimingCollector {
    started: Instant,
    stages: BTreeMap<String, f64>,
}

impl Default for TimingCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            stages: BTreeMap::new(),
        }
    }

    /// Run `work`, recording its duration under `stage`.
    pub fn track<T>(&mut self, stage: &str, work: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = work();
        self.record(stage, start.elapsed());
        out
    }

    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        self.stages.insert(stage.to_string(), as_millis(elapsed));
    }

    /// Duration of `stage` in milliseconds, if it ran.
    pub fn get(&self, stage: &str) -> Option<f64> {
        self.stages.get(stage).copied()
    }

    /// Milliseconds since construction.
    pub fn total(&self) -> f64 {
        as_millis(self.started.elapsed())
    }

    /// Record [`TOTAL`] and return all timings.
    pub fn finish(mut self) -> BTreeMap<String, f64> {
        let total = self.total();
        self.stages.insert(TOTAL.to_string(), total);
        self.stages
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

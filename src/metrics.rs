//! Observation plumbing: the recorder callback and a process-local sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Receives one `(duration_seconds, success)` sample per job completion,
/// including timeouts. Called synchronously from the completion site, so it
/// must not block; wrap slow exporters upstream.
pub type Recorder = Arc<dyn Fn(f64, bool) + Send + Sync>;

/// Accumulated counters for one runner.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
pub struct RunnerCounts {
    pub ok: u64,
    pub err: u64,
    pub total_seconds: f64,
}

/// Thread-safe sample accumulator keyed by runner id.
///
/// This is the process-local default sink. Exporters that forward samples to
/// an external system implement their own [`Recorder`] instead; the engine
/// only requires the callback shape.
#[derive(Debug, Default)]
pub struct StatsSink {
    counts: Mutex<HashMap<String, RunnerCounts>>,
}

impl StatsSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one sample for `id`.
    pub fn record(&self, id: &str, seconds: f64, success: bool) {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(id.to_string()).or_default();
        if success {
            entry.ok += 1;
        } else {
            entry.err += 1;
        }
        entry.total_seconds += seconds;
    }

    /// A recorder bound to one runner id.
    pub fn recorder_for(self: &Arc<Self>, id: impl Into<String>) -> Recorder {
        let sink = Arc::clone(self);
        let id = id.into();
        Arc::new(move |seconds, success| sink.record(&id, seconds, success))
    }

    /// Accumulated counters for `id`; zeroes when nothing was recorded.
    /// Counters survive runner removal, matching the lifetime of ids.
    pub fn counts(&self, id: &str) -> RunnerCounts {
        self.counts
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_id() {
        let sink = StatsSink::new();
        let rec_a = sink.recorder_for("a-0");
        let rec_b = sink.recorder_for("b-1");

        rec_a(0.1, true);
        rec_a(0.2, false);
        rec_a(0.3, true);
        rec_b(1.0, false);

        let a = sink.counts("a-0");
        assert_eq!(a.ok, 2);
        assert_eq!(a.err, 1);
        assert!((a.total_seconds - 0.6).abs() < 1e-9);

        let b = sink.counts("b-1");
        assert_eq!(b.ok, 0);
        assert_eq!(b.err, 1);

        assert_eq!(sink.counts("missing"), RunnerCounts::default());
    }
}

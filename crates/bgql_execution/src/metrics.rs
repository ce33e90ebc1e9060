//! Execution timing records.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What a [`PerfRecord`] measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerfCategory {
    /// A whole run.
    Execution,
    /// One join over in-flight work.
    Wave,
    /// Choosing which deferred nodes to flush.
    Prioritize,
    /// Starting a set of deferred nodes.
    Flush,
}

/// A timed span of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfRecord {
    pub category: PerfCategory,
    pub subject: String,
    /// Milliseconds since the run started.
    pub start_ms: f64,
    pub duration_ms: f64,
}

/// Collects [`PerfRecord`]s for one run. Does nothing when disabled.
#[derive(Debug)]
pub(crate) struct PerfRecorder {
    origin: Instant,
    enabled: bool,
    records: Vec<PerfRecord>,
}

impl PerfRecorder {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            origin: Instant::now(),
            enabled,
            records: Vec::new(),
        }
    }

    /// Marks the start of a span.
    pub(crate) fn start(&self) -> Option<Instant> {
        self.enabled.then(Instant::now)
    }

    /// Closes a span opened with [`Self::start`].
    pub(crate) fn record(
        &mut self,
        category: PerfCategory,
        started: Option<Instant>,
        subject: impl FnOnce() -> String,
    ) {
        let Some(started) = started else {
            return;
        };
        self.records.push(PerfRecord {
            category,
            subject: subject(),
            start_ms: started.duration_since(self.origin).as_secs_f64() * 1000.0,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        });
    }

    pub(crate) fn into_records(self) -> Vec<PerfRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_recorder_records_nothing() {
        let mut recorder = PerfRecorder::new(false);
        let started = recorder.start();
        assert!(started.is_none());
        recorder.record(PerfCategory::Wave, started, || unreachable!());
        assert!(recorder.into_records().is_empty());
    }

    #[test]
    fn test_record_serialization() {
        let mut recorder = PerfRecorder::new(true);
        let started = recorder.start();
        recorder.record(PerfCategory::Flush, started, || "3 deferred".to_string());

        let records = recorder.into_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].duration_ms >= 0.0);

        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["category"], "flush");
        assert_eq!(json["subject"], "3 deferred");
        assert!(json.get("startMs").is_some());
    }
}

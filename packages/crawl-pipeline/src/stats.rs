use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Stage;

/// Live per-stage counters, shared by all of a stage's concurrent workers
#[derive(Debug)]
pub struct PipelineStats {
    stage: Stage,
    started_at: DateTime<Utc>,
    input: AtomicU64,
    output: AtomicU64,
    errors: AtomicU64,
}

impl PipelineStats {
    pub fn start(stage: Stage) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            input: AtomicU64::new(0),
            output: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn record_input(&self) {
        self.input.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_output(&self) {
        self.output.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn input_count(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output_count(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Finalize the stage. Consuming self is what makes the snapshot immutable.
    pub fn finish(self) -> StageStats {
        let finished_at = Utc::now();
        let duration_seconds =
            (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        StageStats {
            stage: self.stage,
            started_at: self.started_at,
            finished_at,
            input_count: self.input.into_inner(),
            output_count: self.output.into_inner(),
            error_count: self.errors.into_inner(),
            duration_seconds,
        }
    }
}

/// Immutable record of a finished stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_count: u64,
    pub output_count: u64,
    pub error_count: u64,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_accumulate() {
        let stats = PipelineStats::start(Stage::Discovery);
        stats.record_input();
        stats.record_input();
        stats.record_output();
        stats.record_error();

        let snapshot = stats.finish();
        assert_eq!(snapshot.stage, Stage::Discovery);
        assert_eq!(snapshot.input_count, 2);
        assert_eq!(snapshot.output_count, 1);
        assert_eq!(snapshot.error_count, 1);
        assert!(snapshot.duration_seconds >= 0.0);
        assert!(snapshot.finished_at >= snapshot.started_at);
    }

    #[test]
    fn counters_are_thread_safe() {
        let stats = Arc::new(PipelineStats::start(Stage::Validation));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_input();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.input_count(), 8000);
    }
}

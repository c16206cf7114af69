use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Stage;

/// Thresholds for the append-only writer's integrity circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Absolute floor: the breaker never trips at or below this many empty bodies
    pub min_empty_bodies: u64,
    /// Ratio ceiling: empty bodies over (seen + 1) must exceed this to trip
    pub max_empty_ratio: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_empty_bodies: 50,
            max_empty_ratio: 0.02,
        }
    }
}

impl BreakerConfig {
    pub fn with_min_empty_bodies(mut self, floor: u64) -> Self {
        self.min_empty_bodies = floor;
        self
    }

    pub fn with_max_empty_ratio(mut self, ratio: f64) -> Self {
        self.max_empty_ratio = ratio;
        self
    }
}

/// Schema validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Fraction of records inspected, (0, 1]
    pub sample_rate: f64,
    /// Minimum success rate for a gate to pass
    pub min_success_rate: f64,
    /// Abort on the first failed record instead of accumulating
    pub fail_on_error: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 0.25,
            min_success_rate: 0.80,
            fail_on_error: false,
        }
    }
}

impl ValidatorConfig {
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_min_success_rate(mut self, rate: f64) -> Self {
        self.min_success_rate = rate;
        self
    }

    pub fn with_fail_on_error(mut self, fail: bool) -> Self {
        self.fail_on_error = fail;
        self
    }
}

/// Configuration for a full pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding one output file per stage
    pub output_dir: PathBuf,
    /// Backing log for the deduplication store
    pub dedup_path: PathBuf,
    pub breaker: BreakerConfig,
    pub validator: ValidatorConfig,
    /// Hard-gate mode: a validation shortfall halts the pipeline instead of warning
    pub halt_on_shortfall: bool,
}

impl PipelineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        let dedup_path = output_dir.join("dedup.log");
        Self {
            output_dir,
            dedup_path,
            breaker: BreakerConfig::default(),
            validator: ValidatorConfig::default(),
            halt_on_shortfall: false,
        }
    }

    pub fn with_dedup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dedup_path = path.into();
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_halt_on_shortfall(mut self, halt: bool) -> Self {
        self.halt_on_shortfall = halt;
        self
    }

    pub fn stage_output_path(&self, stage: Stage) -> PathBuf {
        self.output_dir.join(stage.output_filename())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_output_paths_are_per_stage() {
        let config = PipelineConfig::new("/tmp/out");
        assert_eq!(
            config.stage_output_path(Stage::Discovery),
            PathBuf::from("/tmp/out/discovery.jsonl")
        );
        assert_eq!(
            config.stage_output_path(Stage::Enrichment),
            PathBuf::from("/tmp/out/enrichment.jsonl")
        );
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = PipelineConfig::new("/tmp/out")
            .with_halt_on_shortfall(true)
            .with_breaker(BreakerConfig::default().with_min_empty_bodies(10))
            .with_validator(ValidatorConfig::default().with_sample_rate(1.0));
        assert!(config.halt_on_shortfall);
        assert_eq!(config.breaker.min_empty_bodies, 10);
        assert_eq!(config.validator.sample_rate, 1.0);
    }
}

use rand::Rng;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::config::ValidatorConfig;
use crate::errors::ValidateError;
use crate::traits::StageRecord;
use crate::types::{DiscoveryRecord, EnrichmentRecord, Stage, ValidationRecord};

/// Outcome of sampling one stage output file against its record schema
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub schema: &'static str,
    pub sample_rate: f64,
    pub records_checked: u64,
    pub records_failed: u64,
    pub min_success_rate: f64,
}

impl SchemaReport {
    /// Fraction of sampled records that passed; 1.0 when nothing was sampled
    pub fn success_rate(&self) -> f64 {
        if self.records_checked == 0 {
            return 1.0;
        }
        (self.records_checked - self.records_failed) as f64 / self.records_checked as f64
    }

    pub fn is_acceptable(&self) -> bool {
        self.success_rate() >= self.min_success_rate
    }
}

/// Sample a stage's persisted output and check each sampled record against
/// the stage's expected shape. Returns `None` when the file is absent, which
/// callers treat as "skipped" (an empty crawl is legitimate). The file is
/// never mutated.
pub fn validate_file(
    path: &Path,
    stage: Stage,
    config: &ValidatorConfig,
) -> Result<Option<SchemaReport>, ValidateError> {
    validate_file_with_rng(path, stage, config, &mut rand::thread_rng())
}

/// Sampling seam: the caller supplies the RNG, which makes sample selection
/// reproducible in tests.
pub fn validate_file_with_rng<G: Rng>(
    path: &Path,
    stage: Stage,
    config: &ValidatorConfig,
    rng: &mut G,
) -> Result<Option<SchemaReport>, ValidateError> {
    if !path.exists() {
        tracing::info!(
            stage = %stage,
            path = %path.display(),
            "Stage output absent, validation skipped"
        );
        return Ok(None);
    }

    let raw = fs::read_to_string(path)?;
    let mut records_checked = 0u64;
    let mut records_failed = 0u64;

    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        // Independent per-record sampling keeps the sample representative
        // across the whole file rather than a prefix slice.
        if rng.gen::<f64>() >= config.sample_rate {
            continue;
        }
        records_checked += 1;
        if let Err(reason) = check_line(stage, line) {
            if config.fail_on_error {
                return Err(ValidateError::Record {
                    line: index + 1,
                    reason,
                });
            }
            records_failed += 1;
            tracing::debug!(
                stage = %stage,
                line = index + 1,
                %reason,
                "Record failed schema check"
            );
        }
    }

    let report = SchemaReport {
        schema: stage.schema_name(),
        sample_rate: config.sample_rate,
        records_checked,
        records_failed,
        min_success_rate: config.min_success_rate,
    };
    tracing::info!(
        stage = %stage,
        checked = report.records_checked,
        failed = report.records_failed,
        success_rate = report.success_rate(),
        acceptable = report.is_acceptable(),
        "Schema validation finished"
    );
    Ok(Some(report))
}

fn check_line(stage: Stage, line: &str) -> Result<(), String> {
    match stage {
        Stage::Discovery => check_record::<DiscoveryRecord>(line),
        Stage::Validation => check_record::<ValidationRecord>(line),
        Stage::Enrichment => check_record::<EnrichmentRecord>(line),
    }
}

fn check_record<R: StageRecord>(line: &str) -> Result<(), String> {
    let record: R = serde_json::from_str(line).map_err(|e| e.to_string())?;
    record.check()
}

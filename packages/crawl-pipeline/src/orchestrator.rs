use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dedup::DedupStore;
use crate::errors::{PipelineError, StageError, ValidateError};
use crate::stats::{PipelineStats, StageStats};
use crate::traits::{StageContext, StageInput, StageProducer, StageRecord};
use crate::types::{DiscoveryRecord, EnrichmentRecord, Stage, ValidationRecord};
use crate::validator::{validate_file, SchemaReport};
use crate::writer::RecordWriter;

// ============================================================================
// STATES AND DECISIONS
// ============================================================================

/// Why the pipeline stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    SystemicCorruption,
    ValidationShortfall,
    StorageUnavailable,
}

/// Resolution of a stage's validation gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Advance,
    WarnAndAdvance,
    Halt(HaltReason),
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    Pending { stage: Stage },
    Running { stage: Stage },
    Gating { stage: Stage },
    Complete,
    Aborted { stage: Stage, reason: HaltReason },
}

/// Everything captured about one stage run
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stats: StageStats,
    pub validation: Option<SchemaReport>,
    pub records_written: u64,
    pub terminated_early: bool,
}

/// Final report for a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Complete
    }
}

struct StageRun {
    report: StageReport,
    decision: GateDecision,
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Finite-state sequencer over the three stages. Runs each stage to
/// completion, gates its persisted output through the schema validator, and
/// is the single authority for continue/halt decisions.
pub struct Pipeline<D, V, E>
where
    D: StageProducer<DiscoveryRecord>,
    V: StageProducer<ValidationRecord>,
    E: StageProducer<EnrichmentRecord>,
{
    config: PipelineConfig,
    discovery: D,
    validation: V,
    enrichment: E,
}

impl<D, V, E> Pipeline<D, V, E>
where
    D: StageProducer<DiscoveryRecord>,
    V: StageProducer<ValidationRecord>,
    E: StageProducer<EnrichmentRecord>,
{
    pub fn new(config: PipelineConfig, discovery: D, validation: V, enrichment: E) -> Self {
        Self {
            config,
            discovery,
            validation,
            enrichment,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all three stages in order. Stage N+1 starts only after stage N's
    /// output file is closed and gated.
    pub async fn run(&self, seeds: &[String]) -> Result<PipelineReport, PipelineError> {
        let run_id = Uuid::new_v4();
        tracing::info!(
            run_id = %run_id,
            output_dir = %self.config.output_dir.display(),
            seeds = seeds.len(),
            "Pipeline run starting"
        );

        let dedup = match DedupStore::open(&self.config.dedup_path) {
            Ok(store) => Arc::new(store),
            Err(error) => {
                tracing::error!(
                    run_id = %run_id,
                    %error,
                    "Dedup store unavailable, aborting before any stage"
                );
                return Ok(PipelineReport {
                    run_id,
                    state: PipelineState::Aborted {
                        stage: Stage::Discovery,
                        reason: HaltReason::StorageUnavailable,
                    },
                    stages: Vec::new(),
                });
            }
        };

        let mut stages = Vec::new();

        let discovery_run = self
            .run_stage::<DiscoveryRecord, _>(&self.discovery, StageInput::Seeds(seeds), &dedup)
            .await?;
        if let Some(report) = self.settle(run_id, Stage::Discovery, discovery_run, &mut stages) {
            return Ok(report);
        }

        let discovery_output = self.config.stage_output_path(Stage::Discovery);
        let validation_run = self
            .run_stage::<ValidationRecord, _>(
                &self.validation,
                StageInput::File(&discovery_output),
                &dedup,
            )
            .await?;
        if let Some(report) = self.settle(run_id, Stage::Validation, validation_run, &mut stages) {
            return Ok(report);
        }

        let validation_output = self.config.stage_output_path(Stage::Validation);
        let enrichment_run = self
            .run_stage::<EnrichmentRecord, _>(
                &self.enrichment,
                StageInput::File(&validation_output),
                &dedup,
            )
            .await?;
        if let Some(report) = self.settle(run_id, Stage::Enrichment, enrichment_run, &mut stages) {
            return Ok(report);
        }

        if let Ok(store) = Arc::try_unwrap(dedup) {
            store.close()?;
        }

        tracing::info!(run_id = %run_id, "Pipeline run complete");
        Ok(PipelineReport {
            run_id,
            state: PipelineState::Complete,
            stages,
        })
    }

    /// Fold one stage's outcome into the run; `Some` means the pipeline ends
    /// here with an aborted report.
    fn settle(
        &self,
        run_id: Uuid,
        stage: Stage,
        run: StageRun,
        stages: &mut Vec<StageReport>,
    ) -> Option<PipelineReport> {
        let decision = run.decision;
        stages.push(run.report);
        match decision {
            GateDecision::Advance => None,
            GateDecision::WarnAndAdvance => {
                tracing::warn!(
                    run_id = %run_id,
                    stage = %stage,
                    "Validation shortfall, advancing per non-blocking gate policy"
                );
                None
            }
            GateDecision::Halt(reason) => {
                tracing::error!(
                    run_id = %run_id,
                    stage = %stage,
                    reason = ?reason,
                    "Pipeline halted"
                );
                Some(PipelineReport {
                    run_id,
                    state: PipelineState::Aborted { stage, reason },
                    stages: std::mem::take(stages),
                })
            }
        }
    }

    async fn run_stage<R, P>(
        &self,
        producer: &P,
        input: StageInput<'_>,
        dedup: &Arc<DedupStore>,
    ) -> Result<StageRun, PipelineError>
    where
        R: StageRecord,
        P: StageProducer<R>,
    {
        let stage = R::stage();
        tracing::info!(state = ?PipelineState::Pending { stage }, "Stage transition");
        let stats = PipelineStats::start(stage);
        let output_path = self.config.stage_output_path(stage);

        let writer = match RecordWriter::<R>::open(
            &output_path,
            Arc::clone(dedup),
            self.config.breaker.clone(),
        ) {
            Ok(writer) => writer,
            Err(error) => {
                tracing::error!(stage = %stage, %error, "Stage output unavailable");
                return Ok(StageRun {
                    report: StageReport {
                        stats: stats.finish(),
                        validation: None,
                        records_written: 0,
                        terminated_early: false,
                    },
                    decision: GateDecision::Halt(HaltReason::StorageUnavailable),
                });
            }
        };

        tracing::info!(state = ?PipelineState::Running { stage }, "Stage transition");
        let outcome = producer
            .run(StageContext {
                input,
                writer: &writer,
                stats: &stats,
            })
            .await;

        let terminated_early = match &outcome {
            Ok(()) => false,
            Err(StageError::Terminated { detail }) => {
                tracing::warn!(stage = %stage, detail = %detail, "Stage terminated early");
                true
            }
        };

        let records_written = writer.written();
        let stats = stats.finish();
        writer.close()?;

        tracing::info!(
            state = ?PipelineState::Gating { stage },
            input = stats.input_count,
            output = stats.output_count,
            errors = stats.error_count,
            "Stage transition"
        );

        let (validation, decision) =
            self.gate(stage, &output_path, terminated_early, records_written);

        Ok(StageRun {
            report: StageReport {
                stats,
                validation,
                records_written,
                terminated_early,
            },
            decision,
        })
    }

    fn gate(
        &self,
        stage: Stage,
        output_path: &std::path::Path,
        terminated_early: bool,
        records_written: u64,
    ) -> (Option<SchemaReport>, GateDecision) {
        if terminated_early && records_written == 0 {
            // Nothing worth keeping was captured before the corruption signal.
            return (None, GateDecision::Halt(HaltReason::SystemicCorruption));
        }

        let report = match validate_file(output_path, stage, &self.config.validator) {
            Ok(report) => report,
            Err(ValidateError::Record { line, reason }) => {
                tracing::error!(stage = %stage, line, %reason, "Hard validation failure");
                return (None, GateDecision::Halt(HaltReason::ValidationShortfall));
            }
            Err(ValidateError::Io(error)) => {
                tracing::warn!(stage = %stage, %error, "Validator could not read stage output");
                return (None, GateDecision::Advance);
            }
        };

        let decision = match &report {
            // Absence is not failure: an empty crawl legitimately produces
            // no stage output.
            None => GateDecision::Advance,
            Some(report) if report.is_acceptable() => GateDecision::Advance,
            Some(report) => {
                tracing::warn!(
                    stage = %stage,
                    success_rate = report.success_rate(),
                    min_success_rate = report.min_success_rate,
                    "Validation gate below threshold"
                );
                if self.config.halt_on_shortfall {
                    GateDecision::Halt(HaltReason::ValidationShortfall)
                } else {
                    GateDecision::WarnAndAdvance
                }
            }
        };
        (report, decision)
    }
}

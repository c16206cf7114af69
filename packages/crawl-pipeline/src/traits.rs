use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::errors::StageError;
use crate::stats::PipelineStats;
use crate::types::Stage;
use crate::writer::RecordWriter;

// ============================================================================
// STAGE RECORD: the shape every persisted record must satisfy
// ============================================================================

pub trait StageRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The stage this record type belongs to
    fn stage() -> Stage;

    /// Stable identifier used for at-most-once admission
    fn dedup_key(&self) -> String;

    /// Cheap structural heuristic feeding the writer's circuit breaker
    fn has_empty_body(&self) -> bool;

    /// Semantic constraints beyond what deserialization enforces
    fn check(&self) -> Result<(), String>;
}

// ============================================================================
// STAGE PRODUCER: swappable black box that emits candidate records
// ============================================================================

/// Input handed to a stage producer at start
#[derive(Debug, Clone, Copy)]
pub enum StageInput<'a> {
    /// Externally supplied starting URLs (discovery only)
    Seeds(&'a [String]),
    /// The previous stage's persisted output file
    File(&'a Path),
}

/// Shared handles a producer works through for the duration of its stage
pub struct StageContext<'a, R: StageRecord> {
    pub input: StageInput<'a>,
    pub writer: &'a RecordWriter<R>,
    pub stats: &'a PipelineStats,
}

/// A stage's record source. Producers call `writer.write` for every candidate
/// and `stats.record_*` for every attempt; returning `Ok` signals completion,
/// `StageError::Terminated` requests early termination.
#[async_trait]
pub trait StageProducer<R: StageRecord>: Send + Sync {
    async fn run(&self, ctx: StageContext<'_, R>) -> Result<(), StageError>;
}

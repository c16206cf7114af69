use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Deduplication store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing log could not be opened or loaded; pipeline-fatal at stage start
    #[error("dedup store unavailable at {path}: {source}")]
    Unavailable { path: PathBuf, source: io::Error },

    #[error("dedup store I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Append-only writer failures
#[derive(Debug, Error)]
pub enum WriteError {
    /// Empty-body ratio breached the circuit breaker; the stage must stop
    #[error(
        "systemic corruption: {empty_bodies} empty bodies against {seen} seen records (ratio {ratio:.4})"
    )]
    SystemicCorruption {
        empty_bodies: u64,
        seen: u64,
        ratio: f64,
    },

    /// Writer already tripped; records admitted after the signal are rejected
    #[error("stage terminated, writer rejects further records")]
    StageTerminated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("output I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Schema validator failures
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("validation I/O error: {0}")]
    Io(#[from] io::Error),

    /// Raised only when the validator runs in fail-on-error mode
    #[error("record at line {line} failed validation: {reason}")]
    Record { line: usize, reason: String },
}

/// Raised by a stage producer to request early termination
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage terminated early: {detail}")]
    Terminated { detail: String },
}

/// Orchestrator-level failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("pipeline I/O error: {0}")]
    Io(#[from] io::Error),
}

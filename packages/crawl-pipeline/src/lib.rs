//! Crawl-state integrity and stage orchestration for a three-stage URL
//! ingestion pipeline: discovery, validation, enrichment.

pub mod config;
pub mod dedup;
pub mod errors;
pub mod merge;
pub mod orchestrator;
pub mod producers;
pub mod stats;
pub mod traits;
pub mod types;
pub mod validator;
pub mod writer;

// Re-exports for clean API
pub use config::{BreakerConfig, PipelineConfig, ValidatorConfig};
pub use dedup::DedupStore;
pub use errors::{PipelineError, StageError, StoreError, ValidateError, WriteError};
pub use merge::{merge_outputs, write_merged};
pub use orchestrator::{
    GateDecision, HaltReason, Pipeline, PipelineReport, PipelineState, StageReport,
};
pub use producers::{FeedProducer, SeedListProducer};
pub use stats::{PipelineStats, StageStats};
pub use traits::{StageContext, StageInput, StageProducer, StageRecord};
pub use types::{
    DiscoveryRecord, EnrichmentRecord, MergedUrlRecord, Stage, UrlHash, ValidationRecord,
};
pub use validator::{validate_file, validate_file_with_rng, SchemaReport};
pub use writer::{RecordWriter, WriteOutcome};

use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use url::Url;

use crate::errors::{StageError, WriteError};
use crate::traits::{StageContext, StageInput, StageProducer, StageRecord};
use crate::types::DiscoveryRecord;
use crate::writer::WriteOutcome;

/// Push one candidate through the dedup and write path, absorbing per-record
/// failures into statistics. Only a corruption signal escalates.
pub(crate) fn write_candidate<R: StageRecord>(
    ctx: &StageContext<'_, R>,
    record: &R,
) -> Result<(), StageError> {
    match ctx.writer.write(record) {
        Ok(WriteOutcome::Written) => {
            ctx.stats.record_output();
            Ok(())
        }
        Ok(WriteOutcome::Duplicate) => Ok(()),
        Ok(WriteOutcome::EmptyBody) => {
            ctx.stats.record_error();
            Ok(())
        }
        Err(err @ (WriteError::SystemicCorruption { .. } | WriteError::StageTerminated)) => {
            Err(StageError::Terminated {
                detail: err.to_string(),
            })
        }
        Err(err) => {
            ctx.stats.record_error();
            tracing::warn!(error = %err, "Record write failed, skipping");
            Ok(())
        }
    }
}

/// Discovery producer over an externally supplied seed list. Each seed is
/// normalized through `Url` and emitted as a depth-zero discovery record.
pub struct SeedListProducer;

#[async_trait]
impl StageProducer<DiscoveryRecord> for SeedListProducer {
    async fn run(&self, ctx: StageContext<'_, DiscoveryRecord>) -> Result<(), StageError> {
        let seeds = match ctx.input {
            StageInput::Seeds(seeds) => seeds,
            StageInput::File(_) => {
                tracing::warn!("Seed producer invoked without a seed list");
                return Ok(());
            }
        };

        for seed in seeds {
            ctx.stats.record_input();
            let url = match Url::parse(seed.trim()) {
                Ok(url) => url,
                Err(error) => {
                    ctx.stats.record_error();
                    tracing::warn!(seed = %seed, %error, "Skipping unparseable seed URL");
                    continue;
                }
            };
            let record = DiscoveryRecord::new(url.as_str(), url.as_str(), 0);
            write_candidate(&ctx, &record)?;
        }
        Ok(())
    }
}

/// Replays candidate records from an externally produced JSONL feed through
/// the dedup and write path. Re-running over a partially processed feed is
/// safe: already-admitted records drop out as duplicates.
pub struct FeedProducer {
    feed_path: PathBuf,
}

impl FeedProducer {
    pub fn new(feed_path: impl Into<PathBuf>) -> Self {
        Self {
            feed_path: feed_path.into(),
        }
    }
}

#[async_trait]
impl<R: StageRecord> StageProducer<R> for FeedProducer {
    async fn run(&self, ctx: StageContext<'_, R>) -> Result<(), StageError> {
        if !self.feed_path.exists() {
            tracing::info!(
                stage = %R::stage(),
                feed = %self.feed_path.display(),
                "No candidate feed, stage produces no records"
            );
            return Ok(());
        }

        let raw = match fs::read_to_string(&self.feed_path) {
            Ok(raw) => raw,
            Err(error) => {
                ctx.stats.record_error();
                tracing::warn!(
                    feed = %self.feed_path.display(),
                    %error,
                    "Candidate feed unreadable, stage produces no records"
                );
                return Ok(());
            }
        };

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            ctx.stats.record_input();
            let record: R = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(error) => {
                    ctx.stats.record_error();
                    tracing::debug!(%error, "Skipping malformed feed record");
                    continue;
                }
            };
            write_candidate(&ctx, &record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::dedup::DedupStore;
    use crate::stats::PipelineStats;
    use crate::types::{Stage, ValidationRecord};
    use crate::writer::RecordWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context_parts(dir: &TempDir) -> (Arc<DedupStore>, RecordWriter<ValidationRecord>) {
        let dedup = Arc::new(DedupStore::open(dir.path().join("dedup.log")).unwrap());
        let writer = RecordWriter::open(
            dir.path().join("validation.jsonl"),
            Arc::clone(&dedup),
            BreakerConfig::default(),
        )
        .unwrap();
        (dedup, writer)
    }

    #[tokio::test]
    async fn feed_producer_replays_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let feed = dir.path().join("feed.jsonl");
        let record = ValidationRecord::new("https://uconn.edu/a", 200, "text/html", 64, 0.1);
        let line = serde_json::to_string(&record).unwrap();
        std::fs::write(&feed, format!("{line}\n{line}\nnot json\n")).unwrap();

        let (_dedup, writer) = context_parts(&dir);
        let stats = PipelineStats::start(Stage::Validation);
        let producer = FeedProducer::new(&feed);
        producer
            .run(StageContext {
                input: StageInput::File(&feed),
                writer: &writer,
                stats: &stats,
            })
            .await
            .unwrap();

        assert_eq!(stats.input_count(), 3);
        assert_eq!(stats.output_count(), 1);
        assert_eq!(stats.error_count(), 1);
        assert_eq!(writer.written(), 1);
    }

    #[tokio::test]
    async fn feed_producer_tolerates_missing_feed() {
        let dir = TempDir::new().unwrap();
        let feed = dir.path().join("absent.jsonl");
        let (_dedup, writer) = context_parts(&dir);
        let stats = PipelineStats::start(Stage::Validation);

        FeedProducer::new(&feed)
            .run(StageContext {
                input: StageInput::File(&feed),
                writer: &writer,
                stats: &stats,
            })
            .await
            .unwrap();
        assert_eq!(stats.input_count(), 0);
    }

    #[tokio::test]
    async fn seed_producer_emits_depth_zero_records() {
        let dir = TempDir::new().unwrap();
        let dedup = Arc::new(DedupStore::open(dir.path().join("dedup.log")).unwrap());
        let writer: RecordWriter<DiscoveryRecord> = RecordWriter::open(
            dir.path().join("discovery.jsonl"),
            Arc::clone(&dedup),
            BreakerConfig::default(),
        )
        .unwrap();
        let stats = PipelineStats::start(Stage::Discovery);

        let seeds = vec![
            "https://uconn.edu/a".to_string(),
            "https://uconn.edu/a".to_string(),
            "not a url".to_string(),
        ];
        SeedListProducer
            .run(StageContext {
                input: StageInput::Seeds(&seeds),
                writer: &writer,
                stats: &stats,
            })
            .await
            .unwrap();

        assert_eq!(stats.input_count(), 3);
        assert_eq!(stats.output_count(), 1);
        assert_eq!(stats.error_count(), 1);
        assert_eq!(writer.written(), 1);
    }

    #[tokio::test]
    async fn corruption_signal_escalates() {
        let dir = TempDir::new().unwrap();
        let dedup = Arc::new(DedupStore::open(dir.path().join("dedup.log")).unwrap());
        let writer: RecordWriter<ValidationRecord> = RecordWriter::open(
            dir.path().join("validation.jsonl"),
            Arc::clone(&dedup),
            BreakerConfig::default().with_min_empty_bodies(1),
        )
        .unwrap();
        let stats = PipelineStats::start(Stage::Validation);

        let feed = dir.path().join("feed.jsonl");
        let lines: Vec<String> = (0..5)
            .map(|i| {
                serde_json::to_string(&ValidationRecord::new(
                    format!("https://uconn.edu/empty-{i}"),
                    200,
                    "text/html",
                    0,
                    0.1,
                ))
                .unwrap()
            })
            .collect();
        std::fs::write(&feed, lines.join("\n")).unwrap();

        let err = FeedProducer::new(&feed)
            .run(StageContext {
                input: StageInput::File(&feed),
                writer: &writer,
                stats: &stats,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Terminated { .. }));
    }
}

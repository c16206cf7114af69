use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use crawl_pipeline::{
    BreakerConfig, DedupStore, DiscoveryRecord, EnrichmentRecord, FeedProducer, Pipeline,
    PipelineConfig, PipelineState, RecordWriter, Stage, StageContext, StageError, StageProducer,
    StageRecord, ValidationRecord, ValidatorConfig, WriteOutcome,
};

fn full_sample_config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::new(dir.path().join("out"))
        .with_validator(ValidatorConfig::default().with_sample_rate(1.0))
}

fn count_lines(path: &std::path::Path) -> usize {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count()
}

/// Discovery producer that emits every record twice, modeling a crawler that
/// revisits URLs it has already reported.
struct DoubleEmitProducer {
    urls: Vec<String>,
}

#[async_trait]
impl StageProducer<DiscoveryRecord> for DoubleEmitProducer {
    async fn run(&self, ctx: StageContext<'_, DiscoveryRecord>) -> Result<(), StageError> {
        for _ in 0..2 {
            for url in &self.urls {
                ctx.stats.record_input();
                let record = DiscoveryRecord::new("https://uconn.edu", url, 0);
                match ctx.writer.write(&record) {
                    Ok(WriteOutcome::Written) => ctx.stats.record_output(),
                    Ok(_) => {}
                    Err(err) => {
                        return Err(StageError::Terminated {
                            detail: err.to_string(),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn full_pipeline_reaches_complete_with_dedup() {
    let dir = TempDir::new().unwrap();
    let config = full_sample_config(&dir);

    let url = "https://uconn.edu/a";
    let feeds = dir.path().join("feeds");
    std::fs::create_dir_all(&feeds).unwrap();

    let validation_feed = feeds.join("validation.jsonl");
    std::fs::write(
        &validation_feed,
        serde_json::to_string(&ValidationRecord::new(url, 200, "text/html", 2048, 0.08)).unwrap(),
    )
    .unwrap();

    let enrichment_feed = feeds.join("enrichment.jsonl");
    std::fs::write(
        &enrichment_feed,
        serde_json::to_string(&EnrichmentRecord::new(
            url,
            "UConn",
            "the university of connecticut",
            200,
            "text/html",
        ))
        .unwrap(),
    )
    .unwrap();

    let pipeline = Pipeline::new(
        config.clone(),
        DoubleEmitProducer {
            urls: vec![url.to_string()],
        },
        FeedProducer::new(&validation_feed),
        FeedProducer::new(&enrichment_feed),
    );

    let report = pipeline.run(&[url.to_string()]).await.unwrap();
    assert_eq!(report.state, PipelineState::Complete);
    assert_eq!(report.stages.len(), 3);

    // Discovery saw the URL twice but persisted it once.
    let discovery = &report.stages[0];
    assert_eq!(discovery.stats.input_count, 2);
    assert_eq!(discovery.stats.output_count, 1);
    assert_eq!(count_lines(&config.stage_output_path(Stage::Discovery)), 1);

    // Validation and enrichment each carried the record forward.
    assert_eq!(report.stages[1].records_written, 1);
    assert_eq!(report.stages[2].records_written, 1);
    let gate = report.stages[1].validation.as_ref().unwrap();
    assert_eq!(gate.success_rate(), 1.0);
    assert!(gate.is_acceptable());

    // Every stage collected non-empty statistics.
    for stage_report in &report.stages {
        assert!(stage_report.stats.input_count > 0);
        assert!(stage_report.stats.finished_at >= stage_report.stats.started_at);
    }
}

#[tokio::test]
async fn rerun_over_same_seeds_reintroduces_nothing() {
    let dir = TempDir::new().unwrap();
    let config = full_sample_config(&dir);
    let url = "https://uconn.edu/a";

    for run in 0..2 {
        let pipeline = Pipeline::new(
            config.clone(),
            DoubleEmitProducer {
                urls: vec![url.to_string()],
            },
            FeedProducer::new(dir.path().join("none.jsonl")),
            FeedProducer::new(dir.path().join("none.jsonl")),
        );
        let report = pipeline.run(&[url.to_string()]).await.unwrap();
        assert_eq!(report.state, PipelineState::Complete, "run {run}");
    }

    assert_eq!(count_lines(&config.stage_output_path(Stage::Discovery)), 1);
}

#[tokio::test]
async fn systemic_corruption_preserves_good_records() {
    let dir = TempDir::new().unwrap();
    let config = full_sample_config(&dir);

    // 940 good records, then 60 zero-byte bodies: the ratio and the floor
    // are both breached partway through the empty run.
    let feeds = dir.path().join("feeds");
    std::fs::create_dir_all(&feeds).unwrap();
    let validation_feed = feeds.join("validation.jsonl");
    let mut lines = Vec::new();
    for i in 0..940 {
        lines.push(
            serde_json::to_string(&ValidationRecord::new(
                format!("https://uconn.edu/page-{i}"),
                200,
                "text/html",
                1024,
                0.05,
            ))
            .unwrap(),
        );
    }
    for i in 0..60 {
        lines.push(
            serde_json::to_string(&ValidationRecord::new(
                format!("https://uconn.edu/broken-{i}"),
                200,
                "text/html",
                0,
                0.05,
            ))
            .unwrap(),
        );
    }
    std::fs::write(&validation_feed, lines.join("\n")).unwrap();

    let pipeline = Pipeline::new(
        config.clone(),
        DoubleEmitProducer { urls: vec![] },
        FeedProducer::new(&validation_feed),
        FeedProducer::new(dir.path().join("none.jsonl")),
    );
    let report = pipeline.run(&[]).await.unwrap();

    let validation = &report.stages[1];
    assert!(validation.terminated_early);
    assert_eq!(validation.records_written, 940);
    assert_eq!(count_lines(&config.stage_output_path(Stage::Validation)), 940);

    // The captured records are clean, so the gate passes and the run finishes.
    assert_eq!(report.state, PipelineState::Complete);
}

#[tokio::test]
async fn restart_reproduces_seen_cardinality() {
    let dir = TempDir::new().unwrap();
    let dedup_path = dir.path().join("dedup.log");
    let output = dir.path().join("discovery.jsonl");

    let before = {
        let dedup = Arc::new(DedupStore::open(&dedup_path).unwrap());
        let writer: RecordWriter<DiscoveryRecord> =
            RecordWriter::open(&output, Arc::clone(&dedup), BreakerConfig::default()).unwrap();
        for i in 0..25 {
            writer
                .write(&DiscoveryRecord::new(
                    "https://uconn.edu",
                    format!("https://uconn.edu/{i}"),
                    0,
                ))
                .unwrap();
        }
        let count = dedup.count();
        writer.close().unwrap();
        count
    };

    let dedup = Arc::new(DedupStore::open(&dedup_path).unwrap());
    let _writer: RecordWriter<DiscoveryRecord> =
        RecordWriter::open(&output, Arc::clone(&dedup), BreakerConfig::default()).unwrap();
    assert_eq!(dedup.count(), before);
}

#[tokio::test]
async fn dedup_keys_are_stage_scoped() {
    // The same URL must be admitted once by each stage, not once globally.
    let dir = TempDir::new().unwrap();
    let dedup = Arc::new(DedupStore::open(dir.path().join("dedup.log")).unwrap());
    let url = "https://uconn.edu/a";

    let discovery: RecordWriter<DiscoveryRecord> = RecordWriter::open(
        dir.path().join("discovery.jsonl"),
        Arc::clone(&dedup),
        BreakerConfig::default(),
    )
    .unwrap();
    assert_eq!(
        discovery
            .write(&DiscoveryRecord::new("https://uconn.edu", url, 0))
            .unwrap(),
        WriteOutcome::Written
    );

    let enrichment: RecordWriter<EnrichmentRecord> = RecordWriter::open(
        dir.path().join("enrichment.jsonl"),
        Arc::clone(&dedup),
        BreakerConfig::default(),
    )
    .unwrap();
    assert_eq!(
        enrichment
            .write(&EnrichmentRecord::new(url, "UConn", "text body", 200, "text/html"))
            .unwrap(),
        WriteOutcome::Written
    );
}

#[tokio::test]
async fn enrichment_records_satisfy_their_schema() {
    let record = EnrichmentRecord::new(
        "https://uconn.edu/a",
        "UConn",
        "storrs connecticut campus",
        200,
        "text/html",
    );
    assert!(record.word_count >= 1);
    assert!(record.check().is_ok());
    assert_eq!(
        <EnrichmentRecord as StageRecord>::stage(),
        Stage::Enrichment
    );
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawl_pipeline::{
    merge_outputs, validate_file, write_merged, FeedProducer, Pipeline, PipelineConfig,
    PipelineReport, PipelineState, SeedListProducer, Stage, ValidatorConfig,
};

#[derive(Parser)]
#[command(name = "sitewalk", version, about = "Staged URL-space ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the three-stage pipeline over a seed list
    Run {
        /// Newline-separated list of starting URLs
        #[arg(long)]
        seeds: PathBuf,

        /// Directory for stage output files and the dedup log
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,

        /// Candidate feed for the validation stage (JSONL of validation records)
        #[arg(long)]
        validation_feed: Option<PathBuf>,

        /// Candidate feed for the enrichment stage (JSONL of enrichment records)
        #[arg(long)]
        enrichment_feed: Option<PathBuf>,

        /// Fraction of records each gate inspects
        #[arg(long, default_value_t = 0.25)]
        sample_rate: f64,

        /// Halt the pipeline on a validation shortfall instead of warning
        #[arg(long)]
        halt_on_shortfall: bool,

        /// Print the final report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Validate one stage output file against its record schema
    Validate {
        #[arg(long)]
        file: PathBuf,

        #[arg(long, value_enum)]
        stage: StageArg,

        #[arg(long, default_value_t = 1.0)]
        sample_rate: f64,

        /// Abort on the first failed record
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Merge stage outputs into one record per URL
    Merge {
        #[arg(long, default_value = "data")]
        output_dir: PathBuf,

        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StageArg {
    Discovery,
    Validation,
    Enrichment,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Discovery => Stage::Discovery,
            StageArg::Validation => Stage::Validation,
            StageArg::Enrichment => Stage::Enrichment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawl_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            seeds,
            output_dir,
            validation_feed,
            enrichment_feed,
            sample_rate,
            halt_on_shortfall,
            json,
        } => {
            run_pipeline(
                seeds,
                output_dir,
                validation_feed,
                enrichment_feed,
                sample_rate,
                halt_on_shortfall,
                json,
            )
            .await
        }
        Command::Validate {
            file,
            stage,
            sample_rate,
            fail_on_error,
        } => run_validate(file, stage.into(), sample_rate, fail_on_error),
        Command::Merge { output_dir, out } => run_merge(output_dir, out),
    }
}

async fn run_pipeline(
    seeds_path: PathBuf,
    output_dir: PathBuf,
    validation_feed: Option<PathBuf>,
    enrichment_feed: Option<PathBuf>,
    sample_rate: f64,
    halt_on_shortfall: bool,
    json: bool,
) -> Result<()> {
    let seeds = read_seeds(&seeds_path)?;
    tracing::info!(seeds = seeds.len(), "Loaded seed list");

    let validation_feed =
        validation_feed.unwrap_or_else(|| output_dir.join("feeds").join("validation.jsonl"));
    let enrichment_feed =
        enrichment_feed.unwrap_or_else(|| output_dir.join("feeds").join("enrichment.jsonl"));

    let config = PipelineConfig::new(output_dir)
        .with_validator(ValidatorConfig::default().with_sample_rate(sample_rate))
        .with_halt_on_shortfall(halt_on_shortfall);

    let pipeline = Pipeline::new(
        config,
        SeedListProducer,
        FeedProducer::new(validation_feed),
        FeedProducer::new(enrichment_feed),
    );

    let report = pipeline.run(&seeds).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    match report.state {
        PipelineState::Complete => Ok(()),
        state => anyhow::bail!("pipeline did not complete: {state:?}"),
    }
}

fn run_validate(file: PathBuf, stage: Stage, sample_rate: f64, fail_on_error: bool) -> Result<()> {
    let config = ValidatorConfig::default()
        .with_sample_rate(sample_rate)
        .with_fail_on_error(fail_on_error);

    let report = validate_file(&file, stage, &config)
        .with_context(|| format!("Failed to validate {}", file.display()))?;

    match report {
        None => println!("skipped: {} is absent", file.display()),
        Some(report) => {
            println!(
                "{}: checked {} failed {} success_rate {:.1}% acceptable {}",
                report.schema,
                report.records_checked,
                report.records_failed,
                report.success_rate() * 100.0,
                report.is_acceptable(),
            );
        }
    }
    Ok(())
}

fn run_merge(output_dir: PathBuf, out: PathBuf) -> Result<()> {
    let config = PipelineConfig::new(output_dir);
    let merged = merge_outputs(&config).context("Failed to merge stage outputs")?;
    write_merged(&merged, &out)
        .with_context(|| format!("Failed to write merged records to {}", out.display()))?;
    println!("merged {} urls into {}", merged.len(), out.display());
    Ok(())
}

fn read_seeds(path: &PathBuf) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed list {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn print_report(report: &PipelineReport) {
    println!("run {} finished: {:?}", report.run_id, report.state);
    for stage_report in &report.stages {
        let stats = &stage_report.stats;
        let gate = match &stage_report.validation {
            Some(v) => format!(
                "success_rate {:.1}% acceptable {}",
                v.success_rate() * 100.0,
                v.is_acceptable()
            ),
            None => "skipped".to_string(),
        };
        println!(
            "  {}: in {} out {} errors {} written {} in {:.2}s{} gate {}",
            stats.stage,
            stats.input_count,
            stats.output_count,
            stats.error_count,
            stage_report.records_written,
            stats.duration_seconds,
            if stage_report.terminated_early {
                " (terminated early)"
            } else {
                ""
            },
            gate,
        );
    }
}

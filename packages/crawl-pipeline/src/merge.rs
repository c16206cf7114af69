use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::types::{DiscoveryRecord, EnrichmentRecord, MergedUrlRecord, Stage, ValidationRecord};

/// Join the three stage output files into one record per URL. Fields from
/// stages that have not run for a URL stay absent. Malformed lines are
/// skipped, mirroring how the validator treats them.
pub fn merge_outputs(config: &PipelineConfig) -> io::Result<Vec<MergedUrlRecord>> {
    let mut merged: BTreeMap<String, MergedUrlRecord> = BTreeMap::new();

    for_each_record::<DiscoveryRecord>(&config.stage_output_path(Stage::Discovery), |record| {
        let key = record.discovered_url.clone();
        merged
            .entry(key.clone())
            .or_insert_with(|| MergedUrlRecord::new(key))
            .discovery = Some(record);
    })?;

    for_each_record::<ValidationRecord>(&config.stage_output_path(Stage::Validation), |record| {
        let key = record.url.clone();
        merged
            .entry(key.clone())
            .or_insert_with(|| MergedUrlRecord::new(key))
            .validation = Some(record);
    })?;

    for_each_record::<EnrichmentRecord>(&config.stage_output_path(Stage::Enrichment), |record| {
        let key = record.url.clone();
        merged
            .entry(key.clone())
            .or_insert_with(|| MergedUrlRecord::new(key))
            .enrichment = Some(record);
    })?;

    Ok(merged.into_values().collect())
}

/// Write merged records as JSONL.
pub fn write_merged(records: &[MergedUrlRecord], path: &Path) -> io::Result<()> {
    let mut out = fs::File::create(path)?;
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(out, "{line}")?;
    }
    out.sync_all()?;
    Ok(())
}

fn for_each_record<R: serde::de::DeserializeOwned>(
    path: &Path,
    mut apply: impl FnMut(R),
) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(path)?;
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<R>(line) {
            Ok(record) => apply(record),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "Skipping malformed record in merge");
            }
        }
    }
    Ok(())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::traits::StageRecord;

// ============================================================================
// STAGES
// ============================================================================

/// Pipeline stage identity, resolved at compile time (no schema-by-name lookup)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Validation,
    Enrichment,
}

impl Stage {
    /// Pipeline order, first to last
    pub const ALL: [Stage; 3] = [Stage::Discovery, Stage::Validation, Stage::Enrichment];

    pub fn slug(self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Validation => "validation",
            Stage::Enrichment => "enrichment",
        }
    }

    /// Name of the record schema this stage persists
    pub fn schema_name(self) -> &'static str {
        match self {
            Stage::Discovery => "DiscoveryRecord",
            Stage::Validation => "ValidationRecord",
            Stage::Enrichment => "EnrichmentRecord",
        }
    }

    pub fn output_filename(self) -> &'static str {
        match self {
            Stage::Discovery => "discovery.jsonl",
            Stage::Validation => "validation.jsonl",
            Stage::Enrichment => "enrichment.jsonl",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

// ============================================================================
// URL HASH
// ============================================================================

/// Stable content-addressable key for a URL, the join key across all stages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UrlHash(pub String);

impl UrlHash {
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UrlHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// STAGE RECORDS
// ============================================================================

/// A candidate URL surfaced by the discovery stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub source_url: String,
    pub discovered_url: String,
    pub first_seen: DateTime<Utc>,
    pub discovery_depth: u32,
}

impl DiscoveryRecord {
    pub fn new(
        source_url: impl Into<String>,
        discovered_url: impl Into<String>,
        discovery_depth: u32,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            discovered_url: discovered_url.into(),
            first_seen: Utc::now(),
            discovery_depth,
        }
    }
}

/// Outcome of probing a discovered URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub url: String,
    pub url_hash: UrlHash,
    pub status_code: u16,
    pub content_type: String,
    pub content_length: u64,
    pub response_time_seconds: f64,
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationRecord {
    pub fn new(
        url: impl Into<String>,
        status_code: u16,
        content_type: impl Into<String>,
        content_length: u64,
        response_time_seconds: f64,
    ) -> Self {
        let url = url.into();
        Self {
            url_hash: UrlHash::from_url(&url),
            url,
            status_code,
            content_type: content_type.into(),
            content_length,
            response_time_seconds,
            is_valid: (200..400).contains(&status_code),
            error_message: None,
            validated_at: Utc::now(),
        }
    }
}

/// Content analysis produced for a validated URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub url: String,
    pub title: String,
    pub text_content: String,
    pub word_count: u64,
    pub entities: BTreeSet<String>,
    pub keywords: Vec<String>,
    pub content_tags: BTreeSet<String>,
    pub has_pdf_links: bool,
    pub has_audio_links: bool,
    pub status_code: u16,
    pub content_type: String,
    pub enriched_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        text_content: impl Into<String>,
        status_code: u16,
        content_type: impl Into<String>,
    ) -> Self {
        let text_content = text_content.into();
        let word_count = text_content.split_whitespace().count() as u64;
        Self {
            url: url.into(),
            title: title.into(),
            text_content,
            word_count,
            entities: BTreeSet::new(),
            keywords: Vec::new(),
            content_tags: BTreeSet::new(),
            has_pdf_links: false,
            has_audio_links: false,
            status_code,
            content_type: content_type.into(),
            enriched_at: Utc::now(),
        }
    }
}

/// Union of all stage records for one URL; stages not yet run are absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedUrlRecord {
    pub url: String,
    pub discovery: Option<DiscoveryRecord>,
    pub validation: Option<ValidationRecord>,
    pub enrichment: Option<EnrichmentRecord>,
}

impl MergedUrlRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            discovery: None,
            validation: None,
            enrichment: None,
        }
    }
}

// ============================================================================
// STAGE RECORD CONTRACTS
// ============================================================================

impl StageRecord for DiscoveryRecord {
    fn stage() -> Stage {
        Stage::Discovery
    }

    fn dedup_key(&self) -> String {
        self.discovered_url.clone()
    }

    fn has_empty_body(&self) -> bool {
        self.discovered_url.is_empty()
    }

    fn check(&self) -> Result<(), String> {
        if self.source_url.is_empty() {
            return Err("source_url is empty".to_string());
        }
        if self.discovered_url.is_empty() {
            return Err("discovered_url is empty".to_string());
        }
        Ok(())
    }
}

impl StageRecord for ValidationRecord {
    fn stage() -> Stage {
        Stage::Validation
    }

    fn dedup_key(&self) -> String {
        self.url_hash.as_str().to_string()
    }

    fn has_empty_body(&self) -> bool {
        self.content_length == 0
    }

    fn check(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("url is empty".to_string());
        }
        if self.url_hash.as_str().is_empty() {
            return Err("url_hash is empty".to_string());
        }
        if !self.response_time_seconds.is_finite() || self.response_time_seconds < 0.0 {
            return Err(format!(
                "response_time_seconds is not a non-negative number: {}",
                self.response_time_seconds
            ));
        }
        Ok(())
    }
}

impl StageRecord for EnrichmentRecord {
    fn stage() -> Stage {
        Stage::Enrichment
    }

    fn dedup_key(&self) -> String {
        self.url.clone()
    }

    fn has_empty_body(&self) -> bool {
        self.text_content.is_empty()
    }

    fn check(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("url is empty".to_string());
        }
        Ok(())
    }
}

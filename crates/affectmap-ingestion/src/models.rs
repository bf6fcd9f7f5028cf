//! Data model for the ingestion pipeline: researcher identities, works,
//! analyses, cache entries, and the persisted profile/index artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ── Identity ──────────────────────────────────────────────────────────────────

/// One entry of the seed list. Immutable once loaded; the normalized
/// OpenAlex author ID is the primary key everywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearcherIdentity {
    pub name: String,
    #[serde(default)]
    pub openalex_author_id: Option<String>,
    #[serde(default)]
    pub google_scholar: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
}

impl ResearcherIdentity {
    /// Stable key for artifacts and in-memory maps. Falls back to a
    /// normalized form of the name when no author ID was seeded or resolved.
    pub fn key(&self) -> String {
        match &self.openalex_author_id {
            Some(id) if !id.is_empty() => normalize_author_id(id),
            _ => title_key(&self.name),
        }
    }
}

/// Reduce an OpenAlex author reference (URL or bare token) to its `A…` short
/// form. Bare numeric IDs get the `A` prefix restored.
pub fn normalize_author_id(raw: &str) -> String {
    let token = raw.rsplit('/').next().unwrap_or(raw).trim();
    if token.starts_with('A') {
        token.to_string()
    } else {
        format!("A{}", token.trim_start_matches('A'))
    }
}

// ── Works ─────────────────────────────────────────────────────────────────────

/// Venue type in dedup-priority order: journals beat conferences beat book
/// series beat anything else; repository-hosted records rank last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueType {
    Journal,
    Conference,
    BookSeries,
    Other,
    Repository,
}

impl VenueType {
    /// Higher wins in the dedup tie-break.
    pub fn priority(self) -> u8 {
        match self {
            VenueType::Journal => 4,
            VenueType::Conference => 3,
            VenueType::BookSeries => 2,
            VenueType::Other => 1,
            VenueType::Repository => 0,
        }
    }
}

/// One logical paper as known to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    /// Opaque external ID (OpenAlex `W…` short form).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
    pub venue_type: VenueType,
    #[serde(default)]
    pub cited_by_count: u32,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub is_preprint: bool,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub analysis: Option<Analysis>,
}

impl Work {
    /// Dedup key: the same paper appears under multiple external IDs
    /// (preprint vs. published), so works are keyed by normalized title.
    pub fn title_key(&self) -> String {
        title_key(&self.title)
    }

    /// Cache key covering the fields the analysis reads; editing the title or
    /// abstract invalidates stale analysis.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id, &self.title, self.abstract_text.as_deref().unwrap_or(""))
    }
}

/// Lowercase alphanumeric-only normalization used to compare titles.
pub fn title_key(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Hex SHA-256 over the identifying fields of a work.
pub fn fingerprint(id: &str, title: &str, abstract_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b"\n");
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(abstract_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Analysis ──────────────────────────────────────────────────────────────────

/// AI-produced classification of one work. Never mutated after creation;
/// a full-refresh run replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub relevant: bool,
    /// Relevance score, clamped to [0, 1] on receipt.
    pub score: f64,
    pub rationale: String,
    #[serde(default)]
    pub directions: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl Analysis {
    /// Deterministic placeholder used in skip-AI runs.
    pub fn skipped() -> Self {
        Self {
            relevant: false,
            score: 0.0,
            rationale: "analysis skipped".to_string(),
            directions: Vec::new(),
            summary: None,
        }
    }
}

/// One analysis cache record, keyed externally by [`fingerprint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub analysis: Analysis,
    /// External ID of the analyzed work; feeds the known-ID set that ends
    /// incremental paging.
    pub work_id: String,
    pub researcher_name: String,
    pub researcher_id: String,
    pub cached_at: DateTime<Utc>,
}

/// Per-researcher cache artifact, fingerprint → entry. BTreeMap keeps the
/// serialized form deterministic.
pub type AnalysisCache = BTreeMap<String, CacheEntry>;

// ── Profile / index ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Affiliation {
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Bibliometrics lifted from the resolved author record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub works_count: u32,
    pub cited_by_count: u32,
    pub h_index: u32,
    pub i10_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSummary {
    pub directions: Vec<String>,
    pub overview: String,
    /// Titles of the most representative (most cited relevant) works.
    pub representative: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_works: usize,
    pub analyzed_works: usize,
    pub relevant_works: usize,
    pub cache_hits: usize,
    pub new_this_run: usize,
    /// The only field allowed to differ between otherwise idempotent runs.
    pub updated_at: Option<DateTime<Utc>>,
}

/// The full per-researcher artifact. Rebuilt each run by merging previous
/// works with newly analyzed ones; written atomically at the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearcherProfile {
    pub identity: ResearcherIdentity,
    #[serde(default)]
    pub affiliation: Affiliation,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub summary: Option<TopicSummary>,
    #[serde(default)]
    pub stats: ProcessingStats,
    #[serde(default)]
    pub works: Vec<Work>,
}

/// Lightweight projection of a profile for the cross-researcher index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub identity: ResearcherIdentity,
    #[serde(default)]
    pub affiliation: Affiliation,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub summary: Option<TopicSummary>,
    #[serde(default)]
    pub stats: ProcessingStats,
}

impl IndexRecord {
    pub fn from_profile(profile: &ResearcherProfile) -> Self {
        Self {
            identity: profile.identity.clone(),
            affiliation: profile.affiliation.clone(),
            metrics: profile.metrics,
            summary: profile.summary.clone(),
            stats: profile.stats.clone(),
        }
    }
}

/// Cross-researcher index: author key → record, ordered for deterministic
/// output.
pub type ResearcherIndex = BTreeMap<String, IndexRecord>;

// ── Tests ─────────────────────────────────────────────────────────────────────

//! OpenAlex REST API client.
//!
//! Endpoints:
//!   GET /authors/{id}                       — resolve a seeded author ID
//!   GET /authors?search={name}&per-page=5   — name search fallback
//!   GET /works?filter=author.id:{id}&…      — paged work listing, newest first
//!
//! Responses are deserialized into explicit schema structs; every optional
//! field carries `#[serde(default)]` so schema drift degrades to defaults
//! instead of parse failures. Transport errors are retried with linear
//! backoff; exhausted retries propagate as fatal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use affectmap_common::ScopedClient;

use crate::models::{normalize_author_id, Metrics, ResearcherIdentity, VenueType, Work};
use super::{AuthorRecord, BibliographicSource, WorksPage};

const OPENALEX_BASE: &str = "https://api.openalex.org";
const MAILTO: &str = "maintainers@affectmap.dev";
const TRANSPORT_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(750);

/// Concepts attached to a work below this score are noise.
const CONCEPT_SCORE_FLOOR: f64 = 0.3;
const MAX_WORK_CONCEPTS: usize = 8;

/// Non-success HTTP status, carried typed so callers can match on the code
/// instead of scraping error strings.
#[derive(Debug, Error)]
#[error("OpenAlex HTTP {status}")]
struct ApiStatusError {
    status: StatusCode,
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ApiStatusError>()
        .map(|s| s.status == StatusCode::NOT_FOUND)
        .unwrap_or(false)
}

// ── Response schemas ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AuthorSchema {
    #[serde(default)]
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    orcid: Option<String>,
    #[serde(default)]
    works_count: u32,
    #[serde(default)]
    cited_by_count: u32,
    #[serde(default)]
    summary_stats: SummaryStatsSchema,
    #[serde(default)]
    last_known_institutions: Vec<InstitutionSchema>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryStatsSchema {
    #[serde(default)]
    h_index: u32,
    #[serde(default)]
    i10_index: u32,
}

#[derive(Debug, Default, Deserialize)]
struct InstitutionSchema {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorSearchSchema {
    #[serde(default)]
    results: Vec<AuthorSchema>,
}

#[derive(Debug, Deserialize)]
struct WorksPageSchema {
    #[serde(default)]
    results: Vec<WorkSchema>,
}

#[derive(Debug, Deserialize)]
struct WorkSchema {
    #[serde(default)]
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    publication_year: Option<i32>,
    #[serde(rename = "type", default)]
    doc_type: Option<String>,
    #[serde(default)]
    cited_by_count: u32,
    #[serde(default)]
    primary_location: Option<LocationSchema>,
    #[serde(default)]
    concepts: Vec<ConceptSchema>,
    #[serde(default)]
    abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationSchema {
    #[serde(default)]
    source: Option<SourceSchema>,
}

#[derive(Debug, Default, Deserialize)]
struct SourceSchema {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(rename = "type", default)]
    source_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConceptSchema {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    score: f64,
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct OpenAlexClient {
    client: ScopedClient,
    base_url: String,
}

impl OpenAlexClient {
    pub fn new(client: ScopedClient) -> Self {
        Self { client, base_url: OPENALEX_BASE.to_string() }
    }

    /// GET with query params, retried on transport/server errors. The final
    /// failure propagates; silently continuing would corrupt incremental
    /// state downstream.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 1..=TRANSPORT_ATTEMPTS {
            let send = async {
                let resp = self.client.get(url)?.query(params).send().await?;
                let status = resp.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(ApiStatusError { status }.into());
                }
                if !status.is_success() {
                    // Client errors (404 on an unknown author, …) are not
                    // retryable; surface them immediately.
                    return Ok(Err(ApiStatusError { status }.into()));
                }
                Ok(Ok(resp.json::<T>().await?))
            }
            .await;

            match send {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(terminal)) => return Err(terminal),
                Err(e) => {
                    warn!(attempt, url, error = %e, "OpenAlex request failed");
                    last_err = Some(e);
                    if attempt < TRANSPORT_ATTEMPTS {
                        tokio::time::sleep(BACKOFF_BASE * attempt).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAlex request failed")))
    }

    async fn get_author(&self, author_id: &str) -> anyhow::Result<Option<AuthorSchema>> {
        let url = format!("{}/authors/{}", self.base_url, normalize_author_id(author_id));
        match self.get_json::<AuthorSchema>(&url, &[("mailto", MAILTO.to_string())]).await {
            Ok(author) => Ok(Some(author)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_author(&self, name: &str) -> anyhow::Result<Option<AuthorSchema>> {
        let url = format!("{}/authors", self.base_url);
        let params = [
            ("search", name.to_string()),
            ("per-page", "5".to_string()),
            ("mailto", MAILTO.to_string()),
        ];
        let resp: AuthorSearchSchema = self.get_json(&url, &params).await?;
        if resp.results.is_empty() {
            return Ok(None);
        }

        // Exact display-name match first, else the most published candidate.
        let wanted = name.trim().to_lowercase();
        let exact = resp
            .results
            .iter()
            .position(|c| c.display_name.trim().to_lowercase() == wanted);
        let mut results = resp.results;
        let pick = match exact {
            Some(i) => results.swap_remove(i),
            None => {
                results.sort_by_key(|c| c.works_count);
                match results.pop() {
                    Some(c) => c,
                    None => return Ok(None),
                }
            }
        };
        Ok(Some(pick))
    }
}

#[async_trait]
impl BibliographicSource for OpenAlexClient {
    #[instrument(skip(self, identity), fields(name = %identity.name))]
    async fn resolve_author(
        &self,
        identity: &ResearcherIdentity,
    ) -> anyhow::Result<Option<AuthorRecord>> {
        let author = match &identity.openalex_author_id {
            Some(id) if !id.is_empty() => self.get_author(id).await?,
            _ => self.search_author(&identity.name).await?,
        };
        Ok(author.map(author_to_record))
    }

    #[instrument(skip(self))]
    async fn works_page(
        &self,
        author_id: &str,
        page: usize,
        per_page: usize,
    ) -> anyhow::Result<WorksPage> {
        let url = format!("{}/works", self.base_url);
        let params = [
            ("filter", format!("author.id:{}", normalize_author_id(author_id))),
            ("sort", "publication_date:desc".to_string()),
            ("page", page.to_string()),
            ("per-page", per_page.to_string()),
            ("mailto", MAILTO.to_string()),
        ];
        let resp: WorksPageSchema = self.get_json(&url, &params).await?;
        debug!(page, n = resp.results.len(), "OpenAlex works page");

        let is_full = resp.results.len() == per_page;
        let works = resp.results.into_iter().map(schema_to_work).collect();
        Ok(WorksPage { works, is_full })
    }
}

// ── Normalization ─────────────────────────────────────────────────────────────

fn author_to_record(author: AuthorSchema) -> AuthorRecord {
    let institution = author.last_known_institutions.first();
    AuthorRecord {
        id: normalize_author_id(&author.id),
        display_name: author.display_name,
        orcid: author.orcid,
        institution: institution.and_then(|i| i.display_name.clone()),
        country_code: institution.and_then(|i| i.country_code.clone()),
        metrics: Metrics {
            works_count: author.works_count,
            cited_by_count: author.cited_by_count,
            h_index: author.summary_stats.h_index,
            i10_index: author.summary_stats.i10_index,
        },
    }
}

fn schema_to_work(work: WorkSchema) -> Work {
    let source = work.primary_location.as_ref().and_then(|l| l.source.as_ref());
    let venue = source
        .and_then(|s| s.display_name.clone())
        .or_else(|| venue_from_doi(work.doi.as_deref()));
    let venue_type = venue_type_of(source.and_then(|s| s.source_type.as_deref()));

    let is_preprint = work.doc_type.as_deref() == Some("preprint")
        || venue_type == VenueType::Repository
        || is_preprint_doi(work.doi.as_deref());

    let concepts = work
        .concepts
        .iter()
        .filter(|c| c.score >= CONCEPT_SCORE_FLOOR)
        .filter_map(|c| c.display_name.clone())
        .take(MAX_WORK_CONCEPTS)
        .collect();

    Work {
        id: short_work_id(&work.id),
        title: work.display_name.unwrap_or_default(),
        publication_date: work.publication_date,
        publication_year: work.publication_year,
        venue,
        venue_type,
        cited_by_count: work.cited_by_count,
        doc_type: work.doc_type,
        is_preprint,
        concepts,
        abstract_text: work.abstract_inverted_index.as_ref().map(rebuild_abstract),
        analysis: None,
    }
}

fn short_work_id(url: &str) -> String {
    url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(url).to_string()
}

fn venue_type_of(source_type: Option<&str>) -> VenueType {
    match source_type {
        Some("journal") => VenueType::Journal,
        Some("conference") => VenueType::Conference,
        Some("book series") => VenueType::BookSeries,
        Some("repository") => VenueType::Repository,
        _ => VenueType::Other,
    }
}

/// OpenAlex reconstructs badly for some records, so abstracts arrive as an
/// inverted index: word → positions. Flatten it back to text.
fn rebuild_abstract(index: &HashMap<String, Vec<u32>>) -> String {
    let mut slots: Vec<(u32, &str)> = Vec::new();
    for (word, positions) in index {
        for &p in positions {
            slots.push((p, word.as_str()));
        }
    }
    slots.sort_by_key(|(p, _)| *p);
    slots.iter().map(|(_, w)| *w).collect::<Vec<_>>().join(" ")
}

// ── DOI-prefix venue table ────────────────────────────────────────────────────

/// Publisher backfill when the service supplies no venue.
const DOI_PREFIX_VENUES: &[(&str, &str)] = &[
    ("10.48550", "arXiv"),
    ("10.1101", "bioRxiv"),
    ("10.1109", "IEEE"),
    ("10.1145", "ACM"),
    ("10.1007", "Springer"),
    ("10.1016", "Elsevier"),
    ("10.1038", "Nature Portfolio"),
    ("10.3389", "Frontiers"),
];

const PREPRINT_DOI_PREFIXES: &[&str] = &["10.48550", "10.1101"];

fn doi_prefix(doi: Option<&str>) -> Option<String> {
    let doi = doi?;
    let bare = doi.trim_start_matches("https://doi.org/");
    bare.split('/').next().map(str::to_string)
}

fn venue_from_doi(doi: Option<&str>) -> Option<String> {
    let prefix = doi_prefix(doi)?;
    DOI_PREFIX_VENUES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, venue)| venue.to_string())
}

fn is_preprint_doi(doi: Option<&str>) -> bool {
    match doi_prefix(doi) {
        Some(prefix) => PREPRINT_DOI_PREFIXES.contains(&prefix.as_str()),
        None => false,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

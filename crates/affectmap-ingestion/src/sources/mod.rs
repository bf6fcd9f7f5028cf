//! Bibliographic source clients.

pub mod openalex;

use async_trait::async_trait;

use crate::models::{Metrics, ResearcherIdentity, Work};

/// A resolved author as the pipeline sees it, normalized from the service's
/// native schema.
#[derive(Debug, Clone, Default)]
pub struct AuthorRecord {
    /// Short-form author ID (`A…`).
    pub id: String,
    pub display_name: String,
    pub orcid: Option<String>,
    pub institution: Option<String>,
    pub country_code: Option<String>,
    pub metrics: Metrics,
}

/// One page of an author's works, newest first.
#[derive(Debug, Clone, Default)]
pub struct WorksPage {
    pub works: Vec<Work>,
    /// Whether the service filled the page completely; a full page of
    /// already-known works ends incremental paging.
    pub is_full: bool,
}

/// Common interface for the bibliographic service.
#[async_trait]
pub trait BibliographicSource: Send + Sync {
    /// Resolve a seed identity to an author record, by ID when seeded and by
    /// name search otherwise. `Ok(None)` means the service knows nothing.
    async fn resolve_author(
        &self,
        identity: &ResearcherIdentity,
    ) -> anyhow::Result<Option<AuthorRecord>>;

    /// Fetch one page (1-based) of the author's works.
    async fn works_page(
        &self,
        author_id: &str,
        page: usize,
        per_page: usize,
    ) -> anyhow::Result<WorksPage>;
}

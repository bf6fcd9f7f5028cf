//! Live OpenAlex resolution test.
//!
//! Requires network access. Run with:
//! ```bash
//! cargo test --package affectmap-ingestion --test test_openalex_live -- --ignored --nocapture
//! ```

use affectmap_common::ScopedClient;
use affectmap_ingestion::models::ResearcherIdentity;
use affectmap_ingestion::sources::openalex::OpenAlexClient;
use affectmap_ingestion::sources::BibliographicSource;

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires network access
async fn test_resolve_picard_and_page_works() {
    let client = OpenAlexClient::new(ScopedClient::new().unwrap());

    let identity = ResearcherIdentity {
        name: "Rosalind Picard".to_string(),
        openalex_author_id: None,
        google_scholar: None,
        homepage: None,
    };

    let author = client
        .resolve_author(&identity)
        .await
        .expect("resolution should succeed")
        .expect("a well-known author should resolve");
    println!("Resolved: {} ({})", author.display_name, author.id);
    assert!(author.id.starts_with('A'));
    assert!(author.metrics.works_count > 0);

    let page = client.works_page(&author.id, 1, 25).await.expect("first page should load");
    println!("Page 1: {} works (full: {})", page.works.len(), page.is_full);
    assert!(!page.works.is_empty());
    for work in page.works.iter().take(5) {
        println!("  {} [{}] {}", work.id, work.cited_by_count, work.title);
        assert!(work.id.starts_with('W'));
        assert!(!work.title.is_empty());
    }
}

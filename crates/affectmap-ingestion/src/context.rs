//! Per-researcher processing context.
//!
//! Preparation resolves the canonical author ID, loads prior state
//! (tolerating absence), and pages the bibliographic service for works not
//! seen before. Incremental mode stops paging as soon as a full page holds
//! only already-known work IDs; a full-refresh run pages exhaustively. The
//! prepared context then carries the researcher's shared mutable state
//! (cache map, analyzed works, counters) across the analysis workers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::{info, instrument};

use crate::models::{AnalysisCache, ResearcherIdentity, ResearcherProfile, Work};
use crate::sources::{AuthorRecord, BibliographicSource};
use crate::store::{CacheWriter, CheckpointStore};

/// Works requested per page. OpenAlex allows up to 200; a smaller page keeps
/// the incremental stop check responsive.
pub const PAGE_SIZE: usize = 25;

/// Knobs consumed during preparation (a subset of the run options).
#[derive(Debug, Clone, Copy)]
pub struct PrepareOptions {
    pub full_refresh: bool,
    pub max_works: usize,
}

/// Everything the workers and the merger need for one researcher. Owned
/// exclusively by that researcher's driver; the interior-mutable parts are
/// the ones analysis workers touch concurrently.
pub struct ResearcherContext {
    pub identity: ResearcherIdentity,
    pub key: String,
    pub author: Option<AuthorRecord>,
    pub prior_profile: Option<ResearcherProfile>,
    /// Newly discovered works, not yet analyzed, FIFO for the queue.
    pub new_works: Vec<Work>,

    /// Shared analysis cache for this researcher; workers insert, the
    /// [`CacheWriter`] serializes file writes.
    pub cache: Mutex<AnalysisCache>,
    pub cache_writer: CacheWriter,
    /// Works that finished analysis this run.
    pub analyzed: Mutex<Vec<Work>>,
    /// Tasks enqueued but not yet finished for this researcher.
    pub remaining: AtomicUsize,
    pub drained: Notify,

    pub cache_hits: AtomicUsize,
    pub llm_calls: AtomicUsize,
    /// Completions since the last cache flush.
    flush_counter: AtomicUsize,
}

impl ResearcherContext {
    /// Record one finished task; flushes the cache snapshot every
    /// `flush_every` completions and wakes the driver when the researcher's
    /// backlog is drained.
    pub async fn task_finished(&self, work: Work, flush_every: usize) {
        self.analyzed.lock().await.push(work);

        let n = self.flush_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if flush_every > 0 && n % flush_every == 0 {
            let cache = self.cache.lock().await;
            // Write failures surface on the final synced flush at checkpoint.
            let _ = self.cache_writer.write(&cache);
        }

        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every task enqueued for this researcher has finished.
    pub async fn wait_drained(&self) {
        loop {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.drained.notified();
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Prepare one researcher: resolve identity, load prior state, discover new
/// works. No side effects until the caller checkpoints; a bibliographic
/// failure after transport retries propagates as fatal.
#[instrument(skip_all, fields(name = %identity.name))]
pub async fn prepare_context(
    identity: ResearcherIdentity,
    source: &dyn BibliographicSource,
    store: &CheckpointStore,
    opts: PrepareOptions,
) -> anyhow::Result<ResearcherContext> {
    let author = source.resolve_author(&identity).await?;

    // The resolved ID is canonical; keep it on the identity so the profile
    // and artifacts key off it even when the seed only carried a name.
    let mut identity = identity;
    if let Some(a) = &author {
        identity.openalex_author_id = Some(a.id.clone());
        if identity.homepage.is_none() {
            identity.homepage = a.orcid.clone();
        }
    }
    let key = identity.key();

    let prior_profile = store.load_profile(&key)?;
    let prior_cache = store.load_cache(&key)?;

    let known_ids: HashSet<String> = prior_profile
        .iter()
        .flat_map(|p| p.works.iter().map(|w| w.id.clone()))
        .chain(prior_cache.values().map(|e| e.work_id.clone()))
        .collect();

    let new_works = match &author {
        Some(a) => discover_works(source, &a.id, &known_ids, opts).await?,
        None => {
            info!(name = %identity.name, "No author record resolved; identity-only profile");
            Vec::new()
        }
    };

    info!(
        key,
        prior_works = prior_profile.as_ref().map(|p| p.works.len()).unwrap_or(0),
        cached = prior_cache.len(),
        discovered = new_works.len(),
        "Researcher context prepared"
    );

    let cache_writer = store.spawn_cache_writer(&key);
    Ok(ResearcherContext {
        identity,
        key,
        author,
        prior_profile,
        new_works,
        cache: Mutex::new(prior_cache),
        cache_writer,
        analyzed: Mutex::new(Vec::new()),
        remaining: AtomicUsize::new(0),
        drained: Notify::new(),
        cache_hits: AtomicUsize::new(0),
        llm_calls: AtomicUsize::new(0),
        flush_counter: AtomicUsize::new(0),
    })
}

/// Page the service newest-first, collecting unknown works up to `max_works`.
/// Incremental stop: a full page of already-known IDs means everything older
/// is known too (the listing is date-ordered), unless a full refresh forces
/// exhaustive paging.
async fn discover_works(
    source: &dyn BibliographicSource,
    author_id: &str,
    known_ids: &HashSet<String>,
    opts: PrepareOptions,
) -> anyhow::Result<Vec<Work>> {
    let mut discovered = Vec::new();
    let mut page = 1usize;

    loop {
        let works_page = source.works_page(author_id, page, PAGE_SIZE).await?;
        let page_len = works_page.works.len();
        let mut known_on_page = 0usize;

        for work in works_page.works {
            if !opts.full_refresh && known_ids.contains(&work.id) {
                known_on_page += 1;
                continue;
            }
            if discovered.len() < opts.max_works {
                discovered.push(work);
            }
        }

        if discovered.len() >= opts.max_works {
            break;
        }
        if !works_page.is_full {
            break; // last page
        }
        if !opts.full_refresh && known_on_page == page_len {
            break; // fully-known page: incremental cutoff
        }
        page += 1;
    }

    Ok(discovered)
}

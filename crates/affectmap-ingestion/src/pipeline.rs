//! Run orchestration.
//!
//! One run: seed identities fan out to per-researcher drivers (bounded by a
//! preparer semaphore so only a few researchers page the bibliographic
//! service at once), drivers feed per-paper tasks into the shared
//! [`WorkQueue`], and a fixed pool of analysis workers drains it. Each driver
//! waits for its own backlog, then finalizes: dedup-merge, summary, stats,
//! synced cache flush, checkpoint. Checkpoints are serialized through a
//! single index lock, so the on-disk index never sees a torn update.
//!
//! A worker failure (AI backend exhausted its retries, malformed reply) is
//! fatal for the whole run: the queue closes, pending drivers abort before
//! checkpointing, and the error propagates. Already-checkpointed researchers
//! keep their artifacts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use affectmap_llm::LlmBackend;

use crate::analysis::{process_task, AnalysisOptions};
use crate::context::{prepare_context, PrepareOptions, ResearcherContext};
use crate::dedup::{merge_works, sort_for_output};
use crate::enrich::{resolve_affiliation, Geocoder};
use crate::models::{ProcessingStats, ResearcherIdentity, ResearcherIndex, ResearcherProfile};
use crate::queue::{Task, WorkQueue};
use crate::sources::BibliographicSource;
use crate::store::CheckpointStore;
use crate::summary::{compute_summary, needs_recompute};

/// Researchers paging the bibliographic service concurrently.
const PREPARER_PERMITS: usize = 3;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub worker_concurrency: usize,
    pub max_works_per_researcher: usize,
    pub full_refresh: bool,
    pub skip_ai: bool,
    /// Case-insensitive name filter; only matching researchers run.
    pub only: Option<String>,
    /// Etiquette delay after each live AI call.
    pub request_delay: Duration,
    /// Base for the linear AI retry backoff.
    pub retry_base_delay: Duration,
    /// Completions between incremental cache flushes.
    pub cache_flush_every: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            max_works_per_researcher: 200,
            full_refresh: false,
            skip_ai: false,
            only: None,
            request_delay: Duration::from_millis(500),
            retry_base_delay: Duration::from_millis(750),
            cache_flush_every: 5,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub researchers: usize,
    /// Tasks completed this run, cache hits included.
    pub works_analyzed: usize,
    pub cache_hits: usize,
    /// Works discovered and analyzed for the first time.
    pub new_works: usize,
    pub duration_ms: u128,
}

// ── Abort signal ──────────────────────────────────────────────────────────────

/// One-way latch that unblocks drivers parked on their drain wait.
struct Abort {
    flag: AtomicBool,
    notify: Notify,
}

impl Abort {
    fn new() -> Self {
        Self { flag: AtomicBool::new(false), notify: Notify::new() }
    }

    fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

// ── Shared run state ──────────────────────────────────────────────────────────

struct PipelineShared {
    queue: WorkQueue,
    /// Researcher key → live context, for worker dispatch.
    contexts: StdMutex<HashMap<String, Arc<ResearcherContext>>>,
    abort: Abort,
    /// Serializes checkpoints and owns the cross-researcher index.
    index: Mutex<ResearcherIndex>,
}

impl PipelineShared {
    fn context_of(&self, key: &str) -> Option<Arc<ResearcherContext>> {
        self.contexts.lock().expect("context map poisoned").get(key).cloned()
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Run the full ingestion pass over the seeded researchers.
pub async fn run_pipeline(
    seed: Vec<ResearcherIdentity>,
    source: Arc<dyn BibliographicSource>,
    backend: Arc<dyn LlmBackend>,
    store: Arc<CheckpointStore>,
    geocoder: Arc<Geocoder>,
    opts: RunOptions,
) -> anyhow::Result<RunReport> {
    let run_id = Uuid::new_v4();
    let started = Instant::now();

    let mut selected: Vec<ResearcherIdentity> = match &opts.only {
        Some(filter) => {
            let needle = filter.to_lowercase();
            seed.into_iter().filter(|r| r.name.to_lowercase().contains(&needle)).collect()
        }
        None => seed,
    };

    // Duplicate curated entries would race on the shared context map; only
    // the first entry per key runs. Name-only entries that resolve to the
    // same author are caught again at context registration.
    let mut seen_keys = HashSet::new();
    selected.retain(|r| {
        let fresh = seen_keys.insert(r.key());
        if !fresh {
            warn!(name = %r.name, key = %r.key(), "duplicate seed entry skipped");
        }
        fresh
    });
    info!(
        %run_id,
        researchers = selected.len(),
        workers = opts.worker_concurrency,
        full_refresh = opts.full_refresh,
        skip_ai = opts.skip_ai,
        "Ingestion run starting"
    );

    let shared = Arc::new(PipelineShared {
        queue: WorkQueue::new(opts.worker_concurrency),
        contexts: StdMutex::new(HashMap::new()),
        abort: Abort::new(),
        index: Mutex::new(store.load_index()?),
    });

    let analysis_opts = AnalysisOptions {
        skip_ai: opts.skip_ai,
        request_delay: opts.request_delay,
        retry_base_delay: opts.retry_base_delay,
        flush_every: opts.cache_flush_every,
    };

    let mut workers = JoinSet::new();
    for _ in 0..opts.worker_concurrency.max(1) {
        let shared = shared.clone();
        let backend = backend.clone();
        workers.spawn(async move { worker_loop(shared, backend, analysis_opts).await });
    }

    let preparers = Arc::new(Semaphore::new(PREPARER_PERMITS));
    let mut drivers = JoinSet::new();
    for identity in selected {
        let shared = shared.clone();
        let source = source.clone();
        let backend = backend.clone();
        let store = store.clone();
        let geocoder = geocoder.clone();
        let preparers = preparers.clone();
        let opts = opts.clone();
        drivers.spawn(async move {
            drive_researcher(identity, shared, source, backend, store, geocoder, preparers, opts)
                .await
        });
    }

    let mut report = RunReport::default();
    let mut first_error: Option<anyhow::Error> = None;
    while let Some(joined) = drivers.join_next().await {
        match joined.map_err(anyhow::Error::from).and_then(|r| r) {
            // `None` is a driver that stood down after a key collision.
            Ok(None) => {}
            Ok(Some(outcome)) => {
                report.researchers += 1;
                report.works_analyzed += outcome.works_analyzed;
                report.cache_hits += outcome.cache_hits;
                report.new_works += outcome.new_works;
            }
            Err(e) => {
                if first_error.is_none() {
                    error!(error = %e, "researcher driver failed; aborting run");
                    shared.abort.trigger();
                    shared.queue.close();
                    first_error = Some(e);
                }
            }
        }
    }

    shared.queue.close();
    while let Some(joined) = workers.join_next().await {
        match joined.map_err(anyhow::Error::from).and_then(|r| r) {
            Ok(()) => {}
            // The worker error is the root cause; it wins over the driver's
            // derived abort error.
            Err(e) => first_error = Some(e),
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    report.duration_ms = started.elapsed().as_millis();
    info!(
        %run_id,
        researchers = report.researchers,
        works_analyzed = report.works_analyzed,
        cache_hits = report.cache_hits,
        new_works = report.new_works,
        duration_ms = report.duration_ms,
        "Ingestion run finished"
    );
    Ok(report)
}

// ── Workers ───────────────────────────────────────────────────────────────────

async fn worker_loop(
    shared: Arc<PipelineShared>,
    backend: Arc<dyn LlmBackend>,
    opts: AnalysisOptions,
) -> anyhow::Result<()> {
    while let Some(task) = shared.queue.next_task().await {
        if shared.abort.is_triggered() {
            shared.queue.task_done();
            break;
        }
        let Some(ctx) = shared.context_of(&task.researcher_key) else {
            // Context already finalized; its driver cannot be waiting on this
            // task, so dropping it is safe.
            warn!(key = %task.researcher_key, work = %task.work.id, "task without live context");
            shared.queue.task_done();
            continue;
        };
        let result = process_task(&ctx, task.work, backend.as_ref(), opts).await;
        shared.queue.task_done();
        if let Err(e) = result {
            shared.abort.trigger();
            shared.queue.close();
            return Err(e);
        }
    }
    Ok(())
}

// ── Per-researcher driver ─────────────────────────────────────────────────────

struct DriverOutcome {
    works_analyzed: usize,
    cache_hits: usize,
    new_works: usize,
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(name = %identity.name))]
async fn drive_researcher(
    identity: ResearcherIdentity,
    shared: Arc<PipelineShared>,
    source: Arc<dyn BibliographicSource>,
    backend: Arc<dyn LlmBackend>,
    store: Arc<CheckpointStore>,
    geocoder: Arc<Geocoder>,
    preparers: Arc<Semaphore>,
    opts: RunOptions,
) -> anyhow::Result<Option<DriverOutcome>> {
    let prepare_opts =
        PrepareOptions { full_refresh: opts.full_refresh, max_works: opts.max_works_per_researcher };

    let mut ctx = {
        let _permit = preparers.acquire().await?;
        prepare_context(identity, source.as_ref(), store.as_ref(), prepare_opts).await?
    };

    let works = std::mem::take(&mut ctx.new_works);
    ctx.remaining.store(works.len(), Ordering::SeqCst);
    let key = ctx.key.clone();
    let ctx = Arc::new(ctx);

    // Claim the key atomically. Two seed entries can resolve to the same
    // author; letting the second overwrite the first would cross-wire the
    // drain counters and park the first driver forever.
    {
        let mut contexts = shared.contexts.lock().expect("context map poisoned");
        if contexts.contains_key(&key) {
            warn!(key = %key, name = %ctx.identity.name, "seed entry resolved to an already-running researcher; skipping");
            return Ok(None);
        }
        contexts.insert(key.clone(), ctx.clone());
    }

    for work in works {
        let task = Task { researcher_key: key.clone(), work };
        tokio::select! {
            _ = shared.queue.push(task) => {}
            _ = shared.abort.wait() => anyhow::bail!("run aborted while enqueuing {key}"),
        }
    }

    tokio::select! {
        _ = ctx.wait_drained() => {}
        _ = shared.abort.wait() => anyhow::bail!("run aborted while analyzing {key}"),
    }

    let outcome = finalize_researcher(&ctx, &shared, &store, backend.as_ref(), &geocoder, &opts)
        .await?;
    shared.contexts.lock().expect("context map poisoned").remove(&key);
    Ok(Some(outcome))
}

/// Merge, summarize, and checkpoint one drained researcher.
async fn finalize_researcher(
    ctx: &ResearcherContext,
    shared: &PipelineShared,
    store: &CheckpointStore,
    backend: &dyn LlmBackend,
    geocoder: &Geocoder,
    opts: &RunOptions,
) -> anyhow::Result<DriverOutcome> {
    let analyzed = std::mem::take(&mut *ctx.analyzed.lock().await);
    let new_analyzed = analyzed.len();
    let cache_hits = ctx.cache_hits.load(Ordering::SeqCst);

    let previous = match (opts.full_refresh, &ctx.prior_profile) {
        // A full refresh rebuilds every work from this run's analyses.
        (true, _) | (_, None) => Vec::new(),
        (false, Some(prior)) => prior.works.clone(),
    };
    let mut works = merge_works(previous, analyzed);
    sort_for_output(&mut works);

    let prior_summary = ctx.prior_profile.as_ref().and_then(|p| p.summary.clone());
    let summary = if needs_recompute(opts.full_refresh, new_analyzed, prior_summary.as_ref()) {
        Some(compute_summary(&works, backend, opts.skip_ai, opts.retry_base_delay).await)
    } else {
        prior_summary
    };

    let affiliation = resolve_affiliation(ctx.author.as_ref(), geocoder).await;
    let metrics = ctx
        .author
        .as_ref()
        .map(|a| a.metrics)
        .or_else(|| ctx.prior_profile.as_ref().map(|p| p.metrics))
        .unwrap_or_default();

    let stats = ProcessingStats {
        total_works: works.len(),
        analyzed_works: works.iter().filter(|w| w.analysis.is_some()).count(),
        relevant_works: works
            .iter()
            .filter(|w| w.analysis.as_ref().map(|a| a.relevant).unwrap_or(false))
            .count(),
        cache_hits,
        new_this_run: new_analyzed,
        updated_at: Some(chrono::Utc::now()),
    };

    let profile = ResearcherProfile {
        identity: ctx.identity.clone(),
        affiliation,
        metrics,
        summary,
        stats,
        works,
    };

    // Synced flush: once this returns, the cache snapshot with every analysis
    // from this run is on disk. The writer task exits when the context drops.
    {
        let cache = ctx.cache.lock().await;
        ctx.cache_writer.write_and_sync(&cache).await?;
    }

    {
        let mut index = shared.index.lock().await;
        store.write_checkpoint(&ctx.key, &profile, &mut index)?;
    }

    info!(
        key = %ctx.key,
        total = profile.stats.total_works,
        relevant = profile.stats.relevant_works,
        new = new_analyzed,
        cache_hits,
        "Researcher checkpointed"
    );

    Ok(DriverOutcome { works_analyzed: new_analyzed, cache_hits, new_works: new_analyzed - cache_hits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metrics, VenueType, Work};
    use crate::sources::{AuthorRecord, WorksPage};
    use affectmap_llm::{LlmError, LlmRequest, LlmResponse};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn identity(name: &str, id: &str) -> ResearcherIdentity {
        ResearcherIdentity {
            name: name.to_string(),
            openalex_author_id: Some(id.to_string()),
            google_scholar: None,
            homepage: None,
        }
    }

    fn work(id: &str, title: &str) -> Work {
        Work {
            id: id.to_string(),
            title: title.to_string(),
            publication_date: Some("2024-01-01".to_string()),
            publication_year: Some(2024),
            venue: Some("Test Venue".to_string()),
            venue_type: VenueType::Journal,
            cited_by_count: 1,
            doc_type: Some("article".to_string()),
            is_preprint: false,
            concepts: Vec::new(),
            abstract_text: None,
            analysis: None,
        }
    }

    /// Serves one fixed author with one page of works.
    struct FixedSource {
        works: Vec<Work>,
    }

    #[async_trait]
    impl BibliographicSource for FixedSource {
        async fn resolve_author(
            &self,
            identity: &ResearcherIdentity,
        ) -> anyhow::Result<Option<AuthorRecord>> {
            Ok(Some(AuthorRecord {
                id: identity.openalex_author_id.clone().unwrap_or_else(|| "A1".to_string()),
                display_name: identity.name.clone(),
                orcid: None,
                institution: None,
                country_code: Some("US".to_string()),
                metrics: Metrics { works_count: self.works.len() as u32, ..Metrics::default() },
            }))
        }

        async fn works_page(
            &self,
            _author_id: &str,
            page: usize,
            per_page: usize,
        ) -> anyhow::Result<WorksPage> {
            let start = (page - 1) * per_page;
            let works: Vec<Work> =
                self.works.iter().skip(start).take(per_page).cloned().collect();
            let is_full = works.len() == per_page;
            Ok(WorksPage { works, is_full })
        }
    }

    /// Marks every title relevant with a fixed extraction, with an optional
    /// per-call delay to keep workers busy.
    struct AlwaysRelevant {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl AlwaysRelevant {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), delay: Duration::ZERO }
        }
    }

    #[async_trait]
    impl LlmBackend for AlwaysRelevant {
        async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let user = req.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let content = if user.starts_with("Relevant papers") {
                r#"{"overview": "Works on affect.", "directions": ["affect"]}"#.to_string()
            } else if user.starts_with("Title:") && !user.contains('\n') {
                r#"{"relevant": true, "score": 0.9, "reason": "on topic"}"#.to_string()
            } else {
                r#"{"score": 0.8, "directions": ["affect"], "summary": "S"}"#.to_string()
            };
            Ok(LlmResponse {
                content,
                model: "fixed".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
        fn model_id(&self) -> &str { "fixed" }
        fn is_local(&self) -> bool { true }
    }

    struct FailingBackend;

    #[async_trait]
    impl LlmBackend for FailingBackend {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
            Err(LlmError::Unavailable("backend down".to_string()))
        }
        fn model_id(&self) -> &str { "failing" }
        fn is_local(&self) -> bool { true }
    }

    fn fast_opts() -> RunOptions {
        RunOptions {
            request_delay: Duration::ZERO,
            retry_base_delay: Duration::from_millis(1),
            ..RunOptions::default()
        }
    }

    fn test_geocoder() -> Arc<Geocoder> {
        Arc::new(Geocoder::new(affectmap_common::ScopedClient::new().unwrap()))
    }

    #[tokio::test]
    async fn test_run_checkpoints_profile_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        let source = Arc::new(FixedSource { works: vec![work("W1", "Emotion A"), work("W2", "Emotion B")] });
        let backend = Arc::new(AlwaysRelevant::new());

        let report = run_pipeline(
            vec![identity("Rosalind Picard", "A1")],
            source,
            backend,
            store.clone(),
            test_geocoder(),
            fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(report.researchers, 1);
        assert_eq!(report.works_analyzed, 2);
        assert_eq!(report.new_works, 2);
        assert_eq!(report.cache_hits, 0);

        let profile = store.load_profile("A1").unwrap().unwrap();
        assert_eq!(profile.works.len(), 2);
        assert_eq!(profile.stats.relevant_works, 2);
        assert!(profile.summary.is_some());
        assert_eq!(profile.affiliation.country.as_deref(), Some("United States"));
        assert!(store.load_index().unwrap().contains_key("A1"));
        assert_eq!(store.load_cache("A1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skip_ai_run_makes_no_backend_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        let source = Arc::new(FixedSource { works: vec![work("W1", "Emotion A")] });
        let backend = Arc::new(AlwaysRelevant::new());

        let opts = RunOptions { skip_ai: true, ..fast_opts() };
        run_pipeline(
            vec![identity("Rosalind Picard", "A1")],
            source,
            backend.clone(),
            store.clone(),
            test_geocoder(),
            opts,
        )
        .await
        .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        let profile = store.load_profile("A1").unwrap().unwrap();
        let a = profile.works[0].analysis.as_ref().unwrap();
        assert!(!a.relevant);
        assert_eq!(a.score, 0.0);
    }

    #[tokio::test]
    async fn test_backend_failure_aborts_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        let source = Arc::new(FixedSource { works: vec![work("W1", "Emotion A")] });

        let out = run_pipeline(
            vec![identity("Rosalind Picard", "A1")],
            source,
            Arc::new(FailingBackend),
            store.clone(),
            test_geocoder(),
            fast_opts(),
        )
        .await;

        assert!(out.is_err());
        assert!(store.load_profile("A1").unwrap().is_none(), "no partial profile");
        assert!(store.load_index().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_hits_cache_and_keeps_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        let source =
            Arc::new(FixedSource { works: vec![work("W1", "Emotion A"), work("W2", "Emotion B")] });
        let backend = Arc::new(AlwaysRelevant::new());

        run_pipeline(
            vec![identity("Rosalind Picard", "A1")],
            source.clone(),
            backend.clone(),
            store.clone(),
            test_geocoder(),
            fast_opts(),
        )
        .await
        .unwrap();
        let first = store.load_profile("A1").unwrap().unwrap();
        let calls_after_first = backend.calls.load(Ordering::SeqCst);

        let report = run_pipeline(
            vec![identity("Rosalind Picard", "A1")],
            source,
            backend.clone(),
            store.clone(),
            test_geocoder(),
            fast_opts(),
        )
        .await
        .unwrap();

        // Everything was known: the incremental cutoff left nothing to
        // analyze and the summary carried over without an AI call.
        assert_eq!(report.works_analyzed, 0);
        assert_eq!(report.new_works, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls_after_first);

        let second = store.load_profile("A1").unwrap().unwrap();
        assert_eq!(second.summary, first.summary);
        assert_eq!(second.works.len(), first.works.len());
        assert_eq!(second.stats.new_this_run, 0);
    }

    /// Resolves every identity to the same author, optionally delaying one
    /// named identity's resolution so its driver registers while the first
    /// researcher's tasks are still in flight.
    struct SharedAuthorSource {
        works: Vec<Work>,
        delayed_name: &'static str,
        resolve_delay: Duration,
    }

    #[async_trait]
    impl BibliographicSource for SharedAuthorSource {
        async fn resolve_author(
            &self,
            identity: &ResearcherIdentity,
        ) -> anyhow::Result<Option<AuthorRecord>> {
            if identity.name == self.delayed_name {
                tokio::time::sleep(self.resolve_delay).await;
            }
            Ok(Some(AuthorRecord {
                id: "A1".to_string(),
                display_name: identity.name.clone(),
                orcid: None,
                institution: None,
                country_code: None,
                metrics: Metrics::default(),
            }))
        }

        async fn works_page(
            &self,
            _author_id: &str,
            page: usize,
            per_page: usize,
        ) -> anyhow::Result<WorksPage> {
            let start = (page - 1) * per_page;
            let works: Vec<Work> =
                self.works.iter().skip(start).take(per_page).cloned().collect();
            let is_full = works.len() == per_page;
            Ok(WorksPage { works, is_full })
        }
    }

    fn name_only(name: &str) -> ResearcherIdentity {
        ResearcherIdentity {
            name: name.to_string(),
            openalex_author_id: None,
            google_scholar: None,
            homepage: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_seed_entries_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        let source = Arc::new(FixedSource { works: vec![work("W1", "Emotion A"), work("W2", "Emotion B")] });
        let backend = Arc::new(AlwaysRelevant::new());

        let report = run_pipeline(
            vec![identity("Rosalind Picard", "A1"), identity("Rosalind Picard", "A1")],
            source,
            backend,
            store.clone(),
            test_geocoder(),
            fast_opts(),
        )
        .await
        .unwrap();

        assert_eq!(report.researchers, 1);
        assert_eq!(report.works_analyzed, 2);
        assert!(store.load_profile("A1").unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entries_resolving_to_same_author_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        // Name-only entries carry distinct keys until resolution, so both
        // drivers spawn; the second must stand down at registration instead
        // of cross-wiring the first researcher's drain counter.
        let works: Vec<Work> =
            (0..20).map(|i| work(&format!("W{i}"), &format!("Emotion {i}"))).collect();
        let source = Arc::new(SharedAuthorSource {
            works,
            delayed_name: "R. W. Picard",
            resolve_delay: Duration::from_millis(100),
        });
        let backend = Arc::new(AlwaysRelevant {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(40),
        });

        let run = run_pipeline(
            vec![name_only("Rosalind Picard"), name_only("R. W. Picard")],
            source,
            backend,
            store.clone(),
            test_geocoder(),
            fast_opts(),
        );
        let report = tokio::time::timeout(Duration::from_secs(30), run)
            .await
            .expect("run must terminate")
            .unwrap();

        assert_eq!(report.researchers, 1);
        assert_eq!(report.works_analyzed, 20);
        assert!(store.load_profile("A1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_only_filter_selects_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path(), None));
        let source = Arc::new(FixedSource { works: Vec::new() });
        let backend = Arc::new(AlwaysRelevant::new());

        let opts = RunOptions { only: Some("picard".to_string()), ..fast_opts() };
        let report = run_pipeline(
            vec![identity("Rosalind Picard", "A1"), identity("Someone Else", "A2")],
            source,
            backend,
            store.clone(),
            test_geocoder(),
            opts,
        )
        .await
        .unwrap();

        assert_eq!(report.researchers, 1);
        assert!(store.load_profile("A1").unwrap().is_some());
        assert!(store.load_profile("A2").unwrap().is_none());
    }
}

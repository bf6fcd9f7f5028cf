//! Affectmap — incremental researcher map for affective computing.
//! Entry point for the ingestion binary.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use affectmap_common::ScopedClient;
use affectmap_ingestion::enrich::Geocoder;
use affectmap_ingestion::pipeline::{run_pipeline, RunOptions};
use affectmap_ingestion::seed::load_seed;
use affectmap_ingestion::sources::openalex::OpenAlexClient;
use affectmap_ingestion::store::CheckpointStore;
use affectmap_llm::backend::{OllamaBackend, OpenAiBackend, OpenAiCompatibleBackend};
use affectmap_llm::LlmBackend;

fn build_backend(config: &config::Config) -> anyhow::Result<Arc<dyn LlmBackend>> {
    let llm = &config.llm;
    match llm.backend.as_str() {
        "ollama" => Ok(Arc::new(OllamaBackend::new(&llm.base_url, &llm.model))),
        "openai" => {
            let key = config.resolved_api_key().ok_or_else(|| {
                anyhow::anyhow!(
                    "OpenAI backend configured but no API key found \
                     (set llm.api_key or AFFECTMAP_OPENAI_API_KEY)"
                )
            })?;
            Ok(Arc::new(OpenAiBackend::new(key, &llm.model)))
        }
        "openai_compatible" => Ok(Arc::new(OpenAiCompatibleBackend::new(
            &llm.base_url,
            &llm.model,
            config.resolved_api_key(),
        ))),
        other => anyhow::bail!(
            "Unknown llm.backend {other:?} (expected ollama | openai | openai_compatible)"
        ),
    }
}

fn run_options(config: &config::Config) -> RunOptions {
    RunOptions {
        worker_concurrency: config.pipeline.worker_concurrency,
        max_works_per_researcher: config.pipeline.max_works_per_researcher,
        full_refresh: config.pipeline.full_refresh,
        skip_ai: config.pipeline.skip_ai,
        only: config.pipeline.only.clone(),
        request_delay: Duration::from_millis(config.pipeline.request_delay_ms),
        cache_flush_every: config.pipeline.cache_flush_every,
        ..RunOptions::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("affectmap=debug,info")),
        )
        .init();

    info!("Affectmap starting up...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load()?;
    info!(
        "Configuration loaded. LLM backend: {}, model: {}, skip_ai: {}",
        config.llm.backend, config.llm.model, config.pipeline.skip_ai
    );

    let seed = load_seed(Path::new(&config.seed.path))?;
    info!("Seed loaded: {} researchers from {}", seed.len(), config.seed.path);

    let backend = if config.pipeline.skip_ai {
        // The backend is never called in a skip-AI run; a local placeholder
        // avoids demanding credentials for a run that needs none.
        if config.llm.backend != "ollama" && config.resolved_api_key().is_none() {
            warn!("skip_ai run: ignoring remote LLM backend without credentials");
        }
        Arc::new(OllamaBackend::new(&config.llm.base_url, &config.llm.model))
            as Arc<dyn LlmBackend>
    } else {
        build_backend(&config)?
    };

    let mut http = ScopedClient::new()?;
    if config.llm.backend == "openai_compatible" {
        if let Ok(base) = url::Url::parse(&config.llm.base_url) {
            if let Some(host) = base.host_str() {
                http.allow_domain(host);
            }
        }
    }
    let geocoder = Arc::new(Geocoder::new(http));

    let store = Arc::new(CheckpointStore::new(
        &config.output.data_root,
        config.output.mirror_root.as_ref().map(PathBuf::from),
    ));
    let source = Arc::new(OpenAlexClient::new(ScopedClient::new()?));

    let report = run_pipeline(seed, source, backend, store, geocoder, run_options(&config)).await?;

    info!(
        "Run complete: {} researchers, {} works analyzed ({} cache hits, {} new) in {} ms",
        report.researchers,
        report.works_analyzed,
        report.cache_hits,
        report.new_works,
        report.duration_ms
    );
    Ok(())
}

//! Topic summary for one researcher.
//!
//! The summary is recomputed only when its inputs could have changed (full
//! refresh, new works merged in, or no prior summary); otherwise the previous
//! run's summary is carried over verbatim so idempotent runs issue no AI
//! calls. Recomputation is best-effort: when the backend fails, a
//! deterministic frequency-based fallback is substituted and the failure is
//! logged, never escalated.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use affectmap_llm::json::{parse_json_payload, string_list};
use affectmap_llm::{complete_with_retry, LlmBackend, LlmRequest};

use crate::models::{TopicSummary, Work};

const MAX_SUMMARY_DIRECTIONS: usize = 5;
const MAX_REPRESENTATIVE: usize = 3;
/// Most recent relevant works shown to the model.
const MAX_PROMPT_WORKS: usize = 40;

const SUMMARY_SYSTEM: &str = "You summarize a researcher's contribution to \
affective computing from a list of their relevant papers. Answer with \
exactly one JSON object: {\"overview\": one- or two-sentence string, \
\"directions\": array of up to 5 short research direction labels}. No other \
text.";

/// Recompute only when the inputs could have changed.
pub fn needs_recompute(full_refresh: bool, new_works: usize, prior: Option<&TopicSummary>) -> bool {
    full_refresh || new_works > 0 || prior.is_none()
}

/// Build the topic summary, falling back to the deterministic variant when
/// the AI backend or its JSON contract fails.
pub async fn compute_summary(
    works: &[Work],
    backend: &dyn LlmBackend,
    skip_ai: bool,
    retry_base_delay: Duration,
) -> TopicSummary {
    if skip_ai {
        return fallback_summary(works);
    }

    match llm_summary(works, backend, retry_base_delay).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(error = %e, "summary recomputation failed; using frequency fallback");
            fallback_summary(works)
        }
    }
}

async fn llm_summary(
    works: &[Work],
    backend: &dyn LlmBackend,
    retry_base_delay: Duration,
) -> anyhow::Result<TopicSummary> {
    let relevant = relevant_works(works);
    if relevant.is_empty() {
        // Nothing to summarize; the fallback states that deterministically.
        return Ok(fallback_summary(works));
    }

    let listing = relevant
        .iter()
        .take(MAX_PROMPT_WORKS)
        .map(|w| {
            let directions = w
                .analysis
                .as_ref()
                .map(|a| a.directions.join(", "))
                .unwrap_or_default();
            format!("- {} [{}]", w.title, directions)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let req = LlmRequest::prompt(SUMMARY_SYSTEM, format!("Relevant papers:\n{listing}"));
    let resp = complete_with_retry(backend, req, retry_base_delay).await?;
    let payload = parse_json_payload(&resp.content)?;

    let overview = payload["overview"].as_str().unwrap_or("").to_string();
    if overview.is_empty() {
        anyhow::bail!("summary reply without overview");
    }

    info!(n_relevant = relevant.len(), "topic summary recomputed");
    Ok(TopicSummary {
        directions: string_list(&payload["directions"], MAX_SUMMARY_DIRECTIONS),
        overview,
        representative: representative_titles(&relevant),
    })
}

/// Deterministic substitute: top directions by occurrence count across the
/// relevant works, most-cited works as representatives.
pub fn fallback_summary(works: &[Work]) -> TopicSummary {
    let relevant = relevant_works(works);

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for work in &relevant {
        if let Some(analysis) = &work.analysis {
            for d in &analysis.directions {
                *counts.entry(d.as_str()).or_default() += 1;
            }
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let directions: Vec<String> = ranked
        .into_iter()
        .take(MAX_SUMMARY_DIRECTIONS)
        .map(|(d, _)| d.to_string())
        .collect();

    let overview = if relevant.is_empty() {
        "No relevant works identified.".to_string()
    } else if directions.is_empty() {
        format!("{} relevant works.", relevant.len())
    } else {
        format!("{} relevant works, mainly on {}.", relevant.len(), directions.join(", "))
    };

    TopicSummary { directions, overview, representative: representative_titles(&relevant) }
}

fn relevant_works(works: &[Work]) -> Vec<&Work> {
    works
        .iter()
        .filter(|w| w.analysis.as_ref().map(|a| a.relevant).unwrap_or(false))
        .collect()
}

fn representative_titles(relevant: &[&Work]) -> Vec<String> {
    let mut by_citations: Vec<&&Work> = relevant.iter().collect();
    by_citations.sort_by(|a, b| b.cited_by_count.cmp(&a.cited_by_count).then_with(|| a.id.cmp(&b.id)));
    by_citations
        .iter()
        .take(MAX_REPRESENTATIVE)
        .map(|w| w.title.clone())
        .collect()
}

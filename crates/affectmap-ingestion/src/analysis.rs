//! Per-paper analysis.
//!
//! Order of preference for each task: cached analysis (no network), skip-AI
//! placeholder, then the two-stage AI classification — a cheap relevance
//! filter over the title alone, and a full extraction pass only for works
//! flagged relevant. Numeric fields are clamped to [0, 1] and list fields
//! truncated on receipt. AI failures after retries propagate and abort the
//! run; a cache that silently mixes analyzed and unanalyzed works would look
//! complete while missing data.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use affectmap_llm::json::{clamp_unit, parse_json_payload, string_list};
use affectmap_llm::{complete_with_retry, LlmBackend, LlmRequest};

use crate::context::ResearcherContext;
use crate::models::{Analysis, CacheEntry, Work};

/// Extracted direction lists are capped here.
pub const MAX_DIRECTIONS: usize = 5;

const RELEVANCE_SYSTEM: &str = "You classify academic papers for a researcher \
map of the affective computing field (emotion recognition, affect sensing, \
emotion-aware systems, affective interfaces). Given a paper title, answer \
with exactly one JSON object: {\"relevant\": boolean, \"score\": number \
between 0 and 1, \"reason\": short string}. No other text.";

const EXTRACTION_SYSTEM: &str = "You analyze affective-computing papers. \
Given a paper's metadata, answer with exactly one JSON object: {\"score\": \
number between 0 and 1, \"directions\": array of up to 5 short research \
direction labels, \"summary\": one-sentence summary of the contribution}. \
No other text.";

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub skip_ai: bool,
    /// Etiquette delay applied after live AI calls.
    pub request_delay: Duration,
    /// Base for the linear retry backoff.
    pub retry_base_delay: Duration,
    /// Completions between cache snapshots.
    pub flush_every: usize,
}

/// Run one task end to end and record the result on the researcher context.
#[instrument(skip_all, fields(researcher = %ctx.key, work = %work.id))]
pub async fn process_task(
    ctx: &ResearcherContext,
    mut work: Work,
    backend: &dyn LlmBackend,
    opts: AnalysisOptions,
) -> anyhow::Result<()> {
    let fp = work.fingerprint();

    let cached = {
        let cache = ctx.cache.lock().await;
        cache.get(&fp).map(|e| e.analysis.clone())
    };

    let analysis = match cached {
        Some(analysis) => {
            ctx.cache_hits.fetch_add(1, Ordering::SeqCst);
            debug!("cache hit");
            analysis
        }
        None => {
            let analysis = if opts.skip_ai {
                Analysis::skipped()
            } else {
                let analysis = analyze_work(&work, backend, opts.retry_base_delay).await?;
                ctx.llm_calls.fetch_add(1, Ordering::SeqCst);
                if !opts.request_delay.is_zero() {
                    tokio::time::sleep(opts.request_delay).await;
                }
                analysis
            };

            let mut cache = ctx.cache.lock().await;
            cache.insert(
                fp,
                CacheEntry {
                    analysis: analysis.clone(),
                    work_id: work.id.clone(),
                    researcher_name: ctx.identity.name.clone(),
                    researcher_id: ctx.key.clone(),
                    cached_at: Utc::now(),
                },
            );
            analysis
        }
    };

    work.analysis = Some(analysis);
    ctx.task_finished(work, opts.flush_every).await;
    Ok(())
}

/// Two-stage classification: title-only relevance filter, then extraction
/// for relevant works.
async fn analyze_work(
    work: &Work,
    backend: &dyn LlmBackend,
    retry_base_delay: Duration,
) -> anyhow::Result<Analysis> {
    let filter_req = LlmRequest::prompt(RELEVANCE_SYSTEM, format!("Title: {}", work.title));
    let resp = complete_with_retry(backend, filter_req, retry_base_delay).await?;
    let verdict = parse_json_payload(&resp.content)?;

    let relevant = verdict["relevant"].as_bool().unwrap_or(false);
    let score = clamp_unit(&verdict["score"]);
    let rationale = verdict["reason"].as_str().unwrap_or("").to_string();

    if !relevant {
        return Ok(Analysis { relevant: false, score, rationale, directions: Vec::new(), summary: None });
    }

    let extract_req = LlmRequest::prompt(EXTRACTION_SYSTEM, extraction_prompt(work));
    let resp = complete_with_retry(backend, extract_req, retry_base_delay).await?;
    let extracted = parse_json_payload(&resp.content)?;

    Ok(Analysis {
        relevant: true,
        // The extraction pass sees the full metadata; its score supersedes
        // the title-only filter score.
        score: clamp_unit(&extracted["score"]),
        rationale,
        directions: string_list(&extracted["directions"], MAX_DIRECTIONS),
        summary: extracted["summary"].as_str().map(str::to_string),
    })
}

fn extraction_prompt(work: &Work) -> String {
    let mut lines = vec![format!("Title: {}", work.title)];
    if let Some(year) = work.publication_year {
        lines.push(format!("Year: {year}"));
    }
    if let Some(venue) = &work.venue {
        lines.push(format!("Venue: {venue}"));
    }
    if !work.concepts.is_empty() {
        lines.push(format!("Concepts: {}", work.concepts.join(", ")));
    }
    if let Some(abstract_text) = &work.abstract_text {
        lines.push(format!("Abstract: {abstract_text}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VenueType;
    use affectmap_llm::{LlmError, LlmResponse};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn work(id: &str, title: &str) -> Work {
        Work {
            id: id.to_string(),
            title: title.to_string(),
            publication_date: None,
            publication_year: Some(2024),
            venue: Some("IEEE Transactions on Affective Computing".to_string()),
            venue_type: VenueType::Journal,
            cited_by_count: 3,
            doc_type: Some("article".to_string()),
            is_preprint: false,
            concepts: vec!["Affective computing".to_string()],
            abstract_text: Some("We study emotion recognition.".to_string()),
            analysis: None,
        }
    }

    /// Replies with a fixed script of responses, in order.
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .rev()
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop();
            match next {
                Some(Ok(content)) => Ok(LlmResponse {
                    content,
                    model: "scripted".to_string(),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                }),
                Some(Err(e)) => Err(LlmError::Unavailable(e)),
                None => Err(LlmError::Unavailable("script exhausted".to_string())),
            }
        }
        fn model_id(&self) -> &str { "scripted" }
        fn is_local(&self) -> bool { true }
    }

    #[tokio::test]
    async fn test_irrelevant_title_skips_extraction() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"{"relevant": false, "score": 0.1, "reason": "database systems paper"}"#,
        )]);
        let a = analyze_work(&work("W1", "B-tree Compaction"), &backend, Duration::ZERO)
            .await
            .unwrap();
        assert!(!a.relevant);
        assert_eq!(a.score, 0.1);
        assert!(a.directions.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1, "no extraction call");
    }

    #[tokio::test]
    async fn test_relevant_work_gets_extraction_with_clamping() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"{"relevant": true, "score": 0.9, "reason": "core affective computing"}"#),
            Ok(r#"```json
                {"score": 1.7,
                 "directions": ["ER", "multimodal", "wearables", "speech", "vision", "extra"],
                 "summary": "Survey of emotion recognition."}
            ```"#),
        ]);
        let a = analyze_work(&work("W1", "Emotion Recognition Survey"), &backend, Duration::ZERO)
            .await
            .unwrap();
        assert!(a.relevant);
        assert_eq!(a.score, 1.0, "score must clamp to [0,1]");
        assert_eq!(a.directions.len(), MAX_DIRECTIONS);
        assert_eq!(a.summary.as_deref(), Some("Survey of emotion recognition."));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_fatal_after_three_attempts() {
        let backend = ScriptedBackend::new(vec![Err("down"), Err("down"), Err("down"), Err("down")]);
        let out = analyze_work(&work("W1", "T"), &backend, Duration::from_millis(1)).await;
        assert!(out.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_fatal() {
        let backend = ScriptedBackend::new(vec![Ok("I would rather chat about the weather.")]);
        let out = analyze_work(&work("W1", "T"), &backend, Duration::ZERO).await;
        assert!(out.is_err());
    }
}

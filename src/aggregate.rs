//! Map-reduce summarization pipeline.
//!
//! Runs one task end to end: scope text units → chunking → per-chunk
//! summaries (bounded concurrency) → per-scope reduction → workspace
//! summary → topic extraction → key insights. The step plan is computed up
//! front from the chunk counts, so reported progress is monotonic and
//! bounded.
//!
//! # Failure policy
//!
//! Each summarize call is retried up to [`RETRY_LIMIT`] times with
//! exponential backoff (base 1s, factor 2, capped at 30s). When retries are
//! exhausted the whole run fails with the originating error and every
//! partial per-scope result is discarded — a task either produces a full
//! result or none.
//!
//! # Cancellation
//!
//! The cancel flag is checked at every chunk-batch and reduction boundary.
//! In-flight provider calls are allowed to finish; their output is
//! discarded.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::chunk::chunk_text;
use crate::config::AgeBasis;
use crate::error::ProviderError;
use crate::models::{ProcessingResult, Snapshot, TaskOptions, Topic};
use crate::snapshot::{ScopeKind, TextUnit, UnitFilter};
use crate::summarizer::Summarizer;

/// Retries after the first attempt, per summarize call.
const RETRY_LIMIT: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 30;

/// Topic list is truncated to this size; the prompt asks for 3–8.
const MAX_TOPICS: usize = 8;

const CHANNEL_INSTRUCTION: &str = "You are summarizing a workspace channel conversation. \
    Capture the main topics discussed, key decisions or action items, the overall tone, \
    and any unresolved questions. Keep the summary concise but informative.";

const CANVAS_INSTRUCTION: &str = "You are summarizing a collaborative canvas document. \
    Capture its main purpose, the key information and ideas presented, and any decisions \
    or next steps.";

const MERGE_INSTRUCTION: &str = "The following are partial summaries of consecutive \
    sections of one conversation. Merge them into a single coherent summary, preserving \
    decisions, action items, and open questions.";

const WORKSPACE_INSTRUCTION: &str = "The following are summaries of channels and canvases \
    from one workspace. Produce an executive summary that identifies the main themes, \
    highlights key projects and initiatives, and notes important decisions, action items, \
    and unresolved issues.";

const TOPICS_INSTRUCTION: &str = "From the following workspace content summaries, identify \
    between 3 and 8 main topics. Respond ONLY with a JSON array of objects, each with \
    \"name\", \"description\", and \"keywords\" (an array of strings) fields.";

const INSIGHTS_INSTRUCTION: &str = "From the following workspace summary and topic list, \
    extract the key insights a reader should know, ordered from most to least important. \
    Respond ONLY with a JSON array of strings.";

/// Tuning knobs the pipeline needs from the application config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_chars: usize,
    pub task_concurrency: usize,
    pub age_basis: AgeBasis,
}

/// Why a pipeline run did not produce a result.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Cooperative cancellation observed at a step boundary. An internal
    /// signal, not a fault.
    #[error("processing cancelled")]
    Cancelled,

    /// Nothing survived filtering.
    #[error("no data to process after filtering")]
    EmptyInput,

    /// The summarization capability failed and retries were exhausted.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A spawned summarization task died (panic or runtime shutdown).
    #[error("internal failure: {0}")]
    Internal(String),
}

/// Progress sink, called with 0–100 after each completed step.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Monotonic step counter driving the progress callback.
///
/// The lock spans increment and report so concurrent chunk completions
/// deliver their percentages in order.
struct StepCounter {
    done: Mutex<usize>,
    total: usize,
    report: ProgressFn,
}

impl StepCounter {
    fn new(total: usize, report: ProgressFn) -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(0),
            total: total.max(1),
            report,
        })
    }

    fn bump(&self) {
        let mut done = self.done.lock().expect("step counter poisoned");
        *done += 1;
        let percent = ((100.0 * *done as f64) / self.total as f64).round() as u8;
        (self.report)(percent.min(100));
    }
}

/// Run the full summarization pipeline for one task over one snapshot.
pub async fn run_pipeline(
    snapshot: &Snapshot,
    options: &TaskOptions,
    summarizer: Arc<dyn Summarizer>,
    settings: &PipelineSettings,
    cancel: &CancelFlag,
    report: ProgressFn,
) -> Result<ProcessingResult, PipelineError> {
    let filter = UnitFilter::from_options(options, snapshot, settings.age_basis, Utc::now());

    // Chunk everything up front: the plan fixes steps_total, which keeps
    // progress monotonic and bounded.
    let plan: Vec<(TextUnit, Vec<String>)> = snapshot
        .text_units(&filter)
        .map(|unit| {
            let chunks = chunk_text(&unit.text, settings.max_chars);
            (unit, chunks)
        })
        .filter(|(_, chunks)| !chunks.is_empty())
        .collect();

    if plan.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let chunk_steps: usize = plan.iter().map(|(_, c)| c.len()).sum();
    let reduction_steps = plan.iter().filter(|(_, c)| c.len() > 1).count();
    // + workspace summary + topics + insights
    let total_steps = chunk_steps + reduction_steps + 3;
    let counter = StepCounter::new(total_steps, report);

    debug!(
        scopes = plan.len(),
        chunks = chunk_steps,
        steps = total_steps,
        "pipeline plan ready"
    );

    let mut channel_summaries = BTreeMap::new();
    let mut canvas_summaries = BTreeMap::new();
    let mut scope_overview = Vec::with_capacity(plan.len());

    for (unit, chunks) in plan {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let summary = summarize_scope(
            &unit,
            chunks,
            summarizer.clone(),
            options.instruction.as_deref(),
            settings.task_concurrency,
            cancel,
            &counter,
        )
        .await?;

        let kind_label = match unit.scope_kind {
            ScopeKind::Channel => "CHANNEL",
            ScopeKind::Canvas => "CANVAS",
        };
        scope_overview.push(format!(
            "{}: {}\nSUMMARY: {}",
            kind_label, unit.label, summary
        ));

        match unit.scope_kind {
            ScopeKind::Channel => channel_summaries.insert(unit.scope_id, summary),
            ScopeKind::Canvas => canvas_summaries.insert(unit.scope_id, summary),
        };
    }

    let combined = scope_overview.join("\n\n");

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let workspace_instruction = with_custom(WORKSPACE_INSTRUCTION, options.instruction.as_deref());
    let summary =
        summarize_with_retry(summarizer.as_ref(), &combined, Some(&workspace_instruction)).await?;
    counter.bump();

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let topics_raw =
        summarize_with_retry(summarizer.as_ref(), &combined, Some(TOPICS_INSTRUCTION)).await?;
    let topics = parse_topics(&topics_raw);
    counter.bump();

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let insights_input = format!("{}\n\nTOPICS:\n{}", summary, format_topics(&topics));
    let insights_raw = summarize_with_retry(
        summarizer.as_ref(),
        &insights_input,
        Some(INSIGHTS_INSTRUCTION),
    )
    .await?;
    let key_insights = parse_insights(&insights_raw);
    counter.bump();

    Ok(ProcessingResult {
        workspace_id: snapshot.workspace_id.clone(),
        summary,
        channel_summaries,
        canvas_summaries,
        topics,
        key_insights,
        processing_time: Utc::now(),
    })
}

/// Summarize one scope: concurrent chunk summaries (bounded by the
/// per-task cap), then a single reduction pass when the scope produced
/// more than one chunk.
async fn summarize_scope(
    unit: &TextUnit,
    chunks: Vec<String>,
    summarizer: Arc<dyn Summarizer>,
    custom_instruction: Option<&str>,
    task_concurrency: usize,
    cancel: &CancelFlag,
    counter: &Arc<StepCounter>,
) -> Result<String, PipelineError> {
    let base = match unit.scope_kind {
        ScopeKind::Channel => CHANNEL_INSTRUCTION,
        ScopeKind::Canvas => CANVAS_INSTRUCTION,
    };
    let instruction = with_custom(base, custom_instruction);

    let chunk_count = chunks.len();
    let semaphore = Arc::new(Semaphore::new(task_concurrency.max(1)));
    let mut set: JoinSet<(usize, Result<String, ProviderError>)> = JoinSet::new();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let summarizer = summarizer.clone();
        let semaphore = semaphore.clone();
        let instruction = instruction.clone();
        let counter = counter.clone();
        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        index,
                        Err(ProviderError::Network("semaphore closed".to_string())),
                    )
                }
            };
            let outcome =
                summarize_with_retry(summarizer.as_ref(), &chunk, Some(&instruction)).await;
            if outcome.is_ok() {
                counter.bump();
            }
            (index, outcome)
        });
    }

    let mut summaries: Vec<Option<String>> = vec![None; chunk_count];
    let mut first_error: Option<ProviderError> = None;
    while let Some(joined) = set.join_next().await {
        let (index, outcome) = joined.map_err(|e| PipelineError::Internal(e.to_string()))?;
        match outcome {
            Ok(text) => summaries[index] = Some(text),
            Err(e) => {
                // Let in-flight calls drain; the scope fails regardless.
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e.into());
    }

    let summaries: Vec<String> = summaries.into_iter().flatten().collect();
    if summaries.len() == 1 {
        return Ok(summaries.into_iter().next().unwrap_or_default());
    }

    // Reduction barrier: all chunk summaries are in before merging.
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let merged_input = summaries.join("\n\n");
    let merged =
        summarize_with_retry(summarizer.as_ref(), &merged_input, Some(MERGE_INSTRUCTION)).await?;
    counter.bump();
    Ok(merged)
}

/// One summarize call with the pipeline's retry policy: up to
/// [`RETRY_LIMIT`] retries, exponential backoff 1s → 2s → 4s, capped.
async fn summarize_with_retry(
    summarizer: &dyn Summarizer,
    text: &str,
    instruction: Option<&str>,
) -> Result<String, ProviderError> {
    let mut last_err = None;

    for attempt in 0..=RETRY_LIMIT {
        if attempt > 0 {
            let delay = BACKOFF_BASE_SECS
                .saturating_mul(1 << (attempt - 1))
                .min(BACKOFF_CAP_SECS);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        match summarizer.summarize(text, instruction).await {
            Ok(out) => return Ok(out),
            Err(e) => {
                warn!(attempt, error = %e, "summarize call failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or(ProviderError::EmptyCompletion))
}

fn with_custom(base: &str, custom: Option<&str>) -> String {
    match custom {
        Some(extra) if !extra.trim().is_empty() => format!(
            "{}\n\nAdditional instructions from the requester: {}",
            base, extra
        ),
        _ => base.to_string(),
    }
}

/// Pull a JSON array out of model output, tolerating code fences and
/// surrounding prose.
fn extract_json_array(text: &str) -> Option<serde_json::Value> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Parse the topics extraction output. Falls back to a single catch-all
/// topic when the model did not return usable JSON.
fn parse_topics(raw: &str) -> Vec<Topic> {
    let parsed = extract_json_array(raw).and_then(|value| {
        let items = value.as_array()?.clone();
        let mut topics = Vec::new();
        for item in items {
            let name = item.get("name")?.as_str()?.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let description = item
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            let keywords = item
                .get("keywords")
                .and_then(|v| v.as_array())
                .map(|kws| {
                    dedupe_keywords(kws.iter().filter_map(|k| k.as_str().map(str::to_string)))
                })
                .unwrap_or_default();
            topics.push(Topic {
                name,
                description,
                keywords,
            });
        }
        if topics.is_empty() {
            None
        } else {
            topics.truncate(MAX_TOPICS);
            Some(topics)
        }
    });

    parsed.unwrap_or_else(|| {
        vec![Topic {
            name: "General".to_string(),
            description: "General discussion".to_string(),
            keywords: vec!["general".to_string()],
        }]
    })
}

/// Case-insensitive dedup; the first spelling wins.
fn dedupe_keywords(keywords: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for kw in keywords {
        let kw = kw.trim().to_string();
        if kw.is_empty() {
            continue;
        }
        if seen.insert(kw.to_lowercase()) {
            out.push(kw);
        }
    }
    out
}

/// Parse the insights extraction output; fall back to line splitting when
/// the model returned prose instead of JSON.
fn parse_insights(raw: &str) -> Vec<String> {
    if let Some(value) = extract_json_array(raw) {
        if let Some(items) = value.as_array() {
            let insights: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !insights.is_empty() {
                return insights;
            }
        }
    }

    raw.lines()
        .map(strip_list_marker)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip a leading `- `, `* `, or `3. ` style list marker.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }
    line
}

fn format_topics(topics: &[Topic]) -> String {
    topics
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

//! One-shot processing from the CLI.
//!
//! Runs the full pipeline for a single workspace in-process: submit a task,
//! poll it to a terminal state (reporting progress on stderr), then print
//! the result on stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::{TaskOptions, TaskState};
use crate::progress::{ProcessProgressEvent, ProgressMode};
use crate::store::SnapshotStore;
use crate::summarizer::create_summarizer;
use crate::task::{TaskManager, TaskManagerSettings};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub async fn run_process(
    config: &Config,
    workspace_id: &str,
    options: TaskOptions,
    progress_mode: ProgressMode,
) -> Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;
    let store = Arc::new(SnapshotStore::load(&pool).await?);

    if !store.contains(workspace_id) {
        pool.close().await;
        bail!(
            "workspace not imported: {} (run `wsd import <snapshot.json>` first)",
            workspace_id
        );
    }

    let summarizer = create_summarizer(&config.summarizer)?;
    let manager = TaskManager::start(
        store,
        summarizer,
        TaskManagerSettings::from_config(config),
        Some(pool.clone()),
    );

    let task_id = manager.submit(workspace_id, options)?;
    let reporter = progress_mode.reporter();

    let mut last_reported: Option<ProcessProgressEventKey> = None;
    let final_state = loop {
        let status = manager.status(&task_id)?;

        let event = match status.state {
            TaskState::Queued => ProcessProgressEvent::Queued,
            TaskState::Running => ProcessProgressEvent::Summarizing {
                percent: status.progress,
            },
            state => ProcessProgressEvent::Finished { state },
        };
        let key = ProcessProgressEventKey::from(&event);
        if last_reported.as_ref() != Some(&key) {
            reporter.report(event);
            last_reported = Some(key);
        }

        if status.state.is_terminal() {
            break status;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    match final_state.state {
        TaskState::Completed => {
            let result = manager.result(&task_id)?;

            println!("process {}", workspace_id);
            println!("  channels summarized: {}", result.channel_summaries.len());
            println!("  canvases summarized: {}", result.canvas_summaries.len());
            println!("  topics: {}", result.topics.len());
            println!("  key insights: {}", result.key_insights.len());
            println!();
            println!("WORKSPACE SUMMARY");
            println!("{}", result.summary);
            if !result.topics.is_empty() {
                println!();
                println!("TOPICS");
                for topic in &result.topics {
                    println!("  - {}: {}", topic.name, topic.description);
                }
            }
            if !result.key_insights.is_empty() {
                println!();
                println!("KEY INSIGHTS");
                for (i, insight) in result.key_insights.iter().enumerate() {
                    println!("  {}. {}", i + 1, insight);
                }
            }
            println!("ok");
            Ok(())
        }
        TaskState::Failed => {
            bail!(
                "processing failed: {}",
                final_state.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        TaskState::Cancelled => {
            println!("process {} cancelled", workspace_id);
            Ok(())
        }
        _ => unreachable!("loop exits only on terminal states"),
    }
}

/// Comparable shape of an event, used to report only on change.
#[derive(PartialEq, Eq)]
enum ProcessProgressEventKey {
    Queued,
    Summarizing(u8),
    Finished,
}

impl From<&ProcessProgressEvent> for ProcessProgressEventKey {
    fn from(event: &ProcessProgressEvent) -> Self {
        match event {
            ProcessProgressEvent::Queued => Self::Queued,
            ProcessProgressEvent::Summarizing { percent } => Self::Summarizing(*percent),
            ProcessProgressEvent::Finished { .. } => Self::Finished,
        }
    }
}

//! Task lifecycle management: state machine, FIFO queue, and worker pool.
//!
//! The task table is the only shared mutable structure besides the queue.
//! Mutation happens under a write lock; status polling clones a snapshot of
//! the record under a read lock, so pollers never observe a torn update.
//!
//! Ownership: the queue delivers each task id to exactly one worker, and
//! the worker claims the task by transitioning it `Queued → Running` under
//! the table lock. The claiming worker is the record's only writer until it
//! stores a terminal state — no two workers ever run the same task.
//!
//! State machine:
//!
//! ```text
//! Queued ──▶ Running ──▶ Completed
//!    │          │    └──▶ Failed
//!    └──────────┴───────▶ Cancelled
//! ```
//!
//! Cancellation is cooperative: `cancel()` on a queued task is immediate;
//! on a running task it sets a flag the owning worker observes at the next
//! chunk or reduction boundary. Terminal states never change.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{run_pipeline, PipelineError, PipelineSettings, ProgressFn};
use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::error::DigestError;
use crate::models::{ProcessingResult, Task, TaskOptions, TaskState, TaskStatus};
use crate::store::SnapshotStore;
use crate::summarizer::Summarizer;

/// Worker pool and pipeline tuning, resolved from the application config.
#[derive(Debug, Clone)]
pub struct TaskManagerSettings {
    pub pool_size: usize,
    pub pipeline: PipelineSettings,
}

impl TaskManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool_size: config.worker.pool_size,
            pipeline: PipelineSettings {
                max_chars: config.chunking.max_chars,
                task_concurrency: config.worker.task_concurrency,
                age_basis: config.pipeline.age_basis,
            },
        }
    }
}

struct TaskEntry {
    task: Task,
    cancel: CancelFlag,
}

struct Inner {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    store: Arc<SnapshotStore>,
    summarizer: Arc<dyn Summarizer>,
    pipeline: PipelineSettings,
    queue_tx: mpsc::UnboundedSender<String>,
    db: Option<SqlitePool>,
}

/// Owns the task table and the worker pool draining the FIFO queue.
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// Create the manager and spawn the worker pool on the current
    /// runtime. Workers run until the process exits.
    pub fn start(
        store: Arc<SnapshotStore>,
        summarizer: Arc<dyn Summarizer>,
        settings: TaskManagerSettings,
        db: Option<SqlitePool>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<String>();
        let inner = Arc::new(Inner {
            tasks: RwLock::new(HashMap::new()),
            store,
            summarizer,
            pipeline: settings.pipeline,
            queue_tx,
            db,
        });

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        for worker_id in 0..settings.pool_size.max(1) {
            let inner = inner.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                worker_loop(inner, queue_rx, worker_id).await;
            });
        }

        Self { inner }
    }

    /// Create a task in `Queued`, enqueue it, and return its id
    /// immediately.
    pub fn submit(
        &self,
        workspace_id: &str,
        options: TaskOptions,
    ) -> Result<String, DigestError> {
        if !self.inner.store.contains(workspace_id) {
            return Err(DigestError::Validation(format!(
                "workspace not registered: {}",
                workspace_id
            )));
        }
        if let Some(days) = options.max_message_age_days {
            if days < 0 {
                return Err(DigestError::Validation(
                    "max_message_age_days must not be negative".to_string(),
                ));
            }
        }

        let task = Task {
            id: Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            options,
            state: TaskState::Queued,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        let task_id = task.id.clone();

        {
            let mut tasks = self.inner.tasks.write().expect("task table poisoned");
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    task,
                    cancel: CancelFlag::new(),
                },
            );
        }

        // Send can only fail after runtime shutdown, when nothing will
        // poll this task anyway.
        if self.inner.queue_tx.send(task_id.clone()).is_err() {
            warn!(task_id = %task_id, "task queue closed; task will stay queued");
        }

        info!(task_id = %task_id, workspace_id, "task submitted");
        Ok(task_id)
    }

    /// Snapshot-read of a task's observable state.
    pub fn status(&self, task_id: &str) -> Result<TaskStatus, DigestError> {
        let tasks = self.inner.tasks.read().expect("task table poisoned");
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| DigestError::NotFound(format!("unknown task: {}", task_id)))?;
        Ok(TaskStatus {
            task_id: entry.task.id.clone(),
            workspace_id: entry.task.workspace_id.clone(),
            state: entry.task.state,
            progress: entry.task.progress,
            error: entry.task.error.clone(),
        })
    }

    /// Fetch the result of a completed task.
    pub fn result(&self, task_id: &str) -> Result<ProcessingResult, DigestError> {
        let tasks = self.inner.tasks.read().expect("task table poisoned");
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| DigestError::NotFound(format!("unknown task: {}", task_id)))?;
        match entry.task.state {
            TaskState::Completed => Ok(entry
                .task
                .result
                .clone()
                .expect("completed task has a result")),
            state => Err(DigestError::NotReady(format!(
                "task {} is {}, not completed",
                task_id,
                state.as_str()
            ))),
        }
    }

    /// Request cancellation. Queued tasks become `Cancelled` immediately;
    /// running tasks are cancelled cooperatively at the owning worker's
    /// next step boundary. A no-op on terminal tasks.
    pub fn cancel(&self, task_id: &str) -> Result<TaskStatus, DigestError> {
        let terminal_record = {
            let mut tasks = self.inner.tasks.write().expect("task table poisoned");
            let entry = tasks
                .get_mut(task_id)
                .ok_or_else(|| DigestError::NotFound(format!("unknown task: {}", task_id)))?;

            match entry.task.state {
                TaskState::Queued => {
                    entry.task.state = TaskState::Cancelled;
                    entry.task.finished_at = Some(Utc::now());
                    entry.cancel.cancel();
                    info!(task_id, "queued task cancelled");
                    Some(entry.task.clone())
                }
                TaskState::Running => {
                    entry.cancel.cancel();
                    info!(task_id, "cancellation requested for running task");
                    None
                }
                _ => None, // terminal: no-op
            }
        };

        if let Some(task) = terminal_record {
            self.persist_terminal(&task);
        }

        self.status(task_id)
    }

    /// Spawn the terminal-state upsert without blocking the caller.
    /// Persistence failures are logged, never surfaced: the in-memory
    /// record stays authoritative for pollers.
    fn persist_terminal(&self, task: &Task) {
        let Some(pool) = self.inner.db.clone() else {
            return;
        };
        let task = task.clone();
        tokio::spawn(async move {
            if let Err(e) = upsert_terminal_task(&pool, &task).await {
                warn!(task_id = %task.id, error = %e, "failed to persist task record");
            }
        });
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    worker_id: usize,
) {
    loop {
        // Hold the receiver lock only for the dequeue itself.
        let next = { queue_rx.lock().await.recv().await };
        let Some(task_id) = next else {
            break;
        };
        run_task(&inner, &task_id, worker_id).await;
    }
}

/// Claim a queued task for this worker. Returns what the pipeline needs,
/// or `None` when the task was cancelled while waiting in the queue.
fn claim(
    inner: &Inner,
    task_id: &str,
) -> Option<(Arc<crate::models::Snapshot>, TaskOptions, CancelFlag)> {
    let mut tasks = inner.tasks.write().expect("task table poisoned");
    let entry = tasks.get_mut(task_id)?;
    if entry.task.state != TaskState::Queued {
        return None;
    }

    let snapshot = match inner.store.get(&entry.task.workspace_id) {
        Some(s) => s,
        None => {
            // Registered at submit time but gone now: only possible with
            // an external store wipe. Fail the task rather than panic.
            entry.task.state = TaskState::Failed;
            entry.task.error = Some("snapshot no longer available".to_string());
            entry.task.finished_at = Some(Utc::now());
            return None;
        }
    };

    entry.task.state = TaskState::Running;
    entry.task.started_at = Some(Utc::now());
    Some((snapshot, entry.task.options.clone(), entry.cancel.clone()))
}

async fn run_task(inner: &Arc<Inner>, task_id: &str, worker_id: usize) {
    let Some((snapshot, options, cancel)) = claim(inner, task_id) else {
        return;
    };

    info!(task_id, worker_id, workspace_id = %snapshot.workspace_id, "task started");

    let progress_inner = inner.clone();
    let progress_task_id = task_id.to_string();
    let report: ProgressFn = Arc::new(move |percent| {
        let mut tasks = progress_inner.tasks.write().expect("task table poisoned");
        if let Some(entry) = tasks.get_mut(&progress_task_id) {
            if entry.task.state == TaskState::Running {
                entry.task.progress = entry.task.progress.max(percent);
            }
        }
    });

    let outcome = run_pipeline(
        &snapshot,
        &options,
        inner.summarizer.clone(),
        &inner.pipeline,
        &cancel,
        report,
    )
    .await;

    let terminal_record = {
        let mut tasks = inner.tasks.write().expect("task table poisoned");
        let Some(entry) = tasks.get_mut(task_id) else {
            return;
        };
        match outcome {
            Ok(result) => {
                entry.task.state = TaskState::Completed;
                entry.task.progress = 100;
                entry.task.result = Some(result);
                info!(task_id, worker_id, "task completed");
            }
            Err(PipelineError::Cancelled) => {
                entry.task.state = TaskState::Cancelled;
                info!(task_id, worker_id, "task cancelled");
            }
            Err(e) => {
                entry.task.state = TaskState::Failed;
                entry.task.error = Some(e.to_string());
                warn!(task_id, worker_id, error = %e, "task failed");
            }
        }
        entry.task.finished_at = Some(Utc::now());
        entry.task.clone()
    };

    if let Some(pool) = inner.db.clone() {
        if let Err(e) = upsert_terminal_task(&pool, &terminal_record).await {
            warn!(task_id, error = %e, "failed to persist task record");
        }
    }
}

async fn upsert_terminal_task(pool: &SqlitePool, task: &Task) -> anyhow::Result<()> {
    let result_json = task
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO tasks (id, workspace_id, state, progress, created_at, started_at, finished_at, result_json, error)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            state = excluded.state,
            progress = excluded.progress,
            started_at = excluded.started_at,
            finished_at = excluded.finished_at,
            result_json = excluded.result_json,
            error = excluded.error
        "#,
    )
    .bind(&task.id)
    .bind(&task.workspace_id)
    .bind(task.state.as_str())
    .bind(task.progress as i64)
    .bind(task.created_at.timestamp())
    .bind(task.started_at.map(|t| t.timestamp()))
    .bind(task.finished_at.map(|t| t.timestamp()))
    .bind(result_json)
    .bind(&task.error)
    .execute(pool)
    .await?;

    Ok(())
}

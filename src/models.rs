//! Core data models used throughout Workspace Digest.
//!
//! These types represent the immutable workspace snapshot that flows into
//! the pipeline, the task records tracked by the task manager, and the
//! structured result produced for each completed task.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace member referenced by messages and canvases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// One message in a channel. Messages carrying a `thread_root_id` are
/// logical children of the message with that id; the flat per-channel list
/// is reassembled into threads when scope text is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub thread_root_id: Option<String>,
    #[serde(default)]
    pub reactions: Vec<serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

/// A channel with its messages, ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A canvas document. `blocks` is the ordered freeform content as exported;
/// block shapes vary (`{"text": ...}` or `{"rich_text": [...]}`), so they
/// are kept as raw JSON and interpreted when scope text is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub creator_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub blocks: Vec<serde_json::Value>,
}

/// One immutable extraction of a workspace. A re-extraction produces a new
/// snapshot that supersedes this one; a snapshot is never mutated after
/// import, so every task sees a consistent view for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub workspace_id: String,
    pub name: String,
    pub domain: String,
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub canvases: Vec<Canvas>,
}

/// Processing options accepted on submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Custom instruction woven into the summarization prompts.
    #[serde(default)]
    pub instruction: Option<String>,
    /// Restrict processing to these channel ids. Absent (or empty) = all.
    #[serde(default)]
    pub selected_channel_ids: Option<Vec<String>>,
    /// Drop messages older than this many days before summarization.
    #[serde(default)]
    pub max_message_age_days: Option<i64>,
    /// Whether canvases are summarized alongside channels.
    #[serde(default = "default_true")]
    pub include_canvases: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            instruction: None,
            selected_channel_ids: None,
            max_message_age_days: None,
            include_canvases: true,
        }
    }
}

/// Task lifecycle states.
///
/// `Queued → Running → {Completed | Failed}`, plus `Queued → Cancelled` and
/// the cooperative `Running → Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// One unit of asynchronous processing work over a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub options: TaskOptions,
    pub state: TaskState,
    /// 0–100, monotonically non-decreasing while `Running`.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Present iff `state == Completed`.
    pub result: Option<ProcessingResult>,
    /// Present iff `state == Failed`.
    pub error: Option<String>,
}

/// Snapshot-read of a task's observable state, served to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub workspace_id: String,
    pub state: TaskState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A topic identified across the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub description: String,
    /// Deduplicated case-insensitively, first spelling wins.
    pub keywords: Vec<String>,
}

/// The durable structured result of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub workspace_id: String,
    /// Workspace-level executive summary.
    pub summary: String,
    pub channel_summaries: BTreeMap<String, String>,
    pub canvas_summaries: BTreeMap<String, String>,
    pub topics: Vec<Topic>,
    /// Most important first; ranking is delegated to the model.
    pub key_insights: Vec<String>,
    pub processing_time: DateTime<Utc>,
}

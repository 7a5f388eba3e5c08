//! Processing progress reporting for the one-shot CLI run.
//!
//! Reports observable progress while `wsd process` waits for its task so
//! users see that summarization is moving and how far along it is.
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

use crate::models::TaskState;

/// A single progress event observed while polling a task.
#[derive(Clone, Debug)]
pub enum ProcessProgressEvent {
    /// Task is waiting for a worker.
    Queued,
    /// Task is being processed; percent is 0–100.
    Summarizing { percent: u8 },
    /// Task reached a terminal state.
    Finished { state: TaskState },
}

/// Reports processing progress. Implementations write to stderr (human or
/// JSON).
pub trait ProcessProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the polling loop on change.
    fn report(&self, event: ProcessProgressEvent);
}

/// Human-friendly progress on stderr: "process  summarizing  42%".
pub struct StderrProgress;

impl ProcessProgressReporter for StderrProgress {
    fn report(&self, event: ProcessProgressEvent) {
        let line = match &event {
            ProcessProgressEvent::Queued => "process  queued...\n".to_string(),
            ProcessProgressEvent::Summarizing { percent } => {
                format!("process  summarizing  {}%\n", percent)
            }
            ProcessProgressEvent::Finished { state } => {
                format!("process  {}\n", state.as_str())
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProcessProgressReporter for JsonProgress {
    fn report(&self, event: ProcessProgressEvent) {
        let obj = match &event {
            ProcessProgressEvent::Queued => serde_json::json!({
                "event": "progress",
                "phase": "queued"
            }),
            ProcessProgressEvent::Summarizing { percent } => serde_json::json!({
                "event": "progress",
                "phase": "summarizing",
                "percent": percent
            }),
            ProcessProgressEvent::Finished { state } => serde_json::json!({
                "event": "progress",
                "phase": "finished",
                "state": state.as_str()
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProcessProgressReporter for NoProgress {
    fn report(&self, _event: ProcessProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProcessProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

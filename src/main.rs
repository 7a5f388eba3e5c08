//! # Workspace Digest CLI (`wsd`)
//!
//! The `wsd` binary is the primary interface for Workspace Digest. It
//! provides commands for database initialization, snapshot import,
//! one-shot processing, and starting the polling gateway.
//!
//! ## Usage
//!
//! ```bash
//! wsd --config ./config/wsd.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wsd init` | Create the SQLite database and run schema migrations |
//! | `wsd import <file>` | Register a workspace snapshot from a JSON export |
//! | `wsd workspaces` | List imported snapshots |
//! | `wsd process <workspace>` | Summarize one workspace and print the result |
//! | `wsd serve` | Start the HTTP polling gateway |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! wsd init --config ./config/wsd.toml
//!
//! # Register an exported snapshot
//! wsd import ./exports/acme.json
//!
//! # Summarize two channels of recent activity
//! wsd process T0AB12CD --channel C01 --channel C02 --max-age-days 30
//!
//! # Summarize with a custom instruction
//! wsd process T0AB12CD --instruction "focus on decisions and blockers"
//!
//! # Start the gateway for polling clients
//! wsd serve --config ./config/wsd.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use workspace_digest::models::TaskOptions;
use workspace_digest::progress::ProgressMode;
use workspace_digest::{config, import, migrate, process, server, workspaces};

/// Workspace Digest — an asynchronous AI summarization pipeline for
/// collaboration workspace exports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "wsd",
    about = "Workspace Digest — summarize collaboration workspace exports with an async task pipeline",
    version,
    long_about = "Workspace Digest ingests workspace exports (users, channels, threaded \
    messages, canvases), runs them through a chunked map-reduce summarization pipeline \
    against a configurable language-model provider, and serves results through an \
    asynchronous submit/poll task API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/wsd.toml`. Database, chunking, summarizer,
    /// worker, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/wsd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (snapshots, tasks). This command is idempotent — running it
    /// multiple times is safe.
    Init,

    /// Register a workspace snapshot from a JSON export file.
    ///
    /// Validates the export, then stores it keyed by workspace id.
    /// Re-importing identical content is skipped; changed content
    /// replaces the previous snapshot wholesale.
    Import {
        /// Path to the snapshot JSON file.
        file: PathBuf,
    },

    /// List imported snapshots.
    Workspaces,

    /// Summarize one workspace and print the result.
    ///
    /// Runs the full pipeline in-process: submits a task, polls it to
    /// completion with progress on stderr, and prints the workspace
    /// summary, topics, and key insights on stdout.
    Process {
        /// Workspace id of an imported snapshot.
        workspace_id: String,

        /// Custom instruction woven into the summarization prompts.
        #[arg(long)]
        instruction: Option<String>,

        /// Restrict processing to a channel id. Repeatable; all channels
        /// when omitted.
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Drop messages older than this many days.
        #[arg(long)]
        max_age_days: Option<i64>,

        /// Skip canvas summarization.
        #[arg(long)]
        no_canvases: bool,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Defaults to `human` when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Start the HTTP polling gateway.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// submit/status/result/cancel API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            migrate::run_migrations(&cfg).await?;
            import::run_import(&cfg, &file).await?;
        }
        Commands::Workspaces => {
            workspaces::list_workspaces(&cfg).await?;
        }
        Commands::Process {
            workspace_id,
            instruction,
            channels,
            max_age_days,
            no_canvases,
            progress,
        } => {
            let progress_mode = match progress.as_deref() {
                Some(value) => ProgressMode::parse(value)
                    .ok_or_else(|| anyhow::anyhow!("invalid progress mode: {}", value))?,
                None => ProgressMode::default_for_tty(),
            };
            let options = TaskOptions {
                instruction,
                selected_channel_ids: if channels.is_empty() {
                    None
                } else {
                    Some(channels)
                },
                max_message_age_days: max_age_days,
                include_canvases: !no_canvases,
            };
            process::run_process(&cfg, &workspace_id, options, progress_mode).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

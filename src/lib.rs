//! # Workspace Digest
//!
//! An asynchronous AI summarization pipeline for collaboration workspace
//! exports.
//!
//! Workspace Digest ingests a hierarchical export of workspace data
//! (users, channels, threaded messages, canvases), chunks its content on
//! structural boundaries, summarizes it through an external language-model
//! capability, and aggregates per-scope summaries into a workspace-level
//! digest with topics and ranked insights — all behind an asynchronous
//! task queue with incremental progress polling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────────────┐   ┌──────────┐
//! │ Snapshot │──▶│  Worker Pool               │──▶│  Result   │
//! │ (import) │   │ chunk → summarize → reduce │   │ (polled)  │
//! └──────────┘   └────────────┬───────────────┘   └────┬─────┘
//!                             │                        │
//!                        ┌────┴────┐             ┌─────┴────┐
//!                        │   CLI   │             │   HTTP   │
//!                        │  (wsd)  │             │ gateway  │
//!                        └─────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! wsd init                       # create database
//! wsd import export.json         # register a workspace snapshot
//! wsd workspaces                 # list imported snapshots
//! wsd process T0AB12CD           # summarize one workspace in-process
//! wsd serve                      # start the polling gateway
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Snapshot, task, and result data types |
//! | [`snapshot`] | Scope text assembly and filtering |
//! | [`chunk`] | Lossless line-boundary chunking |
//! | [`summarizer`] | Summarization provider abstraction |
//! | [`aggregate`] | Map-reduce summarization pipeline |
//! | [`task`] | Task state machine, queue, and worker pool |
//! | [`server`] | HTTP polling gateway |
//! | [`store`] | In-memory snapshot registry |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod aggregate;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod migrate;
pub mod models;
pub mod process;
pub mod progress;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod summarizer;
pub mod task;
pub mod workspaces;

//! tasksync - Task extraction and sync pipeline
//!
//! Turns free-form text (typed, or transcribed from audio) into a
//! validated task list, persists it per user, and streams back a
//! natural-language confirmation.
//!
//! # Architecture
//!
//! Each submission is a small state machine:
//! - Received → Extracting → Persisting → Summarizing → Delivered
//! - Any failed stage ends the run in Failed; later stages never run
//! - Task collections are append-only event logs, rebuilt by replay
//!
//! # Modules
//!
//! - `adapters`: Provider traits, provider clients (Groq, Whisper) and the
//!   extraction, summarization and transcription adapters
//! - `core`: Validator, TaskStore, Safety, Orchestrator
//! - `domain`: Data structures (Task, TaskEvent, SyncRun)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Extract and store tasks, streaming the confirmation
//! tasksync submit --user alice "Math homework due tomorrow at 5pm, high priority"
//!
//! # Same from a voice memo
//! tasksync audio --user alice memo.m4a
//!
//! # Inspect and complete
//! tasksync list --user alice --sorted
//! tasksync complete --user alice <task-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{AudioInput, ChatProvider, TranscriptionProvider};
pub use core::{Orchestrator, PipelineError, SyncReply, TaskStore};
pub use domain::{RunState, SyncRun, Task, TaskId, TaskList, TaskStatus};

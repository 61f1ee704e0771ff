//! Domain types for tasksync.
//!
//! This module contains the core data structures:
//! - Task: Extracted task records and task lists
//! - Events: Immutable records of changes to a user's collection
//! - Run: Per-request pipeline state

pub mod events;
pub mod run;
pub mod task;

// Re-export commonly used types
pub use events::TaskEvent;
pub use run::{RunInput, RunState, SyncRun};
pub use task::{parse_due_date, Priority, Task, TaskId, TaskList, TaskStatus, UNSPECIFIED};

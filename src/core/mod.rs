//! Core pipeline logic.
//!
//! This module contains:
//! - Validator: Task schema checks and normalization
//! - TaskStore: Per-user task persistence
//! - Safety: Input bounds and provider timeouts
//! - Orchestrator: The sync pipeline

pub mod orchestrator;
pub mod safety;
pub mod task_store;
pub mod validator;

// Re-export commonly used types
pub use orchestrator::{Delivery, Orchestrator, PipelineError, SyncReply};
pub use safety::{SafetyLimits, SafetyViolation};
pub use task_store::{JsonlTaskStore, MemoryTaskStore, StoreError, TaskStore};
pub use validator::{validate, validate_batch, validate_user_id, ValidationError};

//! Per-request state of a sync run.
//!
//! A SyncRun follows one submission through the pipeline:
//! Received → Extracting → Persisting → Summarizing → Delivered,
//! or into Failed from any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Where the run's text came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunInput {
    /// Typed text
    Text,

    /// Transcribed audio (id is a content hash of the upload)
    Audio { audio_id: String },
}

/// A single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Owner of the tasks this run produces
    pub user_id: String,

    pub input: RunInput,

    /// Current state
    pub state: RunState,

    pub started_at: DateTime<Utc>,

    /// Set once the run reaches Delivered or Failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Every state entered, in order (including the initial Received)
    pub history: Vec<RunState>,

    /// Number of tasks extracted (0 until extraction succeeds)
    pub tasks_extracted: usize,
}

impl SyncRun {
    /// Create a run in the Received state
    pub fn new(user_id: impl Into<String>, input: RunInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            input,
            state: RunState::Received,
            started_at: Utc::now(),
            completed_at: None,
            history: vec![RunState::Received],
            tasks_extracted: 0,
        }
    }

    /// Move to the next state.
    ///
    /// Transitions out of a terminal state are ignored.
    pub fn advance(&mut self, next: RunState) {
        if !self.state.can_transition_to(&next) {
            debug!(
                run_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Ignoring invalid run transition"
            );
            return;
        }

        debug!(run_id = %self.id, from = ?self.state, to = ?next, "Run state change");
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.history.push(next.clone());
        self.state = next;
    }

    /// Move to Failed with the given error message
    pub fn fail(&mut self, error: impl Into<String>) {
        self.advance(RunState::Failed {
            error: error.into(),
        });
    }

    /// Check if the run has reached Delivered or Failed
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// State of a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Input accepted
    Received,

    /// Waiting on the extraction provider
    Extracting,

    /// Writing the extracted tasks
    Persisting,

    /// Streaming the confirmation
    Summarizing,

    /// Confirmation stream finished. `interrupted` holds the reason if the
    /// stream ended early; the tasks are persisted either way.
    Delivered { interrupted: Option<String> },

    /// A stage failed; later stages did not run
    Failed { error: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Failed { .. })
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Self::Failed { .. }) => true,
            (Self::Received, Self::Extracting)
            | (Self::Extracting, Self::Persisting)
            | (Self::Persisting, Self::Summarizing)
            | (Self::Summarizing, Self::Delivered { .. }) => true,
            _ => false,
        }
    }

    /// Short lowercase name used in logs and error payloads
    pub fn name(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Extracting => "extracting",
            Self::Persisting => "persisting",
            Self::Summarizing => "summarizing",
            Self::Delivered { .. } => "delivered",
            Self::Failed { .. } => "failed",
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::Received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_creation() {
        let run = SyncRun::new("alice", RunInput::Text);

        assert_eq!(run.user_id, "alice");
        assert_eq!(run.state, RunState::Received);
        assert_eq!(run.history, vec![RunState::Received]);
        assert!(!run.is_finished());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = SyncRun::new("alice", RunInput::Text);
        run.advance(RunState::Extracting);
        run.advance(RunState::Persisting);
        run.advance(RunState::Summarizing);
        run.advance(RunState::Delivered { interrupted: None });

        assert!(run.is_finished());
        assert!(run.completed_at.is_some());
        assert_eq!(run.history.len(), 5);
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        let mut run = SyncRun::new("alice", RunInput::Text);
        run.advance(RunState::Summarizing);
        assert_eq!(run.state, RunState::Received);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut run = SyncRun::new("alice", RunInput::Text);
        run.advance(RunState::Extracting);
        run.fail("malformed-json");
        run.advance(RunState::Persisting);

        assert_eq!(
            run.state,
            RunState::Failed {
                error: "malformed-json".to_string()
            }
        );
    }

    #[test]
    fn test_state_serialization() {
        let state = RunState::Delivered {
            interrupted: Some("stream-interrupted".to_string()),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"status\":\"delivered\""));
    }
}

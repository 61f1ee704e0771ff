//! Events recorded in a user's task log.
//!
//! A user's collection is never rewritten in place. Every change is an
//! immutable event appended to the log, and the current collection is
//! rebuilt by replaying those events in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskId, TaskStatus};

/// A single entry in a user's append-only task log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A validated task was inserted (the record carries its assigned id)
    TaskAdded {
        timestamp: DateTime<Utc>,
        task: Task,
    },

    /// A task's status was changed
    StatusChanged {
        timestamp: DateTime<Utc>,
        task_id: TaskId,
        status: TaskStatus,
    },
}

impl TaskEvent {
    /// Record the insertion of a task
    pub fn added(task: Task) -> Self {
        Self::TaskAdded {
            timestamp: Utc::now(),
            task,
        }
    }

    /// Record a status change
    pub fn status_changed(task_id: TaskId, status: TaskStatus) -> Self {
        Self::StatusChanged {
            timestamp: Utc::now(),
            task_id,
            status,
        }
    }

    /// When this event occurred
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskAdded { timestamp, .. } | Self::StatusChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Apply this event to a collection being rebuilt by replay
    pub fn apply(self, tasks: &mut Vec<Task>) {
        match self {
            Self::TaskAdded { task, .. } => {
                // A replayed duplicate id replaces the earlier record
                if let Some(existing) = tasks
                    .iter_mut()
                    .find(|t| t.id.is_some() && t.id == task.id)
                {
                    *existing = task;
                } else {
                    tasks.push(task);
                }
            }
            Self::StatusChanged { task_id, status, .. } => {
                if let Some(task) = tasks
                    .iter_mut()
                    .find(|t| t.id.as_ref() == Some(&task_id))
                {
                    task.status = status;
                }
            }
        }
    }
}

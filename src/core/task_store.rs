//! Per-user task collections.
//!
//! The durable store keeps one append-only JSONL log per user, in the same
//! shape as the run event logs it grew out of: every change is a
//! [`TaskEvent`] line and the current collection is derived by replay.
//!
//! ```text
//! <home>/users/<user_id>/tasks.jsonl
//! ```

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use fs2::FileExt;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use super::validator::{validate_user_id, ValidationError};
use crate::domain::{Task, TaskEvent, TaskId, TaskList, TaskStatus};

/// Name of the per-user log file
pub const TASKS_FILE: &str = "tasks.jsonl";

/// Errors raised by a task store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt task log {path} at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Task store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid user id: {0}")]
    InvalidUser(#[from] ValidationError),

    #[error("Store worker failed: {0}")]
    Join(String),
}

impl StoreError {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Io(_) => "io-error",
            Self::Serialization(_) => "serialization-error",
            Self::Corrupt { .. } => "corrupt-log",
            Self::Unavailable(_) => "store-unavailable",
            Self::InvalidUser(_) => "invalid-user-id",
            Self::Join(_) => "store-worker-failed",
        }
    }
}

/// Storage for per-user task collections
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert `tasks` into the user's collection, assigning ids.
    ///
    /// Each insert is atomic on its own; a failure part way through may
    /// leave the earlier tasks of the batch stored.
    async fn append(&self, user_id: &str, tasks: &TaskList) -> Result<Vec<TaskId>, StoreError>;

    /// All tasks of a user in store order. Unknown users have none.
    async fn read_all(&self, user_id: &str) -> Result<TaskList, StoreError>;

    /// Change a task's status.
    ///
    /// Returns `false` without writing when the task does not exist, is
    /// already in `status`, or the change would reopen a completed task.
    async fn set_status(
        &self,
        user_id: &str,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<bool, StoreError>;
}

/// Give every task a fresh id, replacing any id the input carried
fn assign_ids(tasks: &TaskList) -> Vec<Task> {
    tasks
        .iter()
        .cloned()
        .map(|task| task.with_id(TaskId::generate()))
        .collect()
}

/// One async lock per user, created on first use and dropped once idle
#[derive(Default)]
struct UserLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn lock(&self, user_id: &str) -> UserGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;

        UserGuard {
            locks: self,
            user_id: user_id.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held user lock; removes the map entry when no one else is waiting
struct UserGuard<'a> {
    locks: &'a UserLocks,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Clones only happen under the map lock, so a count of one means idle
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Durable store backed by one JSONL event log per user
pub struct JsonlTaskStore {
    root: PathBuf,
    locks: UserLocks,
}

impl JsonlTaskStore {
    /// Open a store rooted at `root` (the directory holding per-user dirs)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: UserLocks::default(),
        }
    }

    /// Open the store under the configured home directory
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::users_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a user's log file
    pub fn log_path(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id).join(TASKS_FILE)
    }
}

/// Run file work on the blocking pool
async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
}

/// Replay a log's bytes into the current collection.
///
/// Only newline-terminated lines are committed. A trailing fragment without
/// a newline is an interrupted write and is skipped; a terminated line that
/// does not parse is corruption.
fn replay(path: &Path, bytes: &[u8]) -> Result<Vec<Task>, StoreError> {
    let committed = committed_len(bytes);
    if committed < bytes.len() {
        warn!(
            path = %path.display(),
            bytes = bytes.len() - committed,
            "Ignoring unterminated trailing line"
        );
    }

    let mut tasks = Vec::new();
    for (index, line) in bytes[..committed].split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let event: TaskEvent = serde_json::from_slice(line).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: index + 1,
            reason: e.to_string(),
        })?;
        event.apply(&mut tasks);
    }

    Ok(tasks)
}

/// Length of the log up to and including its last newline
fn committed_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1)
}

/// Read a user's log under a shared file lock
fn read_log(path: &Path) -> Result<Vec<Task>, StoreError> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared()?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    replay(path, &bytes)
}

/// A log opened for appending, with the exclusive file lock held.
///
/// The lock serializes writers across processes sharing the home directory
/// and is released when the log is dropped.
struct LockedLog {
    file: std::fs::File,
    tasks: Vec<Task>,
}

impl LockedLog {
    /// Open (creating if needed) and lock the log, then replay it.
    ///
    /// An unterminated trailing line left by an interrupted write is cut off
    /// so the next event starts on a fresh line.
    fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        file.lock_exclusive()?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let tasks = replay(path, &bytes)?;

        let committed = committed_len(&bytes);
        if committed < bytes.len() {
            file.set_len(committed as u64)?;
            file.sync_data()?;
        }

        Ok(Self { file, tasks })
    }

    /// Append events, one `write_all` per line
    fn append(&mut self, events: &[TaskEvent]) -> Result<(), StoreError> {
        for event in events {
            let mut line = serde_json::to_string(event)?;
            line.push('\n');
            self.file.write_all(line.as_bytes())?;
        }
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Result of a locked status update
enum StatusUpdate {
    Missing,
    Unchanged(TaskStatus),
    Changed,
}

#[async_trait]
impl TaskStore for JsonlTaskStore {
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn append(&self, user_id: &str, tasks: &TaskList) -> Result<Vec<TaskId>, StoreError> {
        validate_user_id(user_id)?;
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.locks.lock(user_id).await;

        let stored = assign_ids(tasks);
        let ids: Vec<TaskId> = stored.iter().filter_map(|t| t.id.clone()).collect();
        let events: Vec<TaskEvent> = stored.into_iter().map(TaskEvent::added).collect();

        let path = self.log_path(user_id);
        blocking(move || LockedLog::open(&path)?.append(&events)).await?;

        info!(user_id, count = ids.len(), "Tasks appended");
        Ok(ids)
    }

    async fn read_all(&self, user_id: &str) -> Result<TaskList, StoreError> {
        validate_user_id(user_id)?;
        let path = self.log_path(user_id);
        Ok(TaskList::new(blocking(move || read_log(&path)).await?))
    }

    #[instrument(skip(self))]
    async fn set_status(
        &self,
        user_id: &str,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<bool, StoreError> {
        validate_user_id(user_id)?;

        let _guard = self.locks.lock(user_id).await;

        let path = self.log_path(user_id);
        let id = task_id.clone();

        // Replay, check and write all happen under the exclusive file lock
        let update = blocking(move || {
            if !path.exists() {
                return Ok(StatusUpdate::Missing);
            }

            let mut log = LockedLog::open(&path)?;
            let Some(current) = log.tasks.iter().find(|t| t.id.as_ref() == Some(&id)) else {
                return Ok(StatusUpdate::Missing);
            };
            if !current.status.can_transition_to(status) {
                return Ok(StatusUpdate::Unchanged(current.status));
            }

            log.append(&[TaskEvent::status_changed(id, status)])?;
            Ok(StatusUpdate::Changed)
        })
        .await?;

        match update {
            StatusUpdate::Missing => {
                debug!("Task not found");
                Ok(false)
            }
            StatusUpdate::Unchanged(current) => {
                debug!(%current, "Status unchanged");
                Ok(false)
            }
            StatusUpdate::Changed => {
                info!(%status, "Task status changed");
                Ok(true)
            }
        }
    }
}

/// In-process store, used by tests and when no home directory is wanted
#[derive(Default)]
pub struct MemoryTaskStore {
    collections: RwLock<HashMap<String, Vec<Task>>>,
    unavailable: AtomicBool,
    append_calls: AtomicUsize,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of times `append` has been called
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn append(&self, user_id: &str, tasks: &TaskList) -> Result<Vec<TaskId>, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        validate_user_id(user_id)?;
        self.check_available()?;

        let stored = assign_ids(tasks);
        let ids = stored.iter().filter_map(|t| t.id.clone()).collect();

        let mut collections = self.collections.write().await;
        collections.entry(user_id.to_string()).or_default().extend(stored);
        Ok(ids)
    }

    async fn read_all(&self, user_id: &str) -> Result<TaskList, StoreError> {
        validate_user_id(user_id)?;
        self.check_available()?;

        let collections = self.collections.read().await;
        Ok(TaskList::new(
            collections.get(user_id).cloned().unwrap_or_default(),
        ))
    }

    async fn set_status(
        &self,
        user_id: &str,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<bool, StoreError> {
        validate_user_id(user_id)?;
        self.check_available()?;

        let mut collections = self.collections.write().await;
        let task = collections
            .get_mut(user_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.id.as_ref() == Some(task_id)));

        match task {
            Some(task) if task.status.can_transition_to(status) => {
                task.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

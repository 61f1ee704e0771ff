//! Sync pipeline orchestration.
//!
//! One submission moves through
//! Received → Extracting → Persisting → Summarizing → Delivered,
//! or into Failed when extraction or persistence fails. Later stages never
//! run after a failed stage, and whatever was produced before the failure
//! travels inside the error.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context as TaskContext, Poll};

use anyhow::Context;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::adapters::{
    AudioInput, ChatProvider, ExtractionError, Extractor, GroqClient, SummarizationError,
    Summarizer, SummaryStream, Transcriber, TranscriptionError, TranscriptionProvider, WhisperCli,
};
use crate::config::{ResolvedConfig, TranscriptionBackend};
use crate::domain::{RunInput, RunState, SyncRun, TaskId, TaskList, TaskStatus};

use super::safety::SafetyLimits;
use super::task_store::{JsonlTaskStore, StoreError, TaskStore};
use super::validator::{validate_user_id, ValidationError};

/// Errors surfaced by pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {message}")]
    InvalidInput {
        reason: &'static str,
        message: String,
    },

    #[error("Invalid user id: {0}")]
    InvalidUser(#[from] ValidationError),

    #[error("Extraction failed: {source}")]
    Extraction {
        #[source]
        source: ExtractionError,
        run: Box<SyncRun>,
    },

    /// The tasks were extracted but could not be stored
    #[error("Failed to persist {} extracted tasks: {source}", .tasks.len())]
    Persistence {
        tasks: TaskList,
        #[source]
        source: StoreError,
        run: Box<SyncRun>,
    },

    #[error("Transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("No transcription backend is configured")]
    TranscriptionUnavailable,

    #[error("Task store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Error category for payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid-input",
            Self::InvalidUser(_) => "invalid-user",
            Self::Extraction { .. } => "extraction",
            Self::Persistence { .. } => "persistence",
            Self::Transcription(_) | Self::TranscriptionUnavailable => "transcription",
            Self::Store(_) => "store",
        }
    }

    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidInput { reason, .. } => *reason,
            Self::InvalidUser(_) => "invalid-user-id",
            Self::Extraction { source, .. } => source.reason(),
            Self::Persistence { source, .. } | Self::Store(source) => source.reason(),
            Self::Transcription(source) => source.reason(),
            Self::TranscriptionUnavailable => "no-backend",
        }
    }

    /// Tasks produced before the failure, if any
    pub fn partial_tasks(&self) -> Option<&TaskList> {
        match self {
            Self::Persistence { tasks, .. } => Some(tasks),
            _ => None,
        }
    }

    /// The failed run, for errors raised after the run started
    pub fn run(&self) -> Option<&SyncRun> {
        match self {
            Self::Extraction { run, .. } | Self::Persistence { run, .. } => Some(run),
            _ => None,
        }
    }

    /// Typed JSON error payload.
    ///
    /// ```json
    /// {"error": "persistence", "reason": "store-unavailable", "message": "...", "tasks": [...]}
    /// ```
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "error": self.kind(),
            "reason": self.reason(),
            "message": self.to_string(),
        });
        if let Some(tasks) = self.partial_tasks() {
            payload["tasks"] = serde_json::to_value(&tasks.tasks).unwrap_or_default();
        }
        payload
    }
}

/// Runs submissions through extraction, persistence and summarization
pub struct Orchestrator {
    extractor: Extractor,
    summarizer: Summarizer,
    transcriber: Option<Transcriber>,
    store: Arc<dyn TaskStore>,
    limits: SafetyLimits,
}

impl Orchestrator {
    /// Create an orchestrator without a transcription backend
    pub fn new(
        chat: Arc<dyn ChatProvider>,
        store: Arc<dyn TaskStore>,
        limits: SafetyLimits,
    ) -> Self {
        let timeout = limits.provider_timeout();
        Self {
            extractor: Extractor::new(Arc::clone(&chat), timeout)
                .with_max_tasks(limits.max_tasks_per_batch),
            summarizer: Summarizer::new(chat, timeout),
            transcriber: None,
            store,
            limits,
        }
    }

    /// Enable `submit_audio` with the given backend
    pub fn with_transcription(mut self, provider: Arc<dyn TranscriptionProvider>) -> Self {
        self.transcriber = Some(Transcriber::new(provider, self.limits.provider_timeout()));
        self
    }

    /// Build providers and the durable store from resolved configuration
    pub fn from_config(config: &ResolvedConfig) -> anyhow::Result<Self> {
        let groq = Arc::new(
            GroqClient::from_settings(&config.provider)
                .context("Failed to create provider client")?,
        );
        let store = Arc::new(JsonlTaskStore::new(config.users_dir()));
        let orchestrator = Self::new(groq.clone(), store, config.safety.clone());

        let orchestrator = match config.provider.transcription_backend {
            TranscriptionBackend::Groq => orchestrator.with_transcription(groq),
            TranscriptionBackend::Whisper => orchestrator.with_transcription(Arc::new(
                WhisperCli::new(&config.provider.whisper_path, &config.provider.whisper_model)
                    .with_language(&config.provider.language),
            )),
            TranscriptionBackend::None => orchestrator,
        };
        Ok(orchestrator)
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Extract tasks from `text`, persist them, and stream a confirmation.
    ///
    /// Resubmitting the same text stores the tasks again.
    #[instrument(skip(self, text), fields(input_bytes = text.len()))]
    pub async fn submit_task(&self, user_id: &str, text: &str) -> Result<SyncReply, PipelineError> {
        self.run_pipeline(user_id, text, RunInput::Text).await
    }

    /// Transcribe `audio` and submit the transcript like typed text
    #[instrument(skip(self, audio), fields(file = %audio.file_name, audio_bytes = audio.len()))]
    pub async fn submit_audio(
        &self,
        user_id: &str,
        audio: AudioInput,
    ) -> Result<SyncReply, PipelineError> {
        validate_user_id(user_id)?;
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or(PipelineError::TranscriptionUnavailable)?;

        self.limits
            .validate_audio(&audio.bytes)
            .map_err(|v| PipelineError::InvalidInput {
                reason: "audio-too-large",
                message: v.to_string(),
            })?;

        let transcript = transcriber.transcribe(&audio).await?;
        let input = RunInput::Audio {
            audio_id: audio.audio_id(),
        };
        self.run_pipeline(user_id, &transcript.text, input).await
    }

    /// Mark a task complete. Returns `false` if nothing changed.
    #[instrument(skip(self))]
    pub async fn complete_task(
        &self,
        user_id: &str,
        task_id: &TaskId,
    ) -> Result<bool, PipelineError> {
        validate_user_id(user_id)?;
        let changed = self
            .store
            .set_status(user_id, task_id, TaskStatus::Complete)
            .await?;
        Ok(changed)
    }

    /// All tasks of a user in store order
    pub async fn list_tasks(&self, user_id: &str) -> Result<TaskList, PipelineError> {
        validate_user_id(user_id)?;
        Ok(self.store.read_all(user_id).await?)
    }

    async fn run_pipeline(
        &self,
        user_id: &str,
        text: &str,
        input: RunInput,
    ) -> Result<SyncReply, PipelineError> {
        validate_user_id(user_id)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidInput {
                reason: "empty-input",
                message: "input text is empty".to_string(),
            });
        }
        self.limits
            .validate_input(text)
            .map_err(|v| PipelineError::InvalidInput {
                reason: "input-too-large",
                message: v.to_string(),
            })?;

        let mut run = SyncRun::new(user_id, input);
        info!(run_id = %run.id, user_id, "Sync run received");

        // Extracting
        run.advance(RunState::Extracting);
        let extracted = match self.extractor.extract(text).await {
            Ok(tasks) => tasks,
            Err(source) => {
                warn!(
                    run_id = %run.id,
                    reason = source.reason(),
                    error = %source,
                    "Extraction failed"
                );
                run.fail(source.to_string());
                return Err(PipelineError::Extraction {
                    source,
                    run: Box::new(run),
                });
            }
        };
        run.tasks_extracted = extracted.len();

        // Persisting
        run.advance(RunState::Persisting);
        let ids = match self.store.append(user_id, &extracted).await {
            Ok(ids) => ids,
            Err(source) => {
                warn!(
                    run_id = %run.id,
                    tasks = extracted.len(),
                    error = %source,
                    "Persistence failed"
                );
                run.fail(source.to_string());
                return Err(PipelineError::Persistence {
                    tasks: extracted,
                    source,
                    run: Box::new(run),
                });
            }
        };
        let persisted: TaskList = extracted
            .into_iter()
            .zip(ids)
            .map(|(task, id)| task.with_id(id))
            .collect();

        // Summarizing
        run.advance(RunState::Summarizing);
        info!(run_id = %run.id, tasks = persisted.len(), "Tasks persisted, streaming confirmation");

        let summary = self.summarizer.summarize(&persisted);
        Ok(SyncReply::new(persisted, run, summary))
    }
}

fn lock_run(run: &Mutex<SyncRun>) -> MutexGuard<'_, SyncRun> {
    run.lock().unwrap_or_else(|e| e.into_inner())
}

/// A successful submission: the stored tasks plus the live confirmation.
///
/// `SyncReply` is itself a stream of confirmation chunks. The run reaches
/// Delivered when the stream ends; dropping the reply early stops reading
/// from the provider and leaves the run in Summarizing.
pub struct SyncReply {
    tasks: TaskList,
    run: Arc<Mutex<SyncRun>>,
    summary: SummaryStream,
}

impl SyncReply {
    fn new(tasks: TaskList, run: SyncRun, summary: SummaryStream) -> Self {
        let run = Arc::new(Mutex::new(run));
        let summary = track_delivery(Arc::clone(&run), summary);
        Self { tasks, run, summary }
    }

    /// The persisted tasks, with ids
    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    /// Snapshot of the run state
    pub fn run(&self) -> SyncRun {
        lock_run(&self.run).clone()
    }

    /// Drain the confirmation stream
    pub async fn collect(mut self) -> Delivery {
        let mut text = String::new();
        let mut interruption = None;

        while let Some(item) = self.summary.next().await {
            match item {
                Ok(chunk) => text.push_str(&chunk),
                Err(e) => interruption = Some(e),
            }
        }

        Delivery {
            text,
            interruption,
            tasks: self.tasks,
            run: lock_run(&self.run).clone(),
        }
    }
}

impl Stream for SyncReply {
    type Item = Result<String, SummarizationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().summary.poll_next_unpin(cx)
    }
}

/// Outcome of a fully consumed reply
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Everything the summarizer produced
    pub text: String,

    /// Why the confirmation ended early, if it did
    pub interruption: Option<SummarizationError>,

    pub tasks: TaskList,

    pub run: SyncRun,
}

/// Move the run to Delivered once the summary stream ends
fn track_delivery(run: Arc<Mutex<SyncRun>>, mut summary: SummaryStream) -> SummaryStream {
    Box::pin(async_stream::stream! {
        let mut interrupted = None;
        while let Some(item) = summary.next().await {
            if let Err(e) = &item {
                interrupted = Some(e.to_string());
            }
            yield item;
        }

        let mut run = lock_run(&run);
        match &interrupted {
            Some(reason) => warn!(run_id = %run.id, reason = %reason, "Confirmation interrupted"),
            None => info!(run_id = %run.id, "Confirmation delivered"),
        }
        run.advance(RunState::Delivered { interrupted });
    })
}

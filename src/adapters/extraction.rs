//! Task extraction from free text.
//!
//! The provider streams back a JSON document, but the document is only
//! parseable once the stream has finished, so this adapter collects the
//! whole response before parsing it. Summarization streams instead; the
//! two paths are deliberately separate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::{ChatMessage, ChatProvider, ProviderError, ProviderTimeout};
use crate::core::validator::{validate_batch, ValidationError};
use crate::domain::TaskList;

/// Errors from a single extraction call
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("provider returned malformed JSON: {error}")]
    MalformedJson {
        /// The full accumulated response
        raw: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("extracted tasks failed validation: {0}")]
    SchemaViolation(#[from] ValidationError),

    #[error("extraction provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Timeout(#[from] ProviderTimeout),
}

impl ExtractionError {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedJson { .. } => "malformed-json",
            Self::SchemaViolation(_) => "schema-violation",
            Self::Provider(_) => "provider-error",
            Self::Timeout(_) => "provider-timeout",
        }
    }
}

/// Extracts a validated task list from free text
pub struct Extractor {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
    max_tasks: usize,
}

impl Extractor {
    pub fn new(provider: Arc<dyn ChatProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            max_tasks: usize::MAX,
        }
    }

    /// Reject responses holding more than `max_tasks` tasks
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Extract tasks from `free_text`.
    ///
    /// Returns a fully validated list or a typed error, never a partial
    /// list. No retries happen here.
    #[instrument(skip_all, fields(provider = self.provider.name(), input_bytes = free_text.len()))]
    pub async fn extract(&self, free_text: &str) -> Result<TaskList, ExtractionError> {
        let now = Local::now();
        let messages = vec![
            ChatMessage::system(extraction_instruction(now)),
            ChatMessage::user(free_text),
        ];

        let raw = match timeout(self.timeout, self.collect(messages)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Extraction timed out");
                return Err(ProviderTimeout::new("extraction", self.timeout).into());
            }
        };

        debug!(response_bytes = raw.len(), "Extraction response collected");
        parse_extraction(&raw, now.with_timezone(&Utc), self.max_tasks)
    }

    /// Drain the provider stream into one string
    async fn collect(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError> {
        let mut stream = self.provider.stream_chat(messages).await?;
        let mut raw = String::new();
        while let Some(chunk) = stream.next().await {
            raw.push_str(&chunk?);
        }
        Ok(raw)
    }
}

/// Parse and validate a complete extraction response
pub fn parse_extraction(
    raw: &str,
    extracted_at: DateTime<Utc>,
    max_tasks: usize,
) -> Result<TaskList, ExtractionError> {
    let candidate: serde_json::Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(|error| ExtractionError::MalformedJson {
            raw: raw.to_string(),
            error,
        })?;

    Ok(validate_batch(&candidate, extracted_at, max_tasks)?)
}

/// Remove one Markdown code fence wrapped around the whole response
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = body.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an info string such as "json" on the opening line
    match body.find('\n') {
        Some(pos) => body[pos + 1..].trim(),
        None => body.trim(),
    }
}

/// System instruction describing the required JSON shape
fn extraction_instruction(now: DateTime<Local>) -> String {
    format!(
        r#"You turn a user's message into a list of tasks for their calendar.
Reply with a single JSON object and nothing else: no prose, no Markdown.
The object has exactly one key, "tasks", holding an array. Each element is:
{{
  "description": string, what needs to be done (required, non-empty),
  "priority": "Low" | "Medium" | "High", or null if the message does not say,
  "category": a short label such as "School", "Work" or "Personal", or null,
  "due_date": "YYYY-MM-DD HH:MM" in the user's local time, or null if no deadline was given,
  "status": "Incomplete"
}}
Resolve relative dates ("tomorrow", "next Monday") against the current local time: {}.
If the message contains no tasks, reply with {{"tasks": []}}."#,
        now.format("%A %Y-%m-%d %H:%M")
    )
}

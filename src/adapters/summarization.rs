//! Streamed confirmation of newly added tasks.
//!
//! Unlike extraction, nothing is buffered: each provider chunk is handed to
//! the caller as soon as it arrives. The returned stream is lazy (no
//! provider call happens until it is polled) and dropping it drops the
//! upstream response, which closes the provider connection.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::{ChatMessage, ChatProvider, ChunkStream, ProviderError, ProviderTimeout};
use crate::domain::TaskList;

/// Fixed instruction for the confirmation message
const SUMMARY_INSTRUCTION: &str = "This is the list of tasks that you have added to the user's calendar. \
Write a short text-message style reply confirming that you added them and summarizing the tasks. \
This message is a response, so no greeting is needed.";

/// Confirmation text chunks; an `Err` item is always the last item
pub type SummaryStream = Pin<Box<dyn Stream<Item = Result<String, SummarizationError>> + Send>>;

/// Reasons a confirmation stream ended early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummarizationError {
    #[error("summary stream interrupted: {reason}")]
    StreamInterrupted { reason: String },

    #[error(transparent)]
    Timeout(#[from] ProviderTimeout),
}

impl SummarizationError {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::StreamInterrupted { .. } => "stream-interrupted",
            Self::Timeout(_) => "provider-timeout",
        }
    }

    fn interrupted(error: ProviderError) -> Self {
        Self::StreamInterrupted {
            reason: error.to_string(),
        }
    }
}

/// Produces a human-readable confirmation for a task list
pub struct Summarizer {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn ChatProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Start a confirmation stream for `tasks`.
    ///
    /// Chunks produced before a failure are always delivered; the failure
    /// follows as a single final `Err`. The whole call, including reading
    /// the stream, must finish within the configured timeout.
    pub fn summarize(&self, tasks: &TaskList) -> SummaryStream {
        let provider = Arc::clone(&self.provider);
        let limit = self.timeout;
        let payload = serde_json::to_string(tasks);

        Box::pin(async_stream::stream! {
            let messages = match payload {
                Ok(json) => Some(vec![
                    ChatMessage::system(SUMMARY_INSTRUCTION),
                    ChatMessage::user(json),
                ]),
                Err(e) => {
                    yield Err(SummarizationError::StreamInterrupted {
                        reason: format!("failed to serialize tasks: {}", e),
                    });
                    None
                }
            };

            if let Some(messages) = messages {
                let deadline = Instant::now() + limit;
                let upstream = open_stream(provider.as_ref(), messages, deadline, limit).await;

                match upstream {
                    Err(e) => yield Err(e),
                    Ok(mut upstream) => {
                        let mut chunks = 0usize;
                        loop {
                            match timeout_at(deadline, upstream.next()).await {
                                Err(_) => {
                                    warn!(chunks, "Summary stream timed out");
                                    yield Err(ProviderTimeout::new("summarization", limit).into());
                                    break;
                                }
                                Ok(None) => {
                                    debug!(chunks, "Summary stream finished");
                                    break;
                                }
                                Ok(Some(Ok(chunk))) => {
                                    if !chunk.is_empty() {
                                        chunks += 1;
                                        yield Ok(chunk);
                                    }
                                }
                                Ok(Some(Err(e))) => {
                                    warn!(chunks, error = %e, "Summary stream interrupted");
                                    yield Err(SummarizationError::interrupted(e));
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

async fn open_stream(
    provider: &dyn ChatProvider,
    messages: Vec<ChatMessage>,
    deadline: Instant,
    limit: Duration,
) -> Result<ChunkStream, SummarizationError> {
    match timeout_at(deadline, provider.stream_chat(messages)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(SummarizationError::interrupted(e)),
        Err(_) => Err(ProviderTimeout::new("summarization", limit).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        let interrupted = SummarizationError::StreamInterrupted {
            reason: "connection reset".to_string(),
        };
        assert_eq!(interrupted.reason(), "stream-interrupted");

        let timeout: SummarizationError =
            ProviderTimeout::new("summarization", Duration::from_secs(1)).into();
        assert_eq!(timeout.reason(), "provider-timeout");
    }

    #[test]
    fn test_instruction_asks_for_no_greeting() {
        assert!(SUMMARY_INSTRUCTION.contains("no greeting"));
    }
}

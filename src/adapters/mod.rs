//! Adapter interfaces for external providers.
//!
//! Providers (chat completion, speech to text) sit behind two narrow
//! traits. Client handles are created once and injected as
//! `Arc<dyn ...>`; nothing here is process-global.
//!
//! On top of the providers sit the three adapters the pipeline uses:
//! - `extraction`: collect-then-parse of a streamed JSON task list
//! - `summarization`: pass-through streaming of a confirmation
//! - `transcription`: bounded audio-to-text

pub mod extraction;
pub mod groq;
pub mod summarization;
pub mod transcription;
pub mod whisper;

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

// Re-export the adapters and provider clients
pub use extraction::{ExtractionError, Extractor};
pub use groq::GroqClient;
pub use summarization::{SummarizationError, Summarizer, SummaryStream};
pub use transcription::{Transcriber, TranscriptionError};
pub use whisper::WhisperCli;

/// Text deltas streamed by a chat provider
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Errors raised by provider clients
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected provider response: {0}")]
    Protocol(String),

    #[error("Provider process failed: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing provider credentials: {0}")]
    MissingCredentials(String),
}

/// A provider call did not finish within its time bound
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} timed out after {after:?}")]
pub struct ProviderTimeout {
    /// Which call timed out ("extraction", "summarization", "transcription")
    pub operation: String,
    pub after: Duration,
}

impl ProviderTimeout {
    pub fn new(operation: impl Into<String>, after: Duration) -> Self {
        Self {
            operation: operation.into(),
            after,
        }
    }
}

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

/// One message in a chat completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A text-generation provider that streams its reply
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Start a completion and return its token stream.
    ///
    /// Dropping the returned stream must stop reading from the provider.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream, ProviderError>;
}

/// An audio upload
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub bytes: Vec<u8>,

    /// Original file name (providers use the extension to detect the format)
    pub file_name: String,

    pub mime_type: String,
}

impl AudioInput {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_for(&file_name).to_string();
        Self {
            bytes,
            file_name,
            mime_type,
        }
    }

    /// Read an audio file from disk
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Ok(Self::new(bytes, file_name))
    }

    /// Content hash of the upload (first 12 hex chars of SHA256)
    pub fn audio_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "m4a" | "mp4" => "audio/mp4",
        "mp3" | "mpga" | "mpeg" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Result of transcription
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub duration_seconds: Option<f64>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            duration_seconds: None,
        }
    }
}

/// A speech-to-text provider
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Convert audio into text
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript, ProviderError>;
}

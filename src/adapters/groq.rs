//! Groq (OpenAI-compatible) HTTP client.
//!
//! One client handle serves both provider traits:
//! - `POST {api_base}/chat/completions` with `stream: true`, read as
//!   server-sent events
//! - `POST {api_base}/audio/transcriptions` as a multipart upload

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    AudioInput, ChatMessage, ChatProvider, ChunkStream, ProviderError, Transcript,
    TranscriptionProvider,
};
use crate::config::ProviderSettings;

/// Default API root
pub const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Sampling options sent with every chat request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.5,
            top_p: 1.0,
            max_completion_tokens: 1024,
        }
    }
}

/// Groq API client
#[derive(Clone)]
pub struct GroqClient {
    api_key: String,
    api_base: String,
    chat: ChatOptions,
    transcription_model: String,
    /// Optional spelling/context hint for transcription
    transcription_prompt: Option<String>,
    client: reqwest::Client,
}

/// Request body for streamed chat completions
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    stream: bool,
}

/// One streamed chat completion chunk
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Transcription response (`response_format=json`)
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl GroqClient {
    /// Create a client with default options
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            chat: ChatOptions::default(),
            transcription_model: "distil-whisper-large-v3-en".to_string(),
            transcription_prompt: None,
            client: reqwest::Client::new(),
        }
    }

    /// Create from resolved provider settings
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::MissingCredentials("GROQ_API_KEY is not set".to_string())
            })?;

        Ok(Self::new(api_key)
            .with_api_base(settings.api_base.clone())
            .with_chat_options(ChatOptions {
                model: settings.chat_model.clone(),
                temperature: settings.temperature,
                top_p: settings.top_p,
                max_completion_tokens: settings.max_completion_tokens,
            })
            .with_transcription_model(
                settings.transcription_model.clone(),
                settings.transcription_prompt.clone(),
            ))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_chat_options(mut self, chat: ChatOptions) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_transcription_model(
        mut self,
        model: impl Into<String>,
        prompt: Option<String>,
    ) -> Self {
        self.transcription_model = model.into();
        self.transcription_prompt = prompt;
        self
    }

    /// Build API URL
    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    /// Turn a non-success response into a `ProviderError::Status`
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatProvider for GroqClient {
    fn name(&self) -> &str {
        "groq"
    }

    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream, ProviderError> {
        let body = ChatRequest {
            model: &self.chat.model,
            messages: &messages,
            temperature: self.chat.temperature,
            top_p: self.chat.top_p,
            max_completion_tokens: self.chat.max_completion_tokens,
            stream: true,
        };

        debug!(model = %self.chat.model, messages = messages.len(), "Opening chat stream");

        let response = self
            .client
            .post(self.api_url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            let mut finished = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::Http(e));
                        finished = true;
                        break 'read;
                    }
                };

                for data in decoder.push(&chunk) {
                    match parse_sse_data(&data) {
                        Ok(SseData::Done) => {
                            finished = true;
                            break 'read;
                        }
                        Ok(SseData::Delta(Some(text))) => yield Ok(text),
                        Ok(SseData::Delta(None)) => {}
                        Err(e) => {
                            yield Err(e);
                            finished = true;
                            break 'read;
                        }
                    }
                }
            }

            if !finished {
                warn!("Chat stream closed before [DONE]");
                yield Err(ProviderError::Protocol(
                    "stream closed before completion marker".to_string(),
                ));
            }
        };

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl TranscriptionProvider for GroqClient {
    fn name(&self) -> &str {
        "groq"
    }

    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript, ProviderError> {
        let file_part = Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)?;

        let mut form = Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "json")
            .part("file", file_part);

        if let Some(prompt) = &self.transcription_prompt {
            form = form.text("prompt", prompt.clone());
        }

        debug!(
            model = %self.transcription_model,
            bytes = audio.len(),
            "Uploading audio for transcription"
        );

        let response = self
            .client
            .post(self.api_url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let result: TranscriptionResponse = response.json().await?;

        Ok(Transcript {
            text: result.text.trim().to_string(),
            language: result.language,
            duration_seconds: result.duration,
        })
    }
}

/// Splits a server-sent event byte stream into `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network chunks decode correctly.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns the payloads of all complete `data:` lines
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }

        payloads
    }
}

#[derive(Debug, PartialEq)]
enum SseData {
    /// Text delta (None for role-only or empty deltas)
    Delta(Option<String>),
    /// The `[DONE]` marker
    Done,
}

fn parse_sse_data(data: &str) -> Result<SseData, ProviderError> {
    if data == "[DONE]" {
        return Ok(SseData::Done);
    }

    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Protocol(format!("invalid stream chunk: {}", e)))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::Protocol(message));
    }

    let chunk: ChatChunk = serde_json::from_value(value)
        .map_err(|e| ProviderError::Protocol(format!("unexpected stream chunk: {}", e)))?;

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty());

    Ok(SseData::Delta(content))
}

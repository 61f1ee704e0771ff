//! Scripted in-process providers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tasksync::adapters::{
    AudioInput, ChatMessage, ChatProvider, ChunkStream, ProviderError, Transcript,
    TranscriptionProvider,
};
use tasksync::core::{MemoryTaskStore, Orchestrator, SafetyLimits};

/// One scripted provider reply
pub enum Reply {
    /// Stream these chunks, then end normally
    Chunks(Vec<String>),

    /// Stream these chunks, then fail
    ChunksThenError(Vec<String>, String),

    /// Stream these chunks, then never produce another item
    ChunksThenHang(Vec<String>),

    /// Refuse to start the stream
    Refuse(String),

    /// Take this long before starting the stream
    Stall(Duration),

    /// Stream these chunks, reporting pulls and drop to the tracker
    Tracked(Vec<String>, Arc<Upstream>),
}

/// What the consumer did with a tracked reply stream
#[derive(Default)]
pub struct Upstream {
    pulled: AtomicUsize,
    dropped: AtomicBool,
}

impl Upstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Chunks handed out so far
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Whether the reply stream has been dropped
    pub fn dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Marks the upstream dropped together with the stream that owns it
struct DropFlag(Arc<Upstream>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.dropped.store(true, Ordering::SeqCst);
    }
}

impl Reply {
    /// A complete reply delivered as a single chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self::Chunks(vec![text.into()])
    }

    /// A complete reply split into chunks of at most `size` chars
    pub fn chunked(text: &str, size: usize) -> Self {
        let chars: Vec<char> = text.chars().collect();
        Self::Chunks(chars.chunks(size).map(|c| c.iter().collect()).collect())
    }
}

/// Chat provider that plays back scripted replies in order
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    /// Number of `stream_chat` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages of the nth call
    pub fn request(&self, n: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[n].clone()
    }
}

fn ok_chunks(chunks: Vec<String>) -> impl futures::Stream<Item = Result<String, ProviderError>> {
    stream::iter(chunks.into_iter().map(Ok))
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages);

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Err(ProviderError::Protocol("no scripted reply left".to_string())),
            Some(Reply::Chunks(chunks)) => Ok(Box::pin(ok_chunks(chunks))),
            Some(Reply::ChunksThenError(chunks, message)) => {
                let tail = stream::once(async move { Err(ProviderError::Protocol(message)) });
                Ok(Box::pin(futures::StreamExt::chain(ok_chunks(chunks), tail)))
            }
            Some(Reply::ChunksThenHang(chunks)) => Ok(Box::pin(futures::StreamExt::chain(
                ok_chunks(chunks),
                stream::pending(),
            ))),
            Some(Reply::Refuse(message)) => Err(ProviderError::Status {
                status: 503,
                body: message,
            }),
            Some(Reply::Tracked(chunks, upstream)) => {
                let flag = DropFlag(upstream);
                let counted = futures::StreamExt::map(stream::iter(chunks), move |chunk| {
                    flag.0.pulled.fetch_add(1, Ordering::SeqCst);
                    Ok(chunk)
                });
                Ok(Box::pin(counted))
            }
            Some(Reply::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Box::pin(ok_chunks(Vec::new())))
            }
        }
    }
}

/// Transcription provider returning fixed text
pub struct FixedTranscript(pub &'static str);

#[async_trait]
impl TranscriptionProvider for FixedTranscript {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn transcribe(&self, _audio: &AudioInput) -> Result<Transcript, ProviderError> {
        Ok(Transcript::new(self.0))
    }
}

/// Orchestrator over a scripted chat provider and an in-memory store
pub fn orchestrator(
    chat: &Arc<ScriptedChat>,
    store: &Arc<MemoryTaskStore>,
    limits: SafetyLimits,
) -> Orchestrator {
    Orchestrator::new(chat.clone(), store.clone(), limits)
}

/// An extraction reply holding one task per description
pub fn tasks_json(descriptions: &[&str]) -> String {
    let tasks: Vec<serde_json::Value> = descriptions
        .iter()
        .map(|d| serde_json::json!({ "description": d, "status": "Incomplete" }))
        .collect();
    serde_json::json!({ "tasks": tasks }).to_string()
}

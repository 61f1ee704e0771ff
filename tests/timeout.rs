//! Timeout Integration Tests
//!
//! Every provider call is bounded; a slow provider surfaces as a
//! ProviderTimeout instead of a hang.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tasksync::adapters::{
    ExtractionError, Extractor, SummarizationError, Summarizer, Transcriber, TranscriptionError,
};
use tasksync::adapters::{AudioInput, ProviderError, Transcript, TranscriptionProvider};
use tasksync::core::{MemoryTaskStore, PipelineError, SafetyLimits};
use tasksync::domain::{Task, TaskList};

use common::{orchestrator, tasks_json, Reply, ScriptedChat};

fn one_task() -> TaskList {
    TaskList::new(vec![Task::new("Buy milk", chrono::Utc::now())])
}

#[tokio::test]
async fn test_extraction_stall_times_out() {
    let chat = ScriptedChat::new(vec![Reply::Stall(Duration::from_secs(30))]);
    let extractor = Extractor::new(chat.clone(), Duration::from_millis(50));

    let started = Instant::now();
    let err = extractor.extract("buy milk").await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        ExtractionError::Timeout(timeout) => {
            assert_eq!(timeout.operation, "extraction");
            assert_eq!(timeout.after, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_extraction_stream_hang_times_out() {
    let chat = ScriptedChat::new(vec![Reply::ChunksThenHang(vec!["{\"tasks\":".to_string()])]);
    let extractor = Extractor::new(chat.clone(), Duration::from_millis(50));

    let err = extractor.extract("buy milk").await.unwrap_err();
    assert_eq!(err.reason(), "provider-timeout");
}

#[tokio::test]
async fn test_summary_keeps_chunks_then_times_out() {
    let chat = ScriptedChat::new(vec![Reply::ChunksThenHang(vec![
        "Added ".to_string(),
        "Buy milk".to_string(),
    ])]);
    let summarizer = Summarizer::new(chat.clone(), Duration::from_millis(50));

    let items: Vec<_> = summarizer.summarize(&one_task()).collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_deref().ok(), Some("Added "));
    assert_eq!(items[1].as_deref().ok(), Some("Buy milk"));
    assert!(matches!(items[2], Err(SummarizationError::Timeout(_))));
}

#[tokio::test]
async fn test_summary_is_lazy() {
    let chat = ScriptedChat::new(vec![Reply::text("Added.")]);
    let summarizer = Summarizer::new(chat.clone(), Duration::from_secs(1));

    let stream = summarizer.summarize(&one_task());
    assert_eq!(chat.calls(), 0);

    drop(stream);
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn test_summary_skips_empty_chunks() {
    let chat = ScriptedChat::new(vec![Reply::Chunks(vec![
        String::new(),
        "Added.".to_string(),
        String::new(),
    ])]);
    let summarizer = Summarizer::new(chat.clone(), Duration::from_secs(1));

    let items: Vec<_> = summarizer.summarize(&one_task()).collect().await;
    assert_eq!(items, vec![Ok("Added.".to_string())]);
}

struct SlowTranscription;

#[async_trait::async_trait]
impl TranscriptionProvider for SlowTranscription {
    fn name(&self) -> &str {
        "slow"
    }

    async fn transcribe(&self, _audio: &AudioInput) -> Result<Transcript, ProviderError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Transcript::new("too late"))
    }
}

#[tokio::test]
async fn test_transcription_times_out() {
    let transcriber = Transcriber::new(Arc::new(SlowTranscription), Duration::from_millis(50));
    let err = transcriber
        .transcribe(&AudioInput::new(b"audio".to_vec(), "memo.m4a"))
        .await
        .unwrap_err();

    assert!(matches!(err, TranscriptionError::Timeout(_)));
    assert_eq!(err.reason(), "provider-timeout");
}

#[tokio::test]
async fn test_pipeline_uses_configured_timeout() {
    let chat = ScriptedChat::new(vec![Reply::Stall(Duration::from_secs(30))]);
    let store = Arc::new(MemoryTaskStore::new());
    let limits = SafetyLimits {
        provider_timeout_seconds: 1,
        ..Default::default()
    };
    let orchestrator = orchestrator(&chat, &store, limits);

    let err = orchestrator.submit_task("alice", "buy milk").await.err().unwrap();

    assert!(matches!(err, PipelineError::Extraction { .. }));
    assert_eq!(err.reason(), "provider-timeout");
    assert_eq!(store.append_calls(), 0);
}

#[tokio::test]
async fn test_pipeline_summary_timeout_still_delivers() {
    let chat = ScriptedChat::new(vec![
        Reply::text(tasks_json(&["Buy milk"])),
        Reply::ChunksThenHang(vec!["Added ".to_string()]),
    ]);
    let store = Arc::new(MemoryTaskStore::new());
    let limits = SafetyLimits {
        provider_timeout_seconds: 1,
        ..Default::default()
    };
    let orchestrator = orchestrator(&chat, &store, limits);

    let delivery = orchestrator.submit_task("alice", "buy milk").await.unwrap().collect().await;

    assert_eq!(delivery.text, "Added ");
    assert_eq!(
        delivery.interruption.as_ref().map(|e| e.reason()),
        Some("provider-timeout")
    );
    assert_eq!(delivery.tasks.len(), 1);
}

//! Bounded audio-to-text conversion.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::{AudioInput, ProviderError, ProviderTimeout, Transcript, TranscriptionProvider};

/// Errors from a single transcription call
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("audio upload is empty")]
    EmptyAudio,

    #[error("transcription produced no text")]
    EmptyTranscript,

    #[error("transcription provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Timeout(#[from] ProviderTimeout),
}

impl TranscriptionError {
    /// Stable machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyAudio => "empty-audio",
            Self::EmptyTranscript => "empty-transcript",
            Self::Provider(_) => "provider-error",
            Self::Timeout(_) => "provider-timeout",
        }
    }
}

/// Wraps a transcription provider with a time bound and output checks
pub struct Transcriber {
    provider: Arc<dyn TranscriptionProvider>,
    timeout: Duration,
}

impl Transcriber {
    pub fn new(provider: Arc<dyn TranscriptionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Transcribe `audio` into text. Blank transcripts are an error.
    #[instrument(skip_all, fields(provider = self.provider.name(), audio_bytes = audio.len()))]
    pub async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript, TranscriptionError> {
        if audio.is_empty() {
            return Err(TranscriptionError::EmptyAudio);
        }

        let mut transcript = match timeout(self.timeout, self.provider.transcribe(audio)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Transcription timed out");
                return Err(ProviderTimeout::new("transcription", self.timeout).into());
            }
        };

        transcript.text = transcript.text.trim().to_string();
        if transcript.text.is_empty() {
            return Err(TranscriptionError::EmptyTranscript);
        }

        info!(
            chars = transcript.text.len(),
            language = transcript.language.as_deref().unwrap_or("unknown"),
            "Audio transcribed"
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed(&'static str);

    #[async_trait]
    impl TranscriptionProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn transcribe(&self, _audio: &AudioInput) -> Result<Transcript, ProviderError> {
            Ok(Transcript::new(self.0))
        }
    }

    struct Slow;

    #[async_trait]
    impl TranscriptionProvider for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn transcribe(&self, _audio: &AudioInput) -> Result<Transcript, ProviderError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Transcript::new("too late"))
        }
    }

    fn audio() -> AudioInput {
        AudioInput::new(b"fake audio".to_vec(), "memo.m4a")
    }

    #[tokio::test]
    async fn test_transcript_is_trimmed() {
        let transcriber = Transcriber::new(Arc::new(Fixed("  buy milk  ")), Duration::from_secs(1));
        let transcript = transcriber.transcribe(&audio()).await.unwrap();
        assert_eq!(transcript.text, "buy milk");
    }

    #[tokio::test]
    async fn test_blank_transcript_rejected() {
        let transcriber = Transcriber::new(Arc::new(Fixed("   ")), Duration::from_secs(1));
        let err = transcriber.transcribe(&audio()).await.unwrap_err();
        assert_eq!(err.reason(), "empty-transcript");
    }

    #[tokio::test]
    async fn test_empty_audio_rejected_before_provider() {
        let transcriber = Transcriber::new(Arc::new(Slow), Duration::from_secs(1));
        let err = transcriber
            .transcribe(&AudioInput::new(Vec::new(), "memo.m4a"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "empty-audio");
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let transcriber = Transcriber::new(Arc::new(Slow), Duration::from_millis(50));
        let err = transcriber.transcribe(&audio()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Timeout(_)));
    }
}

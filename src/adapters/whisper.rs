//! Local Whisper transcription backend.
//!
//! Shells out to a local whisper binary. The upload is written to a temp
//! dir, transcribed, and the JSON output read back.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{AudioInput, ProviderError, Transcript, TranscriptionProvider};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Transcription through the `whisper` CLI
#[derive(Debug, Clone)]
pub struct WhisperCli {
    binary_path: String,
    model: String,
    language: String,
}

impl WhisperCli {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: "en".to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl TranscriptionProvider for WhisperCli {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript, ProviderError> {
        let temp_dir = tempfile::tempdir()?;

        // Keep the original extension so whisper can detect the format
        let file_name = Path::new(&audio.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.audio".to_string());
        let audio_path = temp_dir.path().join(&file_name);
        tokio::fs::write(&audio_path, &audio.bytes).await?;

        debug!(binary = %self.binary_path, model = %self.model, "Running whisper");

        let output = Command::new(&self.binary_path)
            .arg(&audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg(&self.language)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Process(format!(
                "whisper exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));
        let json_content = tokio::fs::read_to_string(&json_path).await?;

        parse_whisper_output(&json_content, &self.language)
    }
}

fn parse_whisper_output(json: &str, default_language: &str) -> Result<Transcript, ProviderError> {
    let whisper: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| ProviderError::Protocol(format!("invalid whisper JSON: {}", e)))?;

    let duration = whisper.segments.last().map(|s| s.end);

    Ok(Transcript {
        text: whisper.text.trim().to_string(),
        language: Some(if whisper.language.is_empty() {
            default_language.to_string()
        } else {
            whisper.language
        }),
        duration_seconds: duration,
    })
}

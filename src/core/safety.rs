//! Safety limits for pipeline execution.
//!
//! Bounds the work a single submission can cause:
//! - Text and audio input sizes
//! - Tasks accepted from one extraction
//! - Time spent waiting on any external provider

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safety limits for a sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Timeout for each provider call, in seconds (default: 60)
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,

    /// Maximum text input size in bytes (default: 64KB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum audio upload size in bytes (default: 25MB)
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: u64,

    /// Maximum tasks accepted from one extraction (default: 100)
    #[serde(default = "default_max_tasks")]
    pub max_tasks_per_batch: usize,
}

fn default_provider_timeout() -> u64 {
    60
}
fn default_max_input_bytes() -> u64 {
    64 * 1024
} // 64KB
fn default_max_audio_bytes() -> u64 {
    25 * 1024 * 1024
} // 25MB, the hosted transcription upload cap
fn default_max_tasks() -> usize {
    100
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            provider_timeout_seconds: default_provider_timeout(),
            max_input_bytes: default_max_input_bytes(),
            max_audio_bytes: default_max_audio_bytes(),
            max_tasks_per_batch: default_max_tasks(),
        }
    }
}

impl SafetyLimits {
    /// Timeout applied to each provider call
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    /// Validate text input against the size limit
    pub fn validate_input(&self, input: &str) -> Result<(), SafetyViolation> {
        let size = input.len() as u64;
        if size > self.max_input_bytes {
            return Err(SafetyViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Validate an audio upload against the size limit
    pub fn validate_audio(&self, audio: &[u8]) -> Result<(), SafetyViolation> {
        let size = audio.len() as u64;
        if size > self.max_audio_bytes {
            return Err(SafetyViolation::MaxAudioBytes {
                actual: size,
                limit: self.max_audio_bytes,
            });
        }
        Ok(())
    }
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum audio bytes exceeded: {actual} > {limit}")]
    MaxAudioBytes { actual: u64, limit: u64 },
}

//! Configuration for tasksync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TASKSYNC_HOME, GROQ_API_KEY, TASKSYNC_API_BASE,
//!    TASKSYNC_CHAT_MODEL, TASKSYNC_TRANSCRIPTION_BACKEND, WHISPER_PATH)
//! 2. Config file (.tasksync/config.yaml)
//! 3. Defaults (~/.tasksync)
//!
//! Config file discovery:
//! - Searches current directory and parents for .tasksync/config.yaml
//! - `paths.home` is relative to the .tasksync/ directory

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::groq::DEFAULT_API_BASE;
use crate::core::safety::SafetyLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Name of the config directory searched for upward from the cwd
pub const CONFIG_DIR: &str = ".tasksync";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub safety: Option<SafetyLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the .tasksync/ directory)
    pub home: Option<String>,
}

/// Provider section of the config file; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    pub api_base: Option<String>,
    pub chat_model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    pub transcription_model: Option<String>,
    pub transcription_prompt: Option<String>,
    pub transcription_backend: Option<TranscriptionBackend>,
    pub whisper_path: Option<String>,
    pub whisper_model: Option<String>,
    pub language: Option<String>,
}

/// Which service turns audio into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionBackend {
    /// Hosted transcription on the chat provider's API
    #[default]
    Groq,
    /// Local whisper binary
    Whisper,
    /// Audio submissions are refused
    None,
}

impl TranscriptionBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "whisper" => Some(Self::Whisper),
            "none" | "off" => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for TranscriptionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Groq => f.write_str("groq"),
            Self::Whisper => f.write_str("whisper"),
            Self::None => f.write_str("none"),
        }
    }
}

/// Resolved provider settings
#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    /// API key; never logged or printed
    pub api_key: Option<String>,
    pub api_base: String,
    pub chat_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
    pub transcription_model: String,
    pub transcription_prompt: Option<String>,
    pub transcription_backend: TranscriptionBackend,
    pub whisper_path: String,
    pub whisper_model: String,
    pub language: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            chat_model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.5,
            top_p: 1.0,
            max_completion_tokens: 1024,
            transcription_model: "distil-whisper-large-v3-en".to_string(),
            transcription_prompt: None,
            transcription_backend: TranscriptionBackend::Groq,
            whisper_path: "whisper".to_string(),
            whisper_model: "base".to_string(),
            language: "en".to_string(),
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("chat_model", &self.chat_model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_completion_tokens", &self.max_completion_tokens)
            .field("transcription_model", &self.transcription_model)
            .field("transcription_backend", &self.transcription_backend)
            .field("whisper_path", &self.whisper_path)
            .field("whisper_model", &self.whisper_model)
            .field("language", &self.language)
            .finish()
    }
}

impl ProviderSettings {
    /// Overlay values set in the config file
    fn merge_file(&mut self, file: &ProviderConfig) {
        if let Some(v) = &file.api_base {
            self.api_base = v.clone();
        }
        if let Some(v) = &file.chat_model {
            self.chat_model = v.clone();
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if let Some(v) = file.top_p {
            self.top_p = v;
        }
        if let Some(v) = file.max_completion_tokens {
            self.max_completion_tokens = v;
        }
        if let Some(v) = &file.transcription_model {
            self.transcription_model = v.clone();
        }
        if file.transcription_prompt.is_some() {
            self.transcription_prompt = file.transcription_prompt.clone();
        }
        if let Some(v) = file.transcription_backend {
            self.transcription_backend = v;
        }
        if let Some(v) = &file.whisper_path {
            self.whisper_path = v.clone();
        }
        if let Some(v) = &file.whisper_model {
            self.whisper_model = v.clone();
        }
        if let Some(v) = &file.language {
            self.language = v.clone();
        }
    }

    /// Overlay environment variables read through `var`
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = var("GROQ_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(base) = var("TASKSYNC_API_BASE") {
            self.api_base = base;
        }
        if let Some(model) = var("TASKSYNC_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Some(backend) = var("TASKSYNC_TRANSCRIPTION_BACKEND") {
            self.transcription_backend = TranscriptionBackend::parse(&backend).with_context(|| {
                format!("Unknown TASKSYNC_TRANSCRIPTION_BACKEND: {}", backend)
            })?;
        }
        if let Some(path) = var("WHISPER_PATH") {
            self.whisper_path = path;
        }
        Ok(())
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the state directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub provider: ProviderSettings,
    pub safety: SafetyLimits,
}

impl ResolvedConfig {
    /// Directory holding one subdirectory per user
    pub fn users_dir(&self) -> PathBuf {
        self.home.join("users")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Combine a parsed config file (if any) with the environment
fn resolve(
    config_file: Option<PathBuf>,
    file: ConfigFile,
    default_home: PathBuf,
    var: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let home = if let Some(env_home) = var("TASKSYNC_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(config_path)) = (&file.paths.home, &config_file) {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let mut provider = ProviderSettings::default();
    provider.merge_file(&file.provider);
    provider.apply_env(&var)?;

    Ok(ResolvedConfig {
        home,
        config_file,
        provider,
        safety: file.safety.unwrap_or_default(),
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve(config_file, file, default_home, env_var)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the tasksync home directory
pub fn tasksync_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the users directory ($TASKSYNC_HOME/users)
pub fn users_dir() -> Result<PathBuf> {
    Ok(config()?.users_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, ConfigFile::default(), PathBuf::from("/h/.tasksync"), env(&[]))
            .unwrap();

        assert_eq!(config.home, PathBuf::from("/h/.tasksync"));
        assert_eq!(config.users_dir(), PathBuf::from("/h/.tasksync/users"));
        assert!(config.config_file.is_none());
        assert_eq!(config.provider, ProviderSettings::default());
        assert_eq!(config.safety, SafetyLimits::default());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
provider:
  chat_model: llama-3.1-8b-instant
  temperature: 0.2
  transcription_backend: whisper
  whisper_model: small
safety:
  provider_timeout_seconds: 15
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0"));

        let config = resolve(
            Some(config_path),
            parsed,
            PathBuf::from("/unused"),
            env(&[]),
        )
        .unwrap();

        assert_eq!(config.home, config_dir.join("state"));
        assert_eq!(config.provider.chat_model, "llama-3.1-8b-instant");
        assert_eq!(config.provider.temperature, 0.2);
        assert_eq!(config.provider.transcription_backend, TranscriptionBackend::Whisper);
        assert_eq!(config.provider.whisper_model, "small");
        // Untouched keys keep their defaults
        assert_eq!(config.provider.max_completion_tokens, 1024);
        assert_eq!(config.safety.provider_timeout_seconds, 15);
        assert_eq!(config.safety.max_tasks_per_batch, 100);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            "provider:\n  chat_model: from-file\n  transcription_backend: groq\n",
        )
        .unwrap();

        let config = resolve(
            None,
            file,
            PathBuf::from("/unused"),
            env(&[
                ("TASKSYNC_HOME", "/srv/tasks"),
                ("GROQ_API_KEY", "gsk_test"),
                ("TASKSYNC_CHAT_MODEL", "from-env"),
                ("TASKSYNC_TRANSCRIPTION_BACKEND", "none"),
            ]),
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/tasks"));
        assert_eq!(config.provider.api_key.as_deref(), Some("gsk_test"));
        assert_eq!(config.provider.chat_model, "from-env");
        assert_eq!(config.provider.transcription_backend, TranscriptionBackend::None);
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        let result = resolve(
            None,
            ConfigFile::default(),
            PathBuf::from("/unused"),
            env(&[("TASKSYNC_TRANSCRIPTION_BACKEND", "carrier-pigeon")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let settings = ProviderSettings {
            api_key: Some("gsk_secret".to_string()),
            ..ProviderSettings::default()
        };
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("gsk_secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}

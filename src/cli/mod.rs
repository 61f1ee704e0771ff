//! Command-line interface for tasksync.
//!
//! Provides commands for submitting text or audio, completing tasks,
//! listing a user's tasks, and showing the resolved configuration.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::adapters::AudioInput;
use crate::config;
use crate::core::{JsonlTaskStore, Orchestrator, PipelineError, SyncReply, TaskStore};
use crate::domain::{TaskId, TaskStatus};

/// tasksync - Turn spoken or typed notes into a stored task list
#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract tasks from text, store them, and stream a confirmation
    Submit {
        /// Owner of the tasks
        #[arg(short, long, env = "TASKSYNC_USER")]
        user: String,

        /// Task description (reads --input or stdin if omitted)
        text: Option<String>,

        /// Input file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Also write the extracted tasks to this file as JSON
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Transcribe an audio file, then submit the transcript
    Audio {
        #[arg(short, long, env = "TASKSYNC_USER")]
        user: String,

        /// Audio file (m4a, mp3, wav, ...)
        file: PathBuf,

        /// Also write the extracted tasks to this file as JSON
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Mark a task as complete
    Complete {
        #[arg(short, long, env = "TASKSYNC_USER")]
        user: String,

        /// Task ID (from `list`)
        task_id: String,
    },

    /// Print a user's tasks as JSON
    List {
        #[arg(short, long, env = "TASKSYNC_USER")]
        user: String,

        /// Incomplete tasks first, then by due date
        #[arg(long)]
        sorted: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                user,
                text,
                input,
                save,
            } => submit(&user, text, input, save).await,
            Commands::Audio { user, file, save } => submit_audio(&user, &file, save).await,
            Commands::Complete { user, task_id } => complete(&user, &task_id).await,
            Commands::List { user, sorted } => list(&user, sorted).await,
            Commands::Config => show_config(),
        }
    }
}

/// Read input text from the argument, a file, or piped stdin
fn read_input(text: Option<String>, input_file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }

    if let Some(path) = input_file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }

    if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok(buffer);
    }

    anyhow::bail!("No input provided. Pass TEXT, use --input <file>, or pipe to stdin")
}

async fn submit(
    user: &str,
    text: Option<String>,
    input_file: Option<PathBuf>,
    save: Option<PathBuf>,
) -> Result<()> {
    let text = read_input(text, input_file)?;
    let orchestrator = Orchestrator::from_config(config::config()?)?;

    match orchestrator.submit_task(user, &text).await {
        Ok(reply) => deliver(reply, save.as_deref()).await,
        Err(e) => exit_with_payload(&e),
    }
}

async fn submit_audio(user: &str, file: &Path, save: Option<PathBuf>) -> Result<()> {
    let audio = AudioInput::from_path(file)
        .await
        .with_context(|| format!("Failed to read audio file: {}", file.display()))?;
    let orchestrator = Orchestrator::from_config(config::config()?)?;

    eprintln!("Transcribing {} ({} bytes)...", audio.file_name, audio.len());

    match orchestrator.submit_audio(user, audio).await {
        Ok(reply) => deliver(reply, save.as_deref()).await,
        Err(e) => exit_with_payload(&e),
    }
}

/// Stream the confirmation to stdout as it arrives
async fn deliver(mut reply: SyncReply, save: Option<&Path>) -> Result<()> {
    if let Some(path) = save {
        let json = serde_json::to_string_pretty(reply.tasks())?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write tasks file: {}", path.display()))?;
    }

    let mut stdout = tokio::io::stdout();
    let mut interruption = None;

    while let Some(item) = reply.next().await {
        match item {
            Ok(chunk) => {
                stdout.write_all(chunk.as_bytes()).await?;
                stdout.flush().await?;
            }
            Err(e) => interruption = Some(e),
        }
    }
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    let run = reply.run();
    eprintln!(
        "\n[Run {} {}: {} tasks stored]",
        run.id,
        run.state.name(),
        reply.tasks().len()
    );
    if let Some(e) = interruption {
        eprintln!("[Confirmation ended early: {}]", e);
    }

    Ok(())
}

/// Print the typed error payload and exit non-zero
fn exit_with_payload(err: &PipelineError) -> ! {
    error!(kind = err.kind(), reason = err.reason(), "Submission failed");
    let payload = err.to_payload();
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
    );
    std::process::exit(1);
}

async fn complete(user: &str, task_id: &str) -> Result<()> {
    let store = JsonlTaskStore::open_default()?;
    let task_id = TaskId::from(task_id);

    let success = store
        .set_status(user, &task_id, TaskStatus::Complete)
        .await
        .with_context(|| format!("Failed to update task {}", task_id))?;

    println!("{}", json!({ "success": success }));
    Ok(())
}

async fn list(user: &str, sorted: bool) -> Result<()> {
    let store = JsonlTaskStore::open_default()?;
    let mut tasks = store
        .read_all(user)
        .await
        .with_context(|| format!("Failed to read tasks for {}", user))?;

    if sorted {
        tasks.sort_for_display();
    }

    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let provider = &cfg.provider;

    println!("tasksync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Users: {}", cfg.users_dir().display());
    println!();
    println!("Provider:");
    println!("  API base:      {}", provider.api_base);
    println!(
        "  API key:       {}",
        if provider.api_key.is_some() { "set" } else { "not set (GROQ_API_KEY)" }
    );
    println!("  Chat model:    {}", provider.chat_model);
    println!("  Temperature:   {}", provider.temperature);
    println!("  Max tokens:    {}", provider.max_completion_tokens);
    println!("  Transcription: {}", provider.transcription_backend);
    println!("  Whisper:       {} ({})", provider.whisper_path, provider.whisper_model);
    println!();
    println!("Safety limits:");
    println!("  Provider timeout: {}s", cfg.safety.provider_timeout_seconds);
    println!("  Max input size:   {} bytes", cfg.safety.max_input_bytes);
    println!("  Max audio size:   {} bytes", cfg.safety.max_audio_bytes);
    println!("  Max tasks/batch:  {}", cfg.safety.max_tasks_per_batch);

    Ok(())
}

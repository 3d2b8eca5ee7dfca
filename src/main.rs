//! FilePilot - headless front end for the file manager core

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use filepilot::{
    config::ConfigManager,
    events::{AppEvent, EventKind},
    filesystem::FileMetadata,
    utils::errors::PilotError,
    ApiKeyResolver, Config, Result, Services,
};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// FilePilot: an AI-assisted file manager
#[derive(Parser)]
#[command(name = "filepilot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// List a directory
    Ls {
        path: PathBuf,
        /// Include hidden entries
        #[arg(short, long)]
        all: bool,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show metadata for one path
    Stat {
        path: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print a file
    Cat {
        path: PathBuf,
        /// Stream raw bytes instead of decoding text
        #[arg(short, long)]
        binary: bool,
    },
    /// Write text to a file
    Write {
        path: PathBuf,
        content: String,
        /// Fail instead of creating missing parent directories
        #[arg(long)]
        no_parents: bool,
    },
    /// Delete a file
    Rm { path: PathBuf },
    /// Print file changes under one or more directories until interrupted
    Watch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Stop after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Send a command to the assistant and stream the answer
    Ask {
        prompt: String,
        /// Workspace directory to describe to the assistant
        #[arg(short, long)]
        workspace: Option<PathBuf>,
        /// Files to mark as selected
        #[arg(short, long)]
        select: Vec<PathBuf>,
    },
    /// Check configuration status
    Status,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = match &cli.config {
        Some(path) => ConfigManager::from_path(path)?,
        None => ConfigManager::new()?,
    };

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config_manager.config().logging.level.clone());
    init_logging(&log_level)?;

    info!("Starting {} v{}", filepilot::APP_NAME, filepilot::VERSION);

    if let Commands::Status = cli.command {
        return show_status(&config_manager);
    }

    let services = Services::new(config_manager.config())?;
    let result = match cli.command {
        Commands::Ls { path, all, format } => list_directory(&services, path, all, format).await,
        Commands::Stat { path, format } => show_metadata(&services, path, format).await,
        Commands::Cat { path, binary } => print_file(&services, path, binary).await,
        Commands::Write {
            path,
            content,
            no_parents,
        } => write_file(&services, path, content, no_parents).await,
        Commands::Rm { path } => remove_file(&services, path).await,
        Commands::Watch { paths, timeout } => watch(&services, paths, timeout).await,
        Commands::Ask {
            prompt,
            workspace,
            select,
        } => ask(&services, prompt, workspace, select).await,
        Commands::Status => Ok(()),
    };

    services.shutdown().await;
    result
}

/// Initialize logging. Output goes to stderr so stdout carries only command output.
fn init_logging(log_level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(log_level).map_err(|e| PilotError::unknown(format!("Invalid log level: {}", e)))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PilotError::unknown(format!("Failed to set logger: {}", e)))?;

    Ok(())
}

async fn list_directory(services: &Services, path: PathBuf, all: bool, format: OutputFormat) -> Result<()> {
    let mut entries = services.files().list_directory(&path, all).await?;
    let mut listed = Vec::new();

    // Iteration errors were already published; report the first one after printing what we have
    let mut failure = None;
    while let Some(entry) = entries.next().await {
        match entry {
            Ok(metadata) => listed.push(metadata),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    listed.sort_by(|a, b| a.path.cmp(&b.path));
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listed)?),
        OutputFormat::Text => {
            for metadata in &listed {
                println!("{}", format_entry(metadata));
            }
        }
    }

    failure.map_or(Ok(()), Err)
}

fn format_entry(metadata: &FileMetadata) -> String {
    let name = metadata
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| metadata.path.display().to_string());

    let name = if metadata.is_dir {
        format!("{}/", name).blue().bold().to_string()
    } else if metadata.is_hidden {
        name.dimmed().to_string()
    } else {
        name
    };

    format!(
        "{:>10}  {}  {:<24}  {}",
        metadata.size,
        metadata.modified_time.format("%Y-%m-%d %H:%M"),
        metadata.mime_type,
        name
    )
}

async fn show_metadata(services: &Services, path: PathBuf, format: OutputFormat) -> Result<()> {
    let metadata = services.files().get_metadata(&path).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&metadata)?),
        OutputFormat::Text => {
            println!("Path:      {}", metadata.path.display());
            println!("Kind:      {}", if metadata.is_dir { "directory" } else { "file" });
            println!("Size:      {} bytes", metadata.size);
            println!("Modified:  {}", metadata.modified_time.to_rfc3339());
            println!("MIME type: {}", metadata.mime_type);
            println!("Hidden:    {}", if metadata.is_hidden { "yes" } else { "no" });
        }
    }
    Ok(())
}

async fn print_file(services: &Services, path: PathBuf, binary: bool) -> Result<()> {
    if !binary {
        let content = services.files().read_text(&path).await?;
        print!("{}", content);
        return Ok(());
    }

    let mut chunks = services.files().read_binary(&path).await?;
    let mut stdout = std::io::stdout().lock();
    let mut total = 0usize;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        total += chunk.len();
        stdout.write_all(&chunk)?;
    }
    stdout.flush()?;
    debug!("Streamed {} bytes from {}", total, path.display());
    Ok(())
}

async fn write_file(services: &Services, path: PathBuf, content: String, no_parents: bool) -> Result<()> {
    services.files().write_text(&path, &content, !no_parents).await?;
    println!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

async fn remove_file(services: &Services, path: PathBuf) -> Result<()> {
    services.files().delete_file(&path).await?;
    println!("Deleted {}", path.display());
    Ok(())
}

async fn watch(services: &Services, paths: Vec<PathBuf>, timeout: Option<u64>) -> Result<()> {
    // Subscribe before any watch is registered so no early event is missed
    let mut events = services.bus().subscribe_all();

    services.watcher().initialize()?;
    for path in &paths {
        services.watcher().start_monitoring(path).await?;
    }

    for root in services.watcher().watched_roots() {
        println!("{} {}", "Watching".green().bold(), root.display());
    }

    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            received = events.recv() => match received {
                Ok(event) => print_change(&event),
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("{} missed {} events", "warning:".yellow().bold(), skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

fn print_change(event: &AppEvent) {
    let label = match event.kind() {
        EventKind::FileCreated => "created ".green(),
        EventKind::FileModified => "modified".yellow(),
        EventKind::FileDeleted => "deleted ".red(),
        EventKind::ErrorOccurred => {
            if let AppEvent::ErrorOccurred(message) = event {
                eprintln!("{} {}", "error:".red().bold(), message);
            }
            return;
        }
        _ => return,
    };

    if let Some(path) = event.path() {
        println!("{} {}", label, path.display());
    }
}

async fn ask(services: &Services, prompt: String, workspace: Option<PathBuf>, select: Vec<PathBuf>) -> Result<()> {
    let assistant = services.assistant()?;
    assistant.initialize().await?;

    if workspace.is_some() || !select.is_empty() {
        let selected = if select.is_empty() { None } else { Some(select) };
        assistant.update_context(workspace, selected).await;
    }

    let printer = services.bus().subscribe(EventKind::ResponseChunk, |event| {
        if let AppEvent::ResponseChunk(text) = event {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = assistant.process_command_with_cancel(&prompt, cancel).await;
    interrupt.abort();
    services.bus().unsubscribe(printer);

    let response = result?;
    println!();

    let metadata = response.metadata();
    let reported = metadata
        .reported_output_tokens
        .map(|tokens| format!(", {} reported by the provider", tokens))
        .unwrap_or_default();
    eprintln!(
        "{}",
        format!("{} · ~{} tokens{}", metadata.model, metadata.tokens_used, reported).dimmed()
    );
    Ok(())
}

fn show_status(config_manager: &ConfigManager) -> Result<()> {
    let config: &Config = config_manager.config();
    let provider = &config.provider;

    println!("{} v{}", filepilot::APP_NAME.bold(), filepilot::VERSION);
    println!("\nConfiguration: {}", config_manager.path().display());
    match config.validate() {
        Ok(()) => println!("   Status: {}", "valid".green()),
        Err(e) => println!("   Status: {} ({})", "invalid".red(), e),
    }

    let env_key = ApiKeyResolver::env_key_name(&provider.name);
    let key_source = if std::env::var(&env_key).map(|v| !v.trim().is_empty()).unwrap_or(false) {
        format!("environment ({})", env_key).green()
    } else if provider.api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false) {
        "config file".green()
    } else {
        format!("missing, set {}", env_key).red()
    };

    println!("\nAssistant:");
    println!("   Provider: {}", provider.name);
    println!("   Endpoint: {}", provider.base_url);
    println!("   Model: {}", provider.model);
    println!("   API key: {}", key_source);
    println!("   Rate limit: {} requests/minute", provider.requests_per_minute);

    println!("\nFiles:");
    println!("   Read chunk size: {} bytes", config.filesystem.chunk_size);
    println!("   Log level: {}", config.logging.level);

    Ok(())
}

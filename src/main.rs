//! # Chunk-dl CLI
//!
//! Command-line interface for the chunk-dl library.
//! Provides a curl-like interface for resumable, chunked downloads.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chunk_dl::{OverwriteBehavior, Progress, RetryPolicy, StoreBackend, TransferOptions, TransferReport};
use clap::{Parser, ValueEnum};
use log::{error, info};
use tokio::io::AsyncWriteExt;

mod cli;

/// Command-line interface for chunk-dl
#[derive(Parser)]
#[command(name = "chunk-dl")]
#[command(about = "Chunked, resumable HTTP downloader with durable chunk staging")]
#[command(long_about = "Downloads a resource in byte-range chunks, staging each chunk before
writing the reassembled bytes in order:
  chunk-dl https://host/disk.img              # Save as ./disk.img
  chunk-dl https://host/disk.img out.img      # Save as ./out.img
  chunk-dl https://host/disk.img -            # Stream to stdout

File Overwrite Behavior:
  By default, you'll be prompted if destination file exists
  --force                          # Overwrite without asking
  --no-clobber                     # Never overwrite, fail if file exists")]
#[command(version)]
struct Cli {
    /// HTTP(S) URL of a server that supports byte ranges
    url: String,

    /// Output file path, or "-" for stdout
    #[arg(default_value = "")]
    output: String,

    /// Bytes per chunk
    #[arg(long, default_value_t = chunk_dl::DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Maximum concurrent range requests (1 = sequential)
    #[arg(long, default_value_t = 1)]
    connections: usize,

    /// Chunk staging backend
    #[arg(long, value_enum, default_value_t = StoreKind::Keyed)]
    store: StoreKind,

    /// Parent directory for the per-transfer chunk databases or chunk directories
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Attempts per chunk before giving up
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Enable dry-run mode (show what would be downloaded without downloading)
    #[arg(long)]
    dry_run: bool,

    /// Print the transfer report as JSON on completion
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Force overwrite existing files without prompting
    #[arg(short, long)]
    force: bool,

    /// Never overwrite existing files (fail if destination exists)
    #[arg(long)]
    no_clobber: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Keyed,
    Directory,
}

/// Output destination types
#[derive(Debug)]
enum OutputDestination {
    File(String),
    Stdout,
}

/// Resolve output destination from CLI arguments
fn resolve_output(url: &str, output: &str) -> OutputDestination {
    if output == "-" {
        OutputDestination::Stdout
    } else if output.is_empty() {
        OutputDestination::File(chunk_dl::resolve_output_filename(url))
    } else {
        OutputDestination::File(output.to_string())
    }
}

fn store_backend(kind: StoreKind, path: Option<PathBuf>) -> StoreBackend {
    match (kind, path) {
        (StoreKind::Keyed, Some(path)) => StoreBackend::Keyed { path },
        (StoreKind::Keyed, None) => StoreBackend::default(),
        (StoreKind::Directory, Some(root)) => StoreBackend::Directory { root },
        (StoreKind::Directory, None) => StoreBackend::directory(),
    }
}

fn overwrite_behavior(force: bool, no_clobber: bool) -> OverwriteBehavior {
    if force {
        OverwriteBehavior::Force
    } else if no_clobber {
        OverwriteBehavior::NeverOverwrite
    } else {
        OverwriteBehavior::Prompt
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr; stdout may carry the payload
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("Chunk-dl v{} starting...", env!("CARGO_PKG_VERSION"));
    }

    if cli.force && cli.no_clobber {
        bail!("--force and --no-clobber cannot be used together");
    }
    if cli.chunk_size == 0 {
        bail!("--chunk-size must be positive");
    }
    if cli.retries == 0 {
        bail!("--retries must be at least 1");
    }

    let output = resolve_output(&cli.url, &cli.output);

    if cli.dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would download: {} to {output:?} in {} byte chunks, store: {:?}",
            cli.url, cli.chunk_size, cli.store
        );
        return Ok(());
    }

    let options = TransferOptions {
        chunk_size: cli.chunk_size,
        max_connections: cli.connections,
        retry: RetryPolicy {
            max_attempts: cli.retries,
            ..Default::default()
        },
        store: store_backend(cli.store, cli.store_path.clone()),
        overwrite: overwrite_behavior(cli.force, cli.no_clobber),
        ..Default::default()
    };

    let (report, payload_on_stdout) = match output {
        OutputDestination::File(file_path) => (download_to_file(&cli.url, &file_path, options).await?, false),
        OutputDestination::Stdout => (download_to_stdout(&cli.url, cli.verbose, options).await?, true),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize transfer report")?;
        if payload_on_stdout {
            eprintln!("{json}");
        } else {
            println!("{json}");
        }
    }

    Ok(())
}

/// Download to a file with progress bar
async fn download_to_file(url: &str, file_path: &str, mut options: TransferOptions) -> anyhow::Result<TransferReport> {
    eprintln!("📁 Saving to: {file_path}");

    let progress_manager = cli::ProgressManager::new(0, &format!("🌐 Downloading {url}"));
    options.progress = Some(Arc::new({
        let pb = progress_manager.pb.clone();
        move |progress: Progress| {
            if pb.length().unwrap_or(0) != progress.total_bytes {
                pb.set_length(progress.total_bytes);
            }
            pb.set_position(progress.bytes_transferred);
            pb.set_message(format!("parts {}/{}", progress.parts_completed, progress.parts_total));
        }
    }));

    let report = chunk_dl::get_with_options(url, Some(file_path), options)
        .await
        .with_context(|| format!("Failed to download {url}"))?;

    progress_manager.finish("✅ Download completed!");
    info!("Wrote {} bytes to {file_path}", report.bytes_written);
    Ok(report)
}

/// Download to stdout (no progress bar)
async fn download_to_stdout(url: &str, verbose: bool, options: TransferOptions) -> anyhow::Result<TransferReport> {
    if verbose {
        eprintln!("📡 Streaming to stdout");
    }

    let mut stream = chunk_dl::get_stream_with_options(url, options)
        .await
        .with_context(|| format!("Failed to start transfer of {url}"))?;
    let mut stdout = tokio::io::stdout();

    let copied = tokio::io::copy(&mut stream, &mut stdout)
        .await
        .context("Failed to write to stdout")?;

    let report = stream.finish().await.with_context(|| format!("Failed to download {url}"))?;
    if copied != report.total_bytes {
        bail!("stream ended after {copied} of {} bytes", report.total_bytes);
    }

    stdout.flush().await.context("Failed to flush stdout")?;

    Ok(report)
}

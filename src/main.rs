use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use thread_archiver::config::Config;
use thread_archiver::remote::preview_thread;
use thread_archiver::{
    detect, read_thread_info, Detected, LocalArchive, SyncReport, SyncTask, Synchronizer,
};

#[derive(Parser)]
#[command(name = "thread-archiver", version, about = "Archive a forum thread and keep it up to date")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report which archive format a directory holds
    Detect { dir: PathBuf },
    /// Show the thread an archive holds
    Info { dir: PathBuf },
    /// Archive a thread into an empty directory
    Create { dir: PathBuf, thread_id: i64 },
    /// Bring an existing archive up to date
    Update {
        dir: PathBuf,
        /// Thread to fetch; defaults to the one the archive holds
        #[arg(long)]
        thread_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Detect { dir } => {
            match detect(&dir).await {
                Detected::NotAnArchive => println!("{}: not an archive", dir.display()),
                Detected::Unsupported(version) => {
                    println!("{}: archive {version} (unsupported)", dir.display());
                }
                Detected::Supported(version) => println!("{}: archive {version}", dir.display()),
            }
            Ok(())
        }
        Command::Info { dir } => {
            let thread = read_thread_info(&dir)
                .await
                .with_context(|| format!("Failed to read {}", dir.display()))?;
            match thread {
                Some(thread) => println!(
                    "{} [{}] by {} in {}",
                    thread.title, thread.id, thread.author.display_name, thread.forum.name
                ),
                None => println!("{}: archive has not been synchronized yet", dir.display()),
            }
            Ok(())
        }
        Command::Create { dir, thread_id } => {
            let config = load_config()?;
            let synchronizer = Synchronizer::new(&config).context("Failed to build HTTP client")?;

            let thread = preview_thread(synchronizer.api().as_ref(), thread_id)
                .await
                .context("Failed to look up thread")?;
            info!(thread_id, title = %thread.title, forum = %thread.forum.name, "Archiving thread");

            let archive = LocalArchive::create(&dir, config.archive_options)
                .await
                .with_context(|| format!("Failed to create archive in {}", dir.display()))?;
            synchronize(&config, synchronizer, archive, Some(thread_id)).await
        }
        Command::Update { dir, thread_id } => {
            let config = load_config()?;
            let synchronizer = Synchronizer::new(&config).context("Failed to build HTTP client")?;
            let archive = LocalArchive::open(&dir)
                .await
                .with_context(|| format!("Failed to open archive in {}", dir.display()))?;
            synchronize(&config, synchronizer, archive, thread_id).await
        }
    }
}

fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(api_base_url = %config.api_base_url, "Configuration loaded");
    Ok(config)
}

async fn synchronize(
    config: &Config,
    synchronizer: Synchronizer,
    archive: LocalArchive,
    thread_id: Option<i64>,
) -> Result<()> {
    let task = SyncTask::spawn(
        Arc::new(synchronizer),
        archive,
        thread_id,
        config.progress_interval,
    );

    let mut progress = task.progress();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            if let Some(current) = *progress.borrow_and_update() {
                println!("{current}");
            }
        }
    });

    let outcome = tokio::select! {
        outcome = task.join() => outcome?,
        _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
    };
    if let Err(e) = printer.await {
        warn!("Progress printer stopped: {e}");
    }

    let report = outcome.result.with_context(|| {
        format!("Failed to synchronize {}", outcome.archive.root().display())
    })?;
    print_report(outcome.archive.root(), &report);
    Ok(())
}

fn print_report(root: &Path, report: &SyncReport) {
    println!(
        "{}: thread {} synchronized, {} new posts, {} new sub-replies",
        root.display(),
        report.thread_id,
        report.merge.new_posts,
        report.merge.new_sub_replies
    );
    println!(
        "assets: {} referenced, {} already present, {} downloaded, {} failed",
        report.assets.referenced,
        report.assets.already_present,
        report.assets.downloaded,
        report.assets.failures.len()
    );
    for failure in &report.assets.failures {
        println!("  {} ({})", failure.asset.url, failure.error);
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,thread_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    // Logs go to stderr; stdout carries progress and results.
    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

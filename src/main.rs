//! leadflow command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadflow::config::LogFormat;
use leadflow::ingest::IngestRequest;
use leadflow::project::NewProjectRequest;
use leadflow::storage::RecordStore;
use leadflow::tracker::CompletionEvent;
use leadflow::worker::{run_intake, Message};
use leadflow::{AppState, Config};
use serde::de::DeserializeOwned;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leadflow")]
#[command(about = "Lead fan-out, completion tracking and report delivery")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations
    InitDb,

    /// Register a project and print its ingest message
    CreateProject {
        /// Report recipient
        #[arg(long)]
        recipient: String,

        /// Template video file name
        #[arg(long)]
        video: String,

        /// Lead source file name
        #[arg(long)]
        spreadsheet: String,
    },

    /// Ingest a project from an ingest message file
    Ingest { message: PathBuf },

    /// Apply one completion event from a file
    Complete { event: PathBuf },

    /// Read newline-delimited messages from stdin until EOF or Ctrl-C
    Worker,

    /// Show a project's counters and notification state
    Status { project_id: String },

    /// List stalled projects and retry undelivered reports
    Watchdog,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn init_logging(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);

    let state = AppState::init(config).await?;

    match cli.command {
        Commands::InitDb => {
            state.db.health_check().await?;
            info!(path = %state.db.db_path().display(), "Database ready");
        }

        Commands::CreateProject {
            recipient,
            video,
            spreadsheet,
        } => {
            let request = NewProjectRequest {
                recipient,
                template_video_name: video,
                spreadsheet_name: spreadsheet,
            };
            let registration = match state.registrar()?.register(&request).await {
                Ok(registration) => registration,
                Err(e) => {
                    println!("{}", serde_json::to_string(&e.to_response())?);
                    return Err(e.into());
                }
            };
            info!(
                video_key = %registration.template_video.key,
                video_type = registration.template_video.media_type,
                spreadsheet_key = %registration.spreadsheet.key,
                "Upload both files under these keys, then publish the ingest message"
            );
            println!(
                "{}",
                serde_json::to_string(&Message::Ingest(registration.ingest))?
            );
        }

        Commands::Ingest { message } => {
            let request: IngestRequest = read_json(&message)?;
            let report = state.ingestor(state.aggregator()?)?.ingest(&request).await?;
            println!(
                "project={} rows={} skipped={} inserted={} job={} duplicate={}",
                report.project_id,
                report.total_rows,
                report.skipped_rows,
                report.leads_inserted,
                report.batch_job_id.as_deref().unwrap_or("-"),
                report.duplicate
            );
        }

        Commands::Complete { event } => {
            let event: CompletionEvent = read_json(&event)?;
            let outcome = state.tracker(state.aggregator()?)?.handle(&event).await?;
            println!("{outcome:?}");
        }

        Commands::Worker => run_worker(&state).await?,

        Commands::Status { project_id } => {
            let project = state.store.get_project(&project_id).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }

        Commands::Watchdog => {
            let watchdog = state.watchdog()?;
            for stalled in watchdog.scan().await? {
                println!(
                    "{} outstanding={} idle_secs={}",
                    stalled.project_id,
                    stalled.outstanding(),
                    stalled.idle_secs
                );
            }

            match state.aggregator() {
                Ok(aggregator) => {
                    for redelivery in watchdog.with_aggregator(aggregator).redeliver().await? {
                        match redelivery.result {
                            Ok(finalization) => {
                                println!("{} redelivery={finalization:?}", redelivery.project_id)
                            }
                            Err(e) => println!("{} redelivery_failed={e}", redelivery.project_id),
                        }
                    }
                }
                Err(e) => warn!("[TRACKER] Skipping report redelivery: {e}"),
            }
        }
    }

    Ok(())
}

/// Dispatches each stdin line and prints `<line>\t<disposition>` as handlers
/// finish. At most `worker.max_concurrent` lines are in flight; Ctrl-C stops
/// intake and in-flight handlers are drained.
async fn run_worker(state: &AppState) -> Result<()> {
    let dispatcher = Arc::new(state.dispatcher()?);
    let token = CancellationToken::new();

    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[WORKER] Interrupt received, draining in-flight messages");
            ctrl_c.cancel();
        }
    });

    let lines = run_intake(
        BufReader::new(tokio::io::stdin()),
        state.config.worker.max_concurrent,
        token,
        move |body: String| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(&body).await }
        },
        |n, disposition| println!("{n}\t{}", disposition.as_str()),
    )
    .await?;

    info!("[WORKER] Stopped after {lines} line(s)");
    Ok(())
}

//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result, WrapErr};
use tk_core::config::{load_config, EngineConfig, StoreBackend};
use tk_core::Engine;
use tk_protocol::document_models::TenderDocument;
use tk_protocol::ipc::EventType;
use tk_protocol::pipeline_models::{DocumentVariant, PipelineState, ProcessingStep};
use tk_protocol::process_models::AgentState;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::info;

use crate::output;

/// Orchestrate tender document pipelines.
///
/// With the default in-memory store every invocation is its own engine, so
/// queued steps run before the command returns. Point `--redis-url` at a
/// shared Redis to split work between `tender worker` and other commands.
#[derive(Parser)]
#[command(name = "tender", version, long_about = None)]
pub(crate) struct Cli {
    /// Project root holding `.tender-kit/config.toml`.
    #[arg(long, default_value = ".", global = true)]
    pub root: PathBuf,

    /// Use this Redis instead of the configured store.
    #[arg(long, env = "TENDER_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register an upload and run extraction.
    Start {
        project_id: String,
        /// Path (or file:// URL) of the extracted JSON document.
        source: String,
    },

    /// Run one step, if it is the project's legal next step.
    Advance {
        project_id: String,
        /// Step name, e.g. analyze_h1.
        step: ProcessingStep,
    },

    /// Submit the reviewed document. Without a file the produced document
    /// is approved as is.
    SubmitReview {
        project_id: String,
        #[arg(long)]
        document: Option<PathBuf>,
    },

    /// Re-run the step a failed project stopped at.
    Retry { project_id: String },

    /// Show the current state of a project.
    Status { project_id: String },

    /// Print a stored document variant.
    Document {
        project_id: String,
        /// raw, h1_tagged, h2h3_tagged, intro_added or final.
        variant: DocumentVariant,
    },

    /// Show the recorded state history.
    History { project_id: String },

    /// Delete everything stored for a project.
    Cleanup { project_id: String },

    /// Fail interrupted projects and re-queue lost hand-offs.
    Recover {
        /// Only this project; all known projects otherwise.
        project_id: Option<String>,
    },

    /// Consume the step queue until interrupted.
    Worker,

    /// Stream a project's events until it completes or fails.
    Watch { project_id: String },

    /// Start a project and run it to the review gate in one go.
    Run {
        project_id: String,
        source: String,
        /// Approve the produced document and finish the pipeline.
        #[arg(long)]
        approve: bool,
    },
}

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "tk_core=warn,tender=info",
        1 => "tk_core=info,tender=debug",
        _ => "tk_core=debug,tender=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

async fn resolve_config(root: &Path, redis_url: Option<String>) -> Result<EngineConfig> {
    let mut config = load_config(root)
        .await
        .wrap_err_with(|| format!("loading configuration under {}", root.display()))?;
    if let Some(url) = redis_url {
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url = Some(url);
    }
    Ok(config)
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli.root, cli.redis_url).await?;
    let engine = Engine::start(config).await?;
    let json = cli.json;

    let result = dispatch(&engine, cli.command, json).await;
    engine.shutdown();
    result
}

async fn dispatch(engine: &Engine, command: Command, json: bool) -> Result<()> {
    let service = engine.service();
    match command {
        Command::Start { project_id, source } => {
            service.start(&project_id, &source).await?;
            drain_local(engine).await?;
            report_status(engine, &project_id, json).await
        }
        Command::Advance { project_id, step } => {
            service.advance(&project_id, step).await?;
            drain_local(engine).await?;
            report_status(engine, &project_id, json).await
        }
        Command::SubmitReview {
            project_id,
            document,
        } => {
            let document = match document {
                Some(path) => Some(read_document(&path).await?),
                None => None,
            };
            service.submit_review(&project_id, document).await?;
            drain_local(engine).await?;
            report_status(engine, &project_id, json).await
        }
        Command::Retry { project_id } => {
            service.retry(&project_id).await?;
            drain_local(engine).await?;
            report_status(engine, &project_id, json).await
        }
        Command::Status { project_id } => report_status(engine, &project_id, json).await,
        Command::Document {
            project_id,
            variant,
        } => {
            let stored = service.get_document(&project_id, variant).await?;
            if json {
                output::print_json(&stored)
            } else {
                output::print_document(&stored);
                Ok(())
            }
        }
        Command::History { project_id } => {
            let history = service.history(&project_id).await?;
            if json {
                output::print_json(&history)
            } else {
                output::print_history(&history);
                Ok(())
            }
        }
        Command::Cleanup { project_id } => {
            let report = service.cleanup(&project_id).await?;
            if json {
                output::print_json(&report)?;
            } else {
                output::print_cleanup(&report);
            }
            if report.is_complete() {
                Ok(())
            } else {
                Err(eyre!("cleanup of {project_id} left keys behind"))
            }
        }
        Command::Recover { project_id } => {
            let actions = match project_id {
                Some(project_id) => {
                    let action = service.recover(&project_id).await?;
                    vec![(project_id, action)]
                }
                None => engine.worker().recover_all().await?,
            };
            drain_local(engine).await?;
            if json {
                output::print_json(&actions)
            } else {
                output::print_recovery(&actions);
                Ok(())
            }
        }
        Command::Worker => run_worker(engine).await,
        Command::Watch { project_id } => watch_project(engine, &project_id, json).await,
        Command::Run {
            project_id,
            source,
            approve,
        } => {
            service.start(&project_id, &source).await?;
            engine.worker().drain().await?;
            if approve {
                service.submit_review(&project_id, None).await?;
                engine.worker().drain().await?;
            }
            report_status(engine, &project_id, json).await
        }
    }
}

/// The in-memory store dies with the process, so queued steps run now.
async fn drain_local(engine: &Engine) -> Result<()> {
    if engine.config().store.backend == StoreBackend::Memory {
        let handled = engine.worker().drain().await?;
        info!(handled, "queued steps processed");
    }
    Ok(())
}

/// Print the project's current status. After a local drain this may be
/// several steps past the state the command itself produced.
async fn report_status(engine: &Engine, project_id: &str, json: bool) -> Result<()> {
    let status = engine.service().get_status(project_id).await?;
    if json {
        output::print_json(&status)
    } else {
        output::print_status(&status);
        Ok(())
    }
}

async fn read_document(path: &Path) -> Result<TenderDocument> {
    let content = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).wrap_err_with(|| format!("parsing {}", path.display()))
}

async fn run_worker(engine: &Engine) -> Result<()> {
    let recovered = engine.worker().recover_all().await?;
    output::print_recovery(&recovered);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    engine.worker().run(shutdown_rx).await;
    Ok(())
}

async fn watch_project(engine: &Engine, project_id: &str, json: bool) -> Result<()> {
    let mut stream = engine.service().subscribe(project_id).await?;
    loop {
        let record = tokio::select! {
            record = stream.next() => record,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(record) = record else {
            return Ok(());
        };

        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            output::print_event(&record);
        }

        let finished = record.event_type == EventType::StateUpdate
            && serde_json::from_value::<AgentState>(record.event_data)
                .map(|s| {
                    matches!(
                        s.current_state,
                        PipelineState::Completed | PipelineState::Failed
                    )
                })
                .unwrap_or(false);
        if finished {
            return Ok(());
        }
    }
}

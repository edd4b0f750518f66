use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticket_pilot::config::{OrchConfig, TRACKER_TOKEN_ENV};
use ticket_pilot::error::{OrchError, Result};
use ticket_pilot::logstream::{FileSink, LogHub};
use ticket_pilot::notification::Notifier;
use ticket_pilot::orchestrator::{OrchestratorFactory, RunOutcome};
use ticket_pilot::queue::{OrchQueue, SourcePoller};
use ticket_pilot::server::start_server;
use ticket_pilot::tracker::{GitHubTracker, Labels, OrchState, StateStore};
use ticket_pilot::worktree::WorktreeManager;
use ticket_pilot::{HttpExecutionService, IssueTracker};

const EXIT_FAILURE: u8 = 1;
const EXIT_AWAITING_APPROVAL: u8 = 2;
const EXIT_IN_PROGRESS: u8 = 3;

#[derive(Parser)]
#[command(name = "ticket-pilot", about = "Issue-driven development orchestrator")]
struct Cli {
    /// Path to the configuration document.
    #[arg(long, default_value = "orchestrator.json")]
    config: PathBuf,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Orchestrate a single issue to a change request.
    Run {
        issue: u64,
        /// Skip the human approval wait.
        #[arg(long)]
        auto_approve: bool,
    },
    /// Resume an interrupted orchestration from its state label.
    Resume { issue: u64 },
    /// Report an issue's orchestration state through the exit code.
    Status { issue: u64 },
    /// Run the service: source poller, queue, web surface.
    Serve {
        /// Directory with the web client build.
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Remove an issue's worktree, or prune orphaned ones.
    Cleanup {
        issue: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging(config: &OrchConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::new(format!("ticket_pilot={}", level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = OrchConfig::load(&cli.config).await?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Run {
            issue,
            auto_approve,
        } => {
            let auto = auto_approve || config.execution.auto_approve;
            cmd_run(config.with_auto_approve(auto), issue, false).await
        }
        Commands::Resume { issue } => cmd_run(config, issue, true).await,
        Commands::Status { issue } => cmd_status(config, issue).await,
        Commands::Serve { static_dir } => cmd_serve(config, static_dir).await,
        Commands::Cleanup { issue } => cmd_cleanup(config, issue).await,
    }
}

fn build_runtime(
    config: &OrchConfig,
) -> Result<(Arc<LogHub>, Arc<dyn IssueTracker>, OrchestratorFactory)> {
    config.ensure_runnable()?;
    let token = std::env::var(TRACKER_TOKEN_ENV)
        .map_err(|_| OrchError::MissingEnv(TRACKER_TOKEN_ENV))?;

    let hub = Arc::new(LogHub::new(config.service.max_buffer_size));
    let tracker: Arc<dyn IssueTracker> = Arc::new(GitHubTracker::new(&config.tracker, &token)?);
    let service = Arc::new(HttpExecutionService::new(&config.execution)?);
    let notifier = Arc::new(Notifier::new(config.notifier.clone()));

    let factory = OrchestratorFactory::new(
        config.clone(),
        Arc::clone(&tracker),
        service,
        notifier,
        Arc::clone(&hub),
    );
    Ok((hub, tracker, factory))
}

async fn cmd_run(config: OrchConfig, issue: u64, resume: bool) -> Result<ExitCode> {
    let (hub, _tracker, factory) = build_runtime(&config)?;
    let _file_sink = FileSink::spawn(Arc::clone(&hub), config.logging.log_dir.clone());

    let orchestrator = factory.build(issue);
    let outcome = if resume {
        orchestrator.resume(issue).await?
    } else {
        orchestrator.start(issue).await?
    };

    Ok(match outcome {
        RunOutcome::Completed => ExitCode::SUCCESS,
        RunOutcome::Rejected => ExitCode::from(EXIT_FAILURE),
    })
}

async fn cmd_status(config: OrchConfig, issue: u64) -> Result<ExitCode> {
    let (_hub, tracker, _factory) = build_runtime(&config)?;
    let labels = Labels::new(&config.tracker.label_prefix);
    let state = StateStore::new(tracker, labels).current(issue).await?;

    let code = match state {
        Some(OrchState::Completed) | Some(OrchState::PrCreated) => {
            println!("{}: completed", issue);
            ExitCode::SUCCESS
        }
        Some(OrchState::Failed) | Some(OrchState::Rejected) => {
            println!("{}: failed", issue);
            ExitCode::from(EXIT_FAILURE)
        }
        Some(OrchState::AwaitingApproval) => {
            println!("{}: awaiting-approval", issue);
            ExitCode::from(EXIT_AWAITING_APPROVAL)
        }
        Some(state) => {
            println!("{}: {}", issue, state);
            ExitCode::from(EXIT_IN_PROGRESS)
        }
        None => {
            println!("{}: not orchestrated", issue);
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

async fn cmd_serve(config: OrchConfig, static_dir: Option<PathBuf>) -> Result<ExitCode> {
    if !config.service.enabled {
        return Err(OrchError::Config(
            "service mode is disabled; set service.enabled".to_string(),
        ));
    }
    let (hub, tracker, factory) = build_runtime(&config)?;
    let _file_sink = FileSink::spawn(Arc::clone(&hub), config.logging.log_dir.clone());

    let queue = OrchQueue::new(Arc::new(factory));
    let labels = Labels::new(&config.tracker.label_prefix);

    let poller = Arc::new(SourcePoller::new(
        tracker,
        labels,
        queue.clone(),
        config.service.queue_label.clone(),
        Duration::from_millis(config.service.poll_interval),
    ));
    let poller_task = poller.start();

    let server = start_server(
        &config.service.host,
        config.service.port,
        Arc::clone(&hub),
        queue,
        static_dir,
    )
    .await?;

    shutdown_signal().await;

    // Stop the poller and the web surface; a running orchestration is not
    // aborted mid-flight.
    poller.stop();
    poller_task.abort();
    server.stop();

    Ok(ExitCode::SUCCESS)
}

async fn cmd_cleanup(config: OrchConfig, issue: Option<u64>) -> Result<ExitCode> {
    let manager = WorktreeManager::new(&config.tracker, config.worktree.clone());
    match issue {
        Some(issue) => {
            manager.remove(issue).await?;
            println!("removed worktree for issue #{}", issue);
        }
        None => {
            let pruned = manager.prune_orphans().await?;
            println!("pruned {} orphaned worktree record(s)", pruned.len());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

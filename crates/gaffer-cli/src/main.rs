use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gaffer_core::config::Config;
use gaffer_core::telemetry::{TelemetryConfig, init_telemetry};
use gaffer_runner::agent::ClaudeCli;
use gaffer_runner::context::TaskContext;
use gaffer_runner::poller::Poller;
use gaffer_runner::pool::WorkerPool;
use gaffer_runner::tracker::GhTracker;
use gaffer_runner::workspace::GitWorkspaces;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GAFFER_GIT_COMMIT"),
    " ",
    env!("GAFFER_GIT_DIRTY"),
    ", built ",
    env!("GAFFER_BUILD_TIME"),
    ")"
);

#[derive(Parser)]
#[command(
    name = "gaffer",
    about = "Issue-driven coding agent orchestrator",
    version,
    long_version = LONG_VERSION
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "gaffer.toml")]
    config: PathBuf,

    /// Output JSON-structured logs to console.
    #[arg(long)]
    json_logs: bool,

    /// Log filter directives (RUST_LOG takes precedence).
    #[arg(long, default_value = "info")]
    log_filter: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the polling loop.
    Run {
        /// Run a single poll cycle, drain tasks, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Verify tracker and agent access, then exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        log_filter: cli.log_filter.clone(),
        json_logs: cli.json_logs,
    });

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { once } => cmd_run(&config, once).await,
        Commands::Check => cmd_check(&config).await,
    }
}

async fn build_context(config: &Config) -> Result<Arc<TaskContext>> {
    // The feedback scan must always know which login is ours, otherwise
    // our own comments come back as review feedback every cycle.
    let bot_author = match config.tracker.bot_author.clone() {
        Some(author) => author,
        None => {
            let author = GhTracker::authenticated_login().await.context(
                "could not resolve own login for feedback filtering; set tracker.bot_author",
            )?;
            tracing::info!(author = %author, "filtering feedback by the authenticated gh account");
            author
        }
    };
    let tracker = Arc::new(GhTracker::new(&config.tracker.repo, bot_author));
    let agent = Arc::new(
        ClaudeCli::new(&config.agent.command)
            .with_allowed_tools(config.agent.allowed_tools.clone())
            .with_timeout(config.agent_timeout()),
    );
    let workspaces = Arc::new(GitWorkspaces::new(
        &config.workspace.root,
        config.remote_url(),
        &config.workspace.trunk,
    ));
    Ok(Arc::new(TaskContext::from_config(
        config, tracker, agent, workspaces,
    )))
}

// ─── Run loop ───────────────────────────────────────────────────────────────

async fn cmd_run(config: &Config, once: bool) -> Result<()> {
    let ctx = build_context(config).await?;
    let pool = Arc::new(WorkerPool::new(config.poller.max_concurrent));
    let mut poller = Poller::new(ctx, pool.clone(), config.poll_interval());

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
            shutdown_clone.cancel();
        }
    });

    tracing::info!(
        repo = %config.tracker.repo,
        interval_secs = config.poller.interval_secs,
        max_concurrent = config.poller.max_concurrent,
        "starting poll loop"
    );

    if once {
        poller.cycle().await;
    } else {
        poller.run(shutdown).await;
    }

    if !pool.wait_for_all(config.shutdown_grace()).await {
        tracing::warn!("shutdown grace period expired with tasks still running");
    }
    tracing::info!(counts = ?pool.status_counts(), "poll loop stopped");
    Ok(())
}

// ─── Health checks ──────────────────────────────────────────────────────────

async fn cmd_check(config: &Config) -> Result<()> {
    println!("=== Gaffer Health Check ===\n");
    println!("Repo:     {}", config.tracker.repo);
    println!("Remote:   {}", config.remote_url());
    println!("Agent:    {}", config.agent.command);
    println!("Trigger:  {}", config.tracker.trigger_label);

    let ctx = match build_context(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("\ntracker   FAILED: {e:#}");
            bail!("one or more checks failed");
        }
    };
    let mut failed = false;

    match ctx.tracker.health_check().await {
        Ok(()) => println!("\ntracker   ok"),
        Err(e) => {
            failed = true;
            println!("\ntracker   FAILED: {e:#}");
        }
    }
    match ctx.agent.health_check().await {
        Ok(()) => println!("agent     ok"),
        Err(e) => {
            failed = true;
            println!("agent     FAILED: {e:#}");
        }
    }

    if failed {
        bail!("one or more checks failed");
    }
    println!("\nAll checks passed.");
    Ok(())
}

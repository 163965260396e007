//! dutylog maintenance CLI
//!
//! Runs reconciliation, exports and data maintenance against the configured
//! store while the host is offline.

mod config;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use dutylog_core::{SubjectId, SystemClock};
use dutylog_rotation::{ExportOutcome, RotationScheduler, format_duration};
use dutylog_tracker::{NoLiveSubjects, OfflineDirectory, SessionTracker};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "dutylog")]
#[command(about = "dutylog - staff online time and vote tracking", long_about = None)]
struct Cli {
    /// Path to a YAML or TOML config file
    #[arg(short, long, env = "DUTYLOG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Close every open session, crediting time up to now
    Reconcile,
    /// List open sessions
    Sessions,
    /// Write a report of all tracked subjects
    Export {
        /// Run a full rotation: rotation header, configured prefix and wipe
        #[arg(long)]
        rotation: bool,
    },
    /// Poll the rotation schedule until interrupted
    Schedule,
    /// Delete all accumulated time and votes
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Show totals for one subject
    Stats {
        /// Subject UUID
        subject: String,
    },
    /// List vote records, optionally for one subject
    Votes {
        #[arg(long)]
        subject: Option<String>,
    },
    /// List origin labels in storage
    Origins,
    /// Move all rows from one origin label to another
    RenameOrigin { old: String, new: String },
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let log_level = if config.tracker.debug {
        Level::DEBUG
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx query logs stay at WARN unless asked for
    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn parse_subject(raw: &str) -> anyhow::Result<SubjectId> {
    SubjectId::from_string(raw).with_context(|| format!("'{}' is not a subject UUID", raw))
}

fn print_outcome(outcome: &ExportOutcome) {
    println!(
        "Exported {} subjects ({} skipped) as {}",
        outcome.subjects_exported, outcome.subjects_skipped, outcome.file_name
    );
    for delivery in &outcome.delivered {
        match &delivery.locator {
            Some(locator) => println!("  {}: {}", delivery.sink, locator),
            None => println!("  {}", delivery.sink),
        }
    }
    for sink in &outcome.failed_sinks {
        println!("  {}: failed", sink);
    }
    if outcome.wiped {
        println!("Totals and votes wiped");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => AppConfig::default(),
    };
    config.merge_env();

    init_tracing(&config)?;
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {}", e);
    }
    info!("Using {} storage", config.tracker.storage.kind());

    let directory = Arc::new(OfflineDirectory);
    let clock = Arc::new(SystemClock);
    let tracker = SessionTracker::from_config(
        config.tracker.clone(),
        directory.clone(),
        Arc::new(NoLiveSubjects),
        clock.clone(),
    )
    .await
    .context("failed to open storage")?;

    let result = run(&cli.command, &config, &tracker, directory, clock).await;
    tracker.shutdown().await;
    result
}

async fn run(
    command: &Commands,
    config: &AppConfig,
    tracker: &SessionTracker,
    directory: Arc<OfflineDirectory>,
    clock: Arc<SystemClock>,
) -> anyhow::Result<()> {
    let handler = tracker.handler().await;
    let scheduler = || {
        RotationScheduler::new(
            config.rotation.clone(),
            tracker.switch().clone(),
            directory.clone(),
            clock.clone(),
        )
        .with_votes(config.tracker.track_votes)
    };

    match command {
        Commands::Reconcile => {
            let stats = tracker.reconcile_now().await;
            println!(
                "Closed {} of {} open sessions",
                stats.sessions_closed, stats.sessions_examined
            );
        }
        Commands::Sessions => {
            let sessions = handler.open_sessions().await;
            if sessions.is_empty() {
                println!("No open sessions");
            }
            for session in sessions {
                println!(
                    "{} {} since {} on {}",
                    session.subject_id,
                    session.display_name,
                    session.started_at_ms,
                    session.origin
                );
            }
        }
        Commands::Export { rotation } => {
            let scheduler = scheduler();
            let outcome = if *rotation {
                scheduler.run_rotation().await
            } else {
                scheduler.export_now().await
            }
            .context("export failed")?;
            print_outcome(&outcome);
        }
        Commands::Schedule => {
            if !config.rotation.enabled {
                bail!("rotation is disabled in the configuration");
            }
            let scheduler = Arc::new(scheduler());
            scheduler.start().await;
            info!("Waiting for rotation days; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
        }
        Commands::Wipe { yes } => {
            if !*yes {
                bail!("refusing to wipe without --yes");
            }
            if !handler.wipe().await {
                bail!("wipe failed; see log for details");
            }
            println!("All accumulated time and votes deleted");
        }
        Commands::Stats { subject } => {
            let id = parse_subject(subject)?;
            let name = handler
                .last_known_name(id)
                .await
                .unwrap_or_else(|| id.to_string());
            println!(
                "{} has a total time of {} and has {} votes.",
                name,
                format_duration(handler.total_duration(id).await),
                handler.total_votes(id).await
            );
            for (origin, duration) in handler.duration_by_origin(id).await {
                println!("  - {}: {}", origin, format_duration(duration));
            }
        }
        Commands::Votes { subject } => {
            let filter = subject.as_deref().map(parse_subject).transpose()?;
            let votes = handler.all_votes().await;
            let mut shown = 0;
            for vote in votes
                .iter()
                .filter(|vote| filter.is_none_or(|id| vote.subject_id == id))
            {
                println!(
                    "{} {} via {} ({})",
                    vote.vote_time, vote.display_name, vote.service_name, vote.subject_id
                );
                shown += 1;
            }
            println!("{} votes", shown);
        }
        Commands::Origins => {
            for origin in handler.known_origins().await {
                println!("{}", origin);
            }
        }
        Commands::RenameOrigin { old, new } => {
            if new.trim().is_empty() {
                bail!("new origin label must not be blank");
            }
            let changed = handler.rename_origin(old, new).await;
            println!("Moved {} rows from '{}' to '{}'", changed, old, new);
        }
    }

    Ok(())
}

//! recur-worker: runs the recurring rule engine against PostgreSQL.
//!
//! Subcommands:
//! - `run`: poll for due rules until SIGINT/SIGTERM, then print final stats
//! - `execute <RULE_ID>`: fire one rule now and print the result as JSON
//! - `list-due`: print the rules due at an instant (default: now)
//! - `show <RULE_ID>`: print one stored rule

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use recur_core::{Config, RecurError};
use recur_rules::collaborators::{
    PgAssignmentService, PgIdentityDirectory, PgNotificationService, PgStageDirectory,
    PgWorkItemService,
};
use recur_rules::engine::RuleExecutor;
use recur_rules::store::{PgRuleStore, RuleStore};
use recur_rules::worker::RulePoller;

// ── CLI ─────────────────────────────────────────────────────────────

/// Recurring rule scheduler and executor.
#[derive(Parser, Debug)]
#[command(name = "recur-worker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll for due rules until interrupted.
    Run {
        /// Tick interval in milliseconds (defaults to RECUR_TICK_INTERVAL_MS).
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Execute a single rule immediately.
    Execute {
        rule_id: String,
        /// Actor recorded as the item's creator.
        #[arg(long)]
        actor: Option<String>,
    },
    /// List rules that are due.
    ListDue {
        /// RFC 3339 instant to evaluate against.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print a stored rule.
    Show { rule_id: String },
}

// ── Wiring ──────────────────────────────────────────────────────────

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.connection_string())
        .await
        .map_err(|e| RecurError::Storage(e.to_string()))
        .with_context(|| format!("connecting to PostgreSQL at {}", config.postgres.host))?;
    info!("PostgreSQL connected: {}", config.postgres.host);

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("applying database migrations")?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn build_executor(pool: PgPool, config: &Config) -> RuleExecutor<PgRuleStore> {
    RuleExecutor::new(
        Arc::new(PgRuleStore::new(pool.clone())),
        Arc::new(PgStageDirectory::new(pool.clone())),
        Arc::new(PgIdentityDirectory::new(pool.clone())),
        Arc::new(PgWorkItemService),
        config,
    )
    .with_assignments(Arc::new(PgAssignmentService::new(pool.clone())))
    .with_notifications(Arc::new(PgNotificationService::new(pool)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).map_err(RecurError::from)?;
    println!("{}", out);
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("registering SIGTERM handler")?;
        tokio::select! {
            res = ctrl_c => res.context("listening for ctrl_c")?,
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("listening for ctrl_c")?;
    }

    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    recur_core::config::load_dotenv();
    let cli = Cli::parse();

    let config = Config::from_env();
    config.validate()?;
    config.log_summary();
    if !config.postgres.is_configured() {
        anyhow::bail!("PostgreSQL is not configured (set PG_USERNAME)");
    }

    let pool = connect(&config).await?;
    let executor = Arc::new(build_executor(pool, &config));

    match cli.command {
        Command::Run { interval_ms } => {
            let poller = RulePoller::new(Arc::clone(&executor), &config);
            poller.start(interval_ms.unwrap_or(config.worker.tick_interval_ms));

            shutdown_signal().await?;
            info!("shutdown signal received");
            poller.stop().await;
            print_json(&poller.stats())?;
        }
        Command::Execute { rule_id, actor } => {
            let result = executor.execute_now(&rule_id, actor.as_deref()).await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::ListDue { at } => {
            let rules = executor
                .list_due(at)
                .await
                .context("querying due rules")?;
            print_json(&rules)?;
        }
        Command::Show { rule_id } => {
            let rule = executor
                .store()
                .get_by_id(&rule_id)
                .await
                .context("loading rule")?
                .with_context(|| format!("rule {} not found", rule_id))?;
            print_json(&rule)?;
        }
    }

    info!("recur-worker exited cleanly");
    Ok(())
}

//! Costwatch CLI binary entrypoint.
//!
//! This is the main entry point for the `costwatch` command-line tool.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use costwatch_alerts::{
    AlertEngine, MemoryTaskQueue, NotificationStore, RequestContext, StaticQueryExecutor, Task,
    TaskQueue,
};
use costwatch_cli::cli::{Cli, Commands};
use costwatch_cli::state::{self, State};
use costwatch_cli::worker::drain;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = state::load_config(cli.config.as_deref())?;
    let state = State::load(&cli.state)?;
    let ctx = RequestContext::new();

    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight tasks");
            interrupt.cancel();
        }
    });

    let executor = Arc::new(StaticQueryExecutor::new());
    let queue = Arc::new(MemoryTaskQueue::new());
    let engine = Arc::new(
        AlertEngine::builder(
            state.alerts.clone(),
            state.notifications.clone(),
            executor.clone(),
            queue.clone(),
        )
        .config(config)
        .build(),
    );

    match cli.command {
        Commands::Import { alerts } => {
            let ids = state.import_alerts(&ctx, &alerts)?;
            info!(count = ids.len(), "imported alerts");
            let mut stdout = io::stdout().lock();
            for id in ids {
                writeln!(stdout, "{id}")?;
            }
        }
        Commands::Refresh { results, workers } => {
            for (alert_id, result) in state::load_results(&results)? {
                executor.insert(alert_id, result);
            }
            let scheduled = engine.refresh_all(&ctx).context("listing alerts")?;
            info!(
                enqueued = scheduled.enqueued,
                denied = scheduled.denied,
                "refresh scheduled"
            );
            let summary = drain(engine.clone(), queue.clone(), ctx.clone(), workers).await;
            println!(
                "refreshed {} alerts, {} notifications added, {} dropped",
                summary.completed,
                summary.notifications_added,
                summary.dropped.len()
            );
        }
        Commands::Digest { customer, workers } => {
            match customer {
                Some(customer_id) => queue.enqueue(&ctx, Task::digest(customer_id))?,
                None => {
                    engine.schedule_digests(&ctx)?;
                }
            }
            let summary = drain(engine.clone(), queue.clone(), ctx.clone(), workers).await;
            println!(
                "sent {} digest emails for {} customers, {} dropped",
                summary.emails_sent,
                summary.completed,
                summary.dropped.len()
            );
        }
        Commands::Pending { customer } => {
            let customers = match customer {
                Some(customer_id) => vec![customer_id],
                None => state.notifications.get_customers_with_pending(&ctx)?,
            };
            let mut pending = BTreeMap::new();
            for customer_id in customers {
                let by_alert = state
                    .notifications
                    .get_alert_detected_notifications(&ctx, &customer_id)?;
                pending.insert(customer_id, by_alert);
            }
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &pending)?;
            writeln!(stdout)?;
            return Ok(());
        }
    }

    state.save()
}

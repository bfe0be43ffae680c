mod app;
mod cli;

use chrono::Utc;
use clap::Parser;
use conduit_core::{
    config::ConduitConfig,
    types::{ImportId, JobId},
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    app::App,
    cli::{Cli, Commands},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conduit_daemon=info,conduit_scheduler=info,conduit_import=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CONDUIT_CONFIG").ok());
    let config = ConduitConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ConduitConfig::default()
    });

    let app = App::open(config)?;

    match cli.command {
        Commands::Serve => serve(&app).await?,
        Commands::EnqueueJob { id } => {
            let id = JobId::from(id);
            if app.runner.enqueue(&id)? {
                println!("enqueued {id}");
            } else {
                println!("{id} is not idle, nothing enqueued");
            }
        }
        Commands::RunJob { id } => {
            let report = app.runner.run(&JobId::from(id)).await?;
            println!(
                "job {}: {} task(s) run, next run {}{}",
                report.job_id,
                report.executed.len(),
                report.next_run.to_rfc3339(),
                if report.disabled { " (disabled)" } else { "" }
            );
            if let Some(reason) = report.failure {
                anyhow::bail!(
                    "task {} failed: {reason}",
                    report.failed_task.unwrap_or_default()
                );
            }
        }
        Commands::RunImport { id, enqueue } => {
            let id = ImportId::from(id);
            if enqueue {
                if app.runner.enqueue_import(&id)? {
                    println!("enqueued import {id}");
                } else {
                    println!("import {id} is already queued");
                }
            } else {
                app.imports.run_by_id(&id).await?;
                println!("import {id} finished");
            }
        }
        Commands::CancelImport {
            id,
            success,
            message,
        } => {
            let report = app
                .imports
                .cancel(&ImportId::from(id), success, message.as_deref())
                .await?;
            println!(
                "finalized: {}, reader: {:?}, writer: {:?}, pipe removed: {}",
                report.finalized,
                report.reader,
                report.writer,
                report
                    .pipe_removed
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
        }
        Commands::Ready => {
            for job in app.jobs.ready_to_run(Utc::now())? {
                println!(
                    "{}\t{}\t{}\tevery {} {}",
                    job.id,
                    job.name,
                    job.next_run.to_rfc3339(),
                    job.schedule.interval_value,
                    job.schedule.interval_unit
                );
            }
        }
    }

    Ok(())
}

async fn serve(app: &App) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engine = tokio::spawn(app.engine().run(shutdown_rx));

    info!("conduit running, press Ctrl-C to stop");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            engine.await?;
        }
        // Returns early when another engine holds the database.
        joined = &mut engine => {
            joined?;
            anyhow::bail!("scheduler engine stopped");
        }
    }
    Ok(())
}

//! `tether` -- follow background jobs over the long-polling bus.
//!
//! # Usage
//!
//! ```text
//! tether demo            simulated job on an in-process server
//! tether wait <uuid>     follow a job on TETHER_BASE_URL until it finishes
//! tether cancel <uuid>   ask the server to cancel a job
//! ```
//!
//! # Environment variables
//!
//! | Variable                     | Required     | Default | Description                         |
//! |------------------------------|--------------|---------|-------------------------------------|
//! | `TETHER_BASE_URL`            | wait, cancel | --      | Server root, e.g. `http://host:8069` |
//! | `TETHER_SESSION`             | no           | --      | `session_id` cookie value           |
//! | `TETHER_HIDDEN_DELAY_MS`     | no           | `4000`  | Base delay between polls when hidden |
//! | `TETHER_ERROR_DELAY_MS`      | no           | `10000` | Base delay after a failed poll      |
//! | `TETHER_JOB_TIME_LIMIT_SECS` | no           | `1200`  | Give up on a job after this long    |

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tether_core::app::{BackgroundJobAction, ProgressMonitor, TetherBuilder, TetherConfig};
use tether_core::domain::JobId;
use tether_core::impls::{HttpTransport, InMemoryServer};
use tether_core::ports::JobControl;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_JOB: &str = "0b6f3a54-2d7e-4c1a-9f58-6e0d1c2b3a49";
const DEMO_STEPS: u64 = 8;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=info,tether_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match TetherConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["demo"] => demo(config).await,
        ["wait", uuid] => wait(config, uuid).await,
        ["cancel", uuid] => cancel(config, uuid).await,
        _ => {
            eprintln!("usage: tether demo | tether wait <uuid> | tether cancel <uuid>");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!("{message}");
            ExitCode::FAILURE
        }
    }
}

/// Run a fake job on an in-process server and follow it like a real one.
async fn demo(config: TetherConfig) -> Result<(), String> {
    let server = Arc::new(InMemoryServer::with_poll_timeout(Duration::from_secs(5)));
    let tether = TetherBuilder::new()
        .server(server.clone())
        .config(config)
        .build()
        .map_err(|e| e.to_string())?;
    tether.start();

    // what a server hands back when a request was pushed to a job
    let action = json!({
        "type": "web.celery.background_job",
        "tag": "block_with_progress",
        "params": {
            "uuid": DEMO_JOB,
            "next_action": {"type": "ir.actions.client", "tag": "reload"},
            "cancellable": true
        }
    });
    let action = BackgroundJobAction::from_value(&action)
        .ok_or("not a background job action")?
        .map_err(|e| e.to_string())?;
    let job = tether
        .tracker
        .append_background_job(&action)
        .map_err(|e| e.to_string())?
        .ok_or("action carries no job")?;
    tracing::info!(job_id = %job.handle.job_id(), presentation = ?job.presentation, "tracking demo job");

    let job_id = job.handle.job_id().clone();
    let worker = tokio::spawn(async move {
        for step in 0..=DEMO_STEPS {
            server
                .report_progress(&job_id, step, DEMO_STEPS, &format!("Step {step} of {DEMO_STEPS}"))
                .await;
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        server.complete(&job_id, serde_json::Value::Null).await;
    });

    let printer = job.progress.map(|listener| tokio::spawn(print_progress(ProgressMonitor::spawn(listener))));
    let outcome = job.handle.wait().await;
    worker.abort();
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    tether.shutdown().await;

    match outcome {
        Ok(next_action) => {
            println!("done, next action: {}", next_action.unwrap_or_default());
            Ok(())
        }
        Err(failure) => Err(failure.to_string()),
    }
}

async fn wait(config: TetherConfig, uuid: &str) -> Result<(), String> {
    let job_id = JobId::parse(uuid).map_err(|e| e.to_string())?;
    let transport = http_transport(&config)?;
    let tether = TetherBuilder::new()
        .server(Arc::new(transport))
        .config(config)
        .build()
        .map_err(|e| e.to_string())?;

    let handle = tether.tracker.track(job_id.clone(), None).map_err(|e| e.to_string())?;
    let listener = tether.tracker.attach(&job_id).map_err(|e| e.to_string())?;
    let monitor = ProgressMonitor::spawn(listener);
    let printer = tokio::spawn(print_progress(monitor));
    tether.start();
    tracing::info!(%job_id, "waiting for background job");

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%job_id, "interrupted");
            tether.shutdown().await;
            return Err("interrupted".to_string());
        }
    };
    let _ = printer.await;
    tether.shutdown().await;

    match outcome {
        Ok(next_action) => {
            println!("done, next action: {}", next_action.unwrap_or_default());
            Ok(())
        }
        Err(failure) => Err(failure.to_string()),
    }
}

async fn cancel(config: TetherConfig, uuid: &str) -> Result<(), String> {
    let job_id = JobId::parse(uuid).map_err(|e| e.to_string())?;
    let transport = http_transport(&config)?;
    transport.cancel(&job_id).await.map_err(|e| e.to_string())?;
    tracing::info!(%job_id, "cancellation requested");
    Ok(())
}

fn http_transport(config: &TetherConfig) -> Result<HttpTransport, String> {
    let base_url = config.require_base_url().map_err(|e| e.to_string())?;
    let transport = HttpTransport::new(base_url);
    Ok(match &config.session_cookie {
        Some(session) => transport.with_session(session.clone()),
        None => transport,
    })
}

async fn print_progress(mut monitor: ProgressMonitor) {
    while monitor.changed().await {
        println!("{}", monitor.snapshot().render_line());
    }
}

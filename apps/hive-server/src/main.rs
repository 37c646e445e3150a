//! hive-server: the stream endpoint and read-side snapshots for one
//! project's coordination database.

mod api_state;
mod api_streams;
mod app_state;

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use hive_kernel::{Kernel, KernelError};

#[derive(Debug, Parser)]
#[command(name = "hive-server", about = "Event stream endpoint for hive coordination databases")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "HIVE_BIND", default_value = "127.0.0.1:8787")]
    bind: String,

    /// Project root whose database to serve.
    #[arg(long, env = "HIVE_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Live-stream polling interval in milliseconds.
    #[arg(long, env = "HIVE_STREAM_POLL_MS", default_value_t = 100)]
    poll_ms: u64,

    /// Reservation expiry sweep interval in seconds.
    #[arg(long, env = "HIVE_EXPIRE_SWEEP_SECS", default_value_t = 30)]
    expire_sweep_secs: u64,
}

/// Translate kernel errors to the boundary envelope.
pub(crate) fn error_response(err: KernelError) -> Response {
    let status = match &err {
        KernelError::NotFound(_) => StatusCode::NOT_FOUND,
        KernelError::Conflict(_) => StatusCode::CONFLICT,
        KernelError::Invalid(_) => StatusCode::BAD_REQUEST,
        KernelError::Unavailable(_) | KernelError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        KernelError::Corruption(_) | KernelError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({
            "error": { "kind": err.kind(), "message": err.to_string() }
        })),
    )
        .into_response()
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api_state::healthz))
        .route("/streams/:project", get(api_streams::stream_events))
        .route("/state/:project/agents", get(api_state::state_agents))
        .route("/state/:project/reservations", get(api_state::state_reservations))
        .route("/state/:project/beads", get(api_state::state_beads))
        .route("/state/:project/stats", get(api_state::state_stats))
        .with_state(state)
}

/// Periodically materialize TTL expiry so snapshots stay tidy.
async fn expiry_sweep(kernel: Kernel, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match kernel.expire_reservations(chrono::Utc::now().timestamp_millis()) {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!(released = n, "reservation expiry sweep"),
                    Err(err) => tracing::warn!(error = %err, "expiry sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let kernel = Kernel::open_project(&args.project_root)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(
        kernel.clone(),
        Duration::from_millis(args.poll_ms.max(10)),
        shutdown_rx.clone(),
    );

    tokio::spawn(expiry_sweep(
        kernel,
        Duration::from_secs(args.expire_sweep_secs.max(1)),
        shutdown_rx,
    ));

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!(bind = %args.bind, project = %args.project_root.display(), "hive-server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}

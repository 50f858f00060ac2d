mod api;
mod artifact_store;
mod cleanup;
mod config;
mod convert;
mod models;
mod scheduler;
mod task_table;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use cleanup::SweepGate;
use config::Config;
use scheduler::Scheduler;
use task_table::TaskTable;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tasks: TaskTable,
    pub scheduler: Scheduler,
    pub sweep_gate: Arc<SweepGate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_convert_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    artifact_store::ensure_root(&config.upload_root).await?;
    artifact_store::ensure_root(&config.output_root).await?;

    match cleanup::sweep_all(&config).await {
        Ok(summary) => info!(
            uploads = summary.uploads_removed,
            outputs = summary.outputs_removed,
            "Startup sweep finished"
        ),
        Err(err) => warn!("Startup sweep failed: {err:#}"),
    }

    let tasks = TaskTable::new();
    let scheduler = Scheduler::start(config.clone(), tasks.clone());
    let state = AppState {
        config: config.clone(),
        tasks,
        scheduler,
        sweep_gate: Arc::new(SweepGate::new()),
    };

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/upload", post(api::upload))
        .route("/status/{task_id}", get(api::status))
        .route("/download/{file_name}", get(api::download))
        .route("/cleanup", post(api::trigger_cleanup))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::sweep_on_request,
        ))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("pdf-convert-api listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

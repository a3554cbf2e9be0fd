//! Exchange filings pipeline: binary entrypoint.
//! Loads configuration, spawns one polling worker per exchange and serves the HTTP and
//! websocket surface until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use filings_pipeline::{
    api::{self, AppState},
    broadcast::Hub,
    classify::build_classifier,
    config::AppConfig,
    metrics::Metrics,
    pipeline::scheduler::{spawn_pipelines, Downstream},
    store::build_store,
};

const WORKER_DRAIN: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("filings_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env().context("loading configuration")?;
    tracing::info!(
        exchanges = ?cfg.exchanges,
        classifier_enabled = cfg.classifier.enabled,
        shared_limiter = cfg.shared_limiter,
        "configuration loaded"
    );

    let metrics = Metrics::init()?;
    let store = build_store(&cfg.store, cfg.http_timeout)?;
    let hub = Hub::default();
    let classifier = build_classifier(&cfg.classifier)?;
    tracing::info!(classifier = classifier.name(), store = store.name(), "collaborators ready");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let downstream = Downstream {
        classifier,
        store: store.clone(),
        broadcaster: Arc::new(hub.clone()),
    };
    let workers = spawn_pipelines(&cfg, downstream, shutdown_rx).await?;

    let app = api::router(AppState { store, hub }).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "ctrl-c handler failed");
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("http server")?;

    let _ = shutdown_tx.send(true);
    for w in workers {
        let abort = w.abort_handle();
        match tokio::time::timeout(WORKER_DRAIN, w).await {
            Ok(Err(e)) => tracing::warn!(error = %e, "worker ended abnormally"),
            Err(_) => {
                tracing::warn!("worker still busy after drain timeout, aborting");
                abort.abort();
            }
            Ok(Ok(())) => {}
        }
    }
    tracing::info!("bye");
    Ok(())
}

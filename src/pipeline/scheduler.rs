// src/pipeline/scheduler.rs
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broadcast::DynBroadcaster;
use crate::classify::rate_limit::RateLimiter;
use crate::classify::DynClassifier;
use crate::config::AppConfig;
use crate::ingest::providers::adapter_for;
use crate::ingest::types::Exchange;
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::store::DynStore;

/// Shared downstream collaborators handed to every exchange worker.
#[derive(Clone)]
pub struct Downstream {
    pub classifier: DynClassifier,
    pub store: DynStore,
    pub broadcaster: DynBroadcaster,
}

/// One limiter per exchange, or the same limiter for all when `shared`.
pub fn limiters_for(exchanges: &[Exchange], rpm: usize, shared: bool) -> HashMap<Exchange, Arc<RateLimiter>> {
    let common = Arc::new(RateLimiter::per_minute(rpm));
    exchanges
        .iter()
        .map(|&ex| {
            let limiter = if shared {
                common.clone()
            } else {
                Arc::new(RateLimiter::per_minute(rpm))
            };
            (ex, limiter)
        })
        .collect()
}

/// Build and spawn one long-lived polling task per enabled exchange.
pub async fn spawn_pipelines(
    cfg: &AppConfig,
    downstream: Downstream,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let limiters = limiters_for(&cfg.exchanges, cfg.classifier.rpm_limit as usize, cfg.shared_limiter);
    let mut handles = Vec::with_capacity(cfg.exchanges.len());

    for &exchange in &cfg.exchanges {
        let source = adapter_for(exchange, cfg.http_timeout)
            .with_context(|| format!("building {exchange} adapter"))?;
        let limiter = limiters
            .get(&exchange)
            .cloned()
            .unwrap_or_else(|| Arc::new(RateLimiter::per_minute(cfg.classifier.rpm_limit as usize)));
        let deps = PipelineDeps {
            source,
            classifier: downstream.classifier.clone(),
            limiter,
            store: downstream.store.clone(),
            broadcaster: downstream.broadcaster.clone(),
        };
        let pipeline = Pipeline::new(deps, cfg.pipeline_settings(exchange))
            .await
            .with_context(|| format!("starting {exchange} pipeline"))?;
        let rx = shutdown.clone();
        handles.push(tokio::spawn(pipeline.run(rx)));
        tracing::info!(target: "pipeline", exchange = %exchange, "worker spawned");
    }
    Ok(handles)
}

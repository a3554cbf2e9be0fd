// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod broadcast;
pub mod classify;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use crate::api::{router, AppState};
pub use crate::pipeline::{Outcome, Pipeline, PipelineDeps, PipelineSettings};

// src/ingest/providers/mod.rs
pub mod bse;
pub mod http;
pub mod nse;

use std::sync::Arc;
use std::time::Duration;

use crate::ingest::error::FetchError;
use crate::ingest::types::{Exchange, SourceAdapter};

/// Live adapter for an exchange with the given per-request timeout.
pub fn adapter_for(exchange: Exchange, timeout: Duration) -> Result<Arc<dyn SourceAdapter>, FetchError> {
    Ok(match exchange {
        Exchange::Bse => Arc::new(bse::BseAdapter::new(timeout)?),
        Exchange::Nse => Arc::new(nse::NseAdapter::new(timeout)?),
    })
}

//! Served HTTP surface: ingestion boundary, filings query, websocket fan-out.

pub mod ws;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::broadcast::{fan_out, Hub};
use crate::ingest::types::FilingRecord;
use crate::store::{DynStore, FilingQuery, InsertOutcome};

#[derive(Clone)]
pub struct AppState {
    pub store: DynStore,
    pub hub: Hub,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/insert_new_announcement", post(insert_new_announcement))
        .route("/api/corporate_filings", get(corporate_filings))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsertResponse {
    pub status: String,
    pub is_new: bool,
    pub broadcast: bool,
    pub rooms: Vec<String>,
}

/// Persist a record pushed by an external producer and fan it out when flagged.
/// Records already stored are acknowledged but not broadcast again.
async fn insert_new_announcement(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<InsertResponse>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("empty request body".into()));
    }
    let record: FilingRecord = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid announcement: {e}")))?;
    if record.corp_id.trim().is_empty() {
        return Err(ApiError::BadRequest("corp_id is required".into()));
    }

    let is_new = state.store.insert(&record).await? == InsertOutcome::Inserted;
    let rooms = if is_new && record.wants_broadcast() {
        fan_out(&state.hub, &record)
            .await
            .iter()
            .map(ToString::to_string)
            .collect()
    } else {
        Vec::new()
    };
    tracing::info!(
        corp_id = %record.corp_id,
        is_new,
        rooms = rooms.len(),
        "external announcement ingested"
    );
    Ok(Json(InsertResponse {
        status: "success".into(),
        is_new,
        broadcast: !rooms.is_empty(),
        rooms,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct FilingsParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
    pub symbol: Option<String>,
    pub isin: Option<String>,
    pub limit: Option<usize>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_date(name: &str, v: Option<String>) -> Result<Option<NaiveDate>, ApiError> {
    non_blank(v)
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| {
                ApiError::BadRequest(format!("{name} must be YYYY-MM-DD, got {s:?}"))
            })
        })
        .transpose()
}

impl FilingsParams {
    pub fn into_query(self) -> Result<FilingQuery, ApiError> {
        let q = FilingQuery {
            start: parse_date("start_date", self.start_date)?,
            end: parse_date("end_date", self.end_date)?,
            category: non_blank(self.category),
            symbol: non_blank(self.symbol),
            isin: non_blank(self.isin),
            limit: self.limit,
        };
        if let (Some(s), Some(e)) = (q.start, q.end) {
            if s > e {
                return Err(ApiError::BadRequest("start_date is after end_date".into()));
            }
        }
        Ok(q)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilingsResponse {
    pub count: usize,
    pub filings: Vec<FilingRecord>,
}

async fn corporate_filings(
    State(state): State<AppState>,
    Query(params): Query<FilingsParams>,
) -> Result<Json<FilingsResponse>, ApiError> {
    let q = params.into_query()?;
    let filings = state.store.query(&q).await?;
    Ok(Json(FilingsResponse {
        count: filings.len(),
        filings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filters_are_dropped() {
        let q = FilingsParams {
            start_date: Some("2025-06-01".into()),
            category: Some("  ".into()),
            symbol: Some("RELIANCE".into()),
            ..Default::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(q.start, NaiveDate::from_ymd_opt(2025, 6, 1));
        assert_eq!(q.category, None);
        assert_eq!(q.symbol.as_deref(), Some("RELIANCE"));
    }

    #[test]
    fn malformed_or_inverted_dates_are_rejected() {
        let bad = FilingsParams {
            end_date: Some("04/06/2025".into()),
            ..Default::default()
        };
        assert!(matches!(bad.into_query(), Err(ApiError::BadRequest(_))));

        let inverted = FilingsParams {
            start_date: Some("2025-06-05".into()),
            end_date: Some("2025-06-01".into()),
            ..Default::default()
        };
        assert!(matches!(inverted.into_query(), Err(ApiError::BadRequest(_))));
    }
}

// tests/providers_http.rs
//
// Exchange adapters against a local axum server serving recorded payloads, plus one
// full pipeline pass over HTTP.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};

use filings_pipeline::classify::gemini::GeminiClassifier;
use filings_pipeline::classify::rate_limit::RateLimiter;
use filings_pipeline::classify::{ClassifyError, DocumentClassifier, MockClassifier};
use filings_pipeline::config::classifier::ClassifierConfig;
use filings_pipeline::ingest::error::FetchError;
use filings_pipeline::ingest::providers::bse::{BseAdapter, BseEndpoints};
use filings_pipeline::ingest::providers::nse::{NseAdapter, NseEndpoints};
use filings_pipeline::ingest::types::{DateRange, SourceAdapter};
use filings_pipeline::pipeline::{Outcome, Pipeline, PipelineDeps};
use filings_pipeline::store::MemoryStore;

use common::{test_settings, RecordingBroadcaster, FINANCIAL_RESULTS_REPLY, RELIANCE_ISIN};

const BSE_FIXTURE: &str = include_str!("fixtures/bse_announcements.json");
const NSE_FIXTURE: &str = include_str!("fixtures/nse_announcements.json");

#[derive(Clone, Default)]
struct Hits {
    feed: Arc<AtomicUsize>,
    pages: Arc<AtomicUsize>,
    last_query: Arc<std::sync::Mutex<HashMap<String, String>>>,
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn bse_app(hits: Hits) -> Router {
    Router::new()
        .route(
            "/api/AnnSubCategoryGetData/w",
            get(
                |State(h): State<Hits>, Query(q): Query<HashMap<String, String>>| async move {
                    h.feed.fetch_add(1, Ordering::SeqCst);
                    *h.last_query.lock().unwrap() = q;
                    let body: Value = serde_json::from_str(BSE_FIXTURE).unwrap();
                    Json(body)
                },
            ),
        )
        .route(
            "/api/ComHeadernew/w",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("scripcode").map(String::as_str) {
                    Some("500325") => Json(json!({"ISIN": RELIANCE_ISIN, "SecurityId": "RELIANCE"})),
                    _ => Json(json!({"ISIN": ""})),
                }
            }),
        )
        .route(
            "/attach/{file}",
            get(|| async { ([("content-type", "application/pdf")], b"%PDF-1.4 fixture".to_vec()) }),
        )
        .with_state(hits)
}

fn bse_adapter(addr: SocketAddr) -> BseAdapter {
    BseAdapter::with_endpoints(
        BseEndpoints {
            api_base: format!("http://{addr}/api"),
            attachment_base: format!("http://{addr}/attach"),
            referer: format!("http://{addr}/"),
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn bse_feed_is_fetched_and_filtered_at_the_boundary() {
    let hits = Hits::default();
    let addr = serve(bse_app(hits.clone())).await;
    let adapter = bse_adapter(addr);

    let day = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
    let batch = adapter.fetch_batch(&DateRange::single(day)).await.unwrap();

    assert_eq!(batch.len(), 2, "placeholder and scrip-less rows dropped");
    assert_eq!(batch[0].security_id.as_deref(), Some("500325"));
    assert_eq!(batch[0].symbol.as_deref(), Some("RELIANCE"));
    assert_eq!(batch[0].company_name.as_deref(), Some("RELIANCE INDUSTRIES"));
    assert_eq!(batch[1].headline, "Closure of Trading Window");

    let q = hits.last_query.lock().unwrap().clone();
    assert_eq!(q.get("strPrevDate").map(String::as_str), Some("20250604"));
    assert_eq!(q.get("strToDate").map(String::as_str), Some("20250604"));
    assert_eq!(q.get("strType").map(String::as_str), Some("C"));
}

#[tokio::test]
async fn bse_isin_lookup_and_attachment_download() {
    let addr = serve(bse_app(Hits::default())).await;
    let adapter = bse_adapter(addr);
    let batch = adapter
        .fetch_batch(&DateRange::single(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()))
        .await
        .unwrap();

    let partial = adapter.resolve_identity(&batch[0]).await.unwrap();
    assert_eq!(partial.isin.as_deref(), Some(RELIANCE_ISIN));

    let unknown = adapter.resolve_identity(&batch[1]).await.unwrap();
    assert_eq!(unknown.isin, None);

    let dir = tempfile::tempdir().unwrap();
    let path = adapter.fetch_attachment("AR_2025.pdf", dir.path()).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 fixture");
}

#[tokio::test]
async fn upstream_errors_carry_retryability() {
    let app = Router::new()
        .route(
            "/api/AnnSubCategoryGetData/w",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route("/attach/{file}", get(|| async { StatusCode::NOT_FOUND }));
    let addr = serve(app).await;
    let adapter = bse_adapter(addr);

    let err = adapter
        .fetch_batch(&DateRange::single(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(503)));
    assert!(err.is_retryable());

    let dir = tempfile::tempdir().unwrap();
    let err = adapter.fetch_attachment("gone.pdf", dir.path()).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(404)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn nse_bootstraps_session_then_reads_array() {
    let hits = Hits::default();
    let page = |State(h): State<Hits>| async move {
        h.pages.fetch_add(1, Ordering::SeqCst);
        (
            [("set-cookie", "nsit=abc123; Path=/")],
            "<html>ok</html>",
        )
            .into_response()
    };
    let app = Router::new()
        .route("/", get(page))
        .route("/companies-listing/corporate-filings-announcements", get(page))
        .route(
            "/api/corporate-announcements",
            get(
                |State(h): State<Hits>, Query(q): Query<HashMap<String, String>>| async move {
                    h.feed.fetch_add(1, Ordering::SeqCst);
                    *h.last_query.lock().unwrap() = q;
                    let body: Value = serde_json::from_str(NSE_FIXTURE).unwrap();
                    Json(body)
                },
            ),
        )
        .with_state(hits.clone());
    let addr = serve(app).await;

    let adapter = NseAdapter::with_endpoints(
        NseEndpoints {
            base: format!("http://{addr}"),
            ..NseEndpoints::default()
        },
        Duration::from_secs(5),
    )
    .unwrap();

    let day = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
    let batch = adapter.fetch_batch(&DateRange::single(day)).await.unwrap();
    assert_eq!(hits.pages.load(Ordering::SeqCst), 2);
    assert_eq!(hits.feed.load(Ordering::SeqCst), 1);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].symbol.as_deref(), Some("INFY"));
    assert_eq!(batch[0].upstream_id.as_deref(), Some("104512881"));
    assert!(batch[0].headline.contains("Outcome of Board Meeting"));
    assert!(!batch[0].headline.contains('<'));

    let q = hits.last_query.lock().unwrap().clone();
    assert_eq!(q.get("from_date").map(String::as_str), Some("04-06-2025"));
    assert_eq!(q.get("index").map(String::as_str), Some("equities"));

    let partial = adapter.resolve_identity(&batch[1]).await.unwrap();
    assert_eq!(partial.isin.as_deref(), Some("INE467B01029"));
}

#[tokio::test]
async fn bse_items_flow_through_the_pipeline_over_http() {
    let addr = serve(bse_app(Hits::default())).await;
    let source = Arc::new(bse_adapter(addr));
    let classifier = Arc::new(MockClassifier::replying(FINANCIAL_RESULTS_REPLY));
    let store = Arc::new(MemoryStore::new());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let state = tempfile::tempdir().unwrap();

    let mut p = Pipeline::new(
        PipelineDeps {
            source: source.clone(),
            classifier: classifier.clone(),
            limiter: Arc::new(RateLimiter::per_minute(100)),
            store: store.clone(),
            broadcaster: broadcaster.clone(),
        },
        test_settings(state.path()),
    )
    .await
    .unwrap();

    let batch = source
        .fetch_batch(&DateRange::single(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap()))
        .await
        .unwrap();

    // The fixture dates are long past, so the item is stored but not pushed.
    assert_eq!(p.process(&batch[0]).await, Outcome::Archived);
    assert!(matches!(p.process(&batch[1]).await, Outcome::Discarded(_)));
    assert_eq!(classifier.calls(), 1);
    assert_eq!(broadcaster.count(), 0);

    let rows = store.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].category.as_deref(), Some("Financial Results"));
    assert_eq!(rows[0].date.as_deref(), Some("2025-06-04T10:15:30"));
    assert_eq!(
        rows[0].fileurl,
        Some(format!("http://{addr}/attach/AR_2025.pdf"))
    );
}

#[tokio::test]
async fn gemini_status_codes_map_to_retryability() {
    let app = Router::new()
        .route(
            "/ok/v1beta/models/{model}",
            axum::routing::post(|| async {
                Json(json!({"candidates": [{"content": {"parts": [{"text": FINANCIAL_RESULTS_REPLY}]}}]}))
            }),
        )
        .route(
            "/bad/v1beta/models/{model}",
            axum::routing::post(|| async { StatusCode::BAD_REQUEST }),
        )
        .route(
            "/busy/v1beta/models/{model}",
            axum::routing::post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route(
            "/blank/v1beta/models/{model}",
            axum::routing::post(|| async { Json(json!({"candidates": []})) }),
        );
    let addr = serve(app).await;
    let dir = tempfile::tempdir().unwrap();
    let doc = dir.path().join("AR_2025.pdf");
    std::fs::write(&doc, b"%PDF-1.4 fixture").unwrap();

    let gemini = |prefix: &str| {
        GeminiClassifier::from_config(&ClassifierConfig {
            api_key: "test-key".into(),
            endpoint: Some(format!("http://{addr}/{prefix}")),
            ..ClassifierConfig::default()
        })
        .unwrap()
    };

    let text = gemini("ok").classify(&doc).await.unwrap();
    assert!(text.starts_with("**Category:** Financial Results"));

    let bad = gemini("bad").classify(&doc).await.unwrap_err();
    assert!(matches!(bad, ClassifyError::Status(400)));
    assert!(!bad.is_retryable());

    let busy = gemini("busy").classify(&doc).await.unwrap_err();
    assert!(matches!(busy, ClassifyError::Status(503)));
    assert!(busy.is_retryable());

    let blank = gemini("blank").classify(&doc).await.unwrap_err();
    assert!(matches!(blank, ClassifyError::Empty));
    assert!(!blank.is_retryable());
}

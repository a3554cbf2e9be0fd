// src/ingest/mod.rs
pub mod config;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod filter;
pub mod isin;
pub mod providers;
pub mod retry;
pub mod timestamp;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Raw announcements parsed from exchange feeds.");
        describe_counter!(
            "pipeline_items_total",
            "Announcements processed, labelled by exchange and outcome."
        );
        describe_counter!(
            "pipeline_fetch_errors_total",
            "Batch fetches that failed after all retries."
        );
        describe_counter!(
            "pipeline_classifier_fallbacks_total",
            "Classifications that fell back to the default category."
        );
        describe_counter!("broadcast_published_total", "Topic publications sent to the hub.");
        describe_histogram!("ingest_fetch_ms", "Exchange feed fetch time in milliseconds.");
        describe_histogram!("pipeline_classify_ms", "Document classification time in milliseconds.");
        describe_gauge!("pipeline_last_tick_ts", "Unix ts of the last completed poll tick.");
        describe_gauge!("dedup_cache_size", "Entries held by the deduplication cache.");
    });
}

/// Plain-text headline: entities decoded, markup dropped, whitespace collapsed.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    let decoded = html_escape::decode_html_entities(s);
    let untagged = re_tags.replace_all(&decoded, " ");
    untagged.split_whitespace().collect::<Vec<_>>().join(" ")
}

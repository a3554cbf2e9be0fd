// tests/dedup_cache.rs
use filings_pipeline::ingest::dedup::{content_hash, DedupCache, DedupConfig};
use filings_pipeline::ingest::types::{Exchange, Identity};

fn ident(id: usize) -> Identity {
    Identity {
        exchange: Exchange::Nse,
        upstream_id: Some(format!("seq-{id}")),
        fingerprint: content_hash(Some("Acme"), None, Some(&format!("headline {id}")), None, None),
    }
}

#[test]
fn overflow_evicts_least_recently_used() {
    let max = 10;
    let mut cache = DedupCache::new(DedupConfig {
        max_size: max,
        evict_to: max,
        persist_path: None,
        persist_every: 0,
    });
    for i in 0..=max {
        cache.add(&ident(i));
    }
    assert!(cache.len() <= max);
    assert!(!cache.contains(&ident(0)), "oldest entry must go first");
    assert!(cache.contains(&ident(max)));
}

#[test]
fn default_eviction_halves_the_cache() {
    let mut cache = DedupCache::new(DedupConfig::in_memory(8));
    for i in 0..9 {
        cache.add(&ident(i));
    }
    assert_eq!(cache.len(), 4);
    for i in 5..9 {
        assert!(cache.contains(&ident(i)), "recent entry {i} kept");
    }
}

#[test]
fn same_content_under_new_id_is_a_hit() {
    let mut cache = DedupCache::new(DedupConfig::in_memory(10));
    cache.add(&ident(1));

    let mut reissued = ident(1);
    reissued.upstream_id = Some("seq-999".into());
    assert!(cache.contains(&reissued));
}

#[test]
fn save_and_load_roundtrip_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("nse_dedup_cache.json");
    let cfg = DedupConfig {
        max_size: 50,
        evict_to: 25,
        persist_path: Some(path.clone()),
        persist_every: 0,
    };

    let mut cache = DedupCache::new(cfg.clone());
    for i in 0..3 {
        cache.add(&ident(i));
    }
    cache.save().unwrap();
    assert!(path.exists());

    let mut reloaded = DedupCache::load(cfg);
    assert_eq!(reloaded.len(), 3);
    assert!(reloaded.contains(&ident(2)));
}

#[test]
fn corrupt_state_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bse_dedup_cache.json");
    std::fs::write(&path, b"{ not json").unwrap();
    let cache = DedupCache::load(DedupConfig {
        persist_path: Some(path),
        ..DedupConfig::in_memory(10)
    });
    assert!(cache.is_empty());
}

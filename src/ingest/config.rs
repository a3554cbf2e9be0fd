// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::filter::KeywordPolicy;

pub const ENV_KEYWORD_POLICY_PATH: &str = "KEYWORD_POLICY_PATH";

/// Load a keyword policy from an explicit path. Supports TOML or JSON formats.
pub fn load_policy_from(path: &Path) -> Result<KeywordPolicy> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading keyword policy from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_policy(&content, ext.as_str())
        .with_context(|| format!("parsing keyword policy {}", path.display()))
}

/// Load the keyword policy using env var + fallbacks:
/// 1) $KEYWORD_POLICY_PATH
/// 2) config/keyword_policy.toml
/// 3) config/keyword_policy.json
/// 4) built-in lists
pub fn load_policy_default() -> Result<KeywordPolicy> {
    if let Ok(p) = std::env::var(ENV_KEYWORD_POLICY_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_policy_from(&pb);
        }
        return Err(anyhow!("{ENV_KEYWORD_POLICY_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/keyword_policy.toml");
    if toml_p.exists() {
        return load_policy_from(&toml_p);
    }
    let json_p = PathBuf::from("config/keyword_policy.json");
    if json_p.exists() {
        return load_policy_from(&json_p);
    }
    Ok(KeywordPolicy::default())
}

fn parse_policy(s: &str, hint_ext: &str) -> Result<KeywordPolicy> {
    let parsed = if hint_ext == "json" {
        serde_json::from_str::<KeywordPolicy>(s).map_err(anyhow::Error::from)
    } else {
        toml::from_str::<KeywordPolicy>(s)
            .map_err(anyhow::Error::from)
            .or_else(|_| serde_json::from_str::<KeywordPolicy>(s).map_err(anyhow::Error::from))
    }?;
    Ok(KeywordPolicy::new(
        clean_list(parsed.negative),
        clean_list(parsed.special),
    ))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

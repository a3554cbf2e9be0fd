// src/config/classifier.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_CLASSIFIER_CONFIG_PATH: &str = "config/classifier.json";
pub const ENV_CLASSIFIER_CONFIG_PATH: &str = "CLASSIFIER_CONFIG_PATH";

fn default_enabled() -> bool {
    true
}
fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_api_key() -> String {
    "ENV".into()
}
fn default_rpm() -> u32 {
    15
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_document_bytes() -> u64 {
    20 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Only "gemini" is wired up.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GEMINI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_rpm")]
    pub rpm_limit: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
    /// Override of the provider base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            rpm_limit: default_rpm(),
            timeout_secs: default_timeout_secs(),
            max_document_bytes: default_max_document_bytes(),
            endpoint: None,
        }
    }
}

impl ClassifierConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let cfg: ClassifierConfig = serde_json::from_str(&data)?;
        cfg.resolved()
    }

    /// `$CLASSIFIER_CONFIG_PATH`, then `config/classifier.json`, then defaults; env
    /// overrides `CLASSIFIER_ENABLED`, `CLASSIFIER_MODEL`, `CLASSIFIER_RPM` and
    /// `CLASSIFIER_TIMEOUT_SECS` on top.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = env::var(ENV_CLASSIFIER_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_CLASSIFIER_CONFIG_PATH.to_string());
        let mut cfg = if Path::new(&path).exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str::<ClassifierConfig>(&data)
                .map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))?
        } else if env::var(ENV_CLASSIFIER_CONFIG_PATH).is_ok() {
            anyhow::bail!("{ENV_CLASSIFIER_CONFIG_PATH} points to non-existent path {path}");
        } else {
            ClassifierConfig::default()
        };

        if let Ok(v) = env::var("CLASSIFIER_ENABLED") {
            cfg.enabled = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(v) = env::var("CLASSIFIER_MODEL") {
            if !v.trim().is_empty() {
                cfg.model = v.trim().to_string();
            }
        }
        if let Some(rpm) = env::var("CLASSIFIER_RPM").ok().and_then(|v| v.trim().parse().ok()) {
            cfg.rpm_limit = rpm;
        }
        if let Some(secs) = env::var("CLASSIFIER_TIMEOUT_SECS").ok().and_then(|v| v.trim().parse().ok()) {
            cfg.timeout_secs = secs;
        }
        cfg.resolved()
    }

    /// Normalize provider and resolve the "ENV" key indirection. A disabled classifier
    /// never needs a key.
    fn resolved(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();
        if self.rpm_limit == 0 {
            self.rpm_limit = default_rpm();
        }
        if !self.enabled {
            return Ok(self);
        }
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "gemini" => env::var("GEMINI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing GEMINI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }
        if self.api_key.trim().is_empty() {
            anyhow::bail!("classifier enabled but api key is empty");
        }
        Ok(self)
    }
}

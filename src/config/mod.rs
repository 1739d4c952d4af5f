// src/config/mod.rs
//! Configuration: optional TOML/JSON file, then environment overrides
//! (`CONCURRENCY`, `BRAVE_MAX_RETRIES`, `FETCH_CACHE_TTL_S`, ...).

pub mod fetch;

pub use fetch::{CacheConfig, FetchConfig, ProviderSettings};

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENV_CONFIG_PATH: &str = "DEEP_RESEARCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/deep_research.toml";

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<FetchConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, &ext)
        .with_context(|| format!("parsing config in {}", path.display()))?;
    cfg.sanitize();
    Ok(cfg)
}

/// Load config using env var + fallbacks, then apply env overrides:
/// 1) $DEEP_RESEARCH_CONFIG
/// 2) config/deep_research.toml
/// 3) built-in defaults
pub fn load_default() -> Result<FetchConfig> {
    let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        load_from(&pb)?
    } else {
        let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            load_from(&fallback)?
        } else {
            FetchConfig::default()
        }
    };
    apply_env_overrides(&mut cfg);
    cfg.sanitize();
    Ok(cfg)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<FetchConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    match toml::from_str(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported config format: {toml_err}")),
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Seconds (possibly fractional) → milliseconds.
fn env_secs_ms(name: &str) -> Option<u64> {
    env_parse::<f64>(name)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| (v * 1_000.0).round() as u64)
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn apply_provider_env(s: &mut ProviderSettings, prefix: &str) {
    if let Some(v) = env_parse(&format!("{prefix}_MAX_RETRIES")) {
        s.max_retries = v;
    }
    if let Some(v) = env_secs_ms(&format!("{prefix}_QUERY_DELAY_S")) {
        s.query_delay_ms = v;
    }
    if let Some(v) = env_secs_ms(&format!("{prefix}_MAX_DELAY_S")) {
        s.max_delay_ms = v;
    }
    if let Some(v) = env_secs_ms(&format!("{prefix}_TIMEOUT_S")) {
        s.timeout_ms = v;
    }
}

pub fn apply_env_overrides(cfg: &mut FetchConfig) {
    if let Some(v) = env_parse("CONCURRENCY") {
        cfg.concurrency = v;
    }
    if let Some(v) = env_parse("MIN_CITATION_COUNT") {
        cfg.min_citation_count = v;
    }
    if let Ok(v) = std::env::var("USER_AGENT") {
        cfg.user_agent = v;
    }
    if let Some(v) = env_flag("FETCH_CACHE_ENABLED") {
        cfg.cache.enabled = v;
    }
    if let Ok(v) = std::env::var("FETCH_CACHE_DIR") {
        cfg.cache.dir = PathBuf::from(v);
    }
    if let Some(v) = env_parse("FETCH_CACHE_TTL_S") {
        cfg.cache.ttl_secs = v;
    }
    if let Some(v) = env_parse("FETCH_CACHE_MAX_BYTES") {
        cfg.cache.max_bytes = v;
    }
    if let Ok(v) = std::env::var("DIRECTIVE_RULES_PATH") {
        cfg.directive_rules_path = Some(PathBuf::from(v));
    }
    apply_provider_env(&mut cfg.brave, "BRAVE");
    apply_provider_env(&mut cfg.semantic_scholar, "SEMANTIC");
    apply_provider_env(&mut cfg.web, "WEB");
}

/// Provider credentials, read from the environment only.
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub brave: Option<String>,
    pub semantic_scholar: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Safe diagnostics: only key lengths
        f.debug_struct("ApiKeys")
            .field("brave_len", &self.brave.as_ref().map(String::len))
            .field(
                "semantic_scholar_len",
                &self.semantic_scholar.as_ref().map(String::len),
            )
            .finish()
    }
}

impl ApiKeys {
    pub fn from_env() -> Self {
        let read = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            brave: read("BRAVE_API_KEY"),
            semantic_scholar: read("SEMANTIC_SCHOLAR_API_KEY"),
        }
    }

    /// Brave is required; Semantic Scholar works (more slowly) without a key.
    pub fn validate(&self) -> Result<()> {
        if self.brave.is_none() {
            return Err(anyhow!("Missing API keys: BRAVE_API_KEY"));
        }
        Ok(())
    }
}

//! Service configuration, loaded from `config.toml`.
//!
//! Resolution order: explicit `--config` path → `ACTIONGATE_CONFIG` env →
//! `<platform config dir>/actiongate/config.toml`. A missing file yields
//! the defaults; a malformed file is an error.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

/// Top-level ActionGate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway server configuration (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Language-model completion service (`[llm]`).
    #[serde(default)]
    pub llm: LlmConfig,

    /// Missing-parameter correction loop (`[correction]`).
    #[serde(default)]
    pub correction: CorrectionConfig,

    /// Transient confirmation cache (`[cache]`).
    #[serde(default)]
    pub cache: CacheConfig,

    /// Durable store (`[store]`).
    #[serde(default)]
    pub store: StoreConfig,
}

/// Gateway server settings: bind address, rate limits, mock endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host. Default: 127.0.0.1.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port. Default: 8080.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Confirm requests allowed per token per minute. 0 disables limiting.
    #[serde(default = "default_rate_limit")]
    pub confirm_per_minute: u32,
    /// Outbound HTTP timeout per action call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Base URL substituted for every action host in mock mode.
    /// Default: the gateway's own `/api/mock` endpoint.
    #[serde(default)]
    pub mock_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            confirm_per_minute: default_rate_limit(),
            request_timeout_secs: default_request_timeout(),
            mock_url: None,
        }
    }
}

/// Completion-service settings for the correction loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (e.g. `https://api.openai.com/v1`).
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// API key. Overridden by `ACTIONGATE_LLM_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model routed through the completion service.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Sampling temperature for correction prompts.
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_llm_temperature(),
        }
    }
}

/// Bounds on the correction loop's prompt size and response length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Most recent conversation turns kept when trimming history.
    #[serde(default = "default_max_turns")]
    pub max_history_turns: usize,
    /// Approximate token budget for trimmed history.
    #[serde(default = "default_history_tokens")]
    pub history_token_budget: usize,
    /// Maximum tokens the model may spend on a single correction answer.
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_history_turns: default_max_turns(),
            history_token_budget: default_history_tokens(),
            max_response_tokens: default_max_response_tokens(),
        }
    }
}

/// Transient confirmation-cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the transient cache is used at all. When disabled every
    /// confirm goes through the durable-history fallback.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pending-batch lifetime in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database. Default: `actiongate.db` in the
    /// platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

// ── Defaults ─────────────────────────────────────────────────────

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> u32 {
    18 // 3 per 10s, as a per-minute window
}

fn default_request_timeout() -> u64 {
    30
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_llm_temperature() -> f64 {
    0.0
}

fn default_max_turns() -> usize {
    3
}

fn default_history_tokens() -> usize {
    100
}

fn default_max_response_tokens() -> u32 {
    100
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

// ── Loading ──────────────────────────────────────────────────────

impl Config {
    /// Load configuration, falling back to defaults when no file exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var_os("ACTIONGATE_CONFIG")
                .map(PathBuf::from)
                .or_else(default_config_path),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config at {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("invalid config at {}", p.display()))?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string. Used by tests and tooling.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw).context("invalid config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ACTIONGATE_LLM_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("ACTIONGATE_LLM_BASE_URL") {
            if !url.is_empty() {
                self.llm.base_url = url;
            }
        }
    }

    /// Resolve the SQLite database path, creating the parent directory.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(p) = &self.store.path {
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
            return Ok(p.clone());
        }
        let dirs = ProjectDirs::from("", "", "actiongate")
            .context("could not determine platform data directory")?;
        std::fs::create_dir_all(dirs.data_dir()).with_context(|| {
            format!("failed to create data directory {}", dirs.data_dir().display())
        })?;
        Ok(dirs.data_dir().join("actiongate.db"))
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "actiongate").map(|d| d.config_dir().join("config.toml"))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_constructible() {
        let config = Config::default();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 8080);
        assert!(config.cache.enabled);
        assert_eq!(config.correction.max_history_turns, 3);
        assert_eq!(config.correction.max_response_tokens, 100);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
[gateway]
port = 9090

[llm]
model = "gpt-4o"
"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 9090);
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.cache.ttl_secs, 600);
    }

    #[test]
    fn correction_section_fills_unset_fields_with_defaults() {
        let config = Config::from_toml("[correction]\nmax_history_turns = 5").unwrap();
        assert_eq!(config.correction.max_history_turns, 5);
        assert_eq!(config.correction.history_token_budget, 100);
        assert_eq!(config.correction.max_response_tokens, 100);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.gateway.confirm_per_minute, 18);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[gateway]\nport = \"not a number\"").is_err());
    }

    #[test]
    fn rate_limit_zero_is_representable() {
        let config = Config::from_toml("[gateway]\nconfirm_per_minute = 0").unwrap();
        assert_eq!(config.gateway.confirm_per_minute, 0);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.gateway.port, config.gateway.port);
        assert_eq!(reparsed.llm.model, config.llm.model);
    }
}

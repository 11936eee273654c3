//! TOML configuration.
//!
//! Every command reads a single file (default `./config/sdg.toml`). Secrets
//! may be left out of the file and supplied through the environment instead:
//! `SDG_AUTH_PASSWORD`, `SDG_ADMIN_PASSWORD`, `SDG_SESSION_SECRET`, and the
//! API key variable named by `[llm].api_key_env`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "LlmConfig::suggest_defaults")]
    pub suggest: LlmConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub seeds: SeedsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: None,
            admin_password: None,
            session_secret: None,
            session_ttl_days: default_session_ttl_days(),
        }
    }
}

fn default_session_ttl_days() -> i64 {
    365
}

impl AuthConfig {
    /// Shared login password, file value first, then `SDG_AUTH_PASSWORD`.
    pub fn password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("SDG_AUTH_PASSWORD").ok())
            .filter(|p| !p.is_empty())
    }

    pub fn admin_password(&self) -> Option<String> {
        self.admin_password
            .clone()
            .or_else(|| std::env::var("SDG_ADMIN_PASSWORD").ok())
            .filter(|p| !p.is_empty())
    }

    pub fn session_secret(&self) -> Option<String> {
        self.session_secret
            .clone()
            .or_else(|| std::env::var("SDG_SESSION_SECRET").ok())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,
    #[serde(default = "default_max_sitemaps")]
    pub max_sitemaps: usize,
    #[serde(default = "default_crawl_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
    #[serde(default = "default_rate_limit_ms")]
    pub default_rate_limit_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            max_depth: default_max_depth(),
            max_urls: default_max_urls(),
            max_sitemaps: default_max_sitemaps(),
            timeout_secs: default_crawl_timeout_secs(),
            max_download_bytes: default_max_download_bytes(),
            default_rate_limit_ms: default_rate_limit_ms(),
        }
    }
}

fn default_user_agent() -> String {
    "sdg-discovery/1.0 (+source-discovery)".to_string()
}
fn default_max_depth() -> usize {
    3
}
fn default_max_urls() -> usize {
    5000
}
fn default_max_sitemaps() -> usize {
    50
}
fn default_crawl_timeout_secs() -> u64 {
    30
}
fn default_max_download_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_rate_limit_ms() -> u64 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl LlmConfig {
    /// Defaults for the `[suggest]` section: a Grok model on the xAI API.
    fn suggest_defaults() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".to_string(),
            model: "grok-3-mini".to_string(),
            api_key_env: "XAI_API_KEY".to_string(),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_input_chars() -> usize {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    #[serde(default = "default_registry_path")]
    pub registry: PathBuf,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            registry: default_registry_path(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("./prompts/registry.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedsConfig {
    #[serde(default = "default_sources_seed")]
    pub sources: PathBuf,
}

impl Default for SeedsConfig {
    fn default() -> Self {
        Self {
            sources: default_sources_seed(),
        }
    }
}

fn default_sources_seed() -> PathBuf {
    PathBuf::from("./seeds/sources.eu.json")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.crawl.max_depth == 0 {
        anyhow::bail!("crawl.max_depth must be >= 1");
    }
    if config.crawl.max_urls == 0 {
        anyhow::bail!("crawl.max_urls must be >= 1");
    }
    if config.crawl.max_sitemaps == 0 {
        anyhow::bail!("crawl.max_sitemaps must be >= 1");
    }
    if config.crawl.default_rate_limit_ms > 60_000 {
        anyhow::bail!("crawl.default_rate_limit_ms must be <= 60000");
    }
    if config.auth.session_ttl_days < 1 {
        anyhow::bail!("auth.session_ttl_days must be >= 1");
    }

    for (section, llm) in [("llm", &config.llm), ("suggest", &config.suggest)] {
        match llm.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {}.provider: '{}'. Must be disabled or openai.",
                section,
                other
            ),
        }
        if llm.is_enabled() && llm.model.trim().is_empty() {
            anyhow::bail!("{}.model must be specified when provider is enabled", section);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/sdg.sqlite\"\n").unwrap();
        assert_eq!(cfg.crawl.max_depth, 3);
        assert_eq!(cfg.crawl.default_rate_limit_ms, 1500);
        assert!(!cfg.llm.is_enabled());
        assert_eq!(cfg.suggest.api_key_env, "XAI_API_KEY");
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
    }

    #[test]
    fn rejects_zero_depth() {
        let err = parse_config("[db]\npath = \"x\"\n[crawl]\nmax_depth = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_depth"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse_config("[db]\npath = \"x\"\n[llm]\nprovider = \"mystery\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm.provider"));
    }
}

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Protocol constants — shared between server and client state machines.
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per frame
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // close if client doesn't auth in 10s

/// Default deadline for a single tools/call request.
pub const TOOL_CALL_TIMEOUT_MS: u64 = 10_000;
/// Per-server deadline for a tools/list discovery request.
pub const DISCOVERY_TIMEOUT_MS: u64 = 3_000;
/// Discovery cache entries expire after this many seconds.
pub const DISCOVERY_CACHE_TTL_SECS: i64 = 300;

/// Raw-turn window for the rolling-summary strategy.
pub const SUMMARY_WINDOW_TURNS: usize = 8;

/// Reconnect budget for a session connection.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY_MS: u64 = 500;
pub const RECONNECT_MAX_DELAY_MS: u64 = 15_000;

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParleyConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl ParleyConfig {
    /// Load config: explicit path > PARLEY_CONFIG env > ~/.parley/parley.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ParleyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PARLEY_").split("_"))
            .extract()
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley/parley.toml", home)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

/// Static token table for the built-in validator: token -> user id.
///
/// Deployments with a real auth service replace the validator entirely;
/// this table exists so a single-node install works out of the box.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley/parley.db", home)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            api_key: String::new(),
            model: default_model_name(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: i64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_summary_window")]
    pub summary_window_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            summary_window_turns: default_summary_window(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_model_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_call_timeout_ms() -> u64 {
    TOOL_CALL_TIMEOUT_MS
}

fn default_discovery_timeout_ms() -> u64 {
    DISCOVERY_TIMEOUT_MS
}

fn default_cache_ttl_secs() -> i64 {
    DISCOVERY_CACHE_TTL_SECS
}

fn default_summary_window() -> usize {
    SUMMARY_WINDOW_TURNS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.tools.call_timeout_ms, TOOL_CALL_TIMEOUT_MS);
        assert_eq!(cfg.memory.summary_window_turns, SUMMARY_WINDOW_TURNS);
    }
}

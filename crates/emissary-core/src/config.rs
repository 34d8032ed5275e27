use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default inline share of a model's context window.
pub const DEFAULT_INLINE_BUDGET_RATIO: f64 = 0.85;
/// Default session TTL in seconds (6 hours).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 6 * 3600;
/// Probability that a write triggers a purge of expired cache rows.
pub const DEFAULT_PURGE_PROBABILITY: f64 = 0.01;
/// Documents per memory store before rolling over to a fresh one.
pub const DEFAULT_ROLLOVER_LIMIT: u32 = 2000;
/// Worker pool size for blocking SQLite / SDK calls.
pub const DEFAULT_BLOCKING_WORKERS: usize = 20;

/// Top-level config (emissary.toml + EMISSARY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmissaryConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub follow: FollowConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

/// Live-follow of CLI agent sessions (Codex, Claude, Gemini transcripts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowConfig {
    /// Directories searched for CLI transcript files. `~` expands to $HOME.
    #[serde(default = "default_transcript_dirs")]
    pub transcript_dirs: Vec<String>,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            transcript_dirs: default_transcript_dirs(),
        }
    }
}

fn default_transcript_dirs() -> Vec<String> {
    vec![
        "~/.codex/sessions".to_string(),
        "~/.claude/projects".to_string(),
        "~/.gemini/tmp".to_string(),
    ]
}

/// Expand a leading `~` to $HOME.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(home).join(rest);
    }
    PathBuf::from(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// State directory. Defaults to `~/.emissary`.
    pub state_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            log_level: default_log_level(),
            state_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiConfig>,
    pub vertex: Option<VertexConfig>,
    pub xai: Option<XaiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    /// Path to a GCP service account JSON key file.
    pub service_account_path: String,
    pub project: Option<String>,
    #[serde(default = "default_vertex_location")]
    pub location: String,
    /// Access tokens are renewed this many seconds before they lapse.
    #[serde(default = "default_token_leeway")]
    pub token_refresh_leeway_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaiConfig {
    pub api_key: String,
    #[serde(default = "default_xai_base")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_inline_budget_ratio")]
    pub inline_budget_ratio: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            inline_budget_ratio: default_inline_budget_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_purge_probability")]
    pub purge_probability: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            purge_probability: default_purge_probability(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_rollover_limit")]
    pub rollover_limit: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rollover_limit: default_rollover_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_loiter_url")]
    pub loiter_killer_url: String,
    /// Allow `get_all_for_session` to report locally-tracked stores even when
    /// the loiter killer owns store lifecycles.
    #[serde(default)]
    pub attachment_search_all_stores: bool,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            loiter_killer_url: default_loiter_url(),
            attachment_search_all_stores: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    /// Short-circuit provider and vector-store calls with synthetic results.
    #[serde(default)]
    pub adapter_mock: bool,
}

impl EmissaryConfig {
    /// Load config: explicit path > EMISSARY_CONFIG env > ~/.emissary/emissary.toml.
    /// Env vars prefixed `EMISSARY_` override file values (nested keys use `__`).
    pub fn load(explicit_path: Option<&str>) -> Result<Self, figment::Error> {
        let path = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("EMISSARY_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| default_state_dir().join("emissary.toml"));

        let mut figment = Figment::new();
        if path.exists() {
            figment = figment.merge(Toml::file(&path));
        }
        figment
            .merge(Env::prefixed("EMISSARY_").split("__"))
            .extract()
    }

    /// Resolved state directory; created lazily by the stores that live in it.
    pub fn state_dir(&self) -> PathBuf {
        self.server
            .state_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir)
    }
}

fn default_state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".emissary")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_vertex_location() -> String {
    "us-central1".to_string()
}

fn default_token_leeway() -> u64 {
    90
}

fn default_xai_base() -> String {
    "https://api.x.ai".to_string()
}

fn default_inline_budget_ratio() -> f64 {
    DEFAULT_INLINE_BUDGET_RATIO
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_purge_probability() -> f64 {
    DEFAULT_PURGE_PROBABILITY
}

fn default_rollover_limit() -> u32 {
    DEFAULT_ROLLOVER_LIMIT
}

fn default_loiter_url() -> String {
    "http://127.0.0.1:8547".to_string()
}

fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EmissaryConfig::default();
        assert_eq!(cfg.context.inline_budget_ratio, 0.85);
        assert_eq!(cfg.session.ttl_secs, 6 * 3600);
        assert_eq!(cfg.memory.rollover_limit, 2000);
        assert!(cfg.memory.enabled);
        assert!(!cfg.dev.adapter_mock);
        assert!(!cfg.services.attachment_search_all_stores);
    }

    #[test]
    fn state_dir_honours_override() {
        let mut cfg = EmissaryConfig::default();
        cfg.server.state_path = Some("/tmp/emissary-test".to_string());
        assert_eq!(cfg.state_dir(), PathBuf::from("/tmp/emissary-test"));
    }
}

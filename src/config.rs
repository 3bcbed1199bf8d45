//! Server configuration: a TOML file overridden by `CSTP_*` environment
//! variables, loaded once at startup.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Memory,
}

impl Default for VectorBackend {
    fn default() -> Self {
        VectorBackend::Memory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionBackend {
    Memory,
    Sqlite,
}

impl Default for DecisionBackend {
    fn default() -> Self {
        DecisionBackend::Sqlite
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_secs: 10,
        }
    }
}

/// Process-wide configuration, assembled from an optional TOML file and
/// environment overrides (`CSTP_HOST`, `CSTP_PORT`, `CSTP_LOG_LEVEL`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,

    pub decision_backend: DecisionBackend,
    pub decisions_path: PathBuf,

    pub vector_backend: VectorBackend,

    pub embedding: EmbeddingConfig,

    pub guardrails_paths: Vec<PathBuf>,
    pub graph_journal_path: PathBuf,

    pub tracker_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
    pub handler_budget_seconds: u64,

    /// `agent-id -> secret`, parsed from `agent-id:secret` bearer tokens.
    pub auth_tokens: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
            log_level: "info".to_string(),
            decision_backend: DecisionBackend::default(),
            decisions_path: PathBuf::from("data/decisions.sqlite3"),
            vector_backend: VectorBackend::default(),
            embedding: EmbeddingConfig::default(),
            guardrails_paths: vec![PathBuf::from("guardrails")],
            graph_journal_path: PathBuf::from("data/graph.jsonl"),
            tracker_ttl_seconds: 300,
            request_timeout_seconds: 10,
            handler_budget_seconds: 15,
            auth_tokens: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads `path` if it exists (otherwise starts from defaults), then
    /// applies `CSTP_*` environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| Error::Internal(format!("failed to read config file {path:?}: {e}")))?;
                toml::from_str(&contents)
                    .map_err(|e| Error::Internal(format!("failed to parse config file {path:?}: {e}")))?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CSTP_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("CSTP_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(level) = std::env::var("CSTP_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(path) = std::env::var("CSTP_DECISIONS_PATH") {
            self.decisions_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("CSTP_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("CSTP_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Ok(tokens) = std::env::var("CSTP_AUTH_TOKENS") {
            for pair in tokens.split(',').filter(|s| !s.is_empty()) {
                if let Some((agent_id, secret)) = pair.split_once(':') {
                    self.auth_tokens.insert(agent_id.to_string(), secret.to_string());
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tracker_ttl_seconds == 0 {
            return Err(Error::Internal("tracker_ttl_seconds must be greater than zero".into()));
        }
        if self.request_timeout_seconds == 0 || self.handler_budget_seconds == 0 {
            return Err(Error::Internal("timeout and budget settings must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 8420);
    }

    #[test]
    fn parses_auth_tokens_from_env_format() {
        let mut config = Config::default();
        std::env::set_var("CSTP_AUTH_TOKENS", "agent-a:secret-a,agent-b:secret-b");
        config.apply_env_overrides();
        std::env::remove_var("CSTP_AUTH_TOKENS");
        assert_eq!(config.auth_tokens.get("agent-a"), Some(&"secret-a".to_string()));
        assert_eq!(config.auth_tokens.get("agent-b"), Some(&"secret-b".to_string()));
    }
}

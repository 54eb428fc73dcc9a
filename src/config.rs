//! Session settings and the application configuration consulted by the
//! JWT steps.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Host every request is routed through unless the session overrides it.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Knobs for one test session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed base host; absolute hrefs under it are reduced to paths.
    pub base_url: String,
    /// Log `> METHOD path` / `< status` for every request.
    pub debug_rest: bool,
    /// Log the response body even for successful responses.
    pub debug_response: bool,
    /// Log every clock change.
    pub debug_time: bool,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            debug_rest: false,
            debug_response: false,
            debug_time: false,
        }
    }

    /// Read the `DEBUG_REST`, `DEBUG_RESPONSE` and `DEBUG_TIME` toggles.
    pub fn from_env() -> Self {
        Self {
            debug_rest: env_flag("DEBUG_REST"),
            debug_response: env_flag("DEBUG_RESPONSE"),
            debug_time: env_flag("DEBUG_TIME"),
            ..Self::new()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Configuration of the application under test.
///
/// Only `public_key` and `jwt_algorithm` are read by this crate; any
/// other keys are carried for callers.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    values: HashMap<String, Value>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Key used to verify bearer tokens (PEM, or a shared secret for HS*).
    pub fn public_key(&self) -> Option<&str> {
        self.get("public_key").and_then(Value::as_str)
    }

    pub fn jwt_algorithm(&self) -> &str {
        self.get("jwt_algorithm")
            .and_then(Value::as_str)
            .unwrap_or("RS256")
    }

    /// Parse a flat YAML mapping.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let values: HashMap<String, Value> =
            serde_yaml::from_str(yaml).context("Failed to parse app config YAML")?;
        Ok(Self { values })
    }

    /// Load from a YAML file; `PUBLIC_KEY` in the environment wins.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading app config from {}", path.display());

        let content = fs::read_to_string(path).context(format!(
            "Failed to read app config: {}",
            path.display()
        ))?;
        let mut config = Self::from_yaml(&content).context(format!(
            "Failed to load app config from {}",
            path.display()
        ))?;

        if let Ok(key) = std::env::var("PUBLIC_KEY") {
            debug!("public_key overridden from environment");
            config.set("public_key", key);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = SessionConfig::new().with_base_url("http://localhost:9000/");
        assert_eq!(config.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(!config.debug_rest);
    }

    #[test]
    fn test_app_config_from_yaml() {
        let config = AppConfig::from_yaml(
            "public_key: secret\njwt_algorithm: HS256\nport: 8080\n",
        )
        .unwrap();
        assert_eq!(config.public_key(), Some("secret"));
        assert_eq!(config.jwt_algorithm(), "HS256");
        assert_eq!(config.get("port"), Some(&Value::from(8080)));
    }

    #[test]
    fn test_algorithm_defaults_to_rs256() {
        assert_eq!(AppConfig::new().jwt_algorithm(), "RS256");
        assert_eq!(AppConfig::new().public_key(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(&path, "jwt_algorithm: HS512\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.jwt_algorithm(), "HS512");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = AppConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read app config"));
    }
}

//! Configuration management for Triad
//!
//! Components are configured with in-memory values. A TOML file is an
//! optional convenience for hosts that keep endpoint tables and request
//! defaults outside the code.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV_VAR: &str = "TRIAD_CONFIG";

/// Root selector used when a view does not name one
pub const DEFAULT_MAIN_SELECTOR: &str = "body";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named endpoints, seeded into a model's config bag
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_response_type")]
    pub response_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_main")]
    pub main: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_response_type() -> String {
    "json".to_string()
}

fn default_main() -> String {
    DEFAULT_MAIN_SELECTOR.to_string()
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            response_type: default_response_type(),
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { main: default_main() }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), endpoints = config.endpoints.len(), "loaded config");
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Endpoint table as a JSON map, ready to seed a model's config bag
    pub fn endpoint_map(&self) -> Map<String, Value> {
        self.endpoints
            .iter()
            .map(|(name, url)| (name.clone(), Value::String(url.clone())))
            .collect()
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV_VAR) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("triad").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert!(config.endpoints.is_empty());
        assert_eq!(config.request.method, "GET");
        assert_eq!(config.request.response_type, "json");
        assert_eq!(config.view.main, "body");
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = Config::from_toml_str(
            r#"
            [endpoints]
            login = "/api/login"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoints.get("login").map(String::as_str), Some("/api/login"));
        assert_eq!(config.request.method, "GET");
        assert_eq!(config.view.main, "body");
    }

    #[test]
    fn test_full_toml() {
        let config = Config::from_toml_str(
            r##"
            [endpoints]
            login = "/api/login"
            logout = "/api/logout"

            [request]
            method = "POST"
            response_type = "text"

            [view]
            main = "#app"
            "##,
        )
        .unwrap();

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.request.method, "POST");
        assert_eq!(config.request.response_type, "text");
        assert_eq!(config.view.main, "#app");

        let map = config.endpoint_map();
        assert_eq!(map.get("logout"), Some(&Value::String("/api/logout".to_string())));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::from_toml_str("[endpoints\nlogin = ").unwrap_err();
        assert!(format!("{}", err).contains("Failed to parse config"));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[endpoints]\nsearch = \"/api/search\"").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.endpoints.get("search").map(String::as_str), Some("/api/search"));
    }

    #[test]
    fn test_load_from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from_path(&dir.path().join("missing.toml")).unwrap_err();
        assert!(format!("{}", err).contains("Failed to read config file"));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env_override() {
        let original = std::env::var_os(CONFIG_PATH_ENV_VAR);

        std::env::set_var(CONFIG_PATH_ENV_VAR, "/custom/triad.toml");
        assert_eq!(resolve_config_path().unwrap(), PathBuf::from("/custom/triad.toml"));

        match original {
            Some(val) => std::env::set_var(CONFIG_PATH_ENV_VAR, val),
            None => std::env::remove_var(CONFIG_PATH_ENV_VAR),
        }
    }
}

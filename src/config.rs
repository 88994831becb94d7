//! Run configuration.
//!
//! Values come from defaults, then the YAML file, then `CROSSRUN_*`
//! environment variables, then command-line flags. Once loaded the record
//! is frozen behind an `Arc` and the relay only reads the keys it knows.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7357";
pub const DEFAULT_END_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`include` must name at least one pattern")]
    EmptyInclude,
    #[error("`cert` needs a matching `key`")]
    CertWithoutKey,
    #[error("`key` needs a matching `cert`")]
    KeyWithoutCert,
    #[error("`url` is not a valid url: {0}")]
    BadUrl(String),
    #[error("invalid value for {key}: {value:?}")]
    BadEnv { key: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    /// Glob patterns selecting test files.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Test runner adapter name.
    pub runner: String,
    pub bail: bool,
    /// Pause in milliseconds inserted before every queued tool.
    pub slow: u64,
    pub coverage: bool,
    pub coverage_reporter: Option<String>,
    pub addon: Vec<String>,
    pub globals: BTreeMap<String, Value>,
    #[serde(rename = "static")]
    pub static_dir: Option<PathBuf>,
    /// Page the browsers are expected to open.
    pub url: Option<String>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub watch: bool,
    pub listen: SocketAddr,
    /// Keep exec scripts fetchable after their first delivery.
    pub verbose: bool,
    pub end_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            include: vec!["test/**/*.yaml".to_string()],
            exclude: Vec::new(),
            runner: "scenario".to_string(),
            bail: false,
            slow: 0,
            coverage: false,
            coverage_reporter: None,
            addon: Vec::new(),
            globals: BTreeMap::new(),
            static_dir: None,
            url: None,
            cert: None,
            key: None,
            passphrase: None,
            watch: false,
            listen: DEFAULT_LISTEN
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7357))),
            verbose: false,
            end_timeout_ms: DEFAULT_END_TIMEOUT_MS,
        }
    }
}

impl RunConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse config file")
    }

    pub fn slow_delay(&self) -> Duration {
        Duration::from_millis(self.slow)
    }

    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }

    /// Applies `CROSSRUN_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CROSSRUN_SLOW") {
            self.slow = raw.trim().parse().map_err(|_| ConfigError::BadEnv {
                key: "CROSSRUN_SLOW",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup("CROSSRUN_BAIL") {
            self.bail = parse_flag("CROSSRUN_BAIL", &raw)?;
        }
        if let Some(raw) = lookup("CROSSRUN_WATCH") {
            self.watch = parse_flag("CROSSRUN_WATCH", &raw)?;
        }
        if let Some(raw) = lookup("CROSSRUN_URL") {
            self.url = Some(raw);
        }
        if let Some(raw) = lookup("CROSSRUN_LISTEN") {
            self.listen = raw.trim().parse().map_err(|_| ConfigError::BadEnv {
                key: "CROSSRUN_LISTEN",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.include.iter().all(|pattern| pattern.trim().is_empty()) {
            return Err(ConfigError::EmptyInclude);
        }
        match (&self.cert, &self.key) {
            (Some(_), None) => return Err(ConfigError::CertWithoutKey),
            (None, Some(_)) => return Err(ConfigError::KeyWithoutCert),
            _ => {}
        }
        if let Some(url) = &self.url {
            url::Url::parse(url).map_err(|err| ConfigError::BadUrl(err.to_string()))?;
        }
        Ok(())
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::BadEnv {
            key,
            value: raw.to_string(),
        }),
    }
}

/// `<config dir>/crossrun/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push("crossrun");
        path.push("config.yaml");
        path
    })
}

/// Reads the config file, falling back to defaults when it does not exist.
/// An explicitly named file must exist.
pub async fn load_config(config_path: Option<&Path>) -> Result<RunConfig> {
    let (path, explicit) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => {
                debug!("no config directory, using defaults");
                return Ok(RunConfig::default());
            }
        },
    };

    if path.exists() {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = RunConfig::from_yaml(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    } else if explicit {
        anyhow::bail!("config file {} does not exist", path.display())
    } else {
        warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Ok(RunConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_uses_the_recognised_key_names() {
        let config = RunConfig::from_yaml(
            r#"
include: ["tests/*.yaml"]
exclude: ["tests/skip-*.yaml"]
slow: 250
bail: true
coverage: true
coverageReporter: summary
static: public
url: http://localhost:8080/
globals:
  user: alice
"#,
        )
        .unwrap();
        assert_eq!(config.include, vec!["tests/*.yaml"]);
        assert_eq!(config.slow_delay(), Duration::from_millis(250));
        assert!(config.bail);
        assert_eq!(config.coverage_reporter.as_deref(), Some("summary"));
        assert_eq!(config.static_dir, Some(PathBuf::from("public")));
        assert_eq!(config.globals["user"], Value::from("alice"));
        assert_eq!(config.runner, "scenario");
        assert_eq!(config.end_timeout(), Duration::from_millis(2000));
        config.validate().unwrap();
    }

    #[test]
    fn environment_overrides_the_file() {
        let vars: HashMap<&str, &str> = [
            ("CROSSRUN_SLOW", "40"),
            ("CROSSRUN_WATCH", "yes"),
            ("CROSSRUN_LISTEN", "0.0.0.0:9000"),
        ]
        .into_iter()
        .collect();
        let mut config = RunConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.slow, 40);
        assert!(config.watch);
        assert_eq!(config.listen.port(), 9000);
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let mut config = RunConfig::default();
        let err = config
            .apply_env(|key| (key == "CROSSRUN_BAIL").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { key: "CROSSRUN_BAIL", .. }));
    }

    #[test]
    fn validation_catches_inconsistent_records() {
        let mut config = RunConfig {
            cert: Some("server.pem".into()),
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CertWithoutKey));
        config.key = Some("server.key".into());
        config.validate().unwrap();

        config.include = vec![];
        assert_eq!(config.validate(), Err(ConfigError::EmptyInclude));
    }

    #[tokio::test]
    async fn missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/crossrun.yaml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crossrun.yaml");
        tokio::fs::write(&path, "slow: 10\nwatch: true\n").await.unwrap();
        let config = load_config(Some(&path)).await.unwrap();
        assert_eq!(config.slow, 10);
        assert!(config.watch);
    }

    #[test]
    #[serial_test::serial]
    fn process_environment_is_read() {
        std::env::set_var("CROSSRUN_BAIL", "1");
        let mut config = RunConfig::default();
        let applied = config.apply_env(|key| std::env::var(key).ok());
        std::env::remove_var("CROSSRUN_BAIL");
        applied.unwrap();
        assert!(config.bail);
    }
}

//! Configuration loading from files and environment.
//!
//! Sources are merged in order at the document level, so a later file only
//! overrides the keys it names. Environment overrides are applied last:
//! first the `{PREFIX}_*` variables, then the `OPENROUTER_*` deployment
//! variables and `PORT`.

use crate::schema::KeypoolConfig;
use keypool_core::Credential;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Highest `OPENROUTER_API_KEY_{n}` index that is read
pub const MAX_API_KEYS: usize = 9;

/// Dotenv files read by default, in order
pub const DEFAULT_DOTENV_FILES: [&str; 2] = [".env", ".env.production"];

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// The path to the file that was not found
        path: String,
    },

    /// IO error
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// Unsupported format
    #[error("Unsupported configuration format: {extension}")]
    UnsupportedFormat {
        /// The file extension that was not supported
        extension: String,
    },

    /// Environment variable holds an unusable value
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvValue {
        /// Variable name
        name: String,
        /// Offending value
        value: String,
    },

    /// Dotenv file could not be read
    #[error("Failed to read dotenv file {path}: {message}")]
    Dotenv {
        /// File path
        path: String,
        /// Parser message
        message: String,
    },

    /// Neither a model nor a free fallback is configured
    #[error("OPENROUTER_MODEL is required and must be a free model (or set OPENROUTER_FREE_FALLBACK)")]
    MissingModel,

    /// A paid model was configured and no free fallback is available
    #[error("Paid models are disabled: '{model}' (set OPENROUTER_MODEL to a free model)")]
    PaidModel {
        /// The rejected model
        model: String,
    },
}

/// Configuration source
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path
    File(String),
    /// Raw YAML string
    Yaml(String),
    /// Raw TOML string
    Toml(String),
    /// Raw JSON string
    Json(String),
    /// Default configuration
    Default,
}

/// Environment lookup used for substitution and overrides
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the process environment
#[must_use]
pub fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok())
}

/// Configuration loader
pub struct ConfigLoader {
    sources: Vec<ConfigSource>,
    env_prefix: Option<String>,
    deployment_env: bool,
    dotenv_files: Vec<PathBuf>,
    env: EnvLookup,
}

impl ConfigLoader {
    /// Create a new config loader
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            env_prefix: None,
            deployment_env: false,
            dotenv_files: Vec::new(),
            env: process_env(),
        }
    }

    /// Add a configuration source
    #[must_use]
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a file source
    #[must_use]
    pub fn with_file(self, path: impl Into<String>) -> Self {
        self.with_source(ConfigSource::File(path.into()))
    }

    /// Set environment variable prefix for overrides
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Read the `OPENROUTER_*` and `PORT` deployment variables
    #[must_use]
    pub fn with_deployment_env(mut self) -> Self {
        self.deployment_env = true;
        self
    }

    /// Read a dotenv file into the process environment before loading.
    ///
    /// Missing files are skipped and variables already set are kept.
    #[must_use]
    pub fn with_dotenv(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv_files.push(path.into());
        self
    }

    /// Replace the environment lookup
    #[must_use]
    pub fn with_env_lookup(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Load configuration from all sources
    ///
    /// # Errors
    /// Returns error if any source fails to load or validate
    pub async fn load(self) -> Result<KeypoolConfig, ConfigError> {
        for path in &self.dotenv_files {
            load_dotenv(path)?;
        }

        let mut document = Value::Object(Map::new());
        for source in &self.sources {
            let overlay = self.load_source(source).await?;
            merge_values(&mut document, overlay);
        }

        let mut config: KeypoolConfig = serde_json::from_value(document)?;

        if let Some(ref prefix) = self.env_prefix {
            apply_env_overrides(&mut config, prefix, self.env.as_ref())?;
        }
        if self.deployment_env {
            apply_deployment_env(&mut config, self.env.as_ref())?;
        }

        config
            .validate_config()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        info!(
            keys = config.upstream.api_keys.len(),
            port = config.server.port,
            "Configuration loaded successfully"
        );
        Ok(config)
    }

    /// Load a single source as an untyped document
    async fn load_source(&self, source: &ConfigSource) -> Result<Value, ConfigError> {
        match source {
            ConfigSource::File(path) => self.load_file(path).await,
            ConfigSource::Yaml(content) => parse_yaml(&self.substitute_env_vars(content)),
            ConfigSource::Toml(content) => parse_toml(&self.substitute_env_vars(content)),
            ConfigSource::Json(content) => parse_json(&self.substitute_env_vars(content)),
            ConfigSource::Default => Ok(serde_json::to_value(KeypoolConfig::default())?),
        }
    }

    /// Load configuration from a file
    async fn load_file(&self, path: &str) -> Result<Value, ConfigError> {
        let path = Path::new(path);

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let content = fs::read_to_string(path).await?;
        let content = self.substitute_env_vars(&content);

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        debug!(path = %path.display(), format = %extension, "Loading configuration file");

        match extension.as_str() {
            "yaml" | "yml" => parse_yaml(&content),
            "toml" => parse_toml(&content),
            "json" => parse_json(&content),
            ext => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    /// Substitute environment variables in content
    ///
    /// Supports `${VAR}` and `${VAR:-default}`. Unset variables without a
    /// default are left in place and logged.
    fn substitute_env_vars(&self, content: &str) -> String {
        placeholder_regex()
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let inner = &caps[1];
                let (name, default) = match inner.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (inner, None),
                };

                match ((self.env)(name), default) {
                    (Some(value), _) => value,
                    (None, Some(default)) => default.to_string(),
                    (None, None) => {
                        warn!(variable = name, "Environment variable not found");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigLoader")
            .field("sources", &self.sources)
            .field("env_prefix", &self.env_prefix)
            .field("deployment_env", &self.deployment_env)
            .field("dotenv_files", &self.dotenv_files)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::expect_used)]
fn placeholder_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid regex"))
}

fn parse_yaml(content: &str) -> Result<Value, ConfigError> {
    Ok(serde_yaml::from_str(content)?)
}

fn parse_toml(content: &str) -> Result<Value, ConfigError> {
    Ok(toml::from_str(content)?)
}

fn parse_json(content: &str) -> Result<Value, ConfigError> {
    Ok(serde_json::from_str(content)?)
}

fn load_dotenv(path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    dotenv::from_path(path).map_err(|e| ConfigError::Dotenv {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), "Loaded dotenv file");
    Ok(())
}

/// Merge `overlay` into `base`; objects merge key by key, anything else
/// replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, Value::Null) if !base.is_null() => {}
        (base, overlay) => *base = overlay,
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue {
            name: name.to_string(),
            value,
        })
}

/// `1`, `true` and `yes` (any case) are truthy
fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Apply `{prefix}_*` overrides
fn apply_env_overrides(
    config: &mut KeypoolConfig,
    prefix: &str,
    env: &(dyn Fn(&str) -> Option<String> + Send + Sync),
) -> Result<(), ConfigError> {
    let var = |suffix: &str| {
        let name = format!("{prefix}_{suffix}");
        env(&name).map(|value| (name, value))
    };

    if let Some((name, port)) = var("SERVER_PORT") {
        config.server.port = parse_env(&name, port)?;
    }
    if let Some((_, host)) = var("SERVER_HOST") {
        config.server.host = host;
    }
    if let Some((_, url)) = var("BASE_URL") {
        config.upstream.base_url = url;
    }
    if let Some((name, retries)) = var("MAX_RETRIES") {
        config.retry.max_retries = parse_env(&name, retries)?;
    }
    if let Some((name, threshold)) = var("FAILURE_THRESHOLD") {
        config.health.failure_threshold = parse_env(&name, threshold)?;
    }
    if let Some((_, enabled)) = var("CACHE_ENABLED") {
        config.cache.enabled = is_truthy(&enabled);
    }
    if let Some((_, level)) = var("LOG_LEVEL") {
        config.observability.logging.level = level;
    }
    if let Some((_, format)) = var("LOG_FORMAT") {
        config.observability.logging.format = format;
    }
    if let Some((_, enabled)) = var("METRICS_ENABLED") {
        config.observability.metrics.enabled = is_truthy(&enabled);
    }

    Ok(())
}

/// Apply the `OPENROUTER_*` deployment variables and `PORT`
fn apply_deployment_env(
    config: &mut KeypoolConfig,
    env: &(dyn Fn(&str) -> Option<String> + Send + Sync),
) -> Result<(), ConfigError> {
    let keys = collect_api_keys(env)?;
    if !keys.is_empty() {
        config.upstream.api_keys = keys;
    }

    if let Some(model) = env("OPENROUTER_MODEL") {
        config.upstream.model = Some(model.trim().to_string());
    }
    if let Some(fallback) = env("OPENROUTER_FREE_FALLBACK") {
        config.upstream.free_fallback = Some(fallback.trim().to_string());
    }
    if let Some(flag) = env("OPENROUTER_402_TREAT_AS_TRANSIENT") {
        config.upstream.treat_402_as_transient = is_truthy(&flag);
    }
    if let Some(port) = env("PORT") {
        config.server.port = parse_env("PORT", port)?;
    }

    Ok(())
}

/// Read `OPENROUTER_API_KEY_1..=9`, stopping at the first missing index
fn collect_api_keys(
    env: &(dyn Fn(&str) -> Option<String> + Send + Sync),
) -> Result<Vec<Credential>, ConfigError> {
    let mut keys = Vec::new();
    for index in 1..=MAX_API_KEYS {
        let name = format!("OPENROUTER_API_KEY_{index}");
        let Some(value) = env(&name).filter(|v| !v.trim().is_empty()) else {
            break;
        };
        let credential = Credential::new(value.trim())
            .map_err(|e| ConfigError::Validation(format!("{name}: {e}")))?;
        keys.push(credential);
    }
    Ok(keys)
}

/// Load configuration from default locations
///
/// Reads `.env` and `.env.production`, then looks for a file in order:
/// 1. Path from `KEYPOOL_CONFIG` environment variable
/// 2. ./keypool.yaml
/// 3. ./config/keypool.yaml
/// 4. ./keypool.toml
///
/// Without a file the defaults are used. `KEYPOOL_*` and the deployment
/// variables apply either way.
///
/// # Errors
/// Returns error if a file fails to parse or the result does not validate
pub async fn load_config() -> Result<KeypoolConfig, ConfigError> {
    // dotenv runs first so KEYPOOL_CONFIG may come from it
    for file in DEFAULT_DOTENV_FILES {
        load_dotenv(Path::new(file))?;
    }

    let config_path = std::env::var("KEYPOOL_CONFIG").ok();
    let search_paths = match config_path {
        Some(ref path) => vec![path.as_str()],
        None => vec!["keypool.yaml", "keypool.yml", "config/keypool.yaml", "keypool.toml"],
    };

    let mut loader = ConfigLoader::new()
        .with_source(ConfigSource::Default)
        .with_env_prefix("KEYPOOL")
        .with_deployment_env();

    match search_paths.iter().find(|path| Path::new(path).exists()) {
        Some(path) => {
            info!(path = *path, "Loading configuration file");
            loader = loader.with_file(*path);
        }
        None => warn!("No configuration file found, using defaults"),
    }

    loader.load().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    fn env_of(pairs: &[(&str, &str)]) -> EnvLookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Arc::new(move |name| map.get(name).cloned())
    }

    #[test]
    fn test_env_var_substitution() {
        let loader = ConfigLoader::new().with_env_lookup(env_of(&[("TEST_VAR", "test_value")]));
        assert_eq!(loader.substitute_env_vars("key: ${TEST_VAR}"), "key: test_value");
    }

    #[test]
    fn test_env_var_with_default() {
        let loader = ConfigLoader::new().with_env_lookup(env_of(&[]));
        assert_eq!(
            loader.substitute_env_vars("key: ${NONEXISTENT_VAR:-default_value}"),
            "key: default_value"
        );
        assert_eq!(loader.substitute_env_vars("key: ${MISSING}"), "key: ${MISSING}");
    }

    #[tokio::test]
    async fn test_load_yaml_content() {
        let yaml = r#"
server:
  port: 9090
  host: "127.0.0.1"
health:
  failure_cooldown: 10m
"#;

        let config = ConfigLoader::new()
            .with_source(ConfigSource::Yaml(yaml.to_string()))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.health.failure_cooldown, Duration::from_secs(600));
        assert_eq!(config.health.failure_threshold, 3);
    }

    #[tokio::test]
    async fn test_later_source_overrides_only_named_keys() {
        let config = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .with_source(ConfigSource::Yaml("server:\n  port: 9090\ncache:\n  ttl: 5m".into()))
            .with_source(ConfigSource::Toml("[server]\nhost = \"127.0.0.1\"".into()))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert!(config.cache.enabled);
    }

    #[tokio::test]
    async fn test_load_file_with_substitution() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "upstream:\n  title: ${{BOT_TITLE:-Alliance Bot}}\n  api_keys:\n    - ${{FIRST_KEY}}"
        )
        .expect("write");

        let config = ConfigLoader::new()
            .with_env_lookup(env_of(&[("FIRST_KEY", "sk-or-file")]))
            .with_file(file.path().display().to_string())
            .load()
            .await
            .expect("load config");

        assert_eq!(config.upstream.title.as_deref(), Some("Alliance Bot"));
        assert_eq!(config.upstream.api_keys.len(), 1);
        assert_eq!(config.upstream.api_keys[0].expose_secret(), "sk-or-file");
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_files() {
        let err = ConfigLoader::new()
            .with_file("/definitely/not/here.yaml")
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));

        let file = tempfile::Builder::new()
            .suffix(".ini")
            .tempfile()
            .expect("temp file");
        let err = ConfigLoader::new()
            .with_file(file.path().display().to_string())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_env_overrides() {
        let config = ConfigLoader::new()
            .with_source(ConfigSource::Default)
            .with_env_prefix("TEST_PREFIX")
            .with_env_lookup(env_of(&[
                ("TEST_PREFIX_SERVER_PORT", "3000"),
                ("TEST_PREFIX_CACHE_ENABLED", "no"),
                ("TEST_PREFIX_LOG_FORMAT", "json"),
            ]))
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 3000);
        assert!(!config.cache.enabled);
        assert_eq!(config.observability.logging.format, "json");
    }

    #[tokio::test]
    async fn test_invalid_env_override_is_an_error() {
        let err = ConfigLoader::new()
            .with_env_prefix("TEST_PREFIX")
            .with_env_lookup(env_of(&[("TEST_PREFIX_SERVER_PORT", "eighty")]))
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvValue { .. }));
    }

    #[tokio::test]
    async fn test_deployment_env() {
        let config = ConfigLoader::new()
            .with_deployment_env()
            .with_env_lookup(env_of(&[
                ("OPENROUTER_API_KEY_1", "sk-one"),
                ("OPENROUTER_API_KEY_2", "sk-two"),
                ("OPENROUTER_API_KEY_4", "sk-four"),
                ("OPENROUTER_MODEL", " openai/gpt-4o "),
                ("OPENROUTER_FREE_FALLBACK", "mistral/mistral-7b:free"),
                ("OPENROUTER_402_TREAT_AS_TRANSIENT", "Yes"),
                ("PORT", "8181"),
            ]))
            .load()
            .await
            .expect("load config");

        // the gap at index 3 ends the scan
        assert_eq!(config.upstream.api_keys.len(), 2);
        assert_eq!(config.upstream.api_keys[1].expose_secret(), "sk-two");
        assert_eq!(config.upstream.model.as_deref(), Some("openai/gpt-4o"));
        assert!(config.upstream.treat_402_as_transient);
        assert_eq!(config.server.port, 8181);

        let model = config.upstream.resolve_model().expect("resolve");
        assert_eq!(model.as_str(), "mistral/mistral-7b:free");
    }

    #[tokio::test]
    async fn test_transient_flag_values() {
        for (value, expected) in [("1", true), ("TRUE", true), ("0", false), ("maybe", false)] {
            let config = ConfigLoader::new()
                .with_deployment_env()
                .with_env_lookup(env_of(&[("OPENROUTER_402_TREAT_AS_TRANSIENT", value)]))
                .load()
                .await
                .expect("load config");
            assert_eq!(config.upstream.treat_402_as_transient, expected, "{value}");
        }
    }

    #[tokio::test]
    async fn test_dotenv_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "KEYPOOL_DOTENV_CHECK_SERVER_PORT=9191").expect("write");

        let config = ConfigLoader::new()
            .with_dotenv(file.path())
            .with_dotenv("/definitely/not/here.env")
            .with_env_prefix("KEYPOOL_DOTENV_CHECK")
            .load()
            .await
            .expect("load config");

        assert_eq!(config.server.port, 9191);
    }

    #[test]
    fn test_merge_values() {
        let mut base = serde_json::json!({"a": {"x": 1, "y": 2}, "b": [1, 2]});
        merge_values(
            &mut base,
            serde_json::json!({"a": {"y": 3}, "b": [9], "c": null}),
        );
        assert_eq!(base, serde_json::json!({"a": {"x": 1, "y": 3}, "b": [9], "c": null}));
    }
}

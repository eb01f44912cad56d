//! Configuration schema definitions.
//!
//! Every section carries serde defaults so a partial file (or no file at all)
//! produces a usable configuration. Durations are written in humantime form
//! (`"5m"`, `"24h"`).

use crate::loader::ConfigError;
use keypool_core::{Credential, ModelId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use validator::Validate;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KeypoolConfig {
    /// HTTP server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Upstream endpoint and credentials
    #[validate(nested)]
    pub upstream: UpstreamConfig,

    /// Retry and backoff configuration
    #[validate(nested)]
    pub retry: RetryConfig,

    /// Per-key health thresholds
    #[validate(nested)]
    pub health: HealthConfig,

    /// Response cache configuration
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Logging and metrics configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl KeypoolConfig {
    /// Validate the configuration
    ///
    /// # Errors
    /// Returns validation errors if configuration is invalid
    pub fn validate_config(&self) -> Result<(), validator::ValidationErrors> {
        self.validate()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Time allowed for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub graceful_shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            graceful_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API root, without `/chat/completions`
    #[validate(url)]
    pub base_url: String,

    /// Requested model; resolved against `free_fallback` at startup
    pub model: Option<String>,

    /// Free model used when `model` is unset or looks paid
    pub free_fallback: Option<String>,

    /// Treat HTTP 402 as a short pause instead of a day-long lockout
    pub treat_402_as_transient: bool,

    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Connection timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// `HTTP-Referer` attribution header
    pub referer: Option<String>,

    /// `X-Title` attribution header
    pub title: Option<String>,

    /// Key ordering per attempt (`random` or `sequential`)
    #[validate(length(min = 1))]
    pub ordering: String,

    /// Credentials, in configured order
    #[serde(default, skip_serializing)]
    pub api_keys: Vec<Credential>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: None,
            free_fallback: None,
            treat_402_as_transient: false,
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            referer: None,
            title: None,
            ordering: "random".to_string(),
            api_keys: Vec::new(),
        }
    }
}

impl UpstreamConfig {
    /// Resolve the model to dispatch against.
    ///
    /// An unset model falls back to `free_fallback`. A model that looks paid
    /// is replaced by `free_fallback` with a warning.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingModel` or `ConfigError::PaidModel` when no
    /// usable fallback is configured
    pub fn resolve_model(&self) -> Result<ModelId, ConfigError> {
        let fallback = non_blank(self.free_fallback.as_deref());

        let Some(requested) = non_blank(self.model.as_deref()) else {
            let fallback = fallback.ok_or(ConfigError::MissingModel)?;
            warn!(fallback, "No model configured, using free fallback");
            return parse_model(fallback);
        };

        let model = parse_model(requested)?;
        if !model.looks_paid() {
            info!(model = %model, "Using configured model");
            return Ok(model);
        }

        match fallback {
            Some(fallback) => {
                warn!(
                    model = %model,
                    fallback,
                    "Configured model appears to be paid, using free fallback"
                );
                parse_model(fallback)
            }
            None => Err(ConfigError::PaidModel {
                model: model.to_string(),
            }),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_model(value: &str) -> Result<ModelId, ConfigError> {
    ModelId::new(value).map_err(|e| ConfigError::Validation(e.to_string()))
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryConfig {
    /// Outer attempts over the pool
    #[validate(range(min = 1, max = 10))]
    pub max_retries: u32,

    /// Delay after the first failed attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on a single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Per-key health configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that open a key's circuit
    #[validate(range(min = 1, max = 100))]
    pub failure_threshold: u32,

    /// How long an opened circuit stays open
    #[serde(with = "humantime_serde")]
    pub failure_cooldown: Duration,

    /// Pause applied to a rate-limited key
    #[serde(with = "humantime_serde")]
    pub rate_limit_window: Duration,

    /// Lockout after a paid model reports exhausted credit
    #[serde(with = "humantime_serde")]
    pub credit_exhausted_cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_cooldown: Duration::from_secs(300),
            rate_limit_window: Duration::from_secs(60),
            credit_exhausted_cooldown: Duration::from_secs(86_400),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Maximum cached responses
    #[validate(range(min = 1))]
    pub max_entries: usize,

    /// Entry lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[validate(nested)]
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    #[validate(length(min = 1))]
    pub level: String,

    /// Log format (json, pretty, compact)
    #[validate(length(min = 1))]
    pub format: String,

    /// Include source file and line
    pub include_location: bool,

    /// Extra filter directives
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
            filter: None,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    pub enabled: bool,

    /// Exposition path
    #[validate(length(min = 1))]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(model: Option<&str>, fallback: Option<&str>) -> UpstreamConfig {
        UpstreamConfig {
            model: model.map(String::from),
            free_fallback: fallback.map(String::from),
            ..UpstreamConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = KeypoolConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.health.credit_exhausted_cooldown, Duration::from_secs(86_400));
        assert!(config.upstream.api_keys.is_empty());
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_server_socket_addr() {
        assert_eq!(ServerConfig::default().socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let mut config = KeypoolConfig::default();
        config.retry.max_retries = 0;
        assert!(config.validate_config().is_err());

        let mut config = KeypoolConfig::default();
        config.upstream.base_url = "not a url".to_string();
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_resolve_configured_free_model() {
        let model = upstream(Some("mistral/mistral-7b:free"), None)
            .resolve_model()
            .unwrap();
        assert_eq!(model.as_str(), "mistral/mistral-7b:free");
    }

    #[test]
    fn test_resolve_unset_model_uses_fallback() {
        let model = upstream(Some("  "), Some("meta-llama/llama-3.1-8b-instruct:free"))
            .resolve_model()
            .unwrap();
        assert_eq!(model.as_str(), "meta-llama/llama-3.1-8b-instruct:free");

        assert!(matches!(
            upstream(None, None).resolve_model(),
            Err(ConfigError::MissingModel)
        ));
    }

    #[test]
    fn test_resolve_paid_model() {
        let model = upstream(Some("openai/gpt-4o"), Some("qwen/qwen-2-7b:free"))
            .resolve_model()
            .unwrap();
        assert_eq!(model.as_str(), "qwen/qwen-2-7b:free");

        assert!(matches!(
            upstream(Some("openai/gpt-4o"), None).resolve_model(),
            Err(ConfigError::PaidModel { .. })
        ));

        // the free variant of an OpenAI-family model is allowed
        let model = upstream(Some("openai/gpt-oss-20b:free"), None)
            .resolve_model()
            .unwrap();
        assert!(model.is_free());
    }

    #[test]
    fn test_yaml_serialization_skips_credentials() {
        let mut config = KeypoolConfig::default();
        config.upstream.api_keys = vec![Credential::new("sk-or-secret").unwrap()];
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        assert!(yaml.contains("port: 8080"));
        assert!(yaml.contains("failure_cooldown: 5m"));
        assert!(!yaml.contains("api_keys"));
        assert!(!yaml.contains("sk-or-secret"));
    }

    #[test]
    fn test_humantime_durations_parse() {
        let config: HealthConfig =
            serde_yaml::from_str("failure_cooldown: 10m\nrate_limit_window: 30s").expect("parse");
        assert_eq!(config.failure_cooldown, Duration::from_secs(600));
        assert_eq!(config.rate_limit_window, Duration::from_secs(30));
        assert_eq!(config.failure_threshold, 3);
    }
}

//! # Keypool Configuration
//!
//! Configuration management for the keypool dispatcher, including:
//! - Configuration schema and validation
//! - Loading from YAML/TOML/JSON files
//! - Environment variable substitution and overrides
//! - Model resolution against the free fallback

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod loader;
pub mod schema;

pub use loader::{
    load_config, process_env, ConfigError, ConfigLoader, ConfigSource, EnvLookup,
    DEFAULT_DOTENV_FILES, MAX_API_KEYS,
};
pub use schema::{
    CacheConfig, HealthConfig, KeypoolConfig, LoggingConfig, MetricsConfig, ObservabilityConfig,
    RetryConfig, ServerConfig, UpstreamConfig,
};

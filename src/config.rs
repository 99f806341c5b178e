//! Configuration management for MirrorView.
//!
//! Configuration is read once at startup from built-in defaults, an optional
//! file, and `MIRRORVIEW__*` environment variables (in that order of
//! precedence, lowest first). Nested keys use `__` as the separator, e.g.
//! `MIRRORVIEW__ADMISSION__RATE_LIMITS__GENERATE_RESPONSE=1/minute`.

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{MirrorviewError, Result};
use crate::ratelimit::{RateLimitPolicy, FEEDBACK_EDIT, FEEDBACK_THUMB, GENERATE_RESPONSE};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "MIRRORVIEW";

/// Rate limits applied when configuration does not override a scope.
pub const DEFAULT_RATE_LIMITS: &[(&str, &str)] = &[
    (GENERATE_RESPONSE, "5/minute,30/hour"),
    (FEEDBACK_THUMB, "30/minute,300/hour"),
    (FEEDBACK_EDIT, "15/minute,120/hour"),
];

/// Origin that is always allowed by CORS, for local frontend development.
pub const LOCAL_DEV_ORIGIN: &str = "http://localhost:3000";

/// Main configuration for the MirrorView service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorviewConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Request admission configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Origins allowed to call the API from a browser
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Configured origins plus the local development origin, deduplicated.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self
            .cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        if !origins.iter().any(|o| o == LOCAL_DEV_ORIGIN) {
            origins.push(LOCAL_DEV_ORIGIN.to_string());
        }
        origins
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Request admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Rate limit policy per scope, e.g. `generate_response: "5/minute,30/hour"`
    #[serde(default = "default_rate_limits")]
    pub rate_limits: HashMap<String, String>,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: u64,

    /// Whether `X-Forwarded-For` / `X-Real-IP` identify the client
    #[serde(default, deserialize_with = "bool_like")]
    pub trust_proxy_headers: bool,

    /// Send the CSP as `Content-Security-Policy-Report-Only`
    #[serde(default = "default_true", deserialize_with = "bool_like")]
    pub csp_report_only: bool,

    /// Counter buckets held before elapsed ones are swept
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limits: default_rate_limits(),
            max_request_body_bytes: default_max_request_body_bytes(),
            trust_proxy_headers: false,
            csp_report_only: true,
            eviction_threshold: default_eviction_threshold(),
        }
    }
}

impl AdmissionConfig {
    /// Parse the configured rate limits into a policy.
    pub fn rate_limit_policy(&self) -> Result<RateLimitPolicy> {
        RateLimitPolicy::from_config(&self.rate_limits)
    }
}

fn default_rate_limits() -> HashMap<String, String> {
    DEFAULT_RATE_LIMITS
        .iter()
        .map(|(scope, rules)| (scope.to_string(), rules.to_string()))
        .collect()
}

fn default_max_request_body_bytes() -> u64 {
    65_536
}

fn default_eviction_threshold() -> usize {
    crate::ratelimit::DEFAULT_EVICTION_THRESHOLD
}

fn default_true() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Interpret a boolean-like string: `1`, `true`, `yes` and `on` are true.
pub fn parse_bool_like(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn bool_like<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolLike {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match BoolLike::deserialize(deserializer)? {
        BoolLike::Bool(b) => b,
        BoolLike::Int(i) => i != 0,
        BoolLike::Text(s) => parse_bool_like(&s),
    })
}

impl MirrorviewConfig {
    /// Load configuration from defaults, an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("server.cors_origins")
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        // Map entries are merged key by key, so defaults survive a partial override.
        for (scope, rules) in DEFAULT_RATE_LIMITS {
            builder = builder.set_default(format!("admission.rate_limits.{}", scope), *rules)?;
        }

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: MirrorviewConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    ///
    /// Rate limit strings are parsed here so a malformed policy aborts startup.
    pub fn validate(&self) -> Result<()> {
        self.admission.rate_limit_policy()?;

        if self.admission.eviction_threshold == 0 {
            return Err(MirrorviewError::Config(
                "admission.eviction_threshold must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

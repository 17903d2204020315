//! Configuration
//!
//! Settings for the push connection, the coalescer and stream sessions,
//! loaded from `~/.config/ingest/ingest.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! The push token is never read from the file; it comes from the
//! environment (`INGEST_TOKEN`) or the command line.
//!
//! # Example Configuration
//!
//! ```toml
//! [push]
//! base_url = "http://127.0.0.1:4096"
//! channel = "default"
//! backoff_base_ms = 1000
//! backoff_max_ms = 30000
//! backoff_jitter_ms = 500
//! max_reconnect_attempts = 0   # 0 = unlimited
//!
//! [coalescer]
//! window_ms = 50
//! max_buffered = 500
//!
//! [session]
//! timeout_ms = 0               # 0 = no deadline
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coalescer::EventCoalescer;
use crate::push::{BackoffPolicy, PushConfig};

/// Environment variable overriding `push.base_url`
pub const ENV_BASE_URL: &str = "INGEST_BASE_URL";
/// Environment variable holding the push token
pub const ENV_TOKEN: &str = "INGEST_TOKEN";
/// Environment variable overriding `push.channel`
pub const ENV_CHANNEL: &str = "INGEST_CHANNEL";
/// Environment variable overriding `coalescer.window_ms`
pub const ENV_COALESCE_WINDOW_MS: &str = "INGEST_COALESCE_WINDOW_MS";
/// Environment variable overriding `session.timeout_ms`
pub const ENV_SESSION_TIMEOUT_MS: &str = "INGEST_SESSION_TIMEOUT_MS";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the highest-priority value of a configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Structures
// =============================================================================

/// `[push]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushToml {
    /// Server base URL
    pub base_url: Option<String>,
    /// Channel name
    pub channel: Option<String>,
    /// First reconnect delay
    pub backoff_base_ms: Option<u64>,
    /// Reconnect delay cap
    pub backoff_max_ms: Option<u64>,
    /// Random extra delay bound
    pub backoff_jitter_ms: Option<u64>,
    /// Failed attempts before giving up (0 = unlimited)
    pub max_reconnect_attempts: Option<u32>,
}

/// `[coalescer]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerToml {
    /// Flush window
    pub window_ms: Option<u64>,
    /// Buffer cap
    pub max_buffered: Option<usize>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Session deadline (0 = none)
    pub timeout_ms: Option<u64>,
}

/// Whole configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestToml {
    /// Push connection settings
    pub push: PushToml,
    /// Coalescer settings
    pub coalescer: CoalescerToml,
    /// Stream session settings
    pub session: SessionToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Push connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushSettings {
    /// Server base URL
    pub base_url: String,
    /// Channel stamped on events without one
    pub channel: String,
    /// Access token (env or CLI only)
    pub token: Option<String>,
    /// First reconnect delay
    pub backoff_base_ms: u64,
    /// Reconnect delay cap
    pub backoff_max_ms: u64,
    /// Random extra delay bound
    pub backoff_jitter_ms: u64,
    /// Failed attempts before giving up (0 = unlimited)
    pub max_reconnect_attempts: u32,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            channel: "default".to_string(),
            token: None,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            backoff_jitter_ms: 500,
            max_reconnect_attempts: 0,
        }
    }
}

/// Coalescer settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoalescerSettings {
    /// Flush window
    pub window_ms: u64,
    /// Buffer cap
    pub max_buffered: usize,
}

impl Default for CoalescerSettings {
    fn default() -> Self {
        Self {
            window_ms: 50,
            max_buffered: 500,
        }
    }
}

/// Stream session settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSettings {
    /// Session deadline (0 = none)
    pub timeout_ms: u64,
}

/// Resolved configuration
///
/// Use [`load_config`] to load with priority handling, then apply
/// [`ConfigOverrides`] and call [`IngestConfig::validate`].
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Push connection
    pub push: PushSettings,
    /// Coalescer
    pub coalescer: CoalescerSettings,
    /// Stream sessions
    pub session: SessionSettings,
    /// Path of the file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            push: PushSettings::default(),
            coalescer: CoalescerSettings::default(),
            session: SessionSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl IngestConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let push = &self.push;
        if push.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "push.base_url must not be empty".to_string(),
            ));
        }
        if push.backoff_base_ms == 0 {
            return Err(ConfigError::ValidationError(
                "push.backoff_base_ms must be greater than 0".to_string(),
            ));
        }
        if push.backoff_max_ms < push.backoff_base_ms {
            return Err(ConfigError::ValidationError(format!(
                "push.backoff_max_ms ({}) must be at least push.backoff_base_ms ({})",
                push.backoff_max_ms, push.backoff_base_ms
            )));
        }
        if self.coalescer.max_buffered == 0 {
            return Err(ConfigError::ValidationError(
                "coalescer.max_buffered must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Push connection settings for [`crate::push::PushConnection`]
    #[must_use]
    pub fn push_config(&self) -> PushConfig {
        let push = &self.push;
        let mut config = PushConfig::new(push.base_url.clone(), push.channel.clone()).with_backoff(
            BackoffPolicy {
                base: Duration::from_millis(push.backoff_base_ms),
                max: Duration::from_millis(push.backoff_max_ms),
                jitter: Duration::from_millis(push.backoff_jitter_ms),
            },
        );
        if let Some(token) = push.token.as_ref().filter(|t| !t.is_empty()) {
            config = config.with_token(token.clone());
        }
        if push.max_reconnect_attempts > 0 {
            config = config.with_max_reconnect_attempts(push.max_reconnect_attempts);
        }
        config
    }

    /// A coalescer with the configured window and cap
    #[must_use]
    pub fn build_coalescer(&self) -> EventCoalescer {
        EventCoalescer::new(
            Duration::from_millis(self.coalescer.window_ms),
            self.coalescer.max_buffered,
        )
    }

    /// Session deadline, if any
    #[must_use]
    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session.timeout_ms > 0).then(|| Duration::from_millis(self.session.timeout_ms))
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Default configuration file path
///
/// `$XDG_CONFIG_HOME/ingest/ingest.toml`, usually
/// `~/.config/ingest/ingest.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ingest").join("ingest.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed, or the
/// result fails validation. A missing file is not an error.
pub fn load_config() -> Result<IngestConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<IngestConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up variables
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<IngestConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = IngestConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: IngestToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(path = %config_path.display(), "Config file not found, using defaults");
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut IngestConfig, toml: &IngestToml) {
    let push = &toml.push;
    if let Some(ref base_url) = push.base_url {
        config.push.base_url = base_url.clone();
    }
    if let Some(ref channel) = push.channel {
        config.push.channel = channel.clone();
    }
    if let Some(ms) = push.backoff_base_ms {
        config.push.backoff_base_ms = ms;
    }
    if let Some(ms) = push.backoff_max_ms {
        config.push.backoff_max_ms = ms;
    }
    if let Some(ms) = push.backoff_jitter_ms {
        config.push.backoff_jitter_ms = ms;
    }
    if let Some(attempts) = push.max_reconnect_attempts {
        config.push.max_reconnect_attempts = attempts;
    }

    if let Some(ms) = toml.coalescer.window_ms {
        config.coalescer.window_ms = ms;
    }
    if let Some(max) = toml.coalescer.max_buffered {
        config.coalescer.max_buffered = max;
    }

    if let Some(ms) = toml.session.timeout_ms {
        config.session.timeout_ms = ms;
    }
}

fn apply_env_config<F>(config: &mut IngestConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(base_url) = env(ENV_BASE_URL).filter(|v| !v.is_empty()) {
        config.push.base_url = base_url;
        config.source = ConfigSource::Env;
    }
    if let Some(token) = env(ENV_TOKEN).filter(|v| !v.is_empty()) {
        config.push.token = Some(token);
        config.source = ConfigSource::Env;
    }
    if let Some(channel) = env(ENV_CHANNEL).filter(|v| !v.is_empty()) {
        config.push.channel = channel;
        config.source = ConfigSource::Env;
    }
    if let Some(window) = env(ENV_COALESCE_WINDOW_MS) {
        match window.parse::<u64>() {
            Ok(ms) => {
                config.coalescer.window_ms = ms;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(var = ENV_COALESCE_WINDOW_MS, error = %e, "Ignoring invalid value"),
        }
    }
    if let Some(timeout) = env(ENV_SESSION_TIMEOUT_MS) {
        match timeout.parse::<u64>() {
            Ok(ms) => {
                config.session.timeout_ms = ms;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(var = ENV_SESSION_TIMEOUT_MS, error = %e, "Ignoring invalid value"),
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,
    /// Token override
    pub token: Option<String>,
    /// Channel override
    pub channel: Option<String>,
    /// Coalescer window override
    pub window_ms: Option<u64>,
    /// Session timeout override
    pub session_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Override the token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Override the channel
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Override the coalescer window
    #[must_use]
    pub fn with_window_ms(mut self, ms: u64) -> Self {
        self.window_ms = Some(ms);
        self
    }

    /// Override the session timeout
    #[must_use]
    pub fn with_session_timeout_ms(mut self, ms: u64) -> Self {
        self.session_timeout_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut IngestConfig) {
        if self.base_url.is_some()
            || self.token.is_some()
            || self.channel.is_some()
            || self.window_ms.is_some()
            || self.session_timeout_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref base_url) = self.base_url {
            config.push.base_url = base_url.clone();
        }
        if let Some(ref token) = self.token {
            config.push.token = Some(token.clone());
        }
        if let Some(ref channel) = self.channel {
            config.push.channel = channel.clone();
        }
        if let Some(ms) = self.window_ms {
            config.coalescer.window_ms = ms;
        }
        if let Some(ms) = self.session_timeout_ms {
            config.session.timeout_ms = ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.push.backoff_base_ms, 1000);
        assert_eq!(config.push.backoff_max_ms, 30_000);
        assert_eq!(config.push.backoff_jitter_ms, 500);
        assert_eq!(config.coalescer.window_ms, 50);
        assert_eq!(config.coalescer.max_buffered, 500);
        assert_eq!(config.session_timeout(), None);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("ingest/ingest.toml"));
        }
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_config(
            r#"
[push]
base_url = "https://agent.example"
max_reconnect_attempts = 5

[session]
timeout_ms = 120000
"#,
        );
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.push.base_url, "https://agent.example");
        assert_eq!(config.push.channel, "default");
        assert_eq!(config.push.max_reconnect_attempts, 5);
        assert_eq!(config.session_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/ingest.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_config("[push\nbase_url = 3\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_token_is_not_read_from_file() {
        let file = write_config("[push]\ntoken = \"from-file\"\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.push.token, None);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[push]\nchannel = \"file-channel\"\n\n[coalescer]\nwindow_ms = 80\n");
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CHANNEL, "env-channel"),
            (ENV_TOKEN, "secret"),
            (ENV_COALESCE_WINDOW_MS, "not-a-number"),
        ]);
        let config = load_config_with_env(Some(file.path().to_path_buf()), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.push.channel, "env-channel");
        assert_eq!(config.push.token.as_deref(), Some("secret"));
        // Unparsable values are ignored
        assert_eq!(config.coalescer.window_ms, 80);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = IngestConfig::default();
        config.push.channel = "env-channel".to_string();
        config.set_source(ConfigSource::Env);

        ConfigOverrides::new()
            .with_channel("cli-channel")
            .with_session_timeout_ms(500)
            .apply(&mut config);

        assert_eq!(config.push.channel, "cli-channel");
        assert_eq!(config.session_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = IngestConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validation() {
        let file = write_config("[push]\nbackoff_base_ms = 0\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));

        let mut config = IngestConfig::default();
        config.push.backoff_max_ms = 10;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.coalescer.max_buffered = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_push_config_mapping() {
        let mut config = IngestConfig::default();
        config.push.token = Some("t".to_string());
        config.push.max_reconnect_attempts = 3;

        let push = config.push_config();
        assert_eq!(push.token.as_deref(), Some("t"));
        assert_eq!(push.max_reconnect_attempts, Some(3));
        assert_eq!(push.backoff, BackoffPolicy::default());

        config.push.max_reconnect_attempts = 0;
        assert_eq!(config.push_config().max_reconnect_attempts, None);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ValidationError("bad".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }
}

//! Configuration module for Siren.
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Each component takes only its own section.
//!
//! # Example
//!
//! ```toml
//! [poller]
//! feed_url = "https://www.oref.org.il/WarningMessages/History/AlertsHistory.json"
//! seconds_between_polls = 15
//!
//! [filter]
//! location = "Haifa"
//!
//! [webhook]
//! enabled = true
//! url = "${SIREN_WEBHOOK_URL}"
//!
//! [relay]
//! api_key = "${SIREN_RELAY_KEY}"
//! ```

use crate::effects::{LogEffect, SignalEffect, WebhookEffect};
use crate::feed::FeedPoller;
use crate::filter::{FilterEngine, DEFAULT_MAX_AGE_SECONDS};
use crate::ledger::LedgerStore;
use crate::relay::queue::{MemoryQueue, QueueConnector, QueueError, RedisConnector};
use crate::relay::{RelayHandler, RelayOptions, DEFAULT_BATCH_LIMIT};
use crate::Router;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "SIREN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/siren.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to set up relay queue: {0}")]
    Queue(#[from] QueueError),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SirenConfig {
    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub signal: SignalConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub relay: RelayConfig,
}

/// Feed polling and ledger location
#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    /// Required by the poller only
    #[serde(default)]
    pub feed_url: Option<String>,

    #[serde(default = "default_poll_seconds")]
    pub seconds_between_polls: u64,

    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra headers sent with every feed request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            seconds_between_polls: default_poll_seconds(),
            history_file: default_history_file(),
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_poll_seconds() -> u64 {
    15
}

fn default_history_file() -> PathBuf {
    PathBuf::from("history.txt")
}

fn default_timeout_ms() -> u64 {
    10000
}

/// Recency window and location predicate
#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default)]
    pub location: Option<String>,

    #[serde(default = "default_seconds_window")]
    pub seconds_window: i64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            location: None,
            seconds_window: default_seconds_window(),
        }
    }
}

fn default_seconds_window() -> i64 {
    DEFAULT_MAX_AGE_SECONDS
}

/// Webhook sink
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Static query parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            method: default_method(),
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }
}

fn default_method() -> String {
    "POST".to_string()
}

/// Hardware signal sink
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SignalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub digital_pin: u8,
}

/// Log sink
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_log_prefix(),
        }
    }
}

fn default_log_prefix() -> String {
    "alert".to_string()
}

fn default_true() -> bool {
    true
}

/// Queue relay server
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub skip_authorization: bool,

    #[serde(default)]
    pub allow_diagnostics: bool,

    #[serde(default = "default_true")]
    pub return_only_message_count: bool,

    #[serde(default)]
    pub return_full_message: bool,

    #[serde(default)]
    pub preserve_messages: bool,

    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
            skip_authorization: false,
            allow_diagnostics: false,
            return_only_message_count: true,
            return_full_message: false,
            preserve_messages: false,
            batch_limit: default_batch_limit(),
            queue: QueueConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

/// Which queue the relay fronts
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackendKind,

    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Redis list key
    #[serde(default = "default_queue_name")]
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackendKind::default(),
            url: default_redis_url(),
            name: default_queue_name(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_name() -> String {
    "siren:relay".to_string()
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.seconds_between_polls)
    }

    /// The feed URL, which the poller cannot run without.
    pub fn require_feed_url(&self) -> Result<&str, ConfigError> {
        match self.feed_url.as_deref() {
            Some(url) if !url.is_empty() && !url.contains("${") => Ok(url),
            _ => Err(ConfigError::MissingField("poller.feed_url".to_string())),
        }
    }

    pub fn build_feed(&self) -> Result<FeedPoller, ConfigError> {
        let mut feed = FeedPoller::new(self.require_feed_url()?)
            .with_timeout(Duration::from_millis(self.timeout_ms));
        for (name, value) in &self.headers {
            feed = feed.with_header(name, value);
        }
        Ok(feed)
    }

    pub fn ledger_store(&self) -> LedgerStore {
        LedgerStore::new(&self.history_file)
    }
}

impl FilterConfig {
    pub fn build_filter(&self) -> FilterEngine {
        let mut filter = FilterEngine::new(self.seconds_window);
        if let Some(location) = &self.location {
            filter = filter.with_location(location);
        }
        filter
    }
}

impl RelayConfig {
    pub fn options(&self) -> RelayOptions {
        RelayOptions {
            api_key: self.api_key.clone().filter(|key| !key.contains("${")),
            skip_authorization: self.skip_authorization,
            allow_diagnostics: self.allow_diagnostics,
            return_only_message_count: self.return_only_message_count,
            return_full_message: self.return_full_message,
            preserve_messages: self.preserve_messages,
            batch_limit: self.batch_limit,
        }
    }

    pub fn build_connector(&self) -> Result<Arc<dyn QueueConnector>, ConfigError> {
        let connector: Arc<dyn QueueConnector> = match self.queue.backend {
            QueueBackendKind::Redis => {
                Arc::new(RedisConnector::new(&self.queue.url, &self.queue.name)?)
            }
            QueueBackendKind::Memory => {
                warn!("Relay is using the in-memory queue; messages are lost on restart");
                Arc::new(MemoryQueue::new())
            }
        };
        Ok(connector)
    }

    pub fn build_handler(&self) -> Result<RelayHandler, ConfigError> {
        Ok(RelayHandler::new(self.options(), self.build_connector()?))
    }
}

impl SirenConfig {
    /// Build a Router from the enabled sinks.
    ///
    /// Registration order is log, webhook, signal. Sinks that cannot be
    /// built are skipped with a warning.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new();

        if self.log.enabled {
            router.register(Arc::new(LogEffect::with_prefix(&self.log.prefix)));
        }

        if self.webhook.enabled {
            match self.webhook.url.as_deref() {
                None | Some("") => {
                    warn!("Webhook enabled but no URL configured, skipping");
                }
                Some(url) if url.contains("${") => {
                    warn!(url = %url, "Skipping webhook with unsubstituted URL");
                }
                Some(url) => {
                    let mut effect = WebhookEffect::new(url)
                        .with_method(&self.webhook.method)
                        .with_timeout(Duration::from_millis(self.webhook.timeout_ms));
                    for (name, value) in &self.webhook.headers {
                        effect = effect.with_header(name, value);
                    }
                    for (key, value) in &self.webhook.params {
                        effect = effect.with_param(key, value);
                    }
                    router.register(Arc::new(effect));
                }
            }
        }

        if self.signal.enabled {
            router.register(Arc::new(SignalEffect::new(self.signal.digital_pin)));
        }

        router
    }

    /// Load configuration from the default path or SIREN_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            webhook = config.webhook.enabled,
            signal = config.signal.enabled,
            log = config.log.enabled,
            location = ?config.filter.location,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate TOML text, substituting `${VAR}` first.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: SirenConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.seconds_between_polls == 0 {
            return Err(ConfigError::ValidationError(
                "poller.seconds_between_polls must be at least 1".to_string(),
            ));
        }

        if self.filter.seconds_window < 0 {
            return Err(ConfigError::ValidationError(
                "filter.seconds_window must not be negative".to_string(),
            ));
        }

        if self.webhook.enabled {
            if let Some(url) = &self.webhook.url {
                if url.contains("${") {
                    warn!(
                        url = %url,
                        "Webhook URL contains unsubstituted environment variable"
                    );
                } else if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::ValidationError(
                        "webhook.url must start with http:// or https://".to_string(),
                    ));
                }
            }

            if reqwest::Method::from_bytes(self.webhook.method.to_uppercase().as_bytes()).is_err()
            {
                return Err(ConfigError::ValidationError(format!(
                    "webhook.method '{}' is not a valid HTTP method",
                    self.webhook.method
                )));
            }
        }

        if self.signal.digital_pin > 127 {
            return Err(ConfigError::ValidationError(
                "signal.digital_pin must be between 0 and 127".to_string(),
            ));
        }

        if self.relay.batch_limit == 0 {
            return Err(ConfigError::ValidationError(
                "relay.batch_limit must be at least 1".to_string(),
            ));
        }

        if self.relay.api_key.as_deref().is_some_and(|key| key.contains("${")) {
            warn!("relay.api_key contains unsubstituted environment variable, ignoring it");
        }

        if !self.relay.skip_authorization
            && self.relay.api_key.as_deref().map_or(true, str::is_empty)
        {
            warn!("relay.api_key is not set; every relay request will be rejected");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("SIREN_TEST_VAR", "substituted_value");
        let input = "url = \"${SIREN_TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("SIREN_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${SIREN_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${SIREN_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = SirenConfig::default();
        assert_eq!(config.poller.seconds_between_polls, 15);
        assert_eq!(config.poller.history_file, PathBuf::from("history.txt"));
        assert_eq!(config.filter.seconds_window, 300);
        assert_eq!(config.webhook.method, "POST");
        assert_eq!(config.signal.digital_pin, 0);
        assert_eq!(config.relay.port, 3000);
        assert_eq!(config.relay.batch_limit, 10);
        assert!(config.relay.return_only_message_count);
        assert_eq!(config.relay.queue.backend, QueueBackendKind::Redis);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = SirenConfig::parse(
            r#"
            [poller]
            feed_url = "https://example.com/alerts.json"
        "#,
        )
        .unwrap();
        assert_eq!(
            config.poller.require_feed_url().unwrap(),
            "https://example.com/alerts.json"
        );
        assert!(config.log.enabled);
        assert!(!config.webhook.enabled);
    }

    #[test]
    fn test_parse_full_config() {
        let config = SirenConfig::parse(
            r#"
            [poller]
            feed_url = "https://example.com/alerts.json"
            seconds_between_polls = 30
            history_file = "/var/lib/siren/history.txt"
            headers = { Referer = "https://example.com/" }

            [filter]
            location = "Haifa"
            seconds_window = 120

            [webhook]
            enabled = true
            url = "https://hooks.example.com/in"
            method = "get"
            headers = { "Content-Type" = "application/x-www-form-urlencoded" }
            params = { token = "abc" }

            [signal]
            enabled = true
            digital_pin = 9

            [log]
            prefix = "siren"

            [relay]
            port = 8080
            api_key = "k"
            return_only_message_count = false
            batch_limit = 5

            [relay.queue]
            backend = "memory"
        "#,
        )
        .unwrap();

        assert_eq!(config.poller.interval(), Duration::from_secs(30));
        assert_eq!(config.poller.headers["Referer"], "https://example.com/");
        assert_eq!(config.filter.location.as_deref(), Some("Haifa"));
        assert_eq!(config.webhook.params["token"], "abc");
        assert_eq!(config.signal.digital_pin, 9);
        assert_eq!(config.relay.queue.backend, QueueBackendKind::Memory);

        let options = config.relay.options();
        assert_eq!(options.batch_limit, 5);
        assert!(!options.return_only_message_count);

        let router = config.build_router();
        assert_eq!(router.effect_names(), vec!["log", "webhook", "signal"]);
    }

    #[test]
    fn test_build_filter() {
        let config = SirenConfig::parse(
            r#"
            [filter]
            location = "TelAviv"
            seconds_window = 60
        "#,
        )
        .unwrap();
        let filter = config.filter.build_filter();
        assert_eq!(filter.location(), Some("TelAviv"));
        assert_eq!(filter.max_age_seconds(), 60);
    }

    #[test]
    fn test_webhook_without_url_is_skipped() {
        let config = SirenConfig::parse(
            r#"
            [webhook]
            enabled = true
        "#,
        )
        .unwrap();
        assert_eq!(config.build_router().effect_names(), vec!["log"]);
    }

    #[test]
    fn test_unsubstituted_webhook_is_skipped() {
        let config = SirenConfig::parse(
            r#"
            [webhook]
            enabled = true
            url = "${SIREN_UNSET_WEBHOOK_URL}"
        "#,
        )
        .unwrap();
        assert_eq!(config.build_router().effect_names(), vec!["log"]);
    }

    #[test]
    fn test_missing_feed_url() {
        let config = SirenConfig::default();
        assert!(matches!(
            config.poller.require_feed_url(),
            Err(ConfigError::MissingField(_))
        ));
        assert!(config.poller.build_feed().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let result = SirenConfig::parse(
            r#"
            [webhook]
            enabled = true
            url = "not-a-url"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_invalid_method() {
        let result = SirenConfig::parse(
            r#"
            [webhook]
            enabled = true
            url = "https://example.com"
            method = "NOT A METHOD"
        "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_bounds() {
        assert!(SirenConfig::parse("[poller]\nseconds_between_polls = 0").is_err());
        assert!(SirenConfig::parse("[filter]\nseconds_window = -1").is_err());
        assert!(SirenConfig::parse("[signal]\ndigital_pin = 200").is_err());
        assert!(SirenConfig::parse("[relay]\nbatch_limit = 0").is_err());
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let result = SirenConfig::parse("[relay.queue]\nbackend = \"sqs\"");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("siren.toml");
        fs::write(&path, "[relay]\nport = 9000\n").unwrap();

        let config = SirenConfig::load_from(&path).unwrap();
        assert_eq!(config.relay.port, 9000);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = SirenConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.relay.port, 3000);
    }

    #[test]
    fn test_unsubstituted_api_key_is_ignored() {
        let config = SirenConfig::parse("[relay]\napi_key = \"${SIREN_UNSET_RELAY_KEY}\"").unwrap();
        assert_eq!(config.relay.options().api_key, None);
    }

    #[tokio::test]
    async fn test_memory_relay_handler() {
        let config = SirenConfig::parse(
            r#"
            [relay]
            skip_authorization = true

            [relay.queue]
            backend = "memory"
        "#,
        )
        .unwrap();
        let handler = config.relay.build_handler().unwrap();
        let response = handler
            .handle(crate::relay::RelayRequest::new("GET", "/read"))
            .await;
        assert_eq!(response.status, 200);
    }
}

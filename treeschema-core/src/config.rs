//! Configuration system for the Tree Schema client.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/treeschema/config.toml` and/or
//! `.treeschema/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default API endpoint used when no host is configured.
pub const DEFAULT_HOST: &str = "https://api.treeschema.com";

/// Legacy single-variable override for the API endpoint.
pub const HOST_ENV_VAR: &str = "TREE_SCHEMA_HOST";

/// Top-level configuration for a Tree Schema session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base endpoint of the Tree Schema API, without the `/v1` suffix.
    pub host: String,
    /// Account identifier (the e-mail address the secret key belongs to).
    #[serde(default)]
    pub email: String,
    /// Environment variable holding the secret key.
    pub secret_key_env: String,
    /// Optional key into the OS credential store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_store_key: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Page size used when listing collections.
    pub page_size: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub poll: PollPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            email: String::new(),
            secret_key_env: "TREE_SCHEMA_SECRET_KEY".to_string(),
            credential_store_key: None,
            request_timeout_secs: 30,
            page_size: 100,
            retry: RetryConfig::default(),
            poll: PollPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if the config looks sane. Problems are reported as
    /// human-readable warnings rather than errors.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.host.starts_with("http://") && !self.host.starts_with("https://") {
            warnings.push(format!(
                "host ({}) has no http:// or https:// scheme",
                self.host
            ));
        }
        if self.email.is_empty() {
            warnings.push("email is empty; requests will not authenticate".to_string());
        }
        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs is 0; every request will time out".to_string());
        }
        if self.page_size == 0 {
            warnings.push("page_size is 0; the server default will be used".to_string());
        }
        warnings.extend(self.poll.validate());
        warnings
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry behaviour for transient transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay.
    pub max_backoff_ms: u64,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Longest a manifest wait may run.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Polling schedule and hard deadline for asynchronous manifest processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay before the second status poll.
    pub initial_interval_ms: u64,
    /// Upper bound for the delay between polls.
    pub max_interval_ms: u64,
    /// Growth factor applied to the delay after each poll.
    pub multiplier: f64,
    /// Hard deadline for the whole wait.
    pub timeout_secs: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            max_interval_ms: 10_000,
            multiplier: 1.5,
            timeout_secs: 600.0,
        }
    }
}

impl PollPolicy {
    /// A fixed-interval policy with the given deadline.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            initial_interval_ms: ms,
            max_interval_ms: ms,
            multiplier: 1.0,
            timeout_secs: timeout.as_secs_f64(),
        }
    }

    /// The wait deadline. Negative or NaN values count as zero; anything past
    /// [`MAX_POLL_TIMEOUT`], infinity included, is capped to it.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs.max(0.0))
            .map_or(MAX_POLL_TIMEOUT, |t| t.min(MAX_POLL_TIMEOUT))
    }

    /// Delay to sleep after the given (zero-based) poll attempt.
    pub fn interval_for(&self, attempt: u32) -> Duration {
        let base = self.initial_interval_ms as f64 * self.multiplier.max(1.0).powi(attempt as i32);
        let capped = base.min(self.max_interval_ms.max(self.initial_interval_ms) as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.initial_interval_ms == 0 {
            warnings.push("poll.initial_interval_ms is 0; status will be polled in a tight loop".to_string());
        }
        if self.multiplier < 1.0 {
            warnings.push(format!(
                "poll.multiplier ({}) is below 1.0 and will be treated as 1.0",
                self.multiplier
            ));
        }
        if self.timeout_secs.is_nan() || self.timeout_secs <= 0.0 {
            warnings.push(format!(
                "poll.timeout_secs ({}) is not positive; waits will time out immediately",
                self.timeout_secs
            ));
        } else if self.timeout_secs > MAX_POLL_TIMEOUT.as_secs_f64() {
            warnings.push(format!(
                "poll.timeout_secs ({}) exceeds {} and will be capped",
                self.timeout_secs,
                MAX_POLL_TIMEOUT.as_secs()
            ));
        }
        if self.initial_interval_ms as f64 > self.timeout_secs * 1000.0 {
            warnings.push(format!(
                "poll.initial_interval_ms ({}) exceeds poll.timeout_secs ({}); only one poll will run",
                self.initial_interval_ms, self.timeout_secs
            ));
        }
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. `TREE_SCHEMA_HOST` for the endpoint
/// 3. Environment variables (prefixed with `TREESCHEMA_`)
/// 4. Workspace-local config (`.treeschema/config.toml`)
/// 5. User config (`~/.config/treeschema/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ClientConfig>,
) -> Result<ClientConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("com", "treeschema", "treeschema") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".treeschema").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TREESCHEMA_HOST, TREESCHEMA_POLL__TIMEOUT_SECS, etc.
    figment = figment.merge(Env::prefixed("TREESCHEMA_").split("__"));

    if let Ok(host) = std::env::var(HOST_ENV_VAR) {
        if !host.trim().is_empty() {
            figment = figment.merge(Serialized::default("host", host.trim().to_string()));
        }
    }

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any Tree Schema configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("com", "treeschema", "treeschema") {
        if config_dir.config_dir().join("config.toml").exists() {
            return true;
        }
    }

    if let Some(ws) = workspace {
        if ws.join(".treeschema").join("config.toml").exists() {
            return true;
        }
    }

    false
}

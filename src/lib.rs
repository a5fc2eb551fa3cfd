//! Chat-driven courier for a municipal tax portal
//!
//! A conversation state machine per chat, coupled one-to-one with a Chrome
//! session that logs into the portal, runs scripted workflows and captures
//! the generated certificate PDF from the network layer.

pub mod browser;
pub mod browser_setup;
pub mod capture;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod gateway;
mod manager;
pub mod session;
pub mod utils;
pub mod workflow;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::constants::{
    CONFIG_PATH_ENV, DEFAULT_BRIDGE_URL, DEFAULT_CAPTURE_WINDOW_MS, DEFAULT_PORTAL_URL,
};
use crate::utils::{validate_interaction_timeout, validate_navigation_timeout};
use crate::workflow::WorkflowSet;

pub use error::{ConfigError, PortalError, PortalResult};
pub use manager::ChromeDriver;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub workflows: WorkflowSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Page every login workflow starts from
    #[serde(default = "default_portal_url")]
    pub base_url: String,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, certificate checks)
    /// WARNING: the portal is plain HTTP; only needed behind broken proxies
    #[serde(default)]
    pub disable_security: bool,

    /// Explicit Chrome executable; searched for when absent
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

/// Bounds applied by the browser driver and the capture protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Element waits, clicks and typing
    #[serde(default = "default_action_ms")]
    pub action_ms: u64,

    /// Page loads and post-submit navigation
    #[serde(default = "default_navigation_ms")]
    pub navigation_ms: u64,

    /// Capture window for the certificate PDF
    #[serde(default = "default_capture_window_ms")]
    pub capture_window_ms: u64,
}

/// Live browser session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on concurrently open browser sessions
    #[serde(default = "default_max_live_sessions")]
    pub max_live_sessions: usize,

    /// Sessions untouched for this long are force-released
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// A per-conversation worker with an empty queue retires after this long
    #[serde(default = "default_worker_idle_secs")]
    pub worker_idle_secs: u64,
}

/// WhatsApp bridge connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Senders allowed to talk to the bot; empty allows everyone
    #[serde(default)]
    pub allow_from: Vec<String>,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_portal_url() -> String {
    DEFAULT_PORTAL_URL.to_string()
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    900
}

fn default_action_ms() -> u64 {
    30_000
}

fn default_navigation_ms() -> u64 {
    60_000
}

fn default_capture_window_ms() -> u64 {
    DEFAULT_CAPTURE_WINDOW_MS
}

fn default_max_live_sessions() -> usize {
    4
}

fn default_idle_timeout_secs() -> u64 {
    900
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_worker_idle_secs() -> u64 {
    300
}

fn default_bridge_url() -> String {
    DEFAULT_BRIDGE_URL.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_portal_url(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: false,
            executable: None,
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            action_ms: default_action_ms(),
            navigation_ms: default_navigation_ms(),
            capture_window_ms: default_capture_window_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_live_sessions: default_max_live_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            worker_idle_secs: default_worker_idle_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            allow_from: Vec::new(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window_ms)
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn worker_idle(&self) -> Duration {
        Duration::from_secs(self.worker_idle_secs)
    }
}

impl Config {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let portal = url::Url::parse(&self.portal.base_url)
            .map_err(|e| ConfigError::Invalid(format!("portal.base_url: {e}")))?;
        if !matches!(portal.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "portal.base_url must start with http:// or https://".into(),
            ));
        }

        let bridge = url::Url::parse(&self.gateway.bridge_url)
            .map_err(|e| ConfigError::Invalid(format!("gateway.bridge_url: {e}")))?;
        if !matches!(bridge.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(
                "gateway.bridge_url must start with ws:// or wss://".into(),
            ));
        }

        validate_interaction_timeout("timeouts.action_ms", self.timeouts.action_ms)?;
        validate_navigation_timeout("timeouts.navigation_ms", self.timeouts.navigation_ms)?;
        validate_interaction_timeout(
            "timeouts.capture_window_ms",
            self.timeouts.capture_window_ms,
        )?;

        if self.sessions.max_live_sessions == 0 {
            return Err(ConfigError::Invalid(
                "sessions.max_live_sessions must be at least 1".into(),
            ));
        }
        if self.sessions.sweep_interval_secs == 0 || self.sessions.worker_idle_secs == 0 {
            return Err(ConfigError::Invalid(
                "sessions.sweep_interval_secs and sessions.worker_idle_secs must be positive"
                    .into(),
            ));
        }

        self.workflows.validate()
    }
}

/// Parse and validate a YAML config document
pub fn parse_yaml_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to defaults when the file is absent
pub fn load_yaml_config(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        parse_yaml_config(&contents)
    } else {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

/// Config location: `PORTAL_COURIER_CONFIG`, else `config.yaml` in the
/// working directory
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

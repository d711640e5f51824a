use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};

use crate::aggregator::EvaluationMode;
use crate::dedup::DEFAULT_DEDUP_WINDOW;
use crate::notifications::DEFAULT_LOG_CAPACITY;
use crate::pages::{PageKind, PageProfile};
use crate::threshold::{DEFAULT_CHANGE_EPSILON, ThresholdRule};
use crate::window::DEFAULT_WINDOW_CAPACITY;

const DEFAULT_CONFIG_PATH: &str = "/config/ecotrack.yaml";

/// Top-level configuration for the ecotrack agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "AppConfig::default_page")]
    pub page: PageKind,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Persistence directory; only settable via `ECOTRACK_DATA_DIR`.
    #[serde(skip)]
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    const fn default_page() -> PageKind {
        PageKind::Dashboard
    }

    /// WebSocket URL of the configured page.
    pub fn push_url(&self) -> Result<String> {
        let path = self
            .server
            .push_path
            .clone()
            .unwrap_or_else(|| self.page.push_path());
        let mut url = self.base_url()?.join(&path).context("invalid server.push_path")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        if url.set_scheme(scheme).is_err() {
            bail!("cannot derive a websocket URL from {}", self.server.base_url);
        }
        Ok(url.to_string())
    }

    /// HTTP snapshot URL of the configured page.
    pub fn poll_url(&self) -> Result<String> {
        let path = self
            .server
            .poll_path
            .clone()
            .unwrap_or_else(|| self.page.poll_path());
        let url = self.base_url()?.join(&path).context("invalid server.poll_path")?;
        Ok(url.to_string())
    }

    /// Page profile with the configured rule table applied.
    pub fn page_profile(&self) -> PageProfile {
        let profile = PageProfile::for_page(self.page);
        match &self.alerts.rules {
            Some(rules) => profile.with_rules(rules.clone()),
            None => profile,
        }
    }

    fn base_url(&self) -> Result<Url> {
        Url::parse(&self.server.base_url)
            .with_context(|| format!("invalid server.base_url `{}`", self.server.base_url))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page: Self::default_page(),
            server: ServerConfig::default(),
            transport: TransportConfig::default(),
            alerts: AlertsConfig::default(),
            window: WindowConfig::default(),
            notifications: NotificationsConfig::default(),
            http: HttpConfig::default(),
            data_dir: None,
        }
    }
}

/// Location of the EcoTrack server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_base_url")]
    pub base_url: String,
    /// Overrides `/ws/<page>/`.
    #[serde(default)]
    pub push_path: Option<String>,
    /// Overrides `/api/<page>-data/`.
    #[serde(default)]
    pub poll_path: Option<String>,
}

impl ServerConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:8000".to_string()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            push_path: None,
            poll_path: None,
        }
    }
}

/// Push/poll timings (with friendly duration parsing).
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(
        default = "TransportConfig::default_poll_interval",
        with = "humantime_serde"
    )]
    pub poll_interval: Duration,
    #[serde(
        default = "TransportConfig::default_reconnect_delay",
        with = "humantime_serde"
    )]
    pub reconnect_delay: Duration,
    #[serde(default = "TransportConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(
        default = "TransportConfig::default_connect_timeout",
        with = "humantime_serde"
    )]
    pub connect_timeout: Duration,
    #[serde(
        default = "TransportConfig::default_request_timeout",
        with = "humantime_serde"
    )]
    pub request_timeout: Duration,
}

impl TransportConfig {
    const fn default_poll_interval() -> Duration {
        Duration::from_secs(5)
    }

    const fn default_reconnect_delay() -> Duration {
        Duration::from_secs(3)
    }

    const fn default_max_reconnect_attempts() -> u32 {
        5
    }

    const fn default_connect_timeout() -> Duration {
        Duration::from_secs(10)
    }

    const fn default_request_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::default_poll_interval(),
            reconnect_delay: Self::default_reconnect_delay(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            connect_timeout: Self::default_connect_timeout(),
            request_timeout: Self::default_request_timeout(),
        }
    }
}

/// Threshold evaluation and suppression settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "AlertsConfig::default_change_epsilon")]
    pub change_epsilon: f64,
    #[serde(default = "AlertsConfig::default_dedup_window", with = "humantime_serde")]
    pub dedup_window: Duration,
    #[serde(
        default = "AlertsConfig::default_dedup_cleanup_interval",
        with = "humantime_serde"
    )]
    pub dedup_cleanup_interval: Duration,
    #[serde(default)]
    pub evaluation: EvaluationMode,
    /// Replaces the built-in rule table of the page when set.
    #[serde(default)]
    pub rules: Option<Vec<ThresholdRule>>,
}

impl AlertsConfig {
    const fn default_change_epsilon() -> f64 {
        DEFAULT_CHANGE_EPSILON
    }

    const fn default_dedup_window() -> Duration {
        DEFAULT_DEDUP_WINDOW
    }

    const fn default_dedup_cleanup_interval() -> Duration {
        Duration::from_secs(60)
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            change_epsilon: Self::default_change_epsilon(),
            dedup_window: Self::default_dedup_window(),
            dedup_cleanup_interval: Self::default_dedup_cleanup_interval(),
            evaluation: EvaluationMode::default(),
            rules: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_capacity")]
    pub capacity: usize,
}

impl WindowConfig {
    const fn default_capacity() -> usize {
        DEFAULT_WINDOW_CAPACITY
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "NotificationsConfig::default_capacity")]
    pub capacity: usize,
}

impl NotificationsConfig {
    const fn default_capacity() -> usize {
        DEFAULT_LOG_CAPACITY
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
        }
    }
}

/// HTTP listener configuration (bind address).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:8282".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
        }
    }
}

/// Load configuration from YAML disk file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("ECOTRACK_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw)
            .with_context(|| format!("failed to parse YAML config at {}", path.display()))
            .map(Some),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

pub fn parse_config(raw: &str) -> Result<AppConfig> {
    Ok(serde_yaml::from_str(raw)?)
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Some(url) = non_empty_var("ECOTRACK_SERVER_URL")? {
        config.server.base_url = url;
    }

    if let Some(page) = non_empty_var("ECOTRACK_PAGE")? {
        config.page = match page.parse::<PageKind>() {
            Ok(page) => page,
            Err(err) => bail!("ECOTRACK_PAGE: {err}"),
        };
    }

    if let Some(dir) = non_empty_var("ECOTRACK_DATA_DIR")? {
        config.data_dir = Some(PathBuf::from(dir));
    }

    Ok(())
}

fn non_empty_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {name}")),
    }
}

pub fn validate(config: &AppConfig) -> Result<()> {
    if config.window.capacity == 0 {
        bail!("window.capacity must be at least 1");
    }
    if config.notifications.capacity == 0 {
        bail!("notifications.capacity must be at least 1");
    }
    if !config.alerts.change_epsilon.is_finite() || config.alerts.change_epsilon < 0.0 {
        bail!(
            "alerts.change_epsilon must be a non-negative number, got {}",
            config.alerts.change_epsilon
        );
    }
    if config.transport.poll_interval.is_zero() {
        bail!("transport.poll_interval must be greater than zero");
    }
    config.base_url()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::Direction;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("{}").expect("parse");
        assert_eq!(config.page, PageKind::Dashboard);
        assert_eq!(config.transport.poll_interval, Duration::from_secs(5));
        assert_eq!(config.transport.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.transport.max_reconnect_attempts, 5);
        assert_eq!(config.alerts.dedup_window, Duration::from_secs(300));
        assert_eq!(config.alerts.change_epsilon, 5.0);
        assert_eq!(config.alerts.evaluation, EvaluationMode::Latest);
        assert_eq!(config.window.capacity, 10);
        assert_eq!(config.notifications.capacity, 50);
        validate(&config).expect("defaults are valid");
    }

    #[test]
    fn parses_durations_pages_and_rules() {
        let raw = r#"
page: energy
server:
  base_url: https://eco.example.org
transport:
  poll_interval: 10s
  reconnect_delay: 1s
alerts:
  dedup_window: 2m
  evaluation: average
  rules:
    - metric_key: power_watts
      limit: 150
      direction: above
      title: Power
      message: "{value}W"
      severity: danger
"#;
        let config = parse_config(raw).expect("parse");
        assert_eq!(config.page, PageKind::Energy);
        assert_eq!(config.transport.poll_interval, Duration::from_secs(10));
        assert_eq!(config.alerts.dedup_window, Duration::from_secs(120));
        assert_eq!(config.alerts.evaluation, EvaluationMode::Average);

        let profile = config.page_profile();
        assert_eq!(profile.rules.len(), 1);
        assert_eq!(profile.rules[0].direction, Direction::Above);
        assert_eq!(profile.rules[0].limit, 150.0);

        assert_eq!(config.push_url().expect("push"), "wss://eco.example.org/ws/energy/");
        assert_eq!(
            config.poll_url().expect("poll"),
            "https://eco.example.org/api/energy-data/"
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.window.capacity = 0;
        assert!(validate(&config).is_err());

        let mut config = AppConfig::default();
        config.notifications.capacity = 0;
        assert!(validate(&config).is_err());

        let mut config = AppConfig::default();
        config.alerts.change_epsilon = -1.0;
        assert!(validate(&config).is_err());

        let mut config = AppConfig::default();
        config.server.base_url = "not a url".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn default_urls_follow_the_page() {
        let mut config = AppConfig::default();
        config.page = PageKind::Scores;
        assert_eq!(config.push_url().expect("push"), "ws://127.0.0.1:8000/ws/scores/");
        assert_eq!(
            config.poll_url().expect("poll"),
            "http://127.0.0.1:8000/api/scores-data/"
        );
    }

    #[test]
    fn unknown_page_is_rejected() {
        assert!(parse_config("page: quiz").is_err());
    }
}

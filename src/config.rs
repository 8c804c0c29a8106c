//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::game::Plugin;
use crate::{AppError, Result};

/// Game server and bridge connectivity.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GameConfig {
    /// Game server host the agents log into.
    #[serde(default = "default_game_host")]
    pub host: String,
    /// Game server port.
    #[serde(default = "default_game_port")]
    pub port: u16,
    /// Game protocol version string passed through to the client library.
    #[serde(default)]
    pub version: Option<String>,
    /// Address of the game-client bridge (`host:port`).
    #[serde(default = "default_bridge_addr")]
    pub bridge_addr: String,
    /// Prefix for generated agent usernames.
    #[serde(default = "default_username_prefix")]
    pub username_prefix: String,
    /// Plugins attached to every fresh connection, in order.
    #[serde(default = "default_plugins")]
    pub plugins: Vec<Plugin>,
    /// Upper bound on a single bridge request round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_game_host() -> String {
    "localhost".into()
}

fn default_game_port() -> u16 {
    25565
}

fn default_bridge_addr() -> String {
    "127.0.0.1:7878".into()
}

fn default_username_prefix() -> String {
    "Agent".into()
}

fn default_plugins() -> Vec<Plugin> {
    vec![
        Plugin::Pathfinder,
        Plugin::CollectBlock,
        Plugin::Pvp,
        Plugin::Hawkeye,
    ]
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            host: default_game_host(),
            port: default_game_port(),
            version: None,
            bridge_addr: default_bridge_addr(),
            username_prefix: default_username_prefix(),
            plugins: default_plugins(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Reconnect backoff parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling applied before jitter.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Maximum jitter as a fraction of the capped delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ratio() -> f64 {
    0.25
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Stuck/floating detection thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct StuckConfig {
    /// Whether the detector runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sampling period.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Displacement below which the agent counts as motionless.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// How long a floating episode must last before the goal is cancelled.
    #[serde(default = "default_threshold_ms")]
    pub threshold_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_sample_interval_ms() -> u64 {
    2_000
}

fn default_epsilon() -> f64 {
    0.05
}

fn default_threshold_ms() -> u64 {
    2_000
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: default_sample_interval_ms(),
            epsilon: default_epsilon(),
            threshold_ms: default_threshold_ms(),
        }
    }
}

/// Spectating viewer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ViewerConfig {
    /// Whether a viewer is started after each spawn.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay after spawn before binding, so the previous viewer's port is released.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Lowest port handed out to a session (inclusive).
    #[serde(default = "default_port_min")]
    pub port_min: u16,
    /// Highest port handed out to a session (exclusive).
    #[serde(default = "default_port_max")]
    pub port_max: u16,
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

fn default_port_min() -> u16 {
    10_000
}

fn default_port_max() -> u16 {
    65_535
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_delay_ms: default_settle_delay_ms(),
            port_min: default_port_min(),
            port_max: default_port_max(),
        }
    }
}

/// Script library and cache policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScriptConfig {
    /// Root directory of the script library.
    #[serde(default = "default_script_root")]
    pub root: PathBuf,
    /// Absolute age after which a cached module is reloaded.
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    /// Idle time after which a cached module is dropped.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Maximum number of resident modules.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Period of the background eviction sweep.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Evict entries whose skill file changes on disk.
    #[serde(default = "default_true")]
    pub watch: bool,
}

fn default_script_root() -> PathBuf {
    PathBuf::from("library")
}

fn default_max_age_seconds() -> u64 {
    300
}

fn default_idle_seconds() -> u64 {
    600
}

fn default_capacity() -> usize {
    100
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            root: default_script_root(),
            max_age_seconds: default_max_age_seconds(),
            idle_seconds: default_idle_seconds(),
            capacity: default_capacity(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            watch: true,
        }
    }
}

fn default_http_port() -> u16 {
    9999
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Port of the HTTP surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Game server and bridge connectivity.
    #[serde(default)]
    pub game: GameConfig,
    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Stuck detector.
    #[serde(default)]
    pub stuck: StuckConfig,
    /// Spectating viewer.
    #[serde(default)]
    pub viewer: ViewerConfig,
    /// Script library and cache.
    #[serde(default)]
    pub scripts: ScriptConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Bridge request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.game.request_timeout_ms)
    }

    /// Cache sweep period.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.scripts.sweep_interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.reconnect.base_delay_ms == 0 {
            return Err(AppError::Config(
                "reconnect.base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(AppError::Config(
                "reconnect.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_ratio) {
            return Err(AppError::Config(
                "reconnect.jitter_ratio must be within 0.0..=1.0".into(),
            ));
        }
        if self.stuck.sample_interval_ms == 0 {
            return Err(AppError::Config(
                "stuck.sample_interval_ms must be greater than zero".into(),
            ));
        }
        if self.stuck.epsilon.is_nan() || self.stuck.epsilon <= 0.0 {
            return Err(AppError::Config("stuck.epsilon must be positive".into()));
        }
        if self.viewer.port_min >= self.viewer.port_max {
            return Err(AppError::Config(
                "viewer.port_min must be below viewer.port_max".into(),
            ));
        }
        if self.scripts.capacity == 0 {
            return Err(AppError::Config(
                "scripts.capacity must be greater than zero".into(),
            ));
        }
        if self.scripts.max_age_seconds == 0 || self.scripts.idle_seconds == 0 {
            return Err(AppError::Config(
                "scripts.max_age_seconds and scripts.idle_seconds must be greater than zero"
                    .into(),
            ));
        }
        if self.scripts.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "scripts.sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.game.username_prefix.len() > 10 {
            return Err(AppError::Config(
                "game.username_prefix must be at most 10 characters".into(),
            ));
        }
        Ok(())
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            game: GameConfig::default(),
            reconnect: ReconnectConfig::default(),
            stuck: StuckConfig::default(),
            viewer: ViewerConfig::default(),
            scripts: ScriptConfig::default(),
        }
    }
}

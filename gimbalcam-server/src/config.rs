//! Bridge configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via GIMBALCAM_CONFIG or --config)
//! 3. Environment variables
//! 4. Command line flags (applied by the binary)

use gimbalcam_client::{BridgeConfig, DispatchConfig, PollConfig, SessionConfig};
use gimbalcam_protocol::{CommandSet, VideoModeCodes, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device connection settings.
    pub device: DeviceConfig,
    /// Command timing.
    pub dispatch: DispatchSettings,
    /// Telemetry polling.
    pub telemetry: TelemetryConfig,
    /// Wire identifiers.
    pub protocol: ProtocolConfig,
    /// HTTP listener.
    pub http: HttpConfig,
    /// Prometheus endpoint.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from `path` (or GIMBALCAM_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("GIMBALCAM_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.device.apply_env_overrides();
        self.telemetry.apply_env_overrides();
        self.http.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Rejects settings the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "device.address must not be empty".to_string(),
            ));
        }
        if self.device.port == 0 {
            return Err(ConfigError::ValidationError(
                "device.port must not be 0".to_string(),
            ));
        }
        if self.device.connect_timeout_ms == 0 || self.device.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "device timeouts must be positive".to_string(),
            ));
        }
        if self.dispatch.reply_timeout_ms == 0 || self.dispatch.confirm_window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch timeouts must be positive".to_string(),
            ));
        }
        if self.dispatch.confirm_poll_ms == 0 || self.telemetry.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the bridge configuration.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::new(self.device.address.trim())
            .with_session(self.device.session_config())
            .with_dispatch(self.dispatch.dispatch_config())
            .with_poll(self.telemetry.poll_config())
            .with_commands(self.protocol.commands)
            .with_video_modes(self.protocol.video_modes)
    }
}

/// Device connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device host name or IP address.
    pub address: String,
    /// Device TCP port.
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated before the socket is considered dead.
    pub read_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "192.168.144.25".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 3000,
            read_timeout_ms: 3000,
            reconnect_interval_ms: 2000,
        }
    }
}

impl DeviceConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("GIMBALCAM_DEVICE_ADDR") {
            if !addr.trim().is_empty() {
                self.address = addr.trim().to_string();
            }
        }

        if let Ok(port) = std::env::var("GIMBALCAM_DEVICE_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_port(self.port)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_reconnect_interval(Duration::from_millis(self.reconnect_interval_ms))
    }
}

/// Command timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub reply_timeout_ms: u64,
    /// Resends after the first attempt.
    pub retries: u32,
    pub confirm_window_ms: u64,
    pub confirm_poll_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 500,
            retries: 2,
            confirm_window_ms: 1000,
            confirm_poll_ms: 250,
        }
    }
}

impl DispatchSettings {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::default()
            .with_reply_timeout(Duration::from_millis(self.reply_timeout_ms))
            .with_retries(self.retries)
            .with_confirm_window(Duration::from_millis(self.confirm_window_ms))
            .with_confirm_poll(Duration::from_millis(self.confirm_poll_ms))
    }
}

/// Telemetry polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub poll_interval_ms: u64,
    /// Zoom range and video mode are polled every this many intervals.
    pub slow_poll_every: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            slow_poll_every: 10,
        }
    }
}

impl TelemetryConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("GIMBALCAM_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.poll_interval_ms = ms;
            }
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::default()
            .with_interval(Duration::from_millis(self.poll_interval_ms))
            .with_slow_every(self.slow_poll_every)
    }
}

/// Firmware-specific wire identifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub commands: CommandSet,
    pub video_modes: VideoModeCodes,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
        }
    }
}

impl HttpConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("GIMBALCAM_HTTP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `GET /metrics` on the HTTP listener.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("GIMBALCAM_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde module for SocketAddr (kept as a string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.port, 37260);
        assert_eq!(config.http.bind_addr.port(), 8000);
        assert_eq!(config.dispatch.retries, 2);
        assert!(config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "device:\n  address: 10.1.2.3\ntelemetry:\n  poll_interval_ms: 250\nprotocol:\n  commands:\n    video_mode_set: 32\n  video_modes:\n    thermal: 2"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.device.address, "10.1.2.3");
        assert_eq!(config.device.port, 37260);
        assert_eq!(config.telemetry.poll_interval_ms, 250);
        assert_eq!(config.telemetry.slow_poll_every, 10);
        assert_eq!(config.protocol.commands.video_mode_set, 0x20);
        assert_eq!(config.protocol.commands.gimbal_info, 0x0A);
        assert_eq!(config.protocol.video_modes.thermal, 2);
        assert_eq!(config.protocol.video_modes.rgb, 3);
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device: [not, a, map").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, _)));
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/gimbalcam.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, _)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.device.address = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.telemetry.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device.read_timeout_ms = 0;
        match config.validate() {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("device timeouts")),
            other => panic!("unexpected {:?}", other),
        }

        let mut config = Config::default();
        config.device.connect_timeout_ms = 0;
        assert!(config.validate().is_err());

        // Reconnecting immediately is allowed.
        let mut config = Config::default();
        config.device.reconnect_interval_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bridge_config() {
        let mut config = Config::default();
        config.device.address = " 10.0.0.9 ".to_string();
        config.dispatch.reply_timeout_ms = 200;

        let bridge = config.bridge_config();
        assert_eq!(bridge.address, "10.0.0.9");
        assert_eq!(bridge.session.port, 37260);
        assert_eq!(bridge.session.read_timeout, Duration::from_secs(3));
        assert_eq!(bridge.dispatch.reply_timeout, Duration::from_millis(200));
        assert_eq!(bridge.poll.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gimbalcam.yaml");
        let config = Config::default();
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let parsed = Config::from_file(&path).unwrap();
        assert_eq!(parsed.http.bind_addr, config.http.bind_addr);
        assert_eq!(parsed.protocol.commands, config.protocol.commands);
    }
}

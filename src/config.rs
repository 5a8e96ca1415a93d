//! Daemon configuration: compiled defaults, an optional TOML file and
//! `ONVIF_*` environment overrides, applied in that order.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::http::ConnectionConfig;
use crate::ptz::{PtzConfiguration, PtzNode, PtzVector, PTZ_MAX_PRESETS, VELOCITY_SPACE};
use crate::rtsp::{RtspAuthConfig, RtspAuthType, RtspUser, DEFAULT_REALM};
use crate::security::{
    SecurityUser, WsSecurityConfig, DEFAULT_MAX_TOKEN_AGE_SECS, DEFAULT_NONCE_CACHE_SIZE,
};
use crate::{OnvifError, Result};

pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["./onvif.toml", "/etc/onvif/onvif.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub connection: ConnectionSettings,
    pub rtsp: RtspSettings,
    pub security: SecuritySettings,
    pub ptz: PtzSettings,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
    pub rtsp_port: u16,
    /// Address put in XAddrs and stream URIs; detected when unset.
    pub advertised_ip: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            rtsp_port: 554,
            advertised_ip: None,
        }
    }
}

/// Identity reported by GetDeviceInformation and the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hardware_id: String,
    pub hostname: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            manufacturer: "Anyka".to_string(),
            model: "AK3918 Camera".to_string(),
            firmware_version: "1.0.0".to_string(),
            serial_number: "AK3918-001".to_string(),
            hardware_id: "1.0".to_string(),
            hostname: "anyka-camera".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub idle_timeout_ms: u64,
    pub keepalive_timeout_ms: u64,
    pub max_keepalive_requests: u32,
    pub buffer_size: usize,
    pub sweep_interval_ms: u64,
    pub max_connections: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30_000,
            keepalive_timeout_ms: 5_000,
            max_keepalive_requests: 100,
            buffer_size: 32_768,
            sweep_interval_ms: 1_000,
            max_connections: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtspSettings {
    pub auth: RtspAuthType,
    pub realm: String,
    pub users: Vec<RtspUser>,
}

impl Default for RtspSettings {
    fn default() -> Self {
        Self {
            auth: RtspAuthType::None,
            realm: DEFAULT_REALM.to_string(),
            users: Vec::new(),
        }
    }
}

/// WS-Security on the SOAP services; off means every operation is anonymous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub enabled: bool,
    pub max_token_age_secs: u64,
    pub require_digest: bool,
    pub nonce_cache_size: usize,
    pub users: Vec<SecurityUser>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_token_age_secs: DEFAULT_MAX_TOKEN_AGE_SECS,
            require_digest: true,
            nonce_cache_size: DEFAULT_NONCE_CACHE_SIZE,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtzSettings {
    pub default_speed: f32,
    pub default_timeout_ms: u64,
    pub max_presets: usize,
}

impl Default for PtzSettings {
    fn default() -> Self {
        Self {
            default_speed: 0.5,
            default_timeout_ms: 10_000,
            max_presets: PTZ_MAX_PRESETS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub hello_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hello_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| OnvifError::Config(format!("{} has invalid value '{}'", name, value)))
}

impl Config {
    /// Loads `path` if given, otherwise the first existing search path, then
    /// applies the environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => CONFIG_SEARCH_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file()),
        };
        let mut config = match file {
            Some(p) => Self::load_from(&p)?,
            None => {
                debug!("no config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_with(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses one TOML file; missing keys keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OnvifError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| OnvifError::Config(format!("{}: {}", path.display(), e)))?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OnvifError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| OnvifError::Config(e.to_string()))
    }

    /// Applies `ONVIF_*` overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ONVIF_HTTP_PORT") {
            self.server.http_port = parse_env("ONVIF_HTTP_PORT", &v)?;
        }
        if let Some(v) = lookup("ONVIF_RTSP_PORT") {
            self.server.rtsp_port = parse_env("ONVIF_RTSP_PORT", &v)?;
        }
        if let Some(v) = lookup("ONVIF_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(v) = lookup("ONVIF_ADVERTISED_IP") {
            self.server.advertised_ip = Some(v).filter(|ip| !ip.is_empty());
        }
        if let Some(v) = lookup("ONVIF_WS_SECURITY") {
            self.security.enabled = parse_env("ONVIF_WS_SECURITY", &v)?;
        }
        if let Some(v) = lookup("ONVIF_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 || self.server.rtsp_port == 0 {
            return Err(OnvifError::Config("ports must be non-zero".into()));
        }
        if self.server.http_port == self.server.rtsp_port {
            return Err(OnvifError::Config(format!(
                "HTTP and RTSP both configured on port {}",
                self.server.http_port
            )));
        }
        if !(1..=PTZ_MAX_PRESETS).contains(&self.ptz.max_presets) {
            return Err(OnvifError::Config(format!(
                "ptz.max_presets must be within 1..={}",
                PTZ_MAX_PRESETS
            )));
        }
        if !(0.0..=1.0).contains(&self.ptz.default_speed) {
            return Err(OnvifError::Config("ptz.default_speed must be within 0..=1".into()));
        }
        let c = &self.connection;
        let timeouts = [
            ("connection.idle_timeout_ms", c.idle_timeout_ms),
            ("connection.keepalive_timeout_ms", c.keepalive_timeout_ms),
            ("connection.sweep_interval_ms", c.sweep_interval_ms),
            ("ptz.default_timeout_ms", self.ptz.default_timeout_ms),
            ("discovery.hello_interval_secs", self.discovery.hello_interval_secs),
            ("security.max_token_age_secs", self.security.max_token_age_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(OnvifError::Config(format!("{} must be non-zero", name)));
        }
        if c.buffer_size == 0 || c.max_connections == 0 {
            return Err(OnvifError::Config(
                "connection buffer and limit must be non-zero".into(),
            ));
        }
        if self.rtsp.auth != RtspAuthType::None && self.rtsp.users.is_empty() {
            return Err(OnvifError::Config(
                "rtsp authentication enabled without users".into(),
            ));
        }
        if self.security.enabled && self.security.users.is_empty() {
            return Err(OnvifError::Config("security enabled without users".into()));
        }
        if self.security.nonce_cache_size == 0 {
            return Err(OnvifError::Config("security.nonce_cache_size must be non-zero".into()));
        }
        self.logging
            .level
            .parse::<log::LevelFilter>()
            .map_err(|_| OnvifError::Config(format!("unknown log level '{}'", self.logging.level)))?;
        Ok(())
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.logging.level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        let c = &self.connection;
        ConnectionConfig {
            idle_timeout: Duration::from_millis(c.idle_timeout_ms),
            keepalive_timeout: Duration::from_millis(c.keepalive_timeout_ms),
            buffer_size: c.buffer_size,
            max_keepalive_requests: c.max_keepalive_requests,
            max_connections: c.max_connections,
            sweep_interval: Duration::from_millis(c.sweep_interval_ms),
        }
    }

    pub fn to_rtsp_auth_config(&self) -> RtspAuthConfig {
        let mut auth = RtspAuthConfig::new(self.rtsp.auth).with_realm(&self.rtsp.realm);
        for user in &self.rtsp.users {
            auth.set_user(&user.username, &user.password);
        }
        auth
    }

    /// `None` when WS-Security is disabled.
    pub fn to_ws_security_config(&self) -> Option<WsSecurityConfig> {
        let s = &self.security;
        if !s.enabled {
            return None;
        }
        let mut config = WsSecurityConfig {
            max_token_age: chrono::TimeDelta::seconds(s.max_token_age_secs as i64),
            require_digest: s.require_digest,
            nonce_cache_size: s.nonce_cache_size,
            users: Vec::new(),
        };
        for user in &s.users {
            config.set_user(user.clone());
        }
        Some(config)
    }

    pub fn to_ptz_node(&self) -> PtzNode {
        PtzNode {
            max_presets: self.ptz.max_presets,
            ..PtzNode::default()
        }
    }

    pub fn to_ptz_configuration(&self) -> PtzConfiguration {
        let speed = self.ptz.default_speed;
        PtzConfiguration {
            default_speed: PtzVector::new(speed, speed, 0.0).with_space(VELOCITY_SPACE),
            default_timeout_ms: self.ptz.default_timeout_ms,
            ..PtzConfiguration::default()
        }
    }
}

const TEMPLATE: &str = r#"# onvifd configuration
# Every key is optional; the values below are the defaults.

[server]
bind_address = "0.0.0.0"
http_port = 8080
rtsp_port = 554
# advertised_ip = "192.168.1.20"

[device]
manufacturer = "Anyka"
model = "AK3918 Camera"
firmware_version = "1.0.0"
serial_number = "AK3918-001"
hardware_id = "1.0"
hostname = "anyka-camera"

[connection]
idle_timeout_ms = 30000
keepalive_timeout_ms = 5000
max_keepalive_requests = 100
buffer_size = 32768
sweep_interval_ms = 1000
max_connections = 64

[rtsp]
# none, basic or digest
auth = "none"
realm = "RTSP Server"
# [[rtsp.users]]
# username = "admin"
# password = "admin"

[security]
# WS-Security UsernameToken on the SOAP services
enabled = false
max_token_age_secs = 300
require_digest = true
nonce_cache_size = 10000
# [[security.users]]
# username = "admin"
# password = "admin"
# level = "administrator"

[ptz]
default_speed = 0.5
default_timeout_ms = 10000
max_presets = 10

[discovery]
enabled = true
hello_interval_secs = 300

[logging]
level = "info"
"#;

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        std::fs::write(path, TEMPLATE)?;
    }
    Ok(())
}

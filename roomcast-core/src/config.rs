use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::MediaKind;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub signaling: SignalingConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted WebSocket frame, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub request_timeout_ms: u64,
    /// Per-connection outbound queue depth
    pub outbound_buffer: usize,
    pub max_room_id_len: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            outbound_buffer: 256,
            max_room_id_len: 128,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    /// Directory for daily-rotated log files; stdout only when unset
    pub file_dir: Option<String>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_dir: None,
            file_prefix: "roomcast.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub listen_ips: Vec<ListenIpConfig>,
    pub min_port: u16,
    pub max_port: u16,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub media_codecs: Vec<MediaCodecConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_ips: vec![ListenIpConfig {
                ip: "127.0.0.1".to_string(),
                announced_ip: None,
            }],
            min_port: 40000,
            max_port: 49999,
            enable_udp: true,
            enable_tcp: true,
            media_codecs: vec![
                MediaCodecConfig {
                    kind: MediaKind::Audio,
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: Some(2),
                },
                MediaCodecConfig {
                    kind: MediaKind::Video,
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: None,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenIpConfig {
    pub ip: String,
    /// Public address advertised in ICE candidates (NAT / cloud hosts)
    #[serde(default)]
    pub announced_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCodecConfig {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default)]
    pub channels: Option<u8>,
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`ROOMCAST_SERVER__PORT`, ...)
    /// 2. Config file
    /// 3. Defaults
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ROOMCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.max_message_size < 1024 {
            errors.push("server.max_message_size must be at least 1024 bytes".to_string());
        }

        if self.signaling.request_timeout_ms == 0 {
            errors.push("signaling.request_timeout_ms must be greater than 0".to_string());
        }
        if self.signaling.outbound_buffer == 0 {
            errors.push("signaling.outbound_buffer must be greater than 0".to_string());
        }
        if self.signaling.max_room_id_len == 0 {
            errors.push("signaling.max_room_id_len must be greater than 0".to_string());
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        let engine = &self.engine;
        if engine.listen_ips.is_empty() {
            errors.push("engine.listen_ips must contain at least one address".to_string());
        }
        for (i, listen) in engine.listen_ips.iter().enumerate() {
            if listen.ip.parse::<std::net::IpAddr>().is_err() {
                errors.push(format!("engine.listen_ips[{i}].ip is not an IP address: {}", listen.ip));
            }
        }
        if engine.min_port == 0 || engine.min_port > engine.max_port {
            errors.push(format!(
                "engine port range is invalid: {}-{}",
                engine.min_port, engine.max_port
            ));
        }
        if !engine.enable_udp && !engine.enable_tcp {
            errors.push("engine must enable at least one of UDP or TCP".to_string());
        }
        if engine.media_codecs.is_empty() {
            errors.push("engine.media_codecs must not be empty".to_string());
        }
        for codec in &engine.media_codecs {
            if !codec.kind.matches_mime_type(&codec.mime_type) {
                errors.push(format!(
                    "codec {} does not match its kind {}",
                    codec.mime_type, codec.kind
                ));
            }
            if codec.clock_rate == 0 {
                errors.push(format!("codec {} has a zero clock rate", codec.mime_type));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

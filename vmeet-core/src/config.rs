use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub directory: DirectoryConfig,
    pub storage: StorageConfig,
    pub poll_review: PollReviewConfig,
    pub webrtc: WebRtcConfig,
    pub recording: RecordingConfig,
    pub tokens: TokenConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Room/File directory service (remote, durable metadata)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            token: None,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob store endpoint (bucket-scoped)
    pub base_url: String,
    pub bucket: String,
    /// Directory for in-progress recording files before upload
    pub local_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            bucket: "recordbucket".to_string(),
            local_dir: "./recordings".to_string(),
        }
    }
}

/// External review endpoint that receives the poll partition on room close
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollReviewConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    pub stun_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Default segment window when `start_record` carries "0"
    pub default_segment_seconds: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            default_segment_seconds: 15,
            audio_sample_rate: 48000,
            audio_channels: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub ttl_hours: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 2,
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration with the following priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (VMEET_SERVER_HOST, etc.)
        builder = builder.add_source(
            Environment::with_prefix("VMEET")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.tokens.ttl_hours, 2);
        assert_eq!(config.recording.default_segment_seconds, 15);
        assert_eq!(config.storage.bucket, "recordbucket");
        assert!(!config.webrtc.stun_servers.is_empty());
    }

    #[test]
    fn test_http_address() {
        let config = Config::default();
        assert_eq!(config.http_address(), "0.0.0.0:8080");
    }
}

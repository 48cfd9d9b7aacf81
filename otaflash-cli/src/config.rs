//! Configuration file support for otaflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (OTAFLASH_*)
//! 3. Local config file (./otaflash.toml)
//! 4. Global config file (~/.config/otaflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use otaflash::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "otaflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Session retry and timing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Attempts per packet and per READY wait.
    pub max_retries: Option<u32>,
    /// Response timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Pause between READY polls in milliseconds.
    pub retry_delay_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Session settings.
    #[serde(default)]
    pub session: SessionSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "otaflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.session.max_retries.is_some() {
            self.session.max_retries = other.session.max_retries;
        }
        if other.session.timeout_secs.is_some() {
            self.session.timeout_secs = other.session.timeout_secs;
        }
        if other.session.retry_delay_ms.is_some() {
            self.session.retry_delay_ms = other.session.retry_delay_ms;
        }
    }

    /// Build the session policy, applying file values over the defaults.
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(retries) = self.session.max_retries {
            session = session.with_max_retries(retries);
        }
        match self.session.timeout_secs {
            Some(0) => warn!("Ignoring timeout_secs = 0, keeping the default"),
            Some(secs) => session = session.with_response_timeout(Duration::from_secs(secs)),
            None => {},
        }
        if let Some(ms) = self.session.retry_delay_ms {
            session = session.with_retry_delay(Duration::from_millis(ms));
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.session.max_retries.is_none());
        assert_eq!(config.session_config(), SessionConfig::default());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.connection.baud = Some(115200);

        let mut other = Config::default();
        other.connection.baud = Some(230400);
        other.session.max_retries = Some(5);

        base.merge(other);
        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(230400));
        assert_eq!(base.session.max_retries, Some(5));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.session.timeout_secs = Some(9);
        base.merge(Config::default());
        assert_eq!(base.session.timeout_secs, Some(9));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyUSB0"
baud = 115200

[session]
max_retries = 4
timeout_secs = 2
retry_delay_ms = 250
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115200));

        let session = config.session_config();
        assert_eq!(session.max_retries, 4);
        assert_eq!(session.response_timeout, Duration::from_secs(2));
        assert_eq!(session.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_timeout_keeps_default() {
        let config: Config = toml::from_str("[session]\ntimeout_secs = 0\n").unwrap();
        assert_eq!(
            config.session_config().response_timeout,
            SessionConfig::default().response_timeout
        );
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[session]\nmax_retries = 1\n").unwrap();
        assert!(config.connection.port.is_none());

        let session = config.session_config();
        assert_eq!(session.max_retries, 1);
        assert_eq!(session.response_timeout, SessionConfig::default().response_timeout);
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.port = Some("COM3".to_string());
        config.session.retry_delay_ms = Some(500);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.connection.port.as_deref(), Some("COM3"));
        assert_eq!(deserialized.session.retry_delay_ms, Some(500));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[connection]\nport = \"/dev/ttyACM1\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM1"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "connection = [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy().to_string();
            assert!(p.contains("otaflash"));
            assert!(p.ends_with("config.toml"));
        }
    }
}

// crates/core/src/config.rs
//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `FERRY_*` environment variables. CLI flags are applied last by the
//! binary.
//!
//! ```toml
//! [server]
//! port = 47900
//!
//! [transfer]
//! program = "/usr/local/bin/rclone"
//! grace_secs = 10
//!
//! [download.archiver]
//! program = "tar"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;

pub const DEFAULT_PORT: u16 = 47900;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Environment variable pointing at a config file.
pub const CONFIG_ENV: &str = "FERRY_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub download: DownloadConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<cache_dir>/ferry/ferry.db`.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub program: PathBuf,
    /// Appended after `<verb> <source> <destination>` on every invocation.
    pub global_args: Vec<String>,
    /// Time between SIGTERM and SIGKILL on stop.
    pub grace_secs: u64,
    /// How often a worker writes its latest progress to the store.
    pub progress_flush_ms: u64,
    pub tail_bytes: usize,
    pub log_cap_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rclone"),
            global_args: [
                "--stats",
                "1s",
                "--stats-one-line",
                "--stats-log-level",
                "NOTICE",
                "-v",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            grace_secs: 10,
            progress_flush_ms: 500,
            tail_bytes: 8 * 1024,
            log_cap_bytes: 4 * 1024 * 1024,
        }
    }
}

impl TransferConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn progress_flush(&self) -> Duration {
        Duration::from_millis(self.progress_flush_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Defaults to `<cache_dir>/ferry/staging`.
    pub staging_dir: Option<PathBuf>,
    pub token_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub archiver: ArchiverConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            token_ttl_secs: 60 * 60,
            sweep_interval_secs: 60,
            archiver: ArchiverConfig::default(),
        }
    }
}

impl DownloadConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    pub program: PathBuf,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("tar"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    /// Directory for daily-rolling log files. Console only when unset.
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl FerryConfig {
    /// Defaults, then `path` (or `FERRY_CONFIG`) if given, then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml(path, &text)
    }

    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `FERRY_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FERRY_PORT") {
            self.server.port = parse_env("FERRY_PORT", &value)?;
        }
        if let Some(value) = lookup("FERRY_HOST") {
            self.server.host = value;
        }
        if let Some(value) = lookup("FERRY_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("FERRY_TRANSFER_BIN") {
            self.transfer.program = PathBuf::from(value);
        }
        if let Some(value) = lookup("FERRY_STAGING_DIR") {
            self.download.staging_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("FERRY_GRACE_SECS") {
            self.transfer.grace_secs = parse_env("FERRY_GRACE_SECS", &value)?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => paths::db_path().ok_or(ConfigError::NoCacheDir),
        }
    }

    pub fn staging_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.download.staging_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::staging_dir().ok_or(ConfigError::NoCacheDir),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FerryConfig::default();
        assert_eq!(config.server.port, 47900);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.transfer.program, PathBuf::from("rclone"));
        assert_eq!(config.transfer.grace(), Duration::from_secs(10));
        assert_eq!(config.transfer.progress_flush(), Duration::from_millis(500));
        assert_eq!(config.transfer.tail_bytes, 8192);
        assert_eq!(config.stream.interval(), Duration::from_secs(2));
        assert_eq!(config.download.token_ttl(), Duration::from_secs(3600));
        assert_eq!(config.download.archiver.program, PathBuf::from("tar"));
        assert!(config.transfer.global_args.contains(&"--stats-one-line".to_string()));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let text = r#"
            [server]
            port = 9000

            [transfer]
            grace_secs = 3

            [download.archiver]
            program = "/usr/bin/bsdtar"
        "#;
        let config = FerryConfig::from_toml(Path::new("ferry.toml"), text).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.transfer.grace_secs, 3);
        assert_eq!(config.transfer.program, PathBuf::from("rclone"));
        assert_eq!(config.download.archiver.program, PathBuf::from("/usr/bin/bsdtar"));
        assert_eq!(config.download.sweep_interval_secs, 60);
    }

    #[test]
    fn test_malformed_toml() {
        let err = FerryConfig::from_toml(Path::new("bad.toml"), "[server\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FerryConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        std::fs::write(&path, "[stream]\ninterval_ms = 250\n").unwrap();
        let config = FerryConfig::from_file(&path).unwrap();
        assert_eq!(config.stream.interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FerryConfig::default();
        config
            .apply_env(env(&[
                ("FERRY_PORT", "8080"),
                ("FERRY_HOST", "0.0.0.0"),
                ("FERRY_DB_PATH", "/var/lib/ferry/jobs.db"),
                ("FERRY_TRANSFER_BIN", "/opt/rclone"),
                ("FERRY_STAGING_DIR", "/tmp/ferry-staging"),
                ("FERRY_GRACE_SECS", "2"),
            ]))
            .unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/var/lib/ferry/jobs.db"));
        assert_eq!(config.transfer.program, PathBuf::from("/opt/rclone"));
        assert_eq!(config.staging_dir().unwrap(), PathBuf::from("/tmp/ferry-staging"));
        assert_eq!(config.transfer.grace_secs, 2);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = FerryConfig::default();
        let err = config.apply_env(env(&[("FERRY_PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "FERRY_PORT"));
    }
}

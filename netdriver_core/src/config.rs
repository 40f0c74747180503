use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TCP_PORT: u16 = 8080;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct DriverSettings {
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_isolate")]
    pub isolate: bool,
    #[serde(default = "default_tmpfs_path")]
    pub tmpfs_path: PathBuf,
    #[serde(default = "default_server_stack_size")]
    pub server_stack_size: usize,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    #[serde(default = "default_send_buffer_size")]
    pub send_buffer_size: usize,
    #[serde(default = "default_drain_buffer_size")]
    pub drain_buffer_size: usize,
    /// Applied to connect, send and recv. Absent means block forever.
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_isolate() -> bool {
    true
}

pub fn default_tmpfs_path() -> PathBuf {
    PathBuf::from("/tmp")
}

pub fn default_server_stack_size() -> usize {
    8 * 1024 * 1024
}

fn default_readiness_interval_ms() -> u64 {
    1000
}

pub fn default_send_buffer_size() -> usize {
    1024 * 1024
}

pub fn default_drain_buffer_size() -> usize {
    64 * 1024
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            default_port: default_port(),
            isolate: default_isolate(),
            tmpfs_path: default_tmpfs_path(),
            server_stack_size: default_server_stack_size(),
            readiness_interval_ms: default_readiness_interval_ms(),
            send_buffer_size: default_send_buffer_size(),
            drain_buffer_size: default_drain_buffer_size(),
            io_timeout_ms: None,
        }
    }
}

impl DriverSettings {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    driver: DriverSettings,
}

impl DriverSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let file: SettingsFile = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse net driver settings: {}", e))?;
        if file.driver.default_port == 0 {
            anyhow::bail!("default-port cannot be 0");
        }
        if file.driver.drain_buffer_size == 0 {
            anyhow::bail!("drain-buffer-size cannot be 0");
        }
        Ok(file.driver)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", path, e))
    }
}

/// Runtime configuration resolved once at startup.
///
/// Handed by value to the server launcher and by reference to the connection
/// driver; nothing mutates it after [`crate::NetDriver::initialize`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub tcp_port: u16,
    pub server_argv: Vec<String>,
}

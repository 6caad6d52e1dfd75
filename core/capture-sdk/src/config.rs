//! Configuration loading.
//!
//! The config lives in `~/.capture/config.toml` unless `CAPTURE_CONFIG` or an
//! explicit path says otherwise. A missing file yields defaults.

use capture_worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CaptureError, Result};

pub const CONFIG_ENV: &str = "CAPTURE_CONFIG";
const CONFIG_DIR: &str = ".capture";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long `start` waits for the worker to acknowledge the listener.
    #[serde(default = "default_attach_timeout_ms")]
    pub attach_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub default_probe_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            attach_timeout_ms: default_attach_timeout_ms(),
            default_probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn default_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.default_probe_timeout_ms)
    }
}

fn default_attach_timeout_ms() -> u64 {
    2000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

/// Returns the capture home directory (~/.capture).
pub fn capture_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR))
        .ok_or(CaptureError::HomeDirNotFound)
}

/// Resolves the config path: `CAPTURE_CONFIG` first, then ~/.capture/config.toml.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(capture_dir()?.join(CONFIG_FILE))
}

pub fn load_config(path: Option<PathBuf>) -> Result<CaptureConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(CaptureConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| CaptureError::Io {
        context: format!("reading config {}", config_path.display()),
        source: err,
    })?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<CaptureConfig> {
    toml::from_str::<CaptureConfig>(content).map_err(|err| CaptureError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

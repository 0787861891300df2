//! Client configuration: defaults, loading from JSON, and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid config JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
  /// Backend socket (or named pipe on Windows).
  #[serde(default = "default_socket_path")]
  pub socket_path: PathBuf,

  /// Connection attempts before giving up.
  #[serde(default = "default_connect_retries")]
  pub connect_retries: u32,

  /// Reply timeout for play calls in milliseconds (None = wait indefinitely).
  #[serde(default)]
  pub call_timeout_ms: Option<u64>,
}

fn default_socket_path() -> PathBuf {
  #[cfg(windows)]
  {
    PathBuf::from(r"\\.\pipe\feedback-backend")
  }
  #[cfg(not(windows))]
  {
    dirs::runtime_dir()
      .unwrap_or_else(std::env::temp_dir)
      .join("feedback-backend.sock")
  }
}

fn default_connect_retries() -> u32 {
  10
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      socket_path: default_socket_path(),
      connect_retries: default_connect_retries(),
      call_timeout_ms: None,
    }
  }
}

impl ClientConfig {
  /// Load configuration from a JSON file. Missing fields take their defaults.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config: ClientConfig = serde_json::from_str(&text)?;
    config.validate()?;
    log::debug!("Loaded client config from {}", path.display());
    Ok(config)
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.socket_path.as_os_str().is_empty() {
      return Err(ConfigError::Invalid("Socket path cannot be empty".to_string()));
    }
    if self.connect_retries == 0 {
      return Err(ConfigError::Invalid(
        "Connect retries must be at least 1".to_string(),
      ));
    }
    if self.call_timeout_ms == Some(0) {
      return Err(ConfigError::Invalid(
        "Call timeout must be positive (omit it to wait indefinitely)".to_string(),
      ));
    }
    Ok(())
  }

  pub fn call_timeout(&self) -> Option<Duration> {
    self.call_timeout_ms.map(Duration::from_millis)
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "http://localhost:3001/api/v1";
pub const DEFAULT_KEY_PREFIX: &str = "palsync:";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  /// Start in offline mode (no network calls until switched off)
  #[serde(default)]
  pub offline: bool,
  /// Filter cached palettes by image id when listing offline
  #[serde(default = "default_true")]
  pub filter_by_image: bool,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      offline: false,
      filter_by_image: true,
      store: StoreConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_api_base")]
  pub base_url: String,
  /// Applies to every request made by the HTTP client
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_api_base(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// SQLite file; defaults to the platform data directory
  pub path: Option<PathBuf>,
  #[serde(default = "default_key_prefix")]
  pub key_prefix: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      path: None,
      key_prefix: default_key_prefix(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Log to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_api_base() -> String {
  DEFAULT_API_BASE.to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_key_prefix() -> String {
  DEFAULT_KEY_PREFIX.to_string()
}

fn default_log_level() -> String {
  "warn".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./palsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/palsync/config.yaml
  ///
  /// Falls back to defaults when no file is found. `PALSYNC_API_BASE`
  /// overrides the API base URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(base) = std::env::var("PALSYNC_API_BASE") {
      config.api.base_url = base;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("palsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("palsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    debug!(path = %path.display(), "Loading config");
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Bearer token for the API, from PALSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PALSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

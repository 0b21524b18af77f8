use color_eyre::{eyre::eyre, Result};
use querykit::{Retry, RetryDelay};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://dummyjson.com";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub query: QueryConfig,
  pub mutation: MutationConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: DEFAULT_API_URL.to_string(),
      timeout_secs: 10,
    }
  }
}

impl ApiConfig {
  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.url).map_err(|e| eyre!("Invalid api.url {:?}: {}", self.url, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

/// Overrides applied to every query the CLI mounts
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
  pub stale_time_ms: Option<u64>,
  /// `null` keeps entries forever
  #[serde(deserialize_with = "deserialize_cache_time")]
  pub cache_time_ms: Option<Option<u64>>,
  pub retry: Option<RetrySetting>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
  pub retry: Option<RetrySetting>,
  pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// `EnvFilter` directive, e.g. `querykit=debug`
  pub filter: Option<String>,
  /// Directory for the daily log file; logs go to stderr when unset
  pub dir: Option<PathBuf>,
}

/// `retry: true`, `retry: false` or `retry: 3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RetrySetting {
  Enabled(bool),
  Count(u32),
}

impl From<RetrySetting> for Retry {
  fn from(setting: RetrySetting) -> Self {
    match setting {
      RetrySetting::Enabled(enabled) => Retry::from(enabled),
      RetrySetting::Count(count) => Retry::Count(count),
    }
  }
}

impl MutationConfig {
  pub fn retry_delay(&self) -> RetryDelay {
    match self.retry_delay_ms {
      Some(ms) => RetryDelay::Fixed(Duration::from_millis(ms)),
      None => RetryDelay::Exponential,
    }
  }
}

/// Distinguishes an absent `cache_time_ms` from an explicit `null`.
fn deserialize_cache_time<'de, D>(deserializer: D) -> Result<Option<Option<u64>>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Option::<u64>::deserialize(deserializer).map(Some)
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./querykit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/querykit/config.yaml
  /// 4. ~/.config/querykit/config.yaml
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.api.base_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("querykit.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("querykit").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub service: ServiceConfig,
  /// Owner id used for newly created tasks.
  #[serde(default = "default_owner")]
  pub default_owner: i64,
  /// Custom title for the header (defaults to the service domain if not set)
  pub title: Option<String>,
  /// Run against the built-in in-memory store instead of the service.
  #[serde(default)]
  pub offline: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  #[serde(default = "default_url")]
  pub url: String,
  /// Per-request timeout in seconds.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Username for credential login. The password comes from the
  /// environment, never from the file.
  pub username: Option<String>,
}

fn default_url() -> String {
  "https://dummyjson.com".to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_owner() -> i64 {
  1
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      url: default_url(),
      timeout_secs: default_timeout_secs(),
      username: None,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      service: ServiceConfig::default(),
      default_owner: default_owner(),
      title: None,
      offline: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./t9s.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/t9s/config.yaml
  ///
  /// Without a config file the defaults apply.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("t9s.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("t9s").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the access token from environment variables.
  ///
  /// Checks T9S_TOKEN first, then TASKS_API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("T9S_TOKEN")
      .or_else(|_| std::env::var("TASKS_API_TOKEN"))
      .ok()
  }

  /// Get the login password from environment variables.
  pub fn get_password() -> Result<String> {
    std::env::var("T9S_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the T9S_PASSWORD environment variable."))
  }

  /// Header title: configured value or the service domain.
  pub fn display_title(&self) -> String {
    if let Some(title) = &self.title {
      return title.clone();
    }
    url::Url::parse(&self.service.url)
      .ok()
      .and_then(|u| u.domain().map(String::from))
      .unwrap_or_else(|| "t9s".to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_apply_without_file() {
    let config = Config::default();
    assert_eq!(config.service.url, "https://dummyjson.com");
    assert_eq!(config.service.timeout_secs, 10);
    assert_eq!(config.default_owner, 1);
    assert!(!config.offline);
  }

  #[test]
  fn test_parse_minimal_yaml() {
    let config: Config = serde_yaml::from_str("offline: true\n").unwrap();
    assert!(config.offline);
    assert_eq!(config.service.url, "https://dummyjson.com");
  }

  #[test]
  fn test_display_title_falls_back_to_domain() {
    let config = Config::default();
    assert_eq!(config.display_title(), "dummyjson.com");
  }
}

//! Session persistence for access tokens and the current user.
//!
//! Stored as a small JSON file under the platform data dir. The rest of the
//! app only cares whether a token is present; the task view is gated on
//! that.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Authenticated session returned by the login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub id: i64,
  pub username: String,
  pub email: Option<String>,
  #[serde(rename = "accessToken")]
  pub access_token: String,
  #[serde(rename = "refreshToken")]
  pub refresh_token: Option<String>,
}

impl Session {
  /// Load the persisted session, if any.
  pub fn load() -> Result<Option<Self>> {
    let path = Self::default_path()?;
    if !path.exists() {
      return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
      .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
    let session = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse session file {}: {}", path.display(), e))?;
    Ok(Some(session))
  }

  /// Persist this session for future runs.
  pub fn save(&self) -> Result<()> {
    let path = Self::default_path()?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }
    let contents =
      serde_json::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize session: {}", e))?;
    std::fs::write(&path, contents)
      .map_err(|e| eyre!("Failed to write session file {}: {}", path.display(), e))?;
    Ok(())
  }

  /// Remove any persisted session.
  pub fn clear() -> Result<()> {
    let path = Self::default_path()?;
    if path.exists() {
      std::fs::remove_file(&path)
        .map_err(|e| eyre!("Failed to remove session file {}: {}", path.display(), e))?;
    }
    Ok(())
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("t9s").join("session.json"))
  }
}

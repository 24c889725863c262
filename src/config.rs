use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  /// Seconds between polls in watch mode
  #[serde(default = "default_poll_interval")]
  pub poll_interval: u64,
  /// Custom title for the dashboard header (defaults to the server host)
  pub title: Option<String>,
}

fn default_poll_interval() -> u64 {
  10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
  /// Poll one view's jobs instead of the whole server
  pub view: Option<String>,
  /// Username for authenticated polling; the secret comes from the
  /// environment, never the config file
  pub username: Option<String>,
}

impl ServerConfig {
  /// Base URL for API calls: the server root, or the view's subtree when one
  /// is configured. Always ends with a slash so relative joins keep any
  /// context prefix (e.g. `https://host/jenkins/`).
  pub fn resolved_url(&self) -> std::result::Result<Url, Error> {
    let mut raw = self.url.clone();
    if !raw.ends_with('/') {
      raw.push('/');
    }

    let base =
      Url::parse(&raw).map_err(|e| Error::Config(format!("invalid server url {}: {}", raw, e)))?;
    if base.cannot_be_a_base() {
      return Err(Error::Config(format!("invalid server url {}", raw)));
    }

    match &self.view {
      Some(view) => base
        .join(&format!("view/{}/", view))
        .map_err(|e| Error::Config(format!("invalid view {}: {}", view, e))),
      None => Ok(base),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./buildwatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/buildwatch/config.yaml
  /// 4. ~/.config/buildwatch/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/buildwatch/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("buildwatch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("buildwatch").join("config.yaml");
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

  /// Get the CI API token from environment variables.
  ///
  /// Checks BUILDWATCH_TOKEN first, then JENKINS_API_TOKEN as fallback.
  pub fn api_token() -> Result<String> {
    std::env::var("BUILDWATCH_TOKEN")
      .or_else(|_| std::env::var("JENKINS_API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set BUILDWATCH_TOKEN or JENKINS_API_TOKEN environment variable.")
      })
  }
}

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "timestamp-goblin";

pub fn project_dirs() -> Option<ProjectDirs> {
  ProjectDirs::from("", "", APP_NAME)
}

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
  /// Overrides the default store file in the data dir.
  pub store_path: Option<PathBuf>,
  /// `EnvFilter` directives used when `RUST_LOG` is unset.
  pub log_filter: Option<String>,
}

impl Config {
  /// `prefs.toml` in the project config dir.
  pub fn path() -> Option<PathBuf> {
    project_dirs().map(|proj_dirs| proj_dirs.config_dir().join("prefs.toml"))
  }

  pub fn load() -> Self {
    Self::path().map_or_else(Self::default, |path| Self::load_from(&path))
  }

  /// Missing or malformed files fall back to defaults.
  pub fn load_from(path: &Path) -> Self {
    if let Ok(content) = std::fs::read_to_string(path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }
    Self::default()
  }

  pub fn save_to(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("failed to create config dir {}", dir.display()))?;
    }
    let content = toml::to_string(self).context("failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(Config::load_from(&dir.path().join("prefs.toml")), Config::default());
  }

  #[test]
  fn malformed_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.toml");
    std::fs::write(&path, "store_path = [").unwrap();
    assert_eq!(Config::load_from(&path), Config::default());
  }

  #[test]
  fn saves_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("prefs.toml");
    let config =
      Config { store_path: Some(PathBuf::from("/tmp/store.json")), log_filter: Some("timestamp_goblin=debug".into()) };

    config.save_to(&path).unwrap();
    assert_eq!(Config::load_from(&path), config);
  }
}

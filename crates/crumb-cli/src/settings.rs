//! Layered configuration: optional TOML file, then `CRUMB_*` environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use crumb_core::keys::KeySpace;
use crumb_engine::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store:  StoreSettings,
  pub engine: EngineConfig,
  pub keys:   KeySpace,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreSettings {
  Sqlite {
    #[serde(default = "default_sqlite_path")]
    path: PathBuf,
  },
  Rest {
    #[serde(default)]
    url:   String,
    #[serde(default)]
    token: String,
  },
}

impl Default for StoreSettings {
  fn default() -> Self {
    Self::Sqlite {
      path: default_sqlite_path(),
    }
  }
}

fn default_sqlite_path() -> PathBuf { PathBuf::from("crumb.db") }

impl Settings {
  /// `file` need not exist; every section has defaults.
  pub fn load(file: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(
        config::Environment::with_prefix("CRUMB")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read configuration")?
      .try_deserialize()
      .context("failed to deserialise configuration")
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

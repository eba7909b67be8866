use std::{path::PathBuf, time::Duration};

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::{Error, PersistError, Result};

const PROJECT_NAME: &str = "roosty_alarmd";

fn default_time_format() -> String {
    "%l:%M %p".to_string()
}

fn default_label() -> String {
    "Alarm".to_string()
}

const fn default_max_sleep_secs() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// strftime format used for the time shown in notifications
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// label shown for alarms created without one
    #[serde(default = "default_label")]
    pub default_label: String,
    /// where alarms are kept, defaults to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// longest the scheduler sleeps before looking at the clock again
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            default_label: default_label(),
            store_path: None,
            max_sleep_secs: default_max_sleep_secs(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(&path).map_err(|e| config_error(&path, e))?;
        let config: Self = toml::from_str(&config).map_err(|e| config_error(&path, e))?;
        if !is_valid_time_format(&config.time_format) {
            return Err(config_error(
                &path,
                PersistError::Invalid(format!(
                    "time_format {:?} is not a strftime format",
                    config.time_format
                )),
            ));
        }
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file gives the defaults.
    pub fn load_or_default(path: PathBuf) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: PathBuf) -> Result<()> {
        let config = toml::to_string(self).map_err(|e| config_error(&path, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| config_error(&path, e))?;
        }
        std::fs::write(&path, config).map_err(|e| config_error(&path, e))
    }

    pub fn config_path() -> Result<PathBuf> {
        let mut path = project_dirs()?.config_dir().to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    pub fn data_path() -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    /// The configured store file, or `alarms.toml` in the data directory.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_path()?.join("alarms.toml")),
        }
    }

    #[must_use]
    pub const fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }
}

fn is_valid_time_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", PROJECT_NAME).ok_or(Error::NoHomeDirectory)
}

fn config_error(path: &std::path::Path, source: impl Into<PersistError>) -> Error {
    Error::Config {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

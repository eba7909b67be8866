use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("alarm not found: {0}")]
    NotFound(String),

    #[error("invalid alarm record: {0}")]
    InvalidRecord(String),

    #[error("storage failure at {}: {source}", .path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: PersistError,
    },

    #[error("couldn't use config file {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: PersistError,
    },

    #[error("notifier failed: {0}")]
    Notify(String),

    #[error("couldn't determine the project directories")]
    NoHomeDirectory,
}

impl Error {
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::StorageFailure { .. })
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRecord(reason.into())
    }
}

/// What went wrong while reading or writing one of our TOML files.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("couldn't parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("couldn't serialize: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Invalid(String),
}

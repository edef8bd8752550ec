//! Error types for archive and edit-script handling

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid archive {path}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("invalid entry name: {0:?}")]
    InvalidEntryName(String),

    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("invalid edit script {path}")]
    EditScript {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

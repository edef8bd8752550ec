use std::path::PathBuf;
use thiserror::Error;

/// Failures of the port registry
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind port {port}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open archive {path}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zipwatch_core::Error,
    },

    #[error("port registry is not running")]
    Stopped,
}

/// Failures setting up a watch
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("unknown watch event {0:?} (expected add, change, unlink or all)")]
    UnknownEvent(String),
}

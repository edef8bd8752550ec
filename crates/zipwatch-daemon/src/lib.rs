//! Zipwatch Daemon - Serve, transform and re-serve zip archives
//!
//! Features:
//! - Port registry: one axum server per port, replaced cleanly on re-serve
//! - Archive pipeline: serve original -> transform -> serve modified
//! - File watching with notify, debounced reruns

pub mod error;
pub mod pipeline;
pub mod server;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use error::{ServeError, WatchError};
pub use pipeline::{serve_zips, ServeZips, ZipPipeline};
pub use server::{serve, PortRegistry};
pub use watcher::{run_and_watch, watch, WatchEvent, WatchHandle, WatchOptions};

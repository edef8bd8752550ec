//! File Watcher - Debounced reruns on file system changes
//!
//! Uses notify crate (FSEvents on macOS, inotify on Linux). Matching events
//! are queued on a channel; a single consumer task feeds them into one
//! debouncer per watch, so bursts of edits trigger one rerun.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zipwatch_core::Debouncer;

use crate::error::WatchError;

/// Default quiet window before a rerun
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Which file system events trigger a rerun
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchEvent {
    /// File or directory created
    Add,
    /// Contents or metadata modified
    #[default]
    Change,
    /// File or directory removed
    Unlink,
    /// Any of the above
    All,
}

impl WatchEvent {
    pub fn matches(&self, kind: &EventKind) -> bool {
        match self {
            WatchEvent::Add => matches!(kind, EventKind::Create(_)),
            WatchEvent::Change => matches!(kind, EventKind::Modify(_)),
            WatchEvent::Unlink => matches!(kind, EventKind::Remove(_)),
            WatchEvent::All => matches!(
                kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ),
        }
    }
}

impl FromStr for WatchEvent {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(WatchEvent::Add),
            "change" => Ok(WatchEvent::Change),
            "unlink" => Ok(WatchEvent::Unlink),
            "all" => Ok(WatchEvent::All),
            other => Err(WatchError::UnknownEvent(other.to_string())),
        }
    }
}

/// Options for [`watch`] and [`run_and_watch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Quiet window: reruns fire this long after the last event
    pub timeout: Duration,
    /// Event kind that triggers reruns
    pub event: WatchEvent,
}

impl WatchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_event(mut self, event: WatchEvent) -> Self {
        self.event = event;
        self
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            event: WatchEvent::default(),
        }
    }
}

/// A live watch; dropping it unsubscribes and discards any pending rerun
pub struct WatchHandle {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    consumer: JoinHandle<()>,
    debouncer: Debouncer<PathBuf>,
}

impl WatchHandle {
    /// Path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a rerun is scheduled but has not started
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Stop watching
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.consumer.abort();
        self.debouncer.cancel();
        info!("Stopped watching {}", self.path.display());
    }
}

/// Rerun `f` with the changed path whenever `path` changes.
///
/// Errors returned by `f` are logged and the watch keeps running.
pub fn watch<F, Fut>(
    path: impl AsRef<Path>,
    f: F,
    options: WatchOptions,
) -> Result<WatchHandle, WatchError>
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let path = path.as_ref().to_path_buf();
    let debouncer = Debouncer::new(f, options.timeout);

    let (tx, rx) = unbounded_channel();
    let event = options.event;
    let root = path.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(ev) if event.matches(&ev.kind) => {
            if ev.paths.is_empty() {
                let _ = tx.send(root.clone());
            }
            for changed in ev.paths {
                let _ = tx.send(changed);
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Watch error: {:?}", e),
    })
    .map_err(|source| WatchError::Notify {
        path: path.clone(),
        source,
    })?;

    watcher
        .watch(&path, RecursiveMode::Recursive)
        .map_err(|source| WatchError::Notify {
            path: path.clone(),
            source,
        })?;

    let consumer = tokio::spawn(drain_events(rx, debouncer.clone()));

    info!(
        "Watching {} for {:?} events ({:?} quiet window)",
        path.display(),
        options.event,
        options.timeout
    );

    Ok(WatchHandle {
        path,
        _watcher: watcher,
        consumer,
        debouncer,
    })
}

/// Run `f` once right away, then [`watch`] `path` with it.
///
/// A failed first run is logged; watching starts regardless.
pub async fn run_and_watch<F, Fut>(
    path: impl AsRef<Path>,
    f: F,
    options: WatchOptions,
) -> Result<WatchHandle, WatchError>
where
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let path = path.as_ref().to_path_buf();

    if let Err(e) = f(path.clone()).await {
        error!("Initial run failed: {:#}", e);
    }

    watch(path, f, options)
}

/// Feed queued change events into the debouncer
async fn drain_events(mut rx: UnboundedReceiver<PathBuf>, debouncer: Debouncer<PathBuf>) {
    while let Some(changed) = rx.recv().await {
        debug!("File change: {}", changed.display());
        debouncer.call(changed);
    }
}

//! Port Registry - One archive server per port
//!
//! A single owner task holds the port -> listener map. Serving on a port that
//! is already bound shuts the old listener down before binding the new one,
//! and every request to the registry is handled in arrival order. The new
//! archive is opened first, so an unreadable one leaves the port untouched.

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zipwatch_core::ArchiveSite;

use crate::error::ServeError;

/// How long a replaced listener may take to drain before it is aborted
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum Command {
    Serve {
        archive: PathBuf,
        port: u16,
        zip_root: String,
        reply: oneshot::Sender<Result<(), ServeError>>,
    },
    Close {
        port: u16,
        reply: oneshot::Sender<bool>,
    },
    Ports {
        reply: oneshot::Sender<Vec<(u16, PathBuf)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A running server bound to one port
struct Listener {
    archive: PathBuf,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Listener {
    async fn stop(self, port: u16) {
        let _ = self.shutdown.send(());

        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("Listener on port {} did not drain in time, aborting", port);
            task.abort();
            let _ = task.await;
        }

        debug!("Released port {} ({})", port, self.archive.display());
    }
}

/// Handle to the port registry task
///
/// Cheap to clone; all clones talk to the same registry.
#[derive(Clone)]
pub struct PortRegistry {
    tx: mpsc::Sender<Command>,
}

impl PortRegistry {
    /// Spawn a new registry task on the current tokio runtime
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Serve `archive` on `port`, replacing whatever was served there before
    pub async fn serve(
        &self,
        archive: impl AsRef<Path>,
        port: u16,
        zip_root: &str,
    ) -> Result<(), ServeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Serve {
            archive: archive.as_ref().to_path_buf(),
            port,
            zip_root: zip_root.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServeError::Stopped)?
    }

    /// Stop the listener on `port`; `false` if nothing was bound there
    pub async fn close(&self, port: u16) -> Result<bool, ServeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { port, reply }).await?;
        rx.await.map_err(|_| ServeError::Stopped)
    }

    /// Bound ports and the archive each one serves, ordered by port
    pub async fn ports(&self) -> Result<Vec<(u16, PathBuf)>, ServeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Ports { reply }).await?;
        rx.await.map_err(|_| ServeError::Stopped)
    }

    /// Stop every listener
    pub async fn shutdown(&self) -> Result<(), ServeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| ServeError::Stopped)
    }

    async fn send(&self, command: Command) -> Result<(), ServeError> {
        self.tx.send(command).await.map_err(|_| ServeError::Stopped)
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<PortRegistry> = OnceLock::new();

/// Process-wide registry, spawned on first use
///
/// The registry task lives on the runtime that first calls this.
pub fn global() -> &'static PortRegistry {
    GLOBAL.get_or_init(PortRegistry::new)
}

/// Serve `archive` on `port` through the process-wide registry
pub async fn serve(archive: impl AsRef<Path>, port: u16, zip_root: &str) -> Result<(), ServeError> {
    global().serve(archive, port, zip_root).await
}

/// Registry task: owns every listener
async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut listeners: HashMap<u16, Listener> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Serve {
                archive,
                port,
                zip_root,
                reply,
            } => {
                let site = match open_site(&archive, zip_root).await {
                    Ok(site) => site,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                };

                if let Some(previous) = listeners.remove(&port) {
                    previous.stop(port).await;
                }

                let result = start(site, port).await.map(|listener| {
                    listeners.insert(port, listener);
                });
                let _ = reply.send(result);
            }
            Command::Close { port, reply } => {
                let closed = match listeners.remove(&port) {
                    Some(listener) => {
                        listener.stop(port).await;
                        true
                    }
                    None => false,
                };
                let _ = reply.send(closed);
            }
            Command::Ports { reply } => {
                let mut ports: Vec<(u16, PathBuf)> = listeners
                    .iter()
                    .map(|(port, listener)| (*port, listener.archive.clone()))
                    .collect();
                ports.sort_by_key(|(port, _)| *port);
                let _ = reply.send(ports);
            }
            Command::Shutdown { reply } => {
                stop_all(&mut listeners).await;
                let _ = reply.send(());
            }
        }
    }

    stop_all(&mut listeners).await;
}

async fn stop_all(listeners: &mut HashMap<u16, Listener>) {
    for (port, listener) in listeners.drain() {
        listener.stop(port).await;
    }
}

/// Read and index the archive on the blocking pool
async fn open_site(archive: &Path, zip_root: String) -> Result<ArchiveSite, ServeError> {
    let source = archive.to_path_buf();
    tokio::task::spawn_blocking(move || ArchiveSite::open(&source, &zip_root))
        .await
        .map_err(zipwatch_core::Error::from)
        .and_then(|site| site)
        .map_err(|source| ServeError::Archive {
            path: archive.to_path_buf(),
            source,
        })
}

/// Bind the port and spawn the server for an opened archive
async fn start(site: ArchiveSite, port: u16) -> Result<Listener, ServeError> {
    let archive = site.archive().to_path_buf();
    let app = router(Arc::new(site));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let tcp = TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { port, source })?;

    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let server = axum::serve(tcp, app).with_graceful_shutdown(async move {
            let _ = signal.await;
        });
        if let Err(e) = server.await {
            error!("Server on port {} failed: {}", port, e);
        }
    });

    info!("serving {} on http://localhost:{}/", archive.display(), port);

    Ok(Listener {
        archive,
        shutdown,
        task,
    })
}

fn router(site: Arc<ArchiveSite>) -> Router {
    Router::new()
        .route("/", get(index))
        .fallback(serve_entry)
        .with_state(site)
}

/// GET / - Name the archive being served
async fn index(State(site): State<Arc<ArchiveSite>>) -> String {
    format!("Serving {}", site.archive().display())
}

/// Everything else - Archive entries under the zip root
async fn serve_entry(
    State(site): State<Arc<ArchiveSite>>,
    method: Method,
    uri: Uri,
) -> Response {
    let path = uri.path();

    if method == Method::GET || method == Method::HEAD {
        if let Some(file) = site.resolve(path) {
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, file.content_type)],
                file.data.to_vec(),
            )
                .into_response();
        }
    }

    (StatusCode::NOT_FOUND, format!("Not found: {}", path)).into_response()
}

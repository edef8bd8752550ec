//! Archive Serve Pipeline - Serve original, transform, serve modified
//!
//! Steps run strictly in order and the first failure aborts the rest:
//! 1. serve the original archive on `port`
//! 2. load it into the transformer
//! 3. run the modifiers
//! 4. save the result to a new archive
//! 5. serve the new archive on `modified_port`
//!
//! Runs for the same port pair are serialized.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};
use zipwatch_core::{ArchiveTransformer, Modifier, Verbosity};

use crate::server::{self, PortRegistry};

/// One pipeline run
#[derive(Clone)]
pub struct ServeZips {
    pub archive_path: PathBuf,
    pub port: u16,
    pub modified_port: u16,
    pub zip_root: String,
    pub modifiers: Arc<dyn Modifier>,
}

/// Previous output of a port pair, guarded by the pair's run lock
type PairSlot = Arc<tokio::sync::Mutex<Option<PathBuf>>>;

/// Runs [`ServeZips`] jobs against a port registry
pub struct ZipPipeline {
    registry: PortRegistry,
    transformer: ArchiveTransformer,
    pairs: Mutex<HashMap<(u16, u16), PairSlot>>,
}

impl ZipPipeline {
    pub fn new(registry: PortRegistry) -> Self {
        Self {
            registry,
            transformer: ArchiveTransformer::new(Verbosity::Minimal),
            pairs: Mutex::new(HashMap::new()),
        }
    }

    /// Use a custom transformer (e.g. a different output directory)
    pub fn with_transformer(mut self, transformer: ArchiveTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    /// Run the pipeline; returns the path of the modified archive
    pub async fn serve_zips(&self, job: &ServeZips) -> Result<PathBuf> {
        let slot = self.slot(job.port, job.modified_port);
        let mut previous = slot.lock().await;

        self.registry
            .serve(&job.archive_path, job.port, &job.zip_root)
            .await
            .with_context(|| format!("serving original archive on port {}", job.port))?;

        let handle = self
            .transformer
            .load(&job.archive_path)
            .await
            .with_context(|| format!("loading {}", job.archive_path.display()))?;

        let handle = job
            .modifiers
            .modify(handle)
            .await
            .context("running archive modifiers")?;

        let modified = self
            .transformer
            .save(&handle)
            .await
            .context("saving modified archive")?;

        if let Err(e) = self
            .registry
            .serve(&modified, job.modified_port, &job.zip_root)
            .await
        {
            remove_output(&modified).await;
            return Err(e)
                .with_context(|| format!("serving modified archive on port {}", job.modified_port));
        }

        // The registry keeps served archives in memory; the old file is unused now
        if let Some(stale) = previous.replace(modified.clone()) {
            if stale != modified {
                remove_output(&stale).await;
            }
        }

        info!(
            "{} -> {} (ports {} / {})",
            job.archive_path.display(),
            modified.display(),
            job.port,
            job.modified_port
        );
        Ok(modified)
    }

    /// Delete the last saved archive of every port pair
    ///
    /// Call once the listeners are shut down. Waits for in-flight runs.
    pub async fn clean_outputs(&self) {
        let slots: Vec<PairSlot> = {
            let pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
            pairs.values().cloned().collect()
        };

        for slot in slots {
            if let Some(output) = slot.lock().await.take() {
                remove_output(&output).await;
            }
        }
    }

    fn slot(&self, port: u16, modified_port: u16) -> PairSlot {
        let mut pairs = self.pairs.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(pairs.entry((port, modified_port)).or_default())
    }
}

async fn remove_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed archive {}", path.display()),
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

static GLOBAL: OnceLock<ZipPipeline> = OnceLock::new();

/// Process-wide pipeline backed by [`server::global`]
pub fn global() -> &'static ZipPipeline {
    GLOBAL.get_or_init(|| ZipPipeline::new(server::global().clone()))
}

/// Run `job` on the process-wide pipeline
pub async fn serve_zips(job: &ServeZips) -> Result<PathBuf> {
    global().serve_zips(job).await
}

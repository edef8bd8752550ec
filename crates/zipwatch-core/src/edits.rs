//! Modifiers - Caller-supplied archive edits
//!
//! Anything implementing [`Modifier`] can transform a loaded archive. Async
//! closures taking and returning a [`ZipHandle`] work out of the box;
//! [`EditScript`] is the declarative form read from JSON files.

use crate::archive::ZipHandle;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::debug;

pub type ModifyFuture = Pin<Box<dyn Future<Output = anyhow::Result<ZipHandle>> + Send>>;

/// Edits a loaded archive, handing the handle back when done
pub trait Modifier: Send + Sync {
    fn modify(&self, handle: ZipHandle) -> ModifyFuture;
}

impl<F, Fut> Modifier for F
where
    F: Fn(ZipHandle) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ZipHandle>> + Send + 'static,
{
    fn modify(&self, handle: ZipHandle) -> ModifyFuture {
        Box::pin(self(handle))
    }
}

/// A single entry edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    /// Drop one entry (missing entries are skipped)
    Remove { name: String },
    /// Drop every entry below a directory
    RemoveDir { prefix: String },
    /// Move an entry
    Rename { from: String, to: String },
    /// Add or replace an entry from inline text or a file on disk
    Add {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<PathBuf>,
    },
}

/// Ordered list of edits, usually loaded from a JSON file
///
/// ```json
/// { "edits": [ { "op": "remove", "name": "secret.txt" } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditScript {
    #[serde(default)]
    pub edits: Vec<Edit>,
    /// Directory that relative `source` paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl EditScript {
    pub fn new(edits: Vec<Edit>) -> Self {
        Self {
            edits,
            base_dir: None,
        }
    }

    /// Parse a script; `path` is used for error messages and relative sources
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut script: EditScript =
            serde_json::from_str(content).map_err(|source| Error::EditScript {
                path: path.to_path_buf(),
                source,
            })?;
        script.base_dir = path.parent().map(Path::to_path_buf);
        Ok(script)
    }

    /// Read and parse a script file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(path, &content)
    }

    /// Append the edits of `other` after this script's own
    pub fn extend(&mut self, other: impl IntoIterator<Item = Edit>) {
        self.edits.extend(other);
    }

    /// Apply every edit in order; stops at the first failing edit
    pub fn apply(&self, handle: &mut ZipHandle) -> Result<()> {
        for edit in &self.edits {
            match edit {
                Edit::Remove { name } => {
                    if handle.remove(name).is_none() {
                        debug!("Remove skipped, no entry named {}", name);
                    }
                }
                Edit::RemoveDir { prefix } => {
                    let removed = handle.remove_dir(prefix);
                    debug!("Removed {} entries under {}", removed, prefix);
                }
                Edit::Rename { from, to } => handle.rename(from, to.clone())?,
                Edit::Add { name, text, source } => {
                    let data = match (text, source) {
                        (Some(text), None) => text.clone().into_bytes(),
                        (None, Some(source)) => {
                            let path = self.resolve_source(source);
                            std::fs::read(&path).map_err(|e| Error::io(path, e))?
                        }
                        _ => {
                            return Err(Error::InvalidEdit(format!(
                                "add {} needs exactly one of text or source",
                                name
                            )))
                        }
                    };
                    handle.add(name.clone(), data)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_source(&self, source: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if source.is_relative() => base.join(source),
            _ => source.to_path_buf(),
        }
    }
}

impl Modifier for EditScript {
    fn modify(&self, mut handle: ZipHandle) -> ModifyFuture {
        let script = self.clone();
        Box::pin(async move {
            let handle = tokio::task::spawn_blocking(move || {
                script.apply(&mut handle).map(|_| handle)
            })
            .await??;
            Ok(handle)
        })
    }
}

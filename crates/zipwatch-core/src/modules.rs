//! Module Cache - Memoized edit scripts with explicit invalidation
//!
//! Reruns load their editable logic (edit scripts) through this cache.
//! Clearing an entry forces the next load to re-read the file from disk.

use crate::edits::EditScript;
use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::info;

/// Path-keyed cache of loaded units
pub struct ModuleCache<T> {
    entries: RwLock<HashMap<PathBuf, Arc<T>>>,
}

impl<T> ModuleCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached unit for `path`, loading it on a miss
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> Result<Arc<T>>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let key = cache_key(path);

        if let Some(unit) = self.read().get(&key) {
            return Ok(Arc::clone(unit));
        }

        let unit = Arc::new(load(&key)?);
        self.write().insert(key, Arc::clone(&unit));
        Ok(unit)
    }

    /// Identifiers of every cached unit
    pub fn ids(&self) -> Vec<PathBuf> {
        self.read().keys().cloned().collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.read().contains_key(&cache_key(path))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every unit whose identifier matches `predicate`
    pub fn clear<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&Path) -> bool,
    {
        let mut entries = self.write();
        let stale: Vec<PathBuf> = entries
            .keys()
            .filter(|id| predicate(id.as_path()))
            .cloned()
            .collect();

        if !stale.is_empty() {
            info!("cleaning cache");
            for id in &stale {
                entries.remove(id);
            }
        }
        stale.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Arc<T>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Arc<T>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for ModuleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical path when it exists, the path as given otherwise
fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

static EDIT_SCRIPTS: OnceLock<ModuleCache<EditScript>> = OnceLock::new();

/// Process-wide cache of edit scripts
pub fn edit_scripts() -> &'static ModuleCache<EditScript> {
    EDIT_SCRIPTS.get_or_init(ModuleCache::new)
}

/// Load an edit script through the process-wide cache
pub fn load_edit_script(path: impl AsRef<Path>) -> Result<Arc<EditScript>> {
    edit_scripts().get_or_load(path.as_ref(), |p| EditScript::from_path(p))
}

/// Evict matching scripts so the next load re-reads them
pub fn clear_cache<P>(predicate: P)
where
    P: FnMut(&Path) -> bool,
{
    edit_scripts().clear(predicate);
}

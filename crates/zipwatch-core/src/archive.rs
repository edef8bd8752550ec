//! Archive Transformer - Load, edit and persist zip archives
//!
//! The transformer loads an archive into an in-memory [`ZipHandle`], callers
//! edit the handle, and the transformer writes the result to a fresh path.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// How chatty the transformer is while loading and saving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Minimal,
    Verbose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    data: Vec<u8>,
    method: CompressionMethod,
}

/// In-memory view of an archive's entries
///
/// Directory entries are kept as names ending in `/` with no data.
#[derive(Debug, Clone, Default)]
pub struct ZipHandle {
    source: PathBuf,
    entries: BTreeMap<String, Entry>,
}

impl ZipHandle {
    /// Empty handle not backed by any archive
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Path of the archive this handle was loaded from
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in sorted order, which is also the order `save` writes them
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Contents of a file entry
    pub fn read(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(|e| e.data.as_slice())
    }

    /// Add or replace a file entry
    pub fn add(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<()> {
        let name = name.into();
        validate_name(&name)?;

        let method = self
            .entries
            .get(&name)
            .map(|e| e.method)
            .unwrap_or(CompressionMethod::Deflated);

        self.entries.insert(
            name,
            Entry {
                data: data.into(),
                method,
            },
        );
        Ok(())
    }

    /// Remove an entry, returning its contents
    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.remove(name).map(|e| e.data)
    }

    /// Remove every entry under `prefix/`, returning how many were dropped
    pub fn remove_dir(&mut self, prefix: &str) -> usize {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let before = self.entries.len();
        self.entries.retain(|name, _| !name.starts_with(&prefix));
        before - self.entries.len()
    }

    /// Move an entry to a new name, replacing any entry already there
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<()> {
        let to = to.into();
        validate_name(&to)?;

        let entry = self
            .entries
            .remove(from)
            .ok_or_else(|| Error::EntryNotFound(from.to_string()))?;
        self.entries.insert(to, entry);
        Ok(())
    }
}

/// Entry names are relative, `/`-separated, and never climb out of the archive
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|segment| segment == "..");

    if invalid {
        return Err(Error::InvalidEntryName(name.to_string()));
    }
    Ok(())
}

/// Loads archives into handles and writes handles back out as new archives
#[derive(Debug, Clone)]
pub struct ArchiveTransformer {
    verbosity: Verbosity,
    output_dir: PathBuf,
}

impl ArchiveTransformer {
    /// Transformer that saves into the system temp directory
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            output_dir: std::env::temp_dir(),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Read `path` into a handle (runs on the blocking pool)
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<ZipHandle> {
        let path = path.as_ref().to_path_buf();
        let verbosity = self.verbosity;

        tokio::task::spawn_blocking(move || {
            let entries = read_entries(&path)?;

            if verbosity == Verbosity::Verbose {
                for name in entries.keys() {
                    debug!("Loaded entry: {}", name);
                }
            }
            if verbosity != Verbosity::Quiet {
                info!("Loaded {} entries from {}", entries.len(), path.display());
            }

            Ok(ZipHandle {
                source: path,
                entries,
            })
        })
        .await?
    }

    /// Write `handle` to a new archive and return its path
    pub async fn save(&self, handle: &ZipHandle) -> Result<PathBuf> {
        let stem = handle
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());
        let target = self
            .output_dir
            .join(format!("{}-{}.zip", stem, uuid::Uuid::new_v4().simple()));

        let handle = handle.clone();
        let verbosity = self.verbosity;

        tokio::task::spawn_blocking(move || {
            write_entries(&target, &handle.entries)?;

            if verbosity != Verbosity::Quiet {
                info!("Saved {} entries to {}", handle.len(), target.display());
            }
            Ok(target)
        })
        .await?
    }
}

impl Default for ArchiveTransformer {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, Entry>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| Error::zip(path, e))?;

    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| Error::zip(path, e))?;
        let name = file.name().to_string();

        let mut data = Vec::new();
        if !file.is_dir() {
            file.read_to_end(&mut data).map_err(|e| Error::io(path, e))?;
        }

        entries.insert(
            name,
            Entry {
                data,
                method: file.compression(),
            },
        );
    }

    Ok(entries)
}

fn write_entries(path: &Path, entries: &BTreeMap<String, Entry>) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));

    for (name, entry) in entries {
        let method = match entry.method {
            CompressionMethod::Stored => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        };
        let options = SimpleFileOptions::default().compression_method(method);

        if name.ends_with('/') {
            writer
                .add_directory(name.as_str(), options)
                .map_err(|e| Error::zip(path, e))?;
            continue;
        }

        writer
            .start_file(name.as_str(), options)
            .map_err(|e| Error::zip(path, e))?;
        writer.write_all(&entry.data).map_err(|e| Error::io(path, e))?;
    }

    let mut out = writer.finish().map_err(|e| Error::zip(path, e))?;
    out.flush().map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Entry name -> contents for every file entry of the archive at `path`
pub(crate) fn read_files(path: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
    Ok(read_entries(path)?
        .into_iter()
        .filter(|(name, _)| !name.ends_with('/'))
        .map(|(name, entry)| (name, entry.data))
        .collect())
}

//! Archive Site - Resolve request paths against zip entries
//!
//! Entries under the configured root-within-zip are indexed once at open
//! time; lookups are plain map hits afterwards.

use crate::archive::read_files;
use crate::error::Result;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "index.html";

/// A resolved entry ready to be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteFile<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub content_type: &'static str,
}

/// Read-only view of an archive's files below a root directory
#[derive(Debug)]
pub struct ArchiveSite {
    archive: PathBuf,
    root: String,
    files: HashMap<String, Vec<u8>>,
}

impl ArchiveSite {
    /// Index every file of `archive` found under `zip_root`.
    ///
    /// Blocking: reads and inflates the whole archive.
    pub fn open(archive: impl AsRef<Path>, zip_root: &str) -> Result<Self> {
        let archive = archive.as_ref().to_path_buf();
        let root = zip_root.trim_matches('/').to_string();
        let prefix = if root.is_empty() {
            String::new()
        } else {
            format!("{}/", root)
        };

        let files = read_files(&archive)?
            .into_iter()
            .filter_map(|(name, data)| {
                name.strip_prefix(prefix.as_str())
                    .map(|relative| (relative.to_string(), data))
            })
            .collect();

        Ok(Self {
            archive,
            root,
            files,
        })
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn zip_root(&self) -> &str {
        &self.root
    }

    /// Number of servable files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Find the entry for a URL path such as `/css/site.css`.
    ///
    /// The path is percent-decoded first; paths that do not decode to UTF-8
    /// resolve to nothing. Directory paths fall back to their `index.html`.
    pub fn resolve(&self, request_path: &str) -> Option<SiteFile<'_>> {
        let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
        let path = decoded.trim_start_matches('/');
        if path.split('/').any(|segment| segment == "..") {
            return None;
        }

        let candidates = if path.is_empty() || path.ends_with('/') {
            vec![format!("{}{}", path, INDEX_FILE)]
        } else {
            vec![path.to_string(), format!("{}/{}", path, INDEX_FILE)]
        };

        candidates.into_iter().find_map(|candidate| {
            self.files
                .get_key_value(&candidate)
                .map(|(name, data)| SiteFile {
                    name: name.as_str(),
                    data: data.as_slice(),
                    content_type: content_type(name),
                })
        })
    }
}

/// Determine content type from file extension
pub fn content_type(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" | "md" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_fixture;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> PathBuf {
        write_fixture(
            dir.path(),
            "site.zip",
            &[
                ("public/index.html", "<h1>home</h1>"),
                ("public/docs/index.html", "<h1>docs</h1>"),
                ("public/app.js", "console.log(1)"),
                ("private/key.pem", "secret"),
            ],
        )
    }

    #[test]
    fn test_resolves_under_root() {
        let dir = TempDir::new().unwrap();
        let site = ArchiveSite::open(fixture(&dir), "public").unwrap();

        assert_eq!(site.len(), 3);
        assert_eq!(site.zip_root(), "public");

        let file = site.resolve("/index.html").unwrap();
        assert_eq!(file.data, b"<h1>home</h1>");
        assert_eq!(file.content_type, "text/html; charset=utf-8");

        let js = site.resolve("/app.js").unwrap();
        assert_eq!(js.content_type, "application/javascript");

        assert!(site.resolve("/private/key.pem").is_none());
        assert!(site.resolve("/../private/key.pem").is_none());
    }

    #[test]
    fn test_directory_index_fallback() {
        let dir = TempDir::new().unwrap();
        let site = ArchiveSite::open(fixture(&dir), "/public/").unwrap();

        assert_eq!(site.resolve("/").unwrap().name, "index.html");
        assert_eq!(site.resolve("/docs/").unwrap().data, b"<h1>docs</h1>");
        assert_eq!(site.resolve("/docs").unwrap().name, "docs/index.html");
        assert!(site.resolve("/missing").is_none());
    }

    #[test]
    fn test_empty_root_serves_everything() {
        let dir = TempDir::new().unwrap();
        let site = ArchiveSite::open(fixture(&dir), "").unwrap();

        assert_eq!(site.len(), 4);
        assert!(site.resolve("/private/key.pem").is_some());
        assert!(site.resolve("/public/app.js").is_some());
    }

    #[test]
    fn test_decodes_request_paths() {
        let dir = TempDir::new().unwrap();
        let archive = write_fixture(
            dir.path(),
            "names.zip",
            &[
                ("my file.txt", "spaced"),
                ("café.txt", "accent"),
                ("secret.txt", "hidden"),
            ],
        );
        let site = ArchiveSite::open(archive, "").unwrap();

        assert_eq!(site.resolve("/my%20file.txt").unwrap().data, b"spaced");
        assert_eq!(site.resolve("/caf%C3%A9.txt").unwrap().data, b"accent");
        assert!(site.resolve("/caf%E9.txt").is_none());
        assert!(site.resolve("/a/%2E%2E/secret.txt").is_none());
        assert!(site.resolve("/%2e%2e/secret.txt").is_none());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a/b/style.CSS"), "text/css; charset=utf-8");
        assert_eq!(content_type("font.woff2"), "font/woff2");
        assert_eq!(content_type("blob"), "application/octet-stream");
    }
}

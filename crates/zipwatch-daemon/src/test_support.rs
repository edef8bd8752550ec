//! Shared fixtures for daemon tests

use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Port that was free a moment ago
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Write a zip with the given file entries into `dir`
pub fn write_zip(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = ZipWriter::new(std::fs::File::create(&path).unwrap());
    for (entry, contents) in files {
        writer
            .start_file(*entry, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    path
}

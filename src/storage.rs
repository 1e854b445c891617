// SPDX-License-Identifier: GPL-3.0-only

//! Storage for captured photos

use crate::constants::JPEG_CONTENT_TYPE;
use futures::future::BoxFuture;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Destination for finished photos
pub trait PhotoSaver: Send + Sync {
    /// Persist `data` of the given content type
    fn save(&self, content_type: &'static str, data: Vec<u8>) -> BoxFuture<'static, Result<(), String>>;
}

/// File extension for a content type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        JPEG_CONTENT_TYPE => "jpg",
        "image/png" => "png",
        _ => "bin",
    }
}

/// Writes photos into a directory as `IMG_<timestamp>.<ext>`
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one file synchronously, returning its path
    ///
    /// Names taken within the same second get a numeric suffix. The file is
    /// created exclusively, so concurrent saves never overwrite each other.
    pub fn write_file(dir: &Path, content_type: &str, data: &[u8]) -> Result<PathBuf, String> {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let extension = extension_for(content_type);
        let mut suffix = 0u32;
        let (filepath, mut file) = loop {
            let filepath = if suffix == 0 {
                dir.join(format!("IMG_{}.{}", timestamp, extension))
            } else {
                dir.join(format!("IMG_{}_{}.{}", timestamp, suffix, extension))
            };
            match OpenOptions::new().write(true).create_new(true).open(&filepath) {
                Ok(file) => break (filepath, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(format!("Failed to create {}: {}", filepath.display(), e)),
            }
        };

        file.write_all(data)
            .map_err(|e| format!("Failed to save photo: {}", e))?;
        Ok(filepath)
    }
}

impl PhotoSaver for DirectorySaver {
    fn save(&self, content_type: &'static str, data: Vec<u8>) -> BoxFuture<'static, Result<(), String>> {
        let dir = self.dir.clone();
        Box::pin(async move {
            debug!(dir = %dir.display(), bytes = data.len(), content_type, "Saving photo");
            let filepath = tokio::task::spawn_blocking(move || {
                DirectorySaver::write_file(&dir, content_type, &data)
            })
            .await
            .map_err(|e| format!("Save task error: {}", e))??;
            info!(path = %filepath.display(), "Photo saved successfully");
            Ok(())
        })
    }
}

/// Most recently modified photo in `dir`
pub fn latest_photo(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter(|entry| {
            entry.path().extension().is_some_and(|ext| {
                let ext = ext.to_string_lossy();
                ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("png")
            })
        })
        .max_by_key(|entry| entry.metadata().ok().and_then(|m| m.modified().ok()))
        .map(|entry| entry.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("filter-camera-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_directory_saver_writes_file() {
        let dir = temp_dir("saver");
        let saver = DirectorySaver::new(&dir);
        saver.save(JPEG_CONTENT_TYPE, vec![0xFF, 0xD8, 0xFF]).await.unwrap();
        saver.save(JPEG_CONTENT_TYPE, vec![0xFF, 0xD8, 0xFE]).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().flatten().collect();
        assert_eq!(files.len(), 2);
        let latest = latest_photo(&dir).unwrap();
        assert!(latest.file_name().unwrap().to_string_lossy().starts_with("IMG_"));
        assert_eq!(latest.extension().unwrap(), "jpg");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_keep_every_photo() {
        let dir = temp_dir("concurrent");
        let _ = std::fs::remove_dir_all(&dir);
        let saver = DirectorySaver::new(&dir);

        let saves: Vec<_> = (0..8u8)
            .map(|i| saver.save(JPEG_CONTENT_TYPE, vec![0xFF, 0xD8, i]))
            .collect();
        for result in futures::future::join_all(saves).await {
            result.unwrap();
        }

        let mut contents: Vec<Vec<u8>> = std::fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|entry| std::fs::read(entry.path()).unwrap())
            .collect();
        contents.sort();
        let expected: Vec<Vec<u8>> = (0..8u8).map(|i| vec![0xFF, 0xD8, i]).collect();
        assert_eq!(contents, expected);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_taken_name_gets_suffix() {
        let dir = temp_dir("suffix");
        let _ = std::fs::remove_dir_all(&dir);

        let first = DirectorySaver::write_file(&dir, JPEG_CONTENT_TYPE, b"first").unwrap();
        let second = DirectorySaver::write_file(&dir, JPEG_CONTENT_TYPE, b"second").unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for(JPEG_CONTENT_TYPE), "jpg");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }
}

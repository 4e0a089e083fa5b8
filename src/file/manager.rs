// Jellyfin Offline - Offline downloads for the Jellyfin mobile client
// Copyright (C) 2025 Jellyfin Offline contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download directory management
//!
//! Owns the root directory holding every downloaded file: creating it on
//! demand, best-effort deletion, and storage accounting (bytes used under the
//! root, bytes free on its filesystem).

use crate::error::{OfflineError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Root directory for downloaded files
#[derive(Debug, Clone)]
pub struct DownloadDirectory {
    root: PathBuf,
}

impl DownloadDirectory {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the root exists, creating parent directories as needed
    pub async fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            OfflineError::FileIoError(format!(
                "Failed to create directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Check if file exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Size of a file in bytes, 0 if it does not exist
    pub async fn file_size_or_zero(path: &Path) -> Result<u64> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(OfflineError::FileIoError(format!(
                "Failed to get file size {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Delete a file; a missing file is not an error
    pub async fn delete_file(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OfflineError::FileIoError(format!(
                "Delete failed: {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Delete a file, logging instead of failing
    pub async fn delete_file_best_effort(path: &Path) {
        if let Err(e) = Self::delete_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Could not delete downloaded file");
        }
    }

    /// Total size of all files under the root, recursively
    ///
    /// A missing root counts as empty.
    pub async fn used_bytes(&self) -> Result<u64> {
        if !Self::file_exists(&self.root).await {
            return Ok(0);
        }

        let mut total = 0u64;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                OfflineError::FileIoError(format!(
                    "Failed to read directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    total += entry.metadata().await?.len();
                }
            }
        }

        Ok(total)
    }

    /// Free bytes available to this process on the root's filesystem
    ///
    /// Measured on the nearest existing ancestor when the root has not been
    /// created yet.
    pub async fn available_bytes(&self) -> Result<u64> {
        let mut probe = self.root.clone();
        while !Self::file_exists(&probe).await {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }

        tokio::task::spawn_blocking(move || fs2::available_space(&probe))
            .await
            .map_err(|e| OfflineError::FileIoError(format!("Disk space query failed: {}", e)))?
            .map_err(|e| OfflineError::FileIoError(format!("Disk space query failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_exists() {
        let temp = TempDir::new().unwrap();
        let dir = DownloadDirectory::new(temp.path().join("a").join("b"));

        dir.ensure_exists().await.unwrap();
        assert!(dir.root().is_dir());
        // idempotent
        dir.ensure_exists().await.unwrap();
    }

    #[tokio::test]
    async fn test_used_bytes_is_recursive_sum() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("downloads");
        std::fs::create_dir_all(root.join("season1")).unwrap();
        std::fs::write(root.join("a.mp4"), vec![0u8; 1000]).unwrap();
        std::fs::write(root.join("b.mp4"), vec![0u8; 234]).unwrap();
        std::fs::write(root.join("season1").join("e1.mp4"), vec![0u8; 4096]).unwrap();

        let dir = DownloadDirectory::new(&root);
        assert_eq!(dir.used_bytes().await.unwrap(), 1000 + 234 + 4096);
    }

    #[tokio::test]
    async fn test_used_bytes_missing_root() {
        let temp = TempDir::new().unwrap();
        let dir = DownloadDirectory::new(temp.path().join("never-created"));
        assert_eq!(dir.used_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_available_bytes() {
        let temp = TempDir::new().unwrap();
        let dir = DownloadDirectory::new(temp.path().join("not-yet"));

        let available = dir.available_bytes().await.unwrap();
        assert!(available > 0);
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_ok() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone.mp4");
        DownloadDirectory::delete_file(&path).await.unwrap();

        std::fs::write(&path, b"x").unwrap();
        DownloadDirectory::delete_file(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_size_or_zero() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("part.mp4");
        assert_eq!(DownloadDirectory::file_size_or_zero(&path).await.unwrap(), 0);

        std::fs::write(&path, vec![1u8; 77]).unwrap();
        assert_eq!(DownloadDirectory::file_size_or_zero(&path).await.unwrap(), 77);
    }
}

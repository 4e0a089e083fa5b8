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


//! Download configuration
//!
//! All fields have defaults, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "download_root": "/sdcard/Movies/JellyfinDownloads", "request_timeout_secs": 600 }
//! ```

use crate::error::{OfflineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed subdirectory under the platform media directory holding all downloads
pub const DOWNLOAD_SUBDIRECTORY: &str = "JellyfinDownloads";

/// Default transfer chunk size (8 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Default key-value slot holding the serialized catalog
pub const DEFAULT_CATALOG_KEY: &str = "offline_downloads";

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory under which every downloaded file is stored
    pub download_root: PathBuf,

    /// Bytes read per transfer step; cancellation is polled once per chunk
    pub chunk_size: usize,

    /// Key of the persisted catalog in the key-value store
    pub catalog_key: String,

    /// HTTP connect timeout (None = client default)
    pub connect_timeout_secs: Option<u64>,

    /// Whole-request HTTP timeout (None = client default)
    pub request_timeout_secs: Option<u64>,

    /// How long pause/cancel/cleanup wait for a task to stop
    pub shutdown_grace_millis: u64,

    /// User agent sent with every download request
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_root: Self::default_download_root(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            catalog_key: DEFAULT_CATALOG_KEY.to_string(),
            connect_timeout_secs: None,
            request_timeout_secs: None,
            shutdown_grace_millis: 2000,
            user_agent: format!("jellyfin-offline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DownloadConfig {
    /// Config with defaults, storing files under `download_root`
    pub fn with_root<P: Into<PathBuf>>(download_root: P) -> Self {
        Self {
            download_root: download_root.into(),
            ..Default::default()
        }
    }

    /// Load config from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            OfflineError::InvalidConfiguration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_json::from_str(&json).map_err(|e| {
            OfflineError::InvalidConfiguration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the transfer engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(OfflineError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.catalog_key.trim().is_empty() {
            return Err(OfflineError::InvalidConfiguration(
                "catalog_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }

    /// Platform video directory joined with the fixed download subdirectory
    ///
    /// On Android the app should pass its own scoped media directory instead.
    pub fn default_download_root() -> PathBuf {
        dirs::video_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DOWNLOAD_SUBDIRECTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DownloadConfig::default();
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.catalog_key, "offline_downloads");
        assert!(config.connect_timeout_secs.is_none());
        assert!(config.download_root.ends_with(DOWNLOAD_SUBDIRECTORY));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "download_root": "/tmp/dl", "chunk_size": 4096, "extra": 1 }"#)
            .unwrap();

        let config = DownloadConfig::load(&path).unwrap();
        assert_eq!(config.download_root, PathBuf::from("/tmp/dl"));
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.shutdown_grace_millis, 2000);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "chunk_size": 0 }"#).unwrap();

        let err = DownloadConfig::load(&path).unwrap_err();
        assert!(matches!(err, OfflineError::InvalidConfiguration(_)));
    }
}

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


//! Download orchestration
//!
//! The [`DownloadManager`] is the only public entry point for downloads. It
//! resolves source URLs, creates records, and runs at most one transfer task
//! per record.
//!
//! # Task registry
//! Running transfers live in `active_downloads`, keyed by record id. Each
//! entry carries a lease number; a finishing task only removes the entry
//! holding its own lease, so a task that outlives its pause never evicts the
//! transfer that replaced it.
//!
//! # Status ownership
//! - pause/cancel/delete stop the task first, then write the new status
//! - the transfer task writes Completed/Failed only while the record is still
//!   Downloading and its token has not fired
//!
//! # Lifecycle
//! [`DownloadManager::new`] restores the catalog from storage and marks every
//! record that was mid-flight as Paused (its task did not survive the
//! process). [`DownloadManager::cleanup`] stops all transfers and writes the
//! catalog one last time; any call after it fails with
//! [`OfflineError::Shutdown`].

use crate::config::DownloadConfig;
use crate::download::catalog::DownloadCatalog;
use crate::download::engine::{TransferEngine, TransferMode};
use crate::download::progress::{ProgressMap, ProgressSnapshot, ProgressTracker};
use crate::download::record::{DownloadQuality, DownloadRecord, DownloadStatus, MediaItem};
use crate::error::{OfflineError, Result};
use crate::file::{paths, DownloadDirectory};
use crate::resolver::StreamUrlResolver;
use crate::storage::{Database, DownloadStore};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A running transfer task
struct ActiveDownload {
    lease: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type ActiveDownloads = Arc<RwLock<HashMap<String, ActiveDownload>>>;

pub struct DownloadManager {
    config: DownloadConfig,
    directory: DownloadDirectory,
    catalog: Arc<DownloadCatalog>,
    progress: Arc<ProgressTracker>,
    engine: Arc<TransferEngine>,
    resolver: Arc<dyn StreamUrlResolver>,

    /// Running transfers (record id -> task)
    active_downloads: ActiveDownloads,
    next_lease: AtomicU64,

    /// Parent of every transfer token
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Restore persisted downloads and prepare the download root
    ///
    /// Records left `Pending` or `Downloading` by a previous process are
    /// marked `Paused` so the user can resume them.
    pub async fn new(
        config: DownloadConfig,
        database: Database,
        resolver: Arc<dyn StreamUrlResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let directory = DownloadDirectory::new(&config.download_root);
        directory.ensure_exists().await?;

        let store = Arc::new(DownloadStore::new(database, config.catalog_key.clone()));
        let mut records = store.load().await;

        let mut interrupted = 0usize;
        for record in records.iter_mut() {
            if matches!(
                record.status,
                DownloadStatus::Pending | DownloadStatus::Downloading
            ) && record.transition(DownloadStatus::Paused)
            {
                // bytes persisted lag behind the file; the file is the truth
                match DownloadDirectory::file_size_or_zero(&record.local_path).await {
                    Ok(size) => record.downloaded_bytes = size,
                    Err(e) => tracing::warn!(
                        id = %record.id,
                        path = %record.local_path.display(),
                        error = %e,
                        "Cannot inspect partial file; keeping persisted progress"
                    ),
                }
                interrupted += 1;
            }
        }

        let catalog = Arc::new(DownloadCatalog::new(store, records));
        if interrupted > 0 {
            tracing::info!(count = interrupted, "Paused downloads interrupted by restart");
            catalog.flush().await;
        }

        let progress = Arc::new(ProgressTracker::new());
        let engine = Arc::new(TransferEngine::new(
            &config,
            Arc::clone(&catalog),
            Arc::clone(&progress),
        )?);

        tracing::debug!(
            root = %directory.root().display(),
            records = catalog.records().len(),
            "Download manager ready"
        );

        Ok(Self {
            config,
            directory,
            catalog,
            progress,
            engine,
            resolver,
            active_downloads: Arc::new(RwLock::new(HashMap::new())),
            next_lease: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Start downloading `item`; returns the new record's id
    ///
    /// `explicit_url` wins over the resolver when it is non-blank. The record
    /// is visible (as `Pending`, then `Downloading`) before this returns; the
    /// transfer itself runs in the background.
    pub async fn start(
        &self,
        item: &MediaItem,
        quality: Option<DownloadQuality>,
        explicit_url: Option<&str>,
    ) -> Result<String> {
        self.ensure_running()?;

        let source_url = explicit_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .or_else(|| self.resolver.stream_url(item, quality))
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| OfflineError::ResolutionFailed {
                item_id: item.id.clone(),
            })?;

        Url::parse(&source_url)
            .map_err(|e| OfflineError::InvalidDownloadUrl(format!("{}: {}", source_url, e)))?;

        self.directory.ensure_exists().await?;
        let mut record = DownloadRecord::new(item, source_url, PathBuf::new(), quality);
        record.local_path = paths::local_file_path(self.directory.root(), item, &record.id);
        let id = record.id.clone();

        tracing::info!(
            id = %id,
            item_id = %item.id,
            path = %record.local_path.display(),
            "Starting download"
        );

        self.catalog.append(record);
        self.launch(&id, TransferMode::Fresh, &[DownloadStatus::Pending])
            .await?;

        Ok(id)
    }

    /// Stop the transfer and keep the partial file for a later resume
    pub async fn pause(&self, id: &str) -> Result<()> {
        self.stop_with(id, DownloadStatus::Paused).await
    }

    /// Continue a paused download from the bytes already on disk
    pub async fn resume(&self, id: &str) -> Result<()> {
        self.launch(id, TransferMode::Resume, &[DownloadStatus::Paused])
            .await
    }

    /// Try a failed download again, keeping whatever made it to disk
    pub async fn retry(&self, id: &str) -> Result<()> {
        self.launch(id, TransferMode::Resume, &[DownloadStatus::Failed])
            .await
    }

    /// Stop the transfer for good; the record stays, marked Cancelled
    pub async fn cancel(&self, id: &str) -> Result<()> {
        self.stop_with(id, DownloadStatus::Cancelled).await
    }

    /// Stop any transfer, delete the local file and forget the record
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_running()?;

        let record = self
            .catalog
            .get(id)
            .ok_or_else(|| OfflineError::not_found(id))?;

        self.stop_task(id).await;
        self.progress.clear(id);
        DownloadDirectory::delete_file_best_effort(&record.local_path).await;
        self.catalog.remove(id);

        tracing::info!(id = %id, "Deleted download");
        Ok(())
    }

    /// Local file of a download, if it exists on disk
    pub async fn get_file(&self, id: &str) -> Option<PathBuf> {
        let record = self.catalog.get(id)?;
        if DownloadDirectory::file_exists(&record.local_path).await {
            Some(record.local_path)
        } else {
            None
        }
    }

    /// Whether any completed download came from `source_item_id`
    pub fn is_downloaded(&self, source_item_id: &str) -> bool {
        self.catalog.any(|r| {
            r.source_item_id == source_item_id && r.status == DownloadStatus::Completed
        })
    }

    /// Free bytes on the download root's filesystem
    pub async fn available_storage(&self) -> Result<u64> {
        self.directory.available_bytes().await
    }

    /// Bytes used by everything under the download root
    pub async fn used_storage(&self) -> Result<u64> {
        self.directory.used_bytes().await
    }

    pub fn get(&self, id: &str) -> Option<DownloadRecord> {
        self.catalog.get(id)
    }

    pub fn records(&self) -> Vec<DownloadRecord> {
        self.catalog.records()
    }

    pub fn progress(&self, id: &str) -> Option<ProgressSnapshot> {
        self.progress.get(id)
    }

    /// Receiver that sees the current record list, then every change
    pub fn observe_downloads(&self) -> watch::Receiver<Vec<DownloadRecord>> {
        self.catalog.observe()
    }

    /// Receiver that sees the current progress map, then every change
    pub fn observe_progress(&self) -> watch::Receiver<ProgressMap> {
        self.progress.observe()
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Whether a transfer task is currently registered for `id`
    pub async fn is_active(&self, id: &str) -> bool {
        self.active_downloads.read().await.contains_key(id)
    }

    /// Stop every transfer and persist the catalog one last time
    ///
    /// Record statuses are left as they are; the next [`DownloadManager::new`]
    /// turns interrupted downloads into Paused ones. Idempotent.
    pub async fn cleanup(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let stopping: Vec<(String, ActiveDownload)> =
            self.active_downloads.write().await.drain().collect();
        tracing::info!(count = stopping.len(), "Shutting down download manager");

        let grace = self.config.shutdown_grace();
        let waits = stopping.into_iter().map(|(id, active)| async move {
            active.cancel.cancel();
            if tokio::time::timeout(grace, active.handle).await.is_err() {
                tracing::warn!(id = %id, "Transfer did not stop within the grace period");
            }
        });
        futures_util::future::join_all(waits).await;

        self.progress.clear_all();
        self.catalog.shutdown().await;
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(OfflineError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Move a record to Downloading and spawn its transfer
    ///
    /// Runs entirely under the registry write lock, so two concurrent
    /// launches for one record cannot both succeed.
    async fn launch(&self, id: &str, mode: TransferMode, from: &[DownloadStatus]) -> Result<()> {
        let mut active = self.active_downloads.write().await;
        self.ensure_running()?;

        if active.contains_key(id) {
            return Err(OfflineError::invalid_state(format!(
                "Download {} is already running",
                id
            )));
        }

        let current = self
            .catalog
            .get(id)
            .ok_or_else(|| OfflineError::not_found(id))?;
        if !from.contains(&current.status) {
            return Err(OfflineError::invalid_state(format!(
                "Cannot start download {} while it is {}",
                id, current.status
            )));
        }

        let mut started = None;
        self.catalog.update(id, |r| {
            if r.transition(DownloadStatus::Downloading) {
                started = Some(r.clone());
                true
            } else {
                false
            }
        });
        let record = started.ok_or_else(|| {
            OfflineError::invalid_state(format!("Download {} changed state concurrently", id))
        })?;

        let cancel = self.shutdown.child_token();
        let lease = self.next_lease.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(Self::run_transfer(
            Arc::clone(&self.engine),
            Arc::clone(&self.active_downloads),
            record,
            mode,
            cancel.clone(),
            lease,
        ));

        tracing::debug!(id = %id, lease, ?mode, "Transfer task spawned");
        active.insert(
            id.to_string(),
            ActiveDownload {
                lease,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    async fn run_transfer(
        engine: Arc<TransferEngine>,
        active: ActiveDownloads,
        record: DownloadRecord,
        mode: TransferMode,
        cancel: CancellationToken,
        lease: u64,
    ) {
        engine.run(&record, mode, &cancel).await;

        let mut active = active.write().await;
        if active.get(&record.id).map(|a| a.lease) == Some(lease) {
            active.remove(&record.id);
        }
    }

    /// Stop the task (if any), clear progress, then write `next`
    async fn stop_with(&self, id: &str, next: DownloadStatus) -> Result<()> {
        self.ensure_running()?;

        let record = self
            .catalog
            .get(id)
            .ok_or_else(|| OfflineError::not_found(id))?;
        if !record.status.can_transition_to(next) {
            return Err(OfflineError::invalid_state(format!(
                "Cannot move download {} from {} to {}",
                id, record.status, next
            )));
        }

        self.stop_task(id).await;
        self.progress.clear(id);

        // the transfer may have finished before it saw the token
        if !self.catalog.update(id, |r| r.transition(next)) {
            let status = self
                .catalog
                .get(id)
                .map(|r| r.status.to_string())
                .unwrap_or_else(|| "deleted".to_string());
            return Err(OfflineError::invalid_state(format!(
                "Cannot move download {} from {} to {}",
                id, status, next
            )));
        }

        tracing::info!(id = %id, status = %next, "Download stopped");
        Ok(())
    }

    /// Cancel and await the registered task for `id`, if there is one
    async fn stop_task(&self, id: &str) {
        let active = self.active_downloads.write().await.remove(id);
        let Some(active) = active else {
            return;
        };

        active.cancel.cancel();
        match tokio::time::timeout(self.config.shutdown_grace(), active.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(id = %id, error = %e, "Transfer task ended abnormally"),
            Err(_) => tracing::warn!(id = %id, "Transfer did not stop within the grace period"),
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NoResolver;
    use tempfile::TempDir;

    struct FixedResolver(&'static str);

    impl StreamUrlResolver for FixedResolver {
        fn stream_url(&self, _item: &MediaItem, _quality: Option<DownloadQuality>) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    async fn manager_with(
        temp: &TempDir,
        resolver: Arc<dyn StreamUrlResolver>,
    ) -> DownloadManager {
        let config = DownloadConfig::with_root(temp.path().join("downloads"));
        let db = Database::new_in_memory().await.unwrap();
        DownloadManager::new(config, db, resolver).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_creates_download_root() {
        let temp = TempDir::new().unwrap();
        let manager = manager_with(&temp, Arc::new(NoResolver)).await;

        assert!(temp.path().join("downloads").is_dir());
        assert!(manager.records().is_empty());
    }

    #[tokio::test]
    async fn test_start_without_url_fails_resolution() {
        let temp = TempDir::new().unwrap();
        let manager = manager_with(&temp, Arc::new(NoResolver)).await;
        let item = MediaItem::new("item-1", "Film", "Movie");

        let err = manager.start(&item, None, None).await.unwrap_err();
        assert!(matches!(err, OfflineError::ResolutionFailed { ref item_id } if item_id == "item-1"));

        let err = manager.start(&item, None, Some("   ")).await.unwrap_err();
        assert!(matches!(err, OfflineError::ResolutionFailed { .. }));
        assert!(manager.records().is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_unparseable_url() {
        let temp = TempDir::new().unwrap();
        let manager = manager_with(&temp, Arc::new(FixedResolver("not a url"))).await;
        let item = MediaItem::new("item-1", "Film", "Movie");

        let err = manager.start(&item, None, None).await.unwrap_err();
        assert!(matches!(err, OfflineError::InvalidDownloadUrl(_)));
        assert!(manager.records().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let manager = manager_with(&temp, Arc::new(NoResolver)).await;

        assert!(matches!(manager.pause("nope").await, Err(OfflineError::RecordNotFound(_))));
        assert!(matches!(manager.resume("nope").await, Err(OfflineError::RecordNotFound(_))));
        assert!(matches!(manager.cancel("nope").await, Err(OfflineError::RecordNotFound(_))));
        assert!(matches!(manager.delete("nope").await, Err(OfflineError::RecordNotFound(_))));
        assert!(manager.get_file("nope").await.is_none());
        assert!(!manager.is_downloaded("nope"));
    }

    #[tokio::test]
    async fn test_restart_pauses_interrupted_downloads() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("downloads");
        std::fs::create_dir_all(&root).unwrap();
        let partial = root.join("Film_1.mp4");
        std::fs::write(&partial, vec![0u8; 300]).unwrap();

        let db = Database::new_in_memory().await.unwrap();
        let store = DownloadStore::new(db.clone(), crate::config::DEFAULT_CATALOG_KEY);

        let mut downloading = DownloadRecord::new(
            &MediaItem::new("a", "Film", "Movie"),
            "http://localhost/a".to_string(),
            partial.clone(),
            None,
        );
        downloading.status = DownloadStatus::Downloading;
        downloading.total_bytes = 1000;
        downloading.downloaded_bytes = 100;

        let mut done = DownloadRecord::new(
            &MediaItem::new("b", "Song", "Audio"),
            "http://localhost/b".to_string(),
            root.join("Song_1.mp3"),
            None,
        );
        done.transition(DownloadStatus::Downloading);
        done.transition(DownloadStatus::Completed);

        store.try_save(&[downloading.clone(), done.clone()]).await.unwrap();

        let manager = DownloadManager::new(
            DownloadConfig::with_root(&root),
            db,
            Arc::new(NoResolver),
        )
        .await
        .unwrap();

        let restored = manager.get(&downloading.id).unwrap();
        assert_eq!(restored.status, DownloadStatus::Paused);
        assert_eq!(restored.downloaded_bytes, 300);
        assert_eq!(manager.get(&done.id).unwrap().status, DownloadStatus::Completed);
        assert!(manager.is_downloaded("b"));
        assert!(!manager.is_downloaded("a"));
        assert!(!manager.is_active(&downloading.id).await);
    }

    #[tokio::test]
    async fn test_restart_survives_unreadable_partial_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("downloads");
        std::fs::create_dir_all(&root).unwrap();

        // a regular file standing where a directory should be: stat fails with
        // ENOTDIR, not NotFound
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let db = Database::new_in_memory().await.unwrap();
        let store = DownloadStore::new(db.clone(), crate::config::DEFAULT_CATALOG_KEY);

        let mut stale = DownloadRecord::new(
            &MediaItem::new("a", "Film", "Movie"),
            "http://localhost/a".to_string(),
            blocker.join("Film_1.mp4"),
            None,
        );
        stale.status = DownloadStatus::Downloading;
        stale.total_bytes = 1000;
        stale.downloaded_bytes = 100;

        let mut healthy = DownloadRecord::new(
            &MediaItem::new("b", "Film", "Movie"),
            "http://localhost/b".to_string(),
            root.join("Film_2.mp4"),
            None,
        );
        healthy.status = DownloadStatus::Downloading;
        std::fs::write(&healthy.local_path, vec![0u8; 50]).unwrap();

        store.try_save(&[stale.clone(), healthy.clone()]).await.unwrap();

        let manager = DownloadManager::new(
            DownloadConfig::with_root(&root),
            db,
            Arc::new(NoResolver),
        )
        .await
        .unwrap();

        let restored = manager.get(&stale.id).unwrap();
        assert_eq!(restored.status, DownloadStatus::Paused);
        assert_eq!(restored.downloaded_bytes, 100);

        let restored = manager.get(&healthy.id).unwrap();
        assert_eq!(restored.status, DownloadStatus::Paused);
        assert_eq!(restored.downloaded_bytes, 50);
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_rejected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("downloads");
        let db = Database::new_in_memory().await.unwrap();
        let store = DownloadStore::new(db.clone(), crate::config::DEFAULT_CATALOG_KEY);

        let mut done = DownloadRecord::new(
            &MediaItem::new("b", "Song", "Audio"),
            "http://localhost/b".to_string(),
            root.join("Song_1.mp3"),
            None,
        );
        done.transition(DownloadStatus::Downloading);
        done.transition(DownloadStatus::Completed);
        store.try_save(&[done.clone()]).await.unwrap();

        let manager = DownloadManager::new(DownloadConfig::with_root(&root), db, Arc::new(NoResolver))
            .await
            .unwrap();

        assert!(matches!(manager.pause(&done.id).await, Err(OfflineError::InvalidState(_))));
        assert!(matches!(manager.resume(&done.id).await, Err(OfflineError::InvalidState(_))));
        assert!(matches!(manager.retry(&done.id).await, Err(OfflineError::InvalidState(_))));
        assert!(matches!(manager.cancel(&done.id).await, Err(OfflineError::InvalidState(_))));

        // delete is always allowed
        manager.delete(&done.id).await.unwrap();
        assert!(manager.get(&done.id).is_none());
    }

    #[tokio::test]
    async fn test_calls_after_cleanup_fail() {
        let temp = TempDir::new().unwrap();
        let manager = manager_with(&temp, Arc::new(FixedResolver("http://localhost/x"))).await;

        manager.cleanup().await;
        manager.cleanup().await;

        let item = MediaItem::new("item-1", "Film", "Movie");
        assert!(matches!(manager.start(&item, None, None).await, Err(OfflineError::Shutdown)));
        assert!(matches!(manager.pause("any").await, Err(OfflineError::Shutdown)));
        assert!(matches!(manager.resume("any").await, Err(OfflineError::Shutdown)));
        assert!(matches!(manager.delete("any").await, Err(OfflineError::Shutdown)));
    }
}

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


//! Observable, persisted list of download records
//!
//! The catalog is the single source of truth for download status. Mutations
//! are visible to observers immediately; a background persister follows the
//! same channel and writes the latest list to the store. Bursts of mutations
//! (one per transfer chunk) coalesce into a single write, and writes never
//! overlap because one task performs all of them.

use crate::download::record::DownloadRecord;
use crate::storage::DownloadStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct DownloadCatalog {
    records: watch::Sender<Vec<DownloadRecord>>,
    store: Arc<DownloadStore>,
    persist_stop: CancellationToken,
    persister: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DownloadCatalog {
    /// Create a catalog seeded with `initial` and start its persister
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<DownloadStore>, initial: Vec<DownloadRecord>) -> Self {
        let (records, _) = watch::channel(initial);
        let persist_stop = CancellationToken::new();

        let persister = tokio::spawn(Self::persist_loop(
            records.subscribe(),
            Arc::clone(&store),
            persist_stop.clone(),
        ));

        Self {
            records,
            store,
            persist_stop,
            persister: std::sync::Mutex::new(Some(persister)),
        }
    }

    async fn persist_loop(
        mut rx: watch::Receiver<Vec<DownloadRecord>>,
        store: Arc<DownloadStore>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = rx.borrow_and_update().clone();
                    store.save(&snapshot).await;
                }
            }
        }

        // catch up on anything that landed after the last write
        if rx.has_changed().unwrap_or(false) {
            let snapshot = rx.borrow_and_update().clone();
            store.save(&snapshot).await;
        }
    }

    /// Add a record at the end of the list
    pub fn append(&self, record: DownloadRecord) {
        self.records.send_modify(|records| records.push(record));
    }

    /// Apply `transform` to the record with `id`
    ///
    /// Returns false (and notifies nobody) when no such record exists.
    pub fn replace<F>(&self, id: &str, transform: F) -> bool
    where
        F: FnOnce(DownloadRecord) -> DownloadRecord,
    {
        self.records.send_if_modified(|records| {
            let Some(slot) = records.iter_mut().find(|r| r.id == id) else {
                return false;
            };
            *slot = transform(slot.clone());
            true
        })
    }

    /// Mutate the record with `id` in place
    ///
    /// `update` returns whether it changed anything; observers and the
    /// persister are only woken when it did.
    pub fn update<F>(&self, id: &str, update: F) -> bool
    where
        F: FnOnce(&mut DownloadRecord) -> bool,
    {
        self.records.send_if_modified(|records| {
            match records.iter_mut().find(|r| r.id == id) {
                Some(record) => update(record),
                None => false,
            }
        })
    }

    /// Remove the record with `id`, returning it
    pub fn remove(&self, id: &str) -> Option<DownloadRecord> {
        let mut removed = None;
        self.records.send_if_modified(|records| {
            match records.iter().position(|r| r.id == id) {
                Some(index) => {
                    removed = Some(records.remove(index));
                    true
                }
                None => false,
            }
        });
        removed
    }

    pub fn get(&self, id: &str) -> Option<DownloadRecord> {
        self.records.borrow().iter().find(|r| r.id == id).cloned()
    }

    /// Copy of the current list, in insertion order
    pub fn records(&self) -> Vec<DownloadRecord> {
        self.records.borrow().clone()
    }

    /// Whether any record satisfies `predicate`
    pub fn any<P>(&self, predicate: P) -> bool
    where
        P: Fn(&DownloadRecord) -> bool,
    {
        self.records.borrow().iter().any(predicate)
    }

    /// Subscribe to the list; the current value is available immediately
    pub fn observe(&self) -> watch::Receiver<Vec<DownloadRecord>> {
        self.records.subscribe()
    }

    /// Write the current list to the store now
    pub async fn flush(&self) {
        let snapshot = self.records();
        self.store.save(&snapshot).await;
    }

    /// Stop the persister after a final write
    pub async fn shutdown(&self) {
        self.persist_stop.cancel();

        let handle = self
            .persister
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Catalog persister did not stop cleanly");
            }
        }

        self.flush().await;
    }
}

impl Drop for DownloadCatalog {
    fn drop(&mut self) {
        self.persist_stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::record::{DownloadStatus, MediaItem};
    use crate::storage::Database;
    use std::path::PathBuf;
    use std::time::Duration;

    fn record(item_id: &str) -> DownloadRecord {
        DownloadRecord::new(
            &MediaItem::new(item_id, item_id, "Movie"),
            format!("http://localhost/{}", item_id),
            PathBuf::from(format!("/tmp/{}.mp4", item_id)),
            None,
        )
    }

    async fn catalog() -> (DownloadCatalog, Arc<DownloadStore>) {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(DownloadStore::new(db, "catalog"));
        (DownloadCatalog::new(Arc::clone(&store), Vec::new()), store)
    }

    #[tokio::test]
    async fn test_append_keeps_insertion_order() {
        let (catalog, _) = catalog().await;
        for id in ["x", "a", "m"] {
            catalog.append(record(id));
        }

        let items: Vec<_> = catalog
            .records()
            .into_iter()
            .map(|r| r.source_item_id)
            .collect();
        assert_eq!(items, vec!["x", "a", "m"]);
    }

    #[tokio::test]
    async fn test_replace_missing_is_noop() {
        let (catalog, _) = catalog().await;
        catalog.append(record("a"));

        let mut rx = catalog.observe();
        rx.borrow_and_update();

        assert!(!catalog.replace("nope", |mut r| {
            r.downloaded_bytes = 99;
            r
        }));
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_replace_applies_transform() {
        let (catalog, _) = catalog().await;
        let rec = record("a");
        let id = rec.id.clone();
        catalog.append(rec);

        assert!(catalog.replace(&id, |mut r| {
            r.downloaded_bytes = 42;
            r
        }));
        assert_eq!(catalog.get(&id).unwrap().downloaded_bytes, 42);
    }

    #[tokio::test]
    async fn test_update_without_change_does_not_notify() {
        let (catalog, _) = catalog().await;
        let rec = record("a");
        let id = rec.id.clone();
        catalog.append(rec);

        let mut rx = catalog.observe();
        rx.borrow_and_update();

        // Pending -> Completed is not a legal move
        assert!(!catalog.update(&id, |r| r.transition(DownloadStatus::Completed)));
        assert!(!rx.has_changed().unwrap());

        assert!(catalog.update(&id, |r| r.transition(DownloadStatus::Downloading)));
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let (catalog, _) = catalog().await;
        let rec = record("a");
        let id = rec.id.clone();
        catalog.append(rec);
        catalog.append(record("b"));

        assert_eq!(catalog.remove(&id).unwrap().source_item_id, "a");
        assert!(catalog.remove(&id).is_none());
        assert_eq!(catalog.records().len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_reach_the_store() {
        let (catalog, store) = catalog().await;
        catalog.append(record("a"));
        catalog.append(record("b"));

        // eventual persistence: poll until the persister caught up
        let mut persisted = Vec::new();
        for _ in 0..100 {
            persisted = store.load().await;
            if persisted.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(persisted, catalog.records());
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let (catalog, store) = catalog().await;
        catalog.append(record("a"));
        catalog.shutdown().await;

        assert_eq!(store.load().await.len(), 1);
    }

    #[tokio::test]
    async fn test_observe_replays_current_list() {
        let (catalog, _) = catalog().await;
        catalog.append(record("a"));

        let rx = catalog.observe();
        assert_eq!(rx.borrow().len(), 1);
    }
}

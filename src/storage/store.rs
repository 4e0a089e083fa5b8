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


//! Persistent download catalog
//!
//! The whole catalog is one JSON array stored under a single key. Loading
//! never fails from the caller's point of view: unreadable state degrades to
//! an empty catalog, and a malformed element only drops that element. Saving
//! logs failures and leaves the previous value in place.

use crate::download::record::DownloadRecord;
use crate::error::Result;
use crate::storage::Database;
use tokio::sync::Mutex;

/// Reads and writes the serialized catalog
#[derive(Debug)]
pub struct DownloadStore {
    db: Database,
    key: String,
    /// Single in-process writer
    write_lock: Mutex<()>,
}

impl DownloadStore {
    pub fn new<S: Into<String>>(db: Database, key: S) -> Self {
        Self {
            db,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Key of the slot holding the catalog
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the persisted catalog in stored order
    ///
    /// Returns an empty catalog (and logs) when the slot cannot be read or is
    /// not a JSON array.
    pub async fn load(&self) -> Vec<DownloadRecord> {
        match self.try_load().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "Failed to load download catalog");
                Vec::new()
            }
        }
    }

    async fn try_load(&self) -> Result<Vec<DownloadRecord>> {
        let Some(json) = self.db.get_value(&self.key).await? else {
            return Ok(Vec::new());
        };

        Ok(Self::decode(&json)?)
    }

    /// Parse a catalog element by element, skipping elements that don't decode
    pub fn decode(json: &str) -> serde_json::Result<Vec<DownloadRecord>> {
        let elements: Vec<serde_json::Value> = serde_json::from_str(json)?;

        let records = elements
            .into_iter()
            .enumerate()
            .filter_map(|(index, element)| match serde_json::from_value(element) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping unreadable download record");
                    None
                }
            })
            .collect();

        Ok(records)
    }

    /// Overwrite the persisted catalog
    ///
    /// Failures are logged; the previously stored catalog stays intact.
    pub async fn save(&self, records: &[DownloadRecord]) {
        if let Err(e) = self.try_save(records).await {
            tracing::error!(key = %self.key, error = %e, "Failed to persist download catalog");
        }
    }

    /// Overwrite the persisted catalog, reporting failures to the caller
    pub async fn try_save(&self, records: &[DownloadRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;

        let _guard = self.write_lock.lock().await;
        self.db.set_value(&self.key, &json).await?;
        tracing::trace!(key = %self.key, count = records.len(), "Persisted download catalog");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::record::{DownloadStatus, MediaItem};
    use std::path::PathBuf;

    fn record(item_id: &str) -> DownloadRecord {
        DownloadRecord::new(
            &MediaItem::new(item_id, format!("Item {}", item_id), "Movie"),
            format!("http://localhost/Items/{}/Download", item_id),
            PathBuf::from(format!("/tmp/{}.mp4", item_id)),
            None,
        )
    }

    async fn store() -> DownloadStore {
        DownloadStore::new(Database::new_in_memory().await.unwrap(), "offline_downloads")
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_and_fields() {
        let store = store().await;

        let mut first = record("a");
        first.transition(DownloadStatus::Downloading);
        first.total_bytes = 1000;
        first.downloaded_bytes = 1000;
        first.transition(DownloadStatus::Completed);
        let second = record("b");
        let third = record("c");

        let records = vec![first, second, third];
        store.try_save(&records).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_missing_slot_is_empty() {
        assert!(store().await.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_json_degrades_to_empty() {
        let store = store().await;
        store.db.set_value(store.key(), "{not json").await.unwrap();

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_element_is_skipped() {
        let store = store().await;
        let json = r#"[
            {"id": "one", "status": "completed", "newField": 3},
            {"id": "two", "status": "exploded"},
            {"id": "three"}
        ]"#;
        store.db.set_value(store.key(), json).await.unwrap();

        let loaded = store.load().await;
        let ids: Vec<_> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "three"]);
        assert_eq!(loaded[1].status, DownloadStatus::Pending);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_catalog() {
        let store = store().await;
        store.save(&[record("a"), record("b")]).await;
        store.save(&[record("c")]).await;

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].source_item_id, "c");
    }
}

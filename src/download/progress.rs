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


//! Download progress tracking and reporting
//!
//! # Progress Information
//! - Download id for identification
//! - Bytes downloaded / total bytes
//! - Average speed since the transfer started (no smoothing)
//! - Estimated time remaining
//! - Percentage complete
//!
//! Snapshots are published once per transfer chunk, so subscribers see a
//! high-frequency stream and should coalesce for display. The map only holds
//! entries for transfers that are currently running.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

/// Map of download id to its latest snapshot
pub type ProgressMap = HashMap<String, ProgressSnapshot>;

/// Progress snapshot for a single running download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Download record id
    pub download_id: String,

    /// Bytes on disk so far, including any resumed prefix
    pub downloaded_bytes: u64,

    /// Total bytes to download (0 if unknown)
    pub total_bytes: u64,

    /// Percentage complete (0.0 - 100.0, 0 when total is unknown)
    pub percent_complete: f64,

    /// Average download speed in bytes per second since the transfer started
    pub bytes_per_second: u64,

    /// Estimated time remaining in milliseconds (None if speed or total unknown)
    pub estimated_remaining_ms: Option<u64>,
}

impl ProgressSnapshot {
    /// Build a snapshot from transfer counters
    ///
    /// `session_bytes` are the bytes received since `elapsed` started counting;
    /// a resumed prefix already on disk does not inflate the speed.
    pub fn from_transfer(
        download_id: &str,
        downloaded_bytes: u64,
        total_bytes: u64,
        session_bytes: u64,
        elapsed: Duration,
    ) -> Self {
        let mut snapshot = Self {
            download_id: download_id.to_string(),
            downloaded_bytes,
            total_bytes,
            percent_complete: 0.0,
            bytes_per_second: 0,
            estimated_remaining_ms: None,
        };

        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms > 0 {
            snapshot.bytes_per_second = session_bytes.saturating_mul(1000) / elapsed_ms;
        }

        snapshot.calculate_percentage();
        snapshot.calculate_eta();
        snapshot
    }

    /// Calculate percentage from bytes
    pub fn calculate_percentage(&mut self) {
        if self.total_bytes > 0 {
            self.percent_complete =
                (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0);
        } else {
            self.percent_complete = 0.0;
        }
    }

    /// Calculate ETA from speed and remaining bytes
    pub fn calculate_eta(&mut self) {
        if self.bytes_per_second > 0 && self.total_bytes > 0 {
            let remaining_bytes = self.total_bytes.saturating_sub(self.downloaded_bytes);
            self.estimated_remaining_ms =
                Some(remaining_bytes.saturating_mul(1000) / self.bytes_per_second);
        } else {
            self.estimated_remaining_ms = None;
        }
    }

    /// Format download speed as human-readable string (e.g., "2.5 MB/s")
    pub fn speed_string(&self) -> String {
        let mb_per_sec = self.bytes_per_second as f64 / 1_000_000.0;
        format!("{:.1} MB/s", mb_per_sec)
    }

    /// Format ETA as human-readable string (e.g., "5m 30s")
    pub fn eta_string(&self) -> String {
        let Some(remaining_ms) = self.estimated_remaining_ms else {
            return "calculating...".to_string();
        };

        let total_seconds = remaining_ms / 1000;
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Format bytes as human-readable string (e.g., "45.2 MB")
    pub fn bytes_string(bytes: u64) -> String {
        let mb = bytes as f64 / 1_000_000.0;
        format!("{:.1} MB", mb)
    }

    /// Format progress as display string
    pub fn display_string(&self) -> String {
        if self.total_bytes > 0 {
            format!(
                "{:.1}% ({} / {}) - {} - {}",
                self.percent_complete,
                Self::bytes_string(self.downloaded_bytes),
                Self::bytes_string(self.total_bytes),
                self.speed_string(),
                self.eta_string()
            )
        } else {
            format!(
                "{} - {}",
                Self::bytes_string(self.downloaded_bytes),
                self.speed_string()
            )
        }
    }
}

/// Shared, observable map of running transfers' progress
///
/// Written only by the transfer task that owns an id; read by anyone through
/// [`ProgressTracker::observe`], which replays the latest map on subscribe.
#[derive(Debug)]
pub struct ProgressTracker {
    snapshots: watch::Sender<ProgressMap>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(ProgressMap::new());
        Self { snapshots }
    }

    /// Replace the snapshot for the snapshot's download id
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.snapshots.send_modify(|map| {
            map.insert(snapshot.download_id.clone(), snapshot);
        });
    }

    /// Remove the snapshot for `id`; observers are only notified if one existed
    pub fn clear(&self, id: &str) {
        self.snapshots
            .send_if_modified(|map| map.remove(id).is_some());
    }

    /// Remove every snapshot
    pub fn clear_all(&self) {
        self.snapshots.send_if_modified(|map| {
            let had_entries = !map.is_empty();
            map.clear();
            had_entries
        });
    }

    /// Latest snapshot for `id`, if it is transferring
    pub fn get(&self, id: &str) -> Option<ProgressSnapshot> {
        self.snapshots.borrow().get(id).cloned()
    }

    /// Subscribe to the map; the current value is available immediately
    pub fn observe(&self) -> watch::Receiver<ProgressMap> {
        self.snapshots.subscribe()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

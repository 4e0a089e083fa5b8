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


//! Download management
//!
//! Layers, bottom-up:
//! - `record`: the persisted download record and its status machine
//! - `progress`: live, in-memory transfer progress
//! - `catalog`: the observable list of records, persisted in the background
//! - `engine`: the HTTP-to-disk transfer with resume support
//! - `manager`: the public entry point tying them together

pub mod catalog;
pub mod engine;
pub mod manager;
pub mod progress;
pub mod record;

// Re-export commonly used types
pub use catalog::DownloadCatalog;
pub use engine::{TransferEngine, TransferMode, TransferOutcome};
pub use manager::DownloadManager;
pub use progress::{ProgressMap, ProgressSnapshot, ProgressTracker};
pub use record::{DownloadQuality, DownloadRecord, DownloadStatus, MediaItem};

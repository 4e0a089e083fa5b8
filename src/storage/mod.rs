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


//! Persistence for the download catalog
//!
//! # Layout
//! - `database`: SQLite connection pool exposing named string slots
//! - `migrations`: runtime schema migrations
//! - `store`: the catalog serialized as one JSON array under one key
//!
//! # Usage Example
//! ```no_run
//! use jellyfin_offline::storage::{Database, DownloadStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./offline.db").await?;
//! let store = DownloadStore::new(db, "offline_downloads");
//! let records = store.load().await;
//! store.save(&records).await;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod migrations;
pub mod store;

pub use database::Database;
pub use store::DownloadStore;

//! Offline downloads for the Jellyfin mobile client
//!
//! Media items are fetched over HTTP into a local download root, with
//! pause/resume/cancel, live progress, and a download list that survives
//! process restarts.
//!
//! # Example
//! ```no_run
//! use jellyfin_offline::{
//!     DownloadConfig, DownloadManager, Database, JellyfinStreamResolver, MediaItem,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> jellyfin_offline::Result<()> {
//! let db = Database::new(Database::get_default_path()).await?;
//! let resolver = JellyfinStreamResolver::new("https://jellyfin.example.com", "token")?;
//! let manager = DownloadManager::new(DownloadConfig::default(), db, Arc::new(resolver)).await?;
//!
//! let item = MediaItem::new("a1b2c3", "The Matrix", "Movie");
//! let id = manager.start(&item, None, None).await?;
//!
//! let mut progress = manager.observe_progress();
//! while progress.changed().await.is_ok() {
//!     if let Some(p) = progress.borrow().get(&id) {
//!         println!("{}", p.display_string());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod resolver;
pub mod storage;

pub use config::DownloadConfig;
pub use download::{
    DownloadManager, DownloadQuality, DownloadRecord, DownloadStatus, MediaItem, ProgressMap,
    ProgressSnapshot,
};
pub use error::{OfflineError, Result};
pub use resolver::{JellyfinStreamResolver, NoResolver, StreamUrlResolver};
pub use storage::Database;

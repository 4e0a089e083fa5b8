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


use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use jellyfin_offline::download::progress::ProgressSnapshot;
use jellyfin_offline::{
    Database, DownloadConfig, DownloadManager, DownloadQuality, DownloadStatus,
    JellyfinStreamResolver, MediaItem, NoResolver, StreamUrlResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jellyfin-offline-cli")]
#[command(about = "Jellyfin offline downloads - desktop testing tool", long_about = None)]
struct Cli {
    /// Download root (defaults to the platform video directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Catalog database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// JSON config file; --root overrides its download root
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an item and wait for it to finish
    Download {
        /// Jellyfin item id
        item_id: String,
        /// Display name used for the local filename
        #[arg(short, long, default_value = "download")]
        name: String,
        /// Item type (Movie, Episode, Audio, ...)
        #[arg(short = 't', long, default_value = "Movie")]
        media_type: String,
        /// Fetch this URL instead of resolving one from the server
        #[arg(short, long)]
        url: Option<String>,
        /// Jellyfin server address
        #[arg(long, requires = "token")]
        server: Option<String>,
        /// Jellyfin access token
        #[arg(long)]
        token: Option<String>,
        /// original, high, medium or low
        #[arg(short, long)]
        quality: Option<String>,
    },
    /// Resume a paused or failed download and wait for it
    Resume {
        /// Download record id
        id: String,
    },
    /// List downloads
    List,
    /// Show storage used by downloads and free space
    Usage,
    /// Delete a download and its file
    Delete {
        /// Download record id
        id: String,
    },
}

fn parse_quality(label: &str) -> Result<DownloadQuality> {
    Ok(match label.to_ascii_lowercase().as_str() {
        "original" => DownloadQuality::Original,
        "high" => DownloadQuality::High,
        "medium" => DownloadQuality::Medium,
        "low" => DownloadQuality::Low,
        other => bail!("Unknown quality: {}", other),
    })
}

async fn open_manager(cli: &Cli, resolver: Arc<dyn StreamUrlResolver>) -> Result<DownloadManager> {
    let mut config = match &cli.config {
        Some(path) => DownloadConfig::load(path)?,
        None => DownloadConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.download_root = root.clone();
    }

    let db_path = cli
        .database
        .clone()
        .unwrap_or_else(Database::get_default_path);
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("Opening database {}", db_path.display()))?;

    Ok(DownloadManager::new(config, db, resolver).await?)
}

/// Print progress until the record leaves Downloading; Ctrl-C pauses it
async fn wait_for(manager: &DownloadManager, id: &str) -> Result<DownloadStatus> {
    let mut downloads = manager.observe_downloads();
    let mut progress = manager.observe_progress();

    loop {
        let status = downloads
            .borrow_and_update()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status);
        match status {
            Some(DownloadStatus::Downloading) | Some(DownloadStatus::Pending) => {}
            Some(status) => return Ok(status),
            None => bail!("Download {} disappeared", id),
        }

        tokio::select! {
            changed = downloads.changed() => changed.context("Download list closed")?,
            changed = progress.changed() => {
                changed.context("Progress closed")?;
                let snapshot: Option<ProgressSnapshot> = progress.borrow_and_update().get(id).cloned();
                if let Some(snapshot) = snapshot {
                    eprint!("\r{}        ", snapshot.display_string());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                println!("Pausing...");
                manager.pause(id).await?;
            }
        }
    }
}

async fn finish(manager: &DownloadManager, id: &str) -> Result<()> {
    let status = wait_for(manager, id).await?;
    eprintln!();

    match manager.get(id) {
        Some(record) if status == DownloadStatus::Completed => {
            println!(
                "✓ Downloaded {} ({}) to {}",
                record.display_name,
                ProgressSnapshot::bytes_string(record.downloaded_bytes),
                record.local_path.display()
            );
        }
        Some(record) => {
            println!("Download {} is {}", record.id, status);
            if let Some(reason) = record.failure_reason {
                println!("Reason: {}", reason);
            }
        }
        None => {}
    }

    manager.cleanup().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Download {
            item_id,
            name,
            media_type,
            url,
            server,
            token,
            quality,
        } => {
            let resolver: Arc<dyn StreamUrlResolver> = match (server, token) {
                (Some(server), Some(token)) => {
                    Arc::new(JellyfinStreamResolver::new(server, token.clone())?)
                }
                _ => Arc::new(NoResolver),
            };
            let quality = quality.as_deref().map(parse_quality).transpose()?;

            let manager = open_manager(&cli, resolver).await?;
            let item = MediaItem::new(item_id.clone(), name.clone(), media_type.clone());
            let id = manager
                .start(&item, quality, url.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Started download {}", id);

            finish(&manager, &id).await?;
        }
        Commands::Resume { id } => {
            let manager = open_manager(&cli, Arc::new(NoResolver)).await?;
            match manager.get(id).map(|r| r.status) {
                Some(DownloadStatus::Failed) => manager.retry(id).await?,
                _ => manager.resume(id).await?,
            }
            println!("Resumed download {}", id);

            finish(&manager, id).await?;
        }
        Commands::List => {
            let manager = open_manager(&cli, Arc::new(NoResolver)).await?;
            let records = manager.records();
            if records.is_empty() {
                println!("No downloads");
            }
            for record in records {
                println!(
                    "{}  {:<11} {:>6.1}%  {:>10}  {}",
                    record.id,
                    record.status.as_str(),
                    record.progress_percentage(),
                    ProgressSnapshot::bytes_string(record.downloaded_bytes),
                    record.display_name
                );
                if let Some(reason) = &record.failure_reason {
                    println!("    {}", reason);
                }
            }
            manager.cleanup().await;
        }
        Commands::Usage => {
            let manager = open_manager(&cli, Arc::new(NoResolver)).await?;
            println!("Download root: {}", manager.config().download_root.display());
            println!(
                "Used:      {}",
                ProgressSnapshot::bytes_string(manager.used_storage().await?)
            );
            println!(
                "Available: {}",
                ProgressSnapshot::bytes_string(manager.available_storage().await?)
            );
            manager.cleanup().await;
        }
        Commands::Delete { id } => {
            let manager = open_manager(&cli, Arc::new(NoResolver)).await?;
            manager.delete(id).await?;
            println!("Deleted download {}", id);
            manager.cleanup().await;
        }
    }

    Ok(())
}

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


//! HTTP transfer with resume support
//!
//! # Transfer loop
//! 1. GET the source URL (with `Range: bytes={have}-` when resuming)
//! 2. Non-success status → `Failed` outcome carrying the status code
//! 3. Read the body in fixed-size chunks; before each chunk check cancellation
//! 4. Write the chunk, publish a progress snapshot, update the record's bytes
//! 5. End of body: `Completed` if the announced length was reached (or no
//!    length was announced), otherwise `Failed` as truncated
//!
//! # Resume Mechanism
//! - `206 Partial Content`: append the body to the existing file
//! - `200 OK`: the server ignored the range; skip the bytes we already have
//!   from the start of the body, then append the rest
//! - `416 Range Not Satisfiable` with a local file already at the total
//!   (from `Content-Range: bytes */N`, else the record): nothing left to fetch.
//!   When neither side knows the total, a non-empty file counts as complete
//! - Local file longer than the resource: start over
//!
//! Cancellation is cooperative. A cancelled transfer flushes what it has
//! written and returns [`TransferOutcome::Cancelled`] without touching the
//! record's status; whoever cancelled it owns that.

use crate::config::DownloadConfig;
use crate::download::catalog::DownloadCatalog;
use crate::download::progress::{ProgressSnapshot, ProgressTracker};
use crate::download::record::{DownloadRecord, DownloadStatus};
use crate::error::{OfflineError, Result};
use crate::file::DownloadDirectory;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// How the destination file is treated when the transfer starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Truncate the destination and fetch everything
    Fresh,
    /// Keep bytes already on disk and fetch the rest
    Resume,
}

/// Terminal result of one transfer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { downloaded_bytes: u64 },
    Failed { reason: String },
    Cancelled,
}

/// Where the body goes relative to what is already on disk
struct BodyPlan {
    /// Total resource size (0 if unknown)
    content_length: u64,
    /// Leading body bytes to discard
    skip: u64,
    /// Bytes already on disk that the body continues from
    offset: u64,
}

/// Performs the byte-for-byte HTTP-to-disk copy for one record at a time
pub struct TransferEngine {
    client: Client,
    catalog: Arc<DownloadCatalog>,
    progress: Arc<ProgressTracker>,
    chunk_size: usize,
}

impl TransferEngine {
    pub fn new(
        config: &DownloadConfig,
        catalog: Arc<DownloadCatalog>,
        progress: Arc<ProgressTracker>,
    ) -> Result<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            catalog,
            progress,
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Transfer `record` and apply the outcome to the catalog
    ///
    /// Errors never escape: they become a `Failed` outcome with the error's
    /// message, unless the token was cancelled, in which case the run reports
    /// `Cancelled`.
    pub async fn run(
        &self,
        record: &DownloadRecord,
        mode: TransferMode,
        token: &CancellationToken,
    ) -> TransferOutcome {
        let outcome = match self.transfer(record, mode, token).await {
            Ok(outcome) => outcome,
            Err(_) if token.is_cancelled() => TransferOutcome::Cancelled,
            Err(e) => {
                tracing::warn!(
                    id = %record.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Download failed"
                );
                TransferOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        match &outcome {
            TransferOutcome::Completed { downloaded_bytes } => {
                tracing::info!(id = %record.id, bytes = downloaded_bytes, "Download completed");
            }
            TransferOutcome::Cancelled => {
                tracing::debug!(id = %record.id, "Download cancelled");
            }
            TransferOutcome::Failed { .. } => {}
        }

        if self.settle(&record.id, &outcome, token) {
            self.progress.clear(&record.id);
        }
        outcome
    }

    /// Write a terminal outcome to the record
    ///
    /// Only applies while the record is still `Downloading` and the run was
    /// not cancelled, so a status chosen by the user is never overwritten.
    fn settle(&self, id: &str, outcome: &TransferOutcome, token: &CancellationToken) -> bool {
        match outcome {
            TransferOutcome::Completed { downloaded_bytes } => self.catalog.update(id, |r| {
                if token.is_cancelled() || r.status != DownloadStatus::Downloading {
                    return false;
                }
                r.downloaded_bytes = *downloaded_bytes;
                if r.total_bytes == 0 {
                    r.total_bytes = *downloaded_bytes;
                }
                r.transition(DownloadStatus::Completed)
            }),
            TransferOutcome::Failed { reason } => self.catalog.update(id, |r| {
                if token.is_cancelled() || r.status != DownloadStatus::Downloading {
                    return false;
                }
                r.fail(reason.clone())
            }),
            TransferOutcome::Cancelled => false,
        }
    }

    async fn transfer(
        &self,
        record: &DownloadRecord,
        mode: TransferMode,
        token: &CancellationToken,
    ) -> Result<TransferOutcome> {
        if token.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }

        let existing = match mode {
            TransferMode::Fresh => 0,
            TransferMode::Resume => DownloadDirectory::file_size_or_zero(&record.local_path).await?,
        };

        let mut request = self.client.get(&record.source_url);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={}-", existing));
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TransferOutcome::Cancelled),
            response = request.send() => response.map_err(|e| {
                OfflineError::network_error(format!("Request failed: {}", e), true)
            })?,
        };

        let status = response.status();
        let plan = match status {
            StatusCode::PARTIAL_CONTENT if existing > 0 => BodyPlan {
                content_length: content_range_total(response.headers())
                    .or_else(|| response.content_length().map(|len| existing + len))
                    .unwrap_or(0),
                skip: 0,
                offset: existing,
            },
            StatusCode::RANGE_NOT_SATISFIABLE
                if existing > 0
                    && range_already_satisfied(existing, record.total_bytes, response.headers()) =>
            {
                tracing::debug!(id = %record.id, bytes = existing, "Nothing left to fetch");
                return Ok(TransferOutcome::Completed {
                    downloaded_bytes: existing,
                });
            }
            s if s.is_success() => {
                let content_length = response.content_length().unwrap_or(0);
                if existing > 0 && (content_length == 0 || existing <= content_length) {
                    tracing::debug!(id = %record.id, skip = existing, "Server ignored range, skipping prefix");
                    BodyPlan {
                        content_length,
                        skip: existing,
                        offset: existing,
                    }
                } else {
                    if existing > 0 {
                        tracing::warn!(
                            id = %record.id,
                            local = existing,
                            remote = content_length,
                            "Local file is larger than the resource, restarting"
                        );
                    }
                    BodyPlan {
                        content_length,
                        skip: 0,
                        offset: 0,
                    }
                }
            }
            s => {
                return Err(OfflineError::UnexpectedStatusCode {
                    status_code: s.as_u16(),
                    url: record.source_url.clone(),
                });
            }
        };

        if plan.content_length > 0 {
            let total = plan.content_length;
            self.catalog.update(&record.id, |r| {
                if token.is_cancelled() || r.status != DownloadStatus::Downloading {
                    return false;
                }
                r.total_bytes = total;
                r.downloaded_bytes = plan.offset.min(total);
                true
            });
        }

        let mut file = if plan.offset > 0 {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&record.local_path)
                .await?
        } else {
            File::create(&record.local_path).await?
        };

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = Box::pin(StreamReader::new(stream));
        let mut buf = vec![0u8; self.chunk_size];

        // Discard the prefix we already have
        let mut remaining = plan.skip;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let Some(n) = read_chunk(&mut reader, &mut buf[..want], token).await? else {
                return Ok(TransferOutcome::Cancelled);
            };
            if n == 0 {
                return Err(OfflineError::DownloadTruncated {
                    expected: plan.skip,
                    actual: plan.skip - remaining,
                });
            }
            remaining -= n as u64;
        }

        let mut downloaded = plan.offset;
        let mut session_bytes = 0u64;
        let started = Instant::now();

        loop {
            let Some(n) = read_chunk(&mut reader, &mut buf, token).await? else {
                file.flush().await?;
                return Ok(TransferOutcome::Cancelled);
            };
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n]).await?;
            downloaded += n as u64;
            session_bytes += n as u64;

            if token.is_cancelled() {
                file.flush().await?;
                return Ok(TransferOutcome::Cancelled);
            }

            self.progress.publish(ProgressSnapshot::from_transfer(
                &record.id,
                downloaded,
                plan.content_length,
                session_bytes,
                started.elapsed(),
            ));
            self.catalog.update(&record.id, |r| {
                if r.status != DownloadStatus::Downloading {
                    return false;
                }
                r.downloaded_bytes = downloaded;
                true
            });
        }

        file.flush().await?;
        file.sync_all().await?;

        if plan.content_length > 0 && downloaded < plan.content_length {
            return Err(OfflineError::DownloadTruncated {
                expected: plan.content_length,
                actual: downloaded,
            });
        }

        Ok(TransferOutcome::Completed {
            downloaded_bytes: downloaded,
        })
    }
}

/// Read one chunk, or None if the token fired first
async fn read_chunk<R>(
    reader: &mut R,
    buf: &mut [u8],
    token: &CancellationToken,
) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    if token.is_cancelled() {
        return Ok(None);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Ok(None),
        read = reader.read(buf) => Ok(Some(read?)),
    }
}

/// Total size from `Content-Range: bytes 1000-1999/2000`
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Whether a 416 answer to `bytes={existing}-` means the file is whole
fn range_already_satisfied(existing: u64, recorded_total: u64, headers: &HeaderMap) -> bool {
    match content_range_total(headers) {
        Some(total) => total == existing,
        None => recorded_total == 0 || recorded_total == existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_content_range_total() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 400-999/1000"));
        assert_eq!(content_range_total(&headers), Some(1000));

        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 400-999/*"));
        assert_eq!(content_range_total(&headers), None);

        assert_eq!(content_range_total(&HeaderMap::new()), None);
    }

    #[test]
    fn test_range_already_satisfied() {
        let none = HeaderMap::new();
        assert!(range_already_satisfied(1000, 1000, &none));
        assert!(range_already_satisfied(1000, 0, &none));
        assert!(!range_already_satisfied(400, 1000, &none));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes */1000"));
        assert!(range_already_satisfied(1000, 0, &headers));
        assert!(!range_already_satisfied(400, 0, &headers));
        // the server's length wins over a stale record
        assert!(range_already_satisfied(1000, 2000, &headers));
    }

    #[tokio::test]
    async fn test_read_chunk_respects_cancellation() {
        let token = CancellationToken::new();
        let mut reader: &[u8] = b"hello world";
        let mut buf = [0u8; 4];

        assert_eq!(read_chunk(&mut reader, &mut buf, &token).await.unwrap(), Some(4));
        assert_eq!(&buf, b"hell");

        token.cancel();
        assert_eq!(read_chunk(&mut reader, &mut buf, &token).await.unwrap(), None);
    }
}

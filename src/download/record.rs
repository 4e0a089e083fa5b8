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


//! Download records and the status state machine
//!
//! A `DownloadRecord` is the durable unit of state for one requested file
//! transfer. Records are persisted as a JSON array; the serde attributes here
//! are the wire format, so they must stay tolerant: unknown fields are
//! ignored, missing fields take defaults, and negative size sentinels written
//! by older clients read back as "unknown" (0).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status of a download
///
/// ```text
/// Pending ──► Downloading ──► Completed
///   │             │  ├──────► Failed ──► Downloading (retry)
///   │             │  └──────► Cancelled
///   │             ▼
///   └───────► Paused ──► Downloading (resume)
///                 └────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DownloadStatus {
    #[default]
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and Cancelled accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;

        match (self, next) {
            (Pending, Downloading | Paused | Failed | Cancelled) => true,
            (Downloading, Completed | Failed | Paused | Cancelled) => true,
            (Paused, Downloading | Cancelled) => true,
            (Failed, Downloading | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality selector chosen when the download is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownloadQuality {
    /// Original file, no transcoding
    #[default]
    #[serde(rename = "original")]
    Original,
    /// ~1080p
    #[serde(rename = "high")]
    High,
    /// ~720p
    #[serde(rename = "medium")]
    Medium,
    /// ~480p
    #[serde(rename = "low")]
    Low,
}

impl DownloadQuality {
    /// Target video bitrate for transcoded downloads (None = original file)
    pub fn video_bitrate(&self) -> Option<u32> {
        match self {
            DownloadQuality::Original => None,
            DownloadQuality::High => Some(8_000_000),
            DownloadQuality::Medium => Some(4_000_000),
            DownloadQuality::Low => Some(1_500_000),
        }
    }

    /// Target audio bitrate for transcoded audio downloads
    pub fn audio_bitrate(&self) -> Option<u32> {
        match self {
            DownloadQuality::Original => None,
            DownloadQuality::High => Some(320_000),
            DownloadQuality::Medium => Some(192_000),
            DownloadQuality::Low => Some(128_000),
        }
    }
}

/// Item handed over by the UI layer when a download is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Server-side item id
    pub id: String,

    /// Display name, also used to synthesize the local filename
    pub name: String,

    /// Media type label from the server ("Movie", "Episode", "Audio", ...)
    pub media_type: String,
}

impl MediaItem {
    pub fn new<I, N, T>(id: I, name: N, media_type: T) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            media_type: media_type.into(),
        }
    }

    /// Whether this item is audio-only
    pub fn is_audio(&self) -> bool {
        matches!(
            self.media_type.to_ascii_lowercase().as_str(),
            "audio" | "audiobook" | "musicvideo_audio"
        )
    }
}

/// One entry per requested item download
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadRecord {
    pub id: String,
    pub source_item_id: String,
    pub display_name: String,
    pub media_kind: String,
    pub source_url: String,
    pub local_path: PathBuf,

    /// Expected size in bytes (0 if unknown)
    #[serde(deserialize_with = "lenient_size")]
    pub total_bytes: u64,

    /// Bytes written to `local_path` so far
    #[serde(deserialize_with = "lenient_size")]
    pub downloaded_bytes: u64,

    pub status: DownloadStatus,

    #[serde(deserialize_with = "lenient_quality")]
    pub requested_quality: Option<DownloadQuality>,
    pub started_at: DateTime<Utc>,

    /// Set only when status is Completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Human-readable reason, set only when status is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DownloadRecord {
    /// Create a new `Pending` record with a freshly generated id
    pub fn new(
        item: &MediaItem,
        source_url: String,
        local_path: PathBuf,
        requested_quality: Option<DownloadQuality>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_item_id: item.id.clone(),
            display_name: item.name.clone(),
            media_kind: item.media_type.clone(),
            source_url,
            local_path,
            total_bytes: 0,
            downloaded_bytes: 0,
            status: DownloadStatus::Pending,
            requested_quality,
            started_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }

    /// Whether the total size is known
    pub fn has_known_size(&self) -> bool {
        self.total_bytes > 0
    }

    /// Calculate download percentage (0 when the size is unknown)
    pub fn progress_percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }

    /// Move to `next` if the state machine allows it
    ///
    /// Keeps `completed_at` and `failure_reason` consistent with the status.
    /// Returns false (and leaves the record untouched) for illegal moves.
    pub fn transition(&mut self, next: DownloadStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        self.status = next;
        if next == DownloadStatus::Completed {
            self.completed_at = Some(Utc::now());
        } else {
            self.completed_at = None;
        }
        if next != DownloadStatus::Failed {
            self.failure_reason = None;
        }
        true
    }

    /// Mark as failed with a reason, if the state machine allows it
    pub fn fail<S: Into<String>>(&mut self, reason: S) -> bool {
        if self.transition(DownloadStatus::Failed) {
            self.failure_reason = Some(reason.into());
            true
        } else {
            false
        }
    }
}

/// Accept any JSON integer for a byte count; negatives mean "unknown" (0)
fn lenient_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.map(|v| v.max(0) as u64).unwrap_or(0))
}

/// Unknown quality labels from newer clients read back as `Original`
fn lenient_quality<'de, D>(deserializer: D) -> std::result::Result<Option<DownloadQuality>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|label| {
        serde_json::from_value(serde_json::Value::String(label)).unwrap_or_default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_item() -> MediaItem {
        MediaItem::new("item-1", "The Movie", "Movie")
    }

    fn test_record() -> DownloadRecord {
        DownloadRecord::new(
            &test_item(),
            "http://localhost/Items/item-1/Download".to_string(),
            PathBuf::from("/tmp/The_Movie_1.mp4"),
            None,
        )
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        use DownloadStatus::*;
        for next in [Pending, Downloading, Paused, Completed, Failed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_allowed_transitions() {
        use DownloadStatus::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Downloading));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(Failed.can_transition_to(Downloading));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Downloading.can_transition_to(Pending));
    }

    #[test]
    fn test_completed_at_tracks_status() {
        let mut record = test_record();
        assert!(record.transition(DownloadStatus::Downloading));
        assert!(record.completed_at.is_none());

        assert!(record.transition(DownloadStatus::Completed));
        assert!(record.completed_at.is_some());

        // terminal: nothing changes
        assert!(!record.transition(DownloadStatus::Cancelled));
        assert_eq!(record.status, DownloadStatus::Completed);
    }

    #[test]
    fn test_failure_reason_cleared_on_retry() {
        let mut record = test_record();
        record.transition(DownloadStatus::Downloading);
        assert!(record.fail("HTTP 503"));
        assert_eq!(record.failure_reason.as_deref(), Some("HTTP 503"));

        assert!(record.transition(DownloadStatus::Downloading));
        assert!(record.failure_reason.is_none());
    }

    #[test]
    fn test_wire_format_field_names() {
        let record = test_record();
        let json = serde_json::to_value(&record).unwrap();

        for field in [
            "id",
            "sourceItemId",
            "displayName",
            "mediaKind",
            "sourceUrl",
            "localPath",
            "totalBytes",
            "downloadedBytes",
            "status",
            "requestedQuality",
            "startedAt",
            "completedAt",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_tolerant_deserialization() {
        let json = r#"{
            "id": "abc",
            "sourceItemId": "item-9",
            "status": "paused",
            "totalBytes": -1,
            "downloadedBytes": 512,
            "requestedQuality": "ultra",
            "someFutureField": { "nested": true }
        }"#;

        let record: DownloadRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "abc");
        assert_eq!(record.status, DownloadStatus::Paused);
        assert_eq!(record.total_bytes, 0);
        assert_eq!(record.downloaded_bytes, 512);
        assert_eq!(record.requested_quality, Some(DownloadQuality::Original));
        assert!(record.completed_at.is_none());
        assert_eq!(record.display_name, "");
    }

    #[test]
    fn test_progress_percentage_unknown_size() {
        let mut record = test_record();
        record.downloaded_bytes = 100;
        assert_eq!(record.progress_percentage(), 0.0);

        record.total_bytes = 400;
        assert_eq!(record.progress_percentage(), 25.0);
    }
}

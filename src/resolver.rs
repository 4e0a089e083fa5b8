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


//! Stream URL resolution
//!
//! The download manager does not talk to the media server itself; it asks a
//! [`StreamUrlResolver`] for the URL to fetch. The app supplies one backed by
//! its server session; [`JellyfinStreamResolver`] builds the standard Jellyfin
//! endpoints from a server address and access token.

use crate::download::record::{DownloadQuality, MediaItem};
use crate::error::{OfflineError, Result};
use url::Url;

/// Resolves a streamable source URL for an item
pub trait StreamUrlResolver: Send + Sync {
    /// URL to download `item` at `quality`, or None if the item has no stream
    fn stream_url(&self, item: &MediaItem, quality: Option<DownloadQuality>) -> Option<String>;
}

/// Resolver that never finds a URL; downloads must pass an explicit one
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl StreamUrlResolver for NoResolver {
    fn stream_url(&self, _item: &MediaItem, _quality: Option<DownloadQuality>) -> Option<String> {
        None
    }
}

/// Builds Jellyfin download/stream endpoints
///
/// - original quality: `{server}/Items/{id}/Download?api_key=…`
/// - transcoded video: `{server}/Videos/{id}/stream?container=mp4&videoBitRate=…&api_key=…`
/// - transcoded audio: `{server}/Audio/{id}/stream?container=mp3&audioBitRate=…&api_key=…`
#[derive(Debug, Clone)]
pub struct JellyfinStreamResolver {
    server_url: Url,
    access_token: String,
}

impl JellyfinStreamResolver {
    pub fn new(server_url: &str, access_token: impl Into<String>) -> Result<Self> {
        let server_url = Url::parse(server_url)
            .map_err(|e| OfflineError::InvalidDownloadUrl(format!("{}: {}", server_url, e)))?;

        if server_url.cannot_be_a_base() {
            return Err(OfflineError::InvalidDownloadUrl(server_url.to_string()));
        }

        Ok(Self {
            server_url,
            access_token: access_token.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Option<Url> {
        let mut url = self.server_url.clone();
        {
            let mut path = url.path_segments_mut().ok()?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Some(url)
    }
}

impl StreamUrlResolver for JellyfinStreamResolver {
    fn stream_url(&self, item: &MediaItem, quality: Option<DownloadQuality>) -> Option<String> {
        if item.id.trim().is_empty() {
            return None;
        }

        let quality = quality.unwrap_or_default();
        let bitrate = if item.is_audio() {
            quality.audio_bitrate()
        } else {
            quality.video_bitrate()
        };

        let mut url = match bitrate {
            None => self.endpoint(&["Items", item.id.as_str(), "Download"])?,
            Some(bitrate) if item.is_audio() => {
                let mut url = self.endpoint(&["Audio", item.id.as_str(), "stream"])?;
                url.query_pairs_mut()
                    .append_pair("container", "mp3")
                    .append_pair("audioBitRate", &bitrate.to_string());
                url
            }
            Some(bitrate) => {
                let mut url = self.endpoint(&["Videos", item.id.as_str(), "stream"])?;
                url.query_pairs_mut()
                    .append_pair("container", "mp4")
                    .append_pair("videoBitRate", &bitrate.to_string());
                url
            }
        };

        url.query_pairs_mut().append_pair("api_key", &self.access_token);
        Some(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> JellyfinStreamResolver {
        JellyfinStreamResolver::new("https://media.example.com/jellyfin/", "tok en").unwrap()
    }

    #[test]
    fn test_original_quality_uses_download_endpoint() {
        let item = MediaItem::new("abc123", "Film", "Movie");
        let url = resolver().stream_url(&item, None).unwrap();
        assert_eq!(
            url,
            "https://media.example.com/jellyfin/Items/abc123/Download?api_key=tok+en"
        );
    }

    #[test]
    fn test_transcoded_video() {
        let item = MediaItem::new("abc123", "Film", "Episode");
        let url = resolver()
            .stream_url(&item, Some(DownloadQuality::Medium))
            .unwrap();
        assert_eq!(
            url,
            "https://media.example.com/jellyfin/Videos/abc123/stream?container=mp4&videoBitRate=4000000&api_key=tok+en"
        );
    }

    #[test]
    fn test_transcoded_audio() {
        let item = MediaItem::new("song1", "Song", "Audio");
        let url = resolver().stream_url(&item, Some(DownloadQuality::Low)).unwrap();
        assert!(url.contains("/Audio/song1/stream?container=mp3&audioBitRate=128000"));
    }

    #[test]
    fn test_item_id_is_encoded() {
        let item = MediaItem::new("a/b", "Film", "Movie");
        let url = resolver().stream_url(&item, None).unwrap();
        assert!(url.contains("/Items/a%2Fb/Download"));
    }

    #[test]
    fn test_blank_item_id_has_no_stream() {
        let item = MediaItem::new(" ", "Film", "Movie");
        assert!(resolver().stream_url(&item, None).is_none());
        assert!(NoResolver.stream_url(&item, None).is_none());
    }

    #[test]
    fn test_invalid_server_url() {
        assert!(JellyfinStreamResolver::new("not a url", "t").is_err());
        assert!(JellyfinStreamResolver::new("mailto:someone@example.com", "t").is_err());
    }
}

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


//! Local filename synthesis
//!
//! Downloaded files are named after the item's display name, a millisecond
//! timestamp and a short tag taken from the owning record's id:
//! `The_Matrix_1718031234567_3f2a9c1e.mp4`. Two records started for the same
//! item in the same millisecond still get different files.

use crate::download::record::MediaItem;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Longest sanitized stem kept before the timestamp suffix
const MAX_STEM_LENGTH: usize = 120;

/// Characters of the record id kept in the filename
const RECORD_TAG_LENGTH: usize = 8;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9.\-]").unwrap();
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`
///
/// Falls back to `download` for names that sanitize to nothing useful.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = UNSAFE_CHARS.replace_all(name.trim(), "_");
    let sanitized: String = sanitized.chars().take(MAX_STEM_LENGTH).collect();

    if sanitized.trim_matches(|c| c == '_' || c == '.').is_empty() {
        "download".to_string()
    } else {
        sanitized
    }
}

/// File extension for an item's downloaded container
pub fn container_extension(item: &MediaItem) -> &'static str {
    if item.is_audio() {
        "mp3"
    } else {
        "mp4"
    }
}

/// Filesystem-safe prefix of a record id
fn record_tag(record_id: &str) -> String {
    let tag: String = record_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(RECORD_TAG_LENGTH)
        .collect();

    if tag.is_empty() {
        "0".to_string()
    } else {
        tag
    }
}

/// `<sanitized name>_<timestamp millis>_<record tag>.<ext>`
pub fn local_file_name(item: &MediaItem, timestamp_millis: i64, record_id: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        sanitize_filename(&item.name),
        timestamp_millis,
        record_tag(record_id),
        container_extension(item)
    )
}

/// Absolute destination for the file owned by record `record_id`
pub fn local_file_path(root: &Path, item: &MediaItem, record_id: &str) -> PathBuf {
    root.join(local_file_name(item, Utc::now().timestamp_millis(), record_id))
}

//! "Now playing" description of the current item.
//!
//! Tags are read with lofty each time a status is requested, so edits to
//! the file show up without restarting the stream. Locations that are not
//! readable local files (URLs, missing files) fall back to a name derived
//! from the location itself.

use std::path::Path;

use lofty::{config::ParseOptions, prelude::*, probe::Probe, tag::ItemKey};
use serde::Serialize;
use tracing::debug;

/// Metadata of the item currently on air.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    /// Title, or the file stem with underscores turned into spaces
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disc_count: Option<u32>,
}

impl NowPlaying {
    /// Describes `location`. Returns `None` for an empty location.
    pub fn resolve(location: &str) -> Option<Self> {
        if location.is_empty() {
            return None;
        }
        let mut now = Self {
            name: display_name(location),
            ..Self::default()
        };

        let path = Path::new(location);
        if !path.is_file() {
            return Some(now);
        }

        let tagged_file = match Probe::open(path).and_then(|p| p.options(ParseOptions::new()).read())
        {
            Ok(file) => file,
            Err(err) => {
                debug!(location, error = %err, "no readable tags");
                return Some(now);
            }
        };

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            if let Some(title) = tag.title().filter(|t| !t.trim().is_empty()) {
                now.name = title.to_string();
            }
            now.artist = tag.artist().map(|s| s.to_string());
            now.album = tag.album().map(|s| s.to_string());
            now.album_artist = tag.get_string(&ItemKey::AlbumArtist).map(str::to_string);
            now.composer = tag.get_string(&ItemKey::Composer).map(str::to_string);
            now.year = tag.year();
            now.genre = tag.genre().map(|s| s.to_string());
            now.track_number = tag.track();
            now.track_count = tag.track_total();
            now.disc_number = tag.disk();
            now.disc_count = tag.disk_total();
        }

        Some(now)
    }
}

/// File stem of `location` with `_` replaced by spaces.
pub fn display_name(location: &str) -> String {
    let trimmed = location.trim_end_matches('/');
    let file = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let stem = match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    };
    stem.replace('_', " ")
}

//! Item selection for a radio stream.
//!
//! A [`Station`] is an infinite generator of media locations. The stream
//! calls [`Station::next`] forever; a station with nothing left to offer
//! returns a location that fails to transcode (an empty string works), and
//! the stream's failure threshold takes it from there.
//!
//! [`PlaylistStation`] is the stock implementation: it loops over an
//! explicit list, an M3U file or a directory tree, optionally shuffled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rand::seq::SliceRandom;
use tracing::{debug, warn};

/// File extensions picked up when scanning a directory.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "m4a", "aac", "wav", "aif", "aiff", "wma",
];

/// Playlist or selection policy feeding a stream.
///
/// `next` must not block for long: it runs on the stream's pipeline task.
pub trait Station: Send + Sync {
    /// Location of the next item to play.
    fn next(&self) -> String;

    /// Human-readable label of the station.
    fn description(&self) -> String;

    /// Short name, defaults to the description.
    fn name(&self) -> String {
        self.description()
    }
}

/// Where a [`PlaylistStation`] gets its items from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistSource {
    /// Fixed list of locations
    Items(Vec<String>),
    /// M3U/M3U8 playlist, re-read on every pass
    M3u(PathBuf),
    /// Directory scanned recursively for audio files on every pass
    Directory(PathBuf),
    /// Several sources played one after the other
    Multiple(Vec<PlaylistSource>),
}

impl PlaylistSource {
    /// Guesses the source kind from a path: directory, `.m3u`/`.m3u8`, or single file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.is_dir() {
            PlaylistSource::Directory(path)
        } else if is_m3u(&path) {
            PlaylistSource::M3u(path)
        } else {
            PlaylistSource::Items(vec![path.to_string_lossy().into_owned()])
        }
    }

    /// Combines several paths, each classified as in [`PlaylistSource::from_path`].
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut sources: Vec<Self> = paths.into_iter().map(Self::from_path).collect();
        if sources.len() == 1 {
            sources.remove(0)
        } else {
            PlaylistSource::Multiple(sources)
        }
    }

    /// Current list of locations. Unreadable sources yield an empty list.
    pub fn load(&self) -> Vec<String> {
        match self {
            PlaylistSource::Items(items) => items.clone(),
            PlaylistSource::M3u(path) => match fs::read_to_string(path) {
                Ok(content) => parse_m3u(&content, path.parent()),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read playlist");
                    Vec::new()
                }
            },
            PlaylistSource::Directory(dir) => {
                let mut files = Vec::new();
                scan_directory(dir, &mut files);
                files.sort();
                files
                    .into_iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect()
            }
            PlaylistSource::Multiple(sources) => sources.iter().flat_map(Self::load).collect(),
        }
    }
}

fn is_m3u(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("m3u") || e.eq_ignore_ascii_case("m3u8"))
        .unwrap_or(false)
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

fn scan_directory(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "failed to scan directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, out);
        } else if is_audio(&path) {
            out.push(path);
        }
    }
}

/// Parses M3U content: `#` lines and blanks are skipped, relative entries
/// are resolved against `base`, URLs are kept as they are.
pub fn parse_m3u(content: &str, base: Option<&Path>) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim().trim_start_matches('\u{feff}'))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let entry = Path::new(line);
            match base {
                Some(base) if entry.is_relative() && !line.contains("://") => {
                    base.join(entry).to_string_lossy().into_owned()
                }
                _ => line.to_string(),
            }
        })
        .collect()
}

struct Cursor {
    items: Vec<String>,
    index: usize,
}

/// Loops over a playlist, reloading (and reshuffling) it on every pass.
pub struct PlaylistStation {
    name: String,
    source: PlaylistSource,
    shuffle: bool,
    cursor: Mutex<Cursor>,
}

impl PlaylistStation {
    pub fn new(name: impl Into<String>, source: PlaylistSource, shuffle: bool) -> Self {
        Self {
            name: name.into(),
            source,
            shuffle,
            cursor: Mutex::new(Cursor {
                items: Vec::new(),
                index: 0,
            }),
        }
    }

    /// Station over a fixed list of locations.
    pub fn from_items<I, S>(name: impl Into<String>, items: I, shuffle: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(Into::into).collect();
        Self::new(name, PlaylistSource::Items(items), shuffle)
    }

    pub fn source(&self) -> &PlaylistSource {
        &self.source
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }
}

impl Station for PlaylistStation {
    fn next(&self) -> String {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if cursor.index >= cursor.items.len() {
            cursor.index = 0;
            cursor.items = self.source.load();
            if self.shuffle {
                cursor.items.shuffle(&mut rand::rng());
            }
            debug!(station = %self.name, items = cursor.items.len(), "playlist reloaded");
        }
        match cursor.items.get(cursor.index).cloned() {
            Some(location) => {
                cursor.index += 1;
                location
            }
            None => {
                warn!(station = %self.name, "playlist is empty");
                String::new()
            }
        }
    }

    fn description(&self) -> String {
        if self.shuffle {
            format!("Playlist \"{}\" station, shuffled", self.name)
        } else {
            format!("Playlist \"{}\" station", self.name)
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

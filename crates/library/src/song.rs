use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use metadata::{read_tags, MetadataError, TagInfo};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::{read_json, write_json};

pub const CACHE_FILE: &str = "cache.json";
const AUDIO_EXTENSIONS: &[&str] = &["mp3"];

/// One playable file. Identity is the path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_num: Option<u32>,
    /// Modification time in milliseconds since the epoch.
    pub mtime: u64,
}

impl Song {
    fn from_tags(path: &Path, mtime: u64, info: Option<TagInfo>) -> Self {
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir_name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match info {
            Some(info) => Song {
                path: path.to_path_buf(),
                title: info.title.unwrap_or(file_name),
                artist: info.artist.unwrap_or_default(),
                album: info.album.unwrap_or(dir_name),
                track_num: info.track_no,
                mtime,
            },
            None => Song {
                path: path.to_path_buf(),
                title: file_name,
                artist: String::new(),
                album: dir_name,
                track_num: None,
                mtime,
            },
        }
    }
}

/// The metadata extraction collaborator.
pub trait TagReader {
    fn read(&self, path: &Path) -> Result<Option<TagInfo>, MetadataError>;
}

/// Reads ID3 and friends through lofty.
pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<Option<TagInfo>, MetadataError> {
        read_tags(path)
    }
}

pub fn is_audio_file_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    AUDIO_EXTENSIONS
        .iter()
        .any(|ext| lower.len() > ext.len() + 1 && lower.ends_with(&format!(".{}", ext)))
}

pub fn modified_millis(path: &Path) -> std::io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    Ok(millis.min(u128::from(u64::MAX)) as u64)
}

/// Per-directory metadata cache. Entries for files that disappeared are kept.
pub(crate) struct SongCache {
    path: PathBuf,
    entries: HashMap<PathBuf, Song>,
}

impl SongCache {
    pub(crate) fn load(dir: &Path) -> Self {
        let path = dir.join(CACHE_FILE);
        let entries = match read_json::<Vec<Song>>(&path) {
            Ok(songs) => songs
                .into_iter()
                .map(|song| (song.path.clone(), song))
                .collect(),
            Err(err) => {
                if path.exists() {
                    warn!("Ignoring unreadable cache {:?}: {}", path, err);
                }
                HashMap::new()
            }
        };
        Self { path, entries }
    }

    /// Returns the cached song when the file has not changed, otherwise asks
    /// the reader and remembers the answer.
    pub(crate) fn resolve(&mut self, file: &Path, reader: &dyn TagReader) -> Option<Song> {
        let mtime = match modified_millis(file) {
            Ok(mtime) => mtime,
            Err(err) => {
                warn!("Skipping {:?}: {}", file, err);
                return None;
            }
        };

        if let Some(cached) = self.entries.get(file) {
            if cached.mtime == mtime {
                return Some(cached.clone());
            }
        }

        match reader.read(file) {
            Ok(info) => {
                let song = Song::from_tags(file, mtime, info);
                self.entries.insert(file.to_path_buf(), song.clone());
                Some(song)
            }
            Err(err) => {
                warn!("Skipping {:?}: {}", file, err);
                None
            }
        }
    }

    pub(crate) fn save(&self) {
        let mut songs: Vec<&Song> = self.entries.values().collect();
        songs.sort_by(|a, b| a.path.cmp(&b.path));
        if let Err(err) = write_json(&self.path, &songs) {
            warn!("Failed to write cache {:?}: {}", self.path, err);
        } else {
            debug!("Wrote {} cache entries to {:?}", songs.len(), self.path);
        }
    }
}

/// Track order when every song has a track number, path order otherwise.
pub(crate) fn sort_songs(songs: &mut [Song]) {
    if songs.iter().all(|song| song.track_num.is_some()) {
        songs.sort_by(|a, b| a.track_num.cmp(&b.track_num).then_with(|| a.path.cmp(&b.path)));
    } else {
        songs.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

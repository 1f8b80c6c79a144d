use std::fs;
use std::path::{Path, PathBuf};

use common::{stable_id, Tag};
use tracing::{debug, info, warn};

use crate::song::{is_audio_file_name, sort_songs, Song, SongCache, TagReader};
use crate::state::{read_json, write_json, AlbumState, ALBUM_INDICATOR_FILE, ALBUM_STATE_FILE};
use crate::{dir_name, list_dir, LibraryError};

/// A directory of songs with a cursor and a saved playback position.
#[derive(Clone, Debug)]
pub struct Album {
    id: String,
    path: PathBuf,
    name: String,
    tag: Option<Tag>,
    songs: Vec<Song>,
    cursor: Option<usize>,
    position_ms: u64,
    marked_current: bool,
}

impl Album {
    pub fn scan(path: &Path, reader: &dyn TagReader) -> Result<Self, LibraryError> {
        let name = dir_name(path);
        let tag = Tag::from_dir_name(&name);
        if tag.is_none() {
            debug!("No tag for album path {:?}", path);
        }

        let mut marked_current = false;
        let mut files = Vec::new();
        for entry in list_dir(path)? {
            let entry_name = entry.file_name().to_string_lossy().to_string();
            if entry_name == ALBUM_INDICATOR_FILE {
                marked_current = true;
                continue;
            }
            if !is_audio_file_name(&entry_name) {
                continue;
            }
            if entry.file_type().is_dir() {
                return Err(LibraryError::AudioDirectory(entry.path().to_path_buf()));
            }
            files.push(entry.path().to_path_buf());
        }

        let mut songs = Vec::with_capacity(files.len());
        if !files.is_empty() {
            let mut cache = SongCache::load(path);
            for file in &files {
                if let Some(song) = cache.resolve(file, reader) {
                    songs.push(song);
                }
            }
            cache.save();
        }
        sort_songs(&mut songs);

        if songs.is_empty() {
            info!("Empty album: {:?}", path);
        }

        let mut album = Self {
            id: stable_id(&path.to_string_lossy()),
            path: path.to_path_buf(),
            name,
            tag,
            songs,
            cursor: None,
            position_ms: 0,
            marked_current,
        };
        album.restart();
        Ok(album)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Album title from the first song's tags, falling back to the directory name.
    pub fn title(&self) -> &str {
        self.songs
            .first()
            .map(|song| song.album.as_str())
            .filter(|title| !title.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn artist(&self) -> &str {
        self.songs
            .first()
            .map(|song| song.artist.as_str())
            .unwrap_or("")
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn is_marked_current(&self) -> bool {
        self.marked_current
    }

    pub fn restart(&mut self) {
        self.cursor = if self.songs.is_empty() { None } else { Some(0) };
        self.position_ms = 0;
    }

    pub fn current_song(&mut self) -> Option<&Song> {
        if self.cursor.is_none() {
            self.restart();
        }
        self.songs.get(self.cursor?)
    }

    /// Moves to the next song. Without `wrap` the cursor parks on the last
    /// song and `None` is returned once the end is reached.
    pub fn next_song(&mut self, wrap: bool) -> Option<Song> {
        let idx = self.cursor?;
        let next = if idx + 1 < self.songs.len() {
            idx + 1
        } else if wrap {
            0
        } else {
            return None;
        };
        self.cursor = Some(next);
        self.position_ms = 0;
        self.songs.get(next).cloned()
    }

    pub fn prev_song(&mut self, wrap: bool) -> Option<Song> {
        let idx = self.cursor?;
        let prev = if idx > 0 {
            idx - 1
        } else if wrap {
            self.songs.len() - 1
        } else {
            return None;
        };
        self.cursor = Some(prev);
        self.position_ms = 0;
        self.songs.get(prev).cloned()
    }

    /// Jumps to `index`; out of range leaves the cursor untouched.
    pub fn select(&mut self, index: usize) -> Option<Song> {
        let song = self.songs.get(index)?.clone();
        self.cursor = Some(index);
        self.position_ms = 0;
        Some(song)
    }

    pub fn save_state(&mut self, position_ms: u64) -> Result<(), LibraryError> {
        self.position_ms = position_ms;
        let Some(idx) = self.cursor else {
            return Ok(());
        };
        let state = AlbumState {
            idx,
            position: position_ms,
        };
        write_json(&self.path.join(ALBUM_STATE_FILE), &state)
    }

    /// Restores the saved cursor; anything unusable means a restart.
    pub fn load_state(&mut self) {
        let path = self.path.join(ALBUM_STATE_FILE);
        match read_json::<AlbumState>(&path) {
            Ok(state) if state.idx < self.songs.len() => {
                self.cursor = Some(state.idx);
                self.position_ms = state.position;
            }
            Ok(state) => {
                warn!(
                    "Saved song index {} out of range for {:?}; restarting",
                    state.idx, self.path
                );
                self.restart();
            }
            Err(err) => {
                debug!("No usable state for {:?} ({}); restarting", self.path, err);
                self.restart();
            }
        }
    }

    pub fn mark_current(&mut self, current: bool) -> Result<(), LibraryError> {
        if self.marked_current == current {
            return Ok(());
        }
        let marker = self.path.join(ALBUM_INDICATOR_FILE);
        if current {
            fs::write(&marker, b"")?;
        } else if marker.exists() {
            fs::remove_file(&marker)?;
        }
        self.marked_current = current;
        Ok(())
    }
}

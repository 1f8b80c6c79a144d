use std::path::{Path, PathBuf};

use common::{stable_id, strip_tag, Tag};
use tracing::{debug, warn};

use crate::album::Album;
use crate::song::{is_audio_file_name, Song, TagReader};
use crate::state::{read_json, write_json, PlaylistState, PLAYLIST_STATE_FILE};
use crate::{dir_name, list_dir, LibraryError};

/// Either one album directory or a directory of album directories, navigated
/// as one continuous sequence of songs.
#[derive(Clone, Debug)]
pub struct Playlist {
    id: String,
    path: PathBuf,
    tag: Option<Tag>,
    name: String,
    albums: Vec<Album>,
    cursor: Option<usize>,
    repeat: bool,
}

impl Playlist {
    pub fn scan(path: &Path, reader: &dyn TagReader) -> Result<Self, LibraryError> {
        let dir = dir_name(path);
        let entries = list_dir(path)?;

        let holds_audio = entries.iter().any(|entry| {
            !entry.file_type().is_dir()
                && is_audio_file_name(&entry.file_name().to_string_lossy())
        });

        let mut albums = Vec::new();
        if holds_audio {
            albums.push(Album::scan(path, reader)?);
        } else {
            for entry in &entries {
                if !entry.file_type().is_dir() {
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                albums.push(Album::scan(entry.path(), reader)?);
            }
            albums.sort_by_key(|album| album.name().to_lowercase());
        }

        if albums.iter().all(Album::is_empty) {
            warn!("Playlist {:?} has no playable songs", path);
        }

        let mut playlist = Self {
            id: stable_id(&path.to_string_lossy()),
            path: path.to_path_buf(),
            tag: Tag::from_dir_name(&dir),
            name: strip_tag(&dir).to_string(),
            albums,
            cursor: None,
            repeat: false,
        };
        playlist.restart();
        Ok(playlist)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn albums(&self) -> &[Album] {
        &self.albums
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn current_album(&self) -> Option<&Album> {
        self.albums.get(self.cursor?)
    }

    fn current_album_mut(&mut self) -> Option<&mut Album> {
        self.albums.get_mut(self.cursor?)
    }

    /// The marked album if there is one, else the first album with songs.
    fn start_index(&self) -> Option<usize> {
        if self.albums.is_empty() {
            return None;
        }
        self.albums
            .iter()
            .position(Album::is_marked_current)
            .or_else(|| self.albums.iter().position(|album| !album.is_empty()))
            .or(Some(0))
    }

    pub fn restart(&mut self) {
        self.cursor = self.start_index();
        if let Some(album) = self.current_album_mut() {
            album.restart();
        }
    }

    pub fn current_song(&mut self) -> Option<Song> {
        self.current_album_mut()?.current_song().cloned()
    }

    /// Moves to the following album and restarts it. The end wraps only
    /// with `wrap` or repeat enabled.
    pub fn next_album(&mut self, wrap: bool) -> Option<&Album> {
        let idx = self.cursor?;
        let next = if idx + 1 < self.albums.len() {
            idx + 1
        } else if wrap || self.repeat {
            0
        } else {
            return None;
        };
        self.cursor = Some(next);
        self.albums[next].restart();
        Some(&self.albums[next])
    }

    pub fn prev_album(&mut self, wrap: bool) -> Option<&Album> {
        let idx = self.cursor?;
        let prev = if idx > 0 {
            idx - 1
        } else if wrap || self.repeat {
            self.albums.len() - 1
        } else {
            return None;
        };
        self.cursor = Some(prev);
        self.albums[prev].restart();
        Some(&self.albums[prev])
    }

    pub fn next_song(&mut self, wrap: bool) -> Option<Song> {
        if let Some(song) = self.current_album_mut()?.next_song(false) {
            return Some(song);
        }
        // Bounded by the album count so a run of empty albums cannot spin.
        for _ in 0..self.albums.len() {
            self.next_album(wrap)?;
            if let Some(song) = self.current_song() {
                return Some(song);
            }
        }
        None
    }

    pub fn prev_song(&mut self, wrap: bool) -> Option<Song> {
        if let Some(song) = self.current_album_mut()?.prev_song(false) {
            return Some(song);
        }
        for _ in 0..self.albums.len() {
            self.prev_album(wrap)?;
            if let Some(song) = self.current_song() {
                return Some(song);
            }
        }
        None
    }

    /// Positions both cursors; `None` when either index is out of range.
    pub fn select(&mut self, album_index: usize, track_index: usize) -> Option<Song> {
        let song = self.albums.get_mut(album_index)?.select(track_index)?;
        self.cursor = Some(album_index);
        Some(song)
    }

    pub fn count_songs(&self) -> usize {
        self.albums.iter().map(|album| album.songs().len()).sum()
    }

    /// Index of the current song in the flattened song list.
    pub fn current_song_index(&self) -> Option<usize> {
        let idx = self.cursor?;
        let before: usize = self.albums[..idx]
            .iter()
            .map(|album| album.songs().len())
            .sum();
        Some(before + self.albums[idx].cursor()?)
    }

    pub fn save_state(&mut self, position_ms: u64) -> Result<(), LibraryError> {
        let Some(idx) = self.cursor else {
            return Ok(());
        };
        let state = PlaylistState {
            idx,
            repeat: self.repeat,
        };
        write_json(&self.path.join(PLAYLIST_STATE_FILE), &state)?;

        if self.albums.len() > 1 {
            for (i, album) in self.albums.iter_mut().enumerate() {
                album.mark_current(i == idx)?;
            }
        }

        self.albums[idx].save_state(position_ms)
    }

    pub fn load_state(&mut self) {
        let path = self.path.join(PLAYLIST_STATE_FILE);
        match read_json::<PlaylistState>(&path) {
            Ok(state) if state.idx < self.albums.len() => {
                self.cursor = Some(state.idx);
                self.repeat = state.repeat;
            }
            Ok(state) => {
                warn!(
                    "Saved album index {} out of range for {:?}; restarting",
                    state.idx, self.path
                );
                self.repeat = false;
                self.cursor = self.start_index();
            }
            Err(err) => {
                debug!("No usable state for {:?} ({}); restarting", self.path, err);
                self.repeat = false;
                self.cursor = self.start_index();
            }
        }

        if let Some(album) = self.current_album_mut() {
            album.load_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::Playlist;
    use crate::testing::{write_album, write_song, FakeReader};

    fn multi_album(root: &Path, sizes: &[u32]) -> Playlist {
        let dir = root.join("Stories 0123456789AB");
        fs::create_dir(&dir).unwrap();
        for (i, size) in sizes.iter().enumerate() {
            write_album(&dir.join(format!("Album {}", i + 1)), *size);
        }
        Playlist::scan(&dir, &FakeReader::default()).unwrap()
    }

    #[test]
    fn single_album_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Band 0123456789AB");
        write_album(&dir, 3);
        let playlist = Playlist::scan(&dir, &FakeReader::default()).unwrap();
        assert_eq!(playlist.name(), "Band");
        assert_eq!(playlist.tag().unwrap().as_str(), "0123456789AB");
        assert_eq!(playlist.albums().len(), 1);
        assert_eq!(playlist.count_songs(), 3);
    }

    #[test]
    fn albums_sorted_case_insensitively() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Mixed");
        write_album(&dir.join("beta"), 1);
        write_album(&dir.join("Alpha"), 1);
        write_album(&dir.join("Gamma"), 1);
        let playlist = Playlist::scan(&dir, &FakeReader::default()).unwrap();
        let names: Vec<_> = playlist.albums().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "Gamma"]);
        assert!(playlist.tag().is_none());
    }

    #[test]
    fn next_song_crosses_album_boundaries() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[2, 0, 2]);
        assert_eq!(playlist.current_song_index(), Some(0));
        assert!(playlist.next_song(false).is_some());
        let song = playlist.next_song(false).unwrap();
        assert_eq!(playlist.cursor(), Some(2));
        assert_eq!(song.title, "Song 1");
        assert_eq!(playlist.current_song_index(), Some(2));
        assert!(playlist.next_song(false).is_some());
        assert!(playlist.next_song(false).is_none());
        assert_eq!(playlist.cursor(), Some(2));

        let wrapped = playlist.next_song(true).unwrap();
        assert_eq!(playlist.cursor(), Some(0));
        assert_eq!(wrapped.title, "Song 1");
    }

    #[test]
    fn repeat_wraps_without_explicit_request() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[1, 1]);
        playlist.set_repeat(true);
        assert!(playlist.next_song(false).is_some());
        assert_eq!(playlist.cursor(), Some(1));
        assert!(playlist.next_song(false).is_some());
        assert_eq!(playlist.cursor(), Some(0));
    }

    #[test]
    fn prev_song_restarts_previous_album() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[3, 2]);
        assert!(playlist.next_album(false).is_some());
        let song = playlist.prev_song(false).unwrap();
        assert_eq!(playlist.cursor(), Some(0));
        assert_eq!(song.title, "Song 1");
        assert!(playlist.prev_song(false).is_none());
        assert!(playlist.prev_song(true).is_some());
        assert_eq!(playlist.cursor(), Some(1));
    }

    #[test]
    fn all_empty_albums_terminate() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[0, 0, 0]);
        assert!(playlist.next_song(true).is_none());
        assert!(playlist.prev_song(true).is_none());
    }

    #[test]
    fn album_navigation_stops_at_ends() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[1, 1]);
        assert!(playlist.prev_album(false).is_none());
        assert!(playlist.next_album(false).is_some());
        assert!(playlist.next_album(false).is_none());
        assert_eq!(playlist.cursor(), Some(1));
        assert_eq!(playlist.next_album(true).unwrap().name(), "Album 1");
    }

    #[test]
    fn state_cascades_into_album_and_marks_current() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[2, 3]);
        playlist.next_album(false);
        playlist.next_song(false);
        playlist.set_repeat(true);
        playlist.save_state(9_000).unwrap();

        let path = playlist.path().to_path_buf();
        assert!(path.join("Album 2").join(".albumindicator").exists());
        assert!(!path.join("Album 1").join(".albumindicator").exists());

        let mut reloaded = Playlist::scan(&path, &FakeReader::default()).unwrap();
        assert_eq!(reloaded.cursor(), Some(1));
        reloaded.load_state();
        assert!(reloaded.repeat());
        let album = reloaded.current_album().unwrap();
        assert_eq!(album.cursor(), Some(1));
        assert_eq!(album.position_ms(), 9_000);
    }

    #[test]
    fn missing_state_restarts() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[1, 1]);
        playlist.next_album(false);
        playlist.load_state();
        assert_eq!(playlist.cursor(), Some(0));
        assert!(!playlist.repeat());
    }

    #[test]
    fn select_positions_both_cursors() {
        let root = tempfile::tempdir().unwrap();
        let mut playlist = multi_album(root.path(), &[2, 3]);
        let song = playlist.select(1, 2).unwrap();
        assert_eq!(song.title, "Song 3");
        assert_eq!(playlist.current_song_index(), Some(4));
        assert!(playlist.select(1, 3).is_none());
        assert!(playlist.select(5, 0).is_none());
        assert_eq!(playlist.current_song_index(), Some(4));
    }

    #[test]
    fn loose_files_make_a_single_album() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("Loose");
        fs::create_dir(&dir).unwrap();
        fs::create_dir(dir.join("extras")).unwrap();
        write_song(&dir, "a.mp3", "A", Some(1));
        let playlist = Playlist::scan(&dir, &FakeReader::default()).unwrap();
        assert_eq!(playlist.albums().len(), 1);
        assert_eq!(playlist.albums()[0].path(), dir.as_path());
    }
}

mod album;
mod playlist;
mod song;
mod state;
mod summary;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{strip_tag, Tag};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

pub use album::Album;
pub use metadata::{MetadataError, TagInfo};
pub use playlist::Playlist;
pub use song::{is_audio_file_name, LoftyReader, Song, TagReader, CACHE_FILE};
pub use state::{
    is_state_file_name, ALBUM_INDICATOR_FILE, ALBUM_STATE_FILE, PLAYLIST_STATE_FILE,
};
pub use summary::{AlbumSummary, PlaylistSummary};

pub const SYSTEM_DIR: &str = "system";

/// The audio root: every top-level directory except `system` is a playlist.
pub struct Library {
    root: PathBuf,
    reader: Arc<dyn TagReader + Send + Sync>,
    playlists: HashMap<String, Playlist>,
    by_tag: HashMap<Tag, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub playlists: usize,
    pub albums: usize,
    pub songs: usize,
}

impl Library {
    pub fn load(
        root: PathBuf,
        reader: Arc<dyn TagReader + Send + Sync>,
    ) -> Result<Self, LibraryError> {
        let (playlists, by_tag) = build_index(&root, reader.as_ref())?;
        let library = Self {
            root,
            reader,
            playlists,
            by_tag,
        };
        let stats = library.stats();
        info!(
            "Library loaded from {:?}: {} playlists ({} tagged), {} albums, {} songs",
            library.root,
            stats.playlists,
            library.by_tag.len(),
            stats.albums,
            stats.songs
        );
        Ok(library)
    }

    /// Rebuilds everything from disk. The current catalog stays in place if
    /// the new one cannot be built.
    pub fn rescan(&mut self) -> Result<LibraryStats, LibraryError> {
        let (playlists, by_tag) = build_index(&self.root, self.reader.as_ref())?;
        self.playlists = playlists;
        self.by_tag = by_tag;
        Ok(self.stats())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn system_dir(&self) -> PathBuf {
        self.root.join(SYSTEM_DIR)
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            playlists: self.playlists.len(),
            albums: self.playlists.values().map(|p| p.albums().len()).sum(),
            songs: self.playlists.values().map(Playlist::count_songs).sum(),
        }
    }

    pub fn lookup(&self, tag: &Tag) -> Option<&Playlist> {
        let id = self.by_tag.get(tag)?;
        self.playlists.get(id)
    }

    pub fn lookup_mut(&mut self, tag: &Tag) -> Option<&mut Playlist> {
        let id = self.by_tag.get(tag)?;
        self.playlists.get_mut(id)
    }

    pub fn lookup_by_id(&self, id: &str) -> Option<&Playlist> {
        self.playlists.get(id)
    }

    pub fn lookup_by_id_mut(&mut self, id: &str) -> Option<&mut Playlist> {
        self.playlists.get_mut(id)
    }

    /// All playlists ordered by name.
    pub fn playlists(&self) -> Vec<&Playlist> {
        let mut items: Vec<&Playlist> = self.playlists.values().collect();
        items.sort_by(|a, b| {
            a.name()
                .to_lowercase()
                .cmp(&b.name().to_lowercase())
                .then_with(|| a.path().cmp(b.path()))
        });
        items
    }

    /// Re-reads the persisted cursors of every playlist.
    pub fn refresh_states(&mut self) {
        for playlist in self.playlists.values_mut() {
            playlist.load_state();
        }
    }

    pub fn summaries(&self) -> Vec<PlaylistSummary> {
        self.playlists()
            .into_iter()
            .map(PlaylistSummary::from)
            .collect()
    }

    /// Looks a playlist up by tag first, then by id.
    pub fn summary(&self, tag_or_id: &str) -> Option<PlaylistSummary> {
        Tag::normalize(tag_or_id)
            .and_then(|tag| self.lookup(&tag))
            .or_else(|| self.lookup_by_id(tag_or_id))
            .map(PlaylistSummary::from)
    }

    /// Gives a playlist a new tag by renaming its directory so the name ends
    /// in that tag. Returns the playlist's new id.
    pub fn assign_tag(&mut self, id: &str, tag: &Tag) -> Result<String, LibraryError> {
        let playlist = self
            .playlists
            .get(id)
            .ok_or_else(|| LibraryError::UnknownPlaylist(id.to_string()))?;

        if let Some(owner) = self.by_tag.get(tag) {
            if owner == id {
                return Ok(id.to_string());
            }
            let first = self
                .playlists
                .get(owner)
                .map(|p| p.path().to_path_buf())
                .unwrap_or_default();
            return Err(LibraryError::DuplicateTag {
                tag: tag.clone(),
                first,
                second: playlist.path().to_path_buf(),
            });
        }

        let old_path = playlist.path().to_path_buf();
        let base = strip_tag(&dir_name(&old_path)).to_string();
        let new_name = if base.is_empty() {
            tag.to_string()
        } else {
            format!("{} {}", base, tag)
        };
        let new_path = old_path.with_file_name(new_name);
        if new_path.exists() {
            return Err(LibraryError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", new_path.display()),
            )));
        }

        fs::rename(&old_path, &new_path)?;
        info!("Renamed {:?} to {:?}", old_path, new_path);

        if let Some(old) = self.playlists.remove(id) {
            if let Some(old_tag) = old.tag() {
                self.by_tag.remove(old_tag);
            }
        }

        let playlist = Playlist::scan(&new_path, self.reader.as_ref())?;
        let new_id = playlist.id().to_string();
        self.by_tag.insert(tag.clone(), new_id.clone());
        self.playlists.insert(new_id.clone(), playlist);
        Ok(new_id)
    }
}

type Index = (HashMap<String, Playlist>, HashMap<Tag, String>);

fn build_index(root: &Path, reader: &dyn TagReader) -> Result<Index, LibraryError> {
    if !root.is_dir() {
        return Err(LibraryError::NotADirectory(root.to_path_buf()));
    }
    let system = root.join(SYSTEM_DIR);
    if !system.is_dir() {
        return Err(LibraryError::MissingSystemDir(system));
    }
    debug!("{:?} exists", system);

    let mut playlists: HashMap<String, Playlist> = HashMap::new();
    let mut by_tag: HashMap<Tag, String> = HashMap::new();

    for entry in list_dir(root)? {
        let path = entry.path();
        if !entry.file_type().is_dir() {
            return Err(LibraryError::NotADirectory(path.to_path_buf()));
        }
        if entry.file_name() == SYSTEM_DIR {
            continue;
        }

        let playlist = Playlist::scan(path, reader)?;
        if let Some(tag) = playlist.tag() {
            if let Some(first) = by_tag.get(tag).and_then(|id| playlists.get(id)) {
                return Err(LibraryError::DuplicateTag {
                    tag: tag.clone(),
                    first: first.path().to_path_buf(),
                    second: path.to_path_buf(),
                });
            }
            by_tag.insert(tag.clone(), playlist.id().to_string());
        } else {
            debug!("Untagged playlist {:?}", path);
        }
        playlists.insert(playlist.id().to_string(), playlist);
    }

    if by_tag.is_empty() && !playlists.is_empty() {
        warn!("No playlist in {:?} carries a tag", root);
    }

    Ok((playlists, by_tag))
}

/// Immediate children of `dir`, sorted by name.
pub(crate) fn list_dir(dir: &Path) -> Result<Vec<DirEntry>, LibraryError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        entries.push(entry.map_err(std::io::Error::from)?);
    }
    Ok(entries)
}

pub(crate) fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    NotADirectory(PathBuf),
    MissingSystemDir(PathBuf),
    AudioDirectory(PathBuf),
    DuplicateTag {
        tag: Tag,
        first: PathBuf,
        second: PathBuf,
    },
    UnknownPlaylist(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::NotADirectory(path) => {
                write!(f, "not a directory: {}", path.display())
            }
            LibraryError::MissingSystemDir(path) => {
                write!(f, "missing directory: {}", path.display())
            }
            LibraryError::AudioDirectory(path) => {
                write!(f, "directory named like an audio file: {}", path.display())
            }
            LibraryError::DuplicateTag { tag, first, second } => write!(
                f,
                "tag {} found twice: {}, {}",
                tag,
                first.display(),
                second.display()
            ),
            LibraryError::UnknownPlaylist(id) => write!(f, "unknown playlist: {}", id),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

/// Fixtures shared by the catalog tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{MetadataError, TagInfo, TagReader};

    /// Reads `title|artist|album|track` from the file body. An empty body is
    /// an untagged file, anything else unparseable is a broken one.
    #[derive(Default)]
    pub struct FakeReader {
        calls: AtomicUsize,
    }

    impl FakeReader {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TagReader for FakeReader {
        fn read(&self, path: &Path) -> Result<Option<TagInfo>, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = fs::read_to_string(path)?;
            if body.is_empty() {
                return Ok(None);
            }
            let parts: Vec<&str> = body.split('|').collect();
            if parts.len() != 4 {
                return Err(MetadataError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "not an mp3",
                )));
            }
            Ok(Some(TagInfo {
                title: Some(parts[0].to_string()),
                artist: Some(parts[1].to_string()),
                album: Some(parts[2].to_string()),
                track_no: parts[3].trim().parse().ok(),
            }))
        }
    }

    pub fn write_song(dir: &Path, file: &str, title: &str, track: Option<u32>) {
        let track = track.map(|n| n.to_string()).unwrap_or_default();
        fs::write(dir.join(file), format!("{}|Artist|Album|{}", title, track)).unwrap();
    }

    /// Album directory with songs `01.mp3..` titled `Song 1..` and numbered.
    pub fn write_album(dir: &Path, songs: u32) {
        fs::create_dir_all(dir).unwrap();
        for n in 1..=songs {
            write_song(dir, &format!("{:02}.mp3", n), &format!("Song {}", n), Some(n));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use common::Tag;

    use super::testing::{write_album, write_song, FakeReader};
    use super::{Library, LibraryError};

    fn root_with_system() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("system")).unwrap();
        root
    }

    #[test]
    fn loads_tagged_playlist() {
        let root = root_with_system();
        let dir = root.path().join("Band 0123456789AB");
        fs::create_dir(&dir).unwrap();
        write_song(&dir, "c.mp3", "Third", Some(3));
        write_song(&dir, "a.mp3", "Second", Some(2));
        write_song(&dir, "b.mp3", "First", Some(1));

        let library =
            Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default())).unwrap();
        assert_eq!(library.stats().playlists, 1);

        let tag = Tag::parse("0123456789AB").unwrap();
        let playlist = library.lookup(&tag).unwrap();
        assert_eq!(playlist.albums().len(), 1);
        let titles: Vec<_> = playlist.albums()[0]
            .songs()
            .iter()
            .map(|s| s.title.as_str())
            .collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
        assert!(library.lookup_by_id(playlist.id()).is_some());
        assert!(library.lookup(&Tag::parse("FFFFFFFFFFFF").unwrap()).is_none());
    }

    #[test]
    fn duplicate_tags_fail_the_load() {
        let root = root_with_system();
        write_album(&root.path().join("One 0123456789AB"), 1);
        write_album(&root.path().join("Two 0123456789AB"), 1);
        let err = Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default()))
            .err()
            .unwrap();
        assert!(matches!(err, LibraryError::DuplicateTag { .. }));
    }

    #[test]
    fn requires_system_directory() {
        let root = tempfile::tempdir().unwrap();
        let err = Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default()))
            .err()
            .unwrap();
        assert!(matches!(err, LibraryError::MissingSystemDir(_)));
    }

    #[test]
    fn stray_file_at_top_level_is_fatal() {
        let root = root_with_system();
        fs::write(root.path().join("readme.txt"), "hi").unwrap();
        let err = Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default()))
            .err()
            .unwrap();
        assert!(matches!(err, LibraryError::NotADirectory(_)));
    }

    #[test]
    fn rescan_failure_keeps_previous_catalog() {
        let root = root_with_system();
        write_album(&root.path().join("One 0123456789AB"), 2);
        let mut library =
            Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default())).unwrap();
        write_album(&root.path().join("Two 0123456789AB"), 1);
        assert!(library.rescan().is_err());
        assert_eq!(library.stats().playlists, 1);
        assert_eq!(library.stats().songs, 2);
    }

    #[test]
    fn assign_tag_renames_directory() {
        let root = root_with_system();
        write_album(&root.path().join("Stories"), 2);
        write_album(&root.path().join("Band 0123456789AB"), 1);
        let mut library =
            Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default())).unwrap();

        let id = library.summary("Stories").map(|s| s.id);
        assert!(id.is_none());
        let stories = library
            .playlists()
            .into_iter()
            .find(|p| p.name() == "Stories")
            .map(|p| p.id().to_string())
            .unwrap();

        let taken = Tag::parse("0123456789AB").unwrap();
        assert!(matches!(
            library.assign_tag(&stories, &taken),
            Err(LibraryError::DuplicateTag { .. })
        ));

        let tag = Tag::parse("AABBCCDDEEFF").unwrap();
        let new_id = library.assign_tag(&stories, &tag).unwrap();
        assert!(root.path().join("Stories AABBCCDDEEFF").is_dir());
        assert!(!root.path().join("Stories").exists());
        let summary = library.summary("aabbccddeeff").unwrap();
        assert_eq!(summary.id, new_id);
        assert_eq!(summary.name, "Stories");
        assert_eq!(library.stats().playlists, 2);
    }

    #[test]
    fn summaries_report_cursors() {
        let root = root_with_system();
        let dir = root.path().join("Stories 0123456789AB");
        write_album(&dir.join("Part 1"), 2);
        write_album(&dir.join("Part 2"), 2);
        let mut library =
            Library::load(root.path().to_path_buf(), Arc::new(FakeReader::default())).unwrap();

        let tag = Tag::parse("0123456789AB").unwrap();
        {
            let playlist = library.lookup_mut(&tag).unwrap();
            playlist.next_album(false);
            playlist.next_song(false);
            playlist.save_state(500).unwrap();
            playlist.restart();
        }
        library.refresh_states();

        let summary = library.summary("0123456789AB").unwrap();
        assert_eq!(summary.current_album_index, Some(1));
        assert_eq!(summary.albums.len(), 2);
        assert_eq!(summary.albums[1].current_song_index, Some(1));
        assert_eq!(summary.albums[1].songs.len(), 2);

        let text = serde_json::to_string(&library.summaries()).unwrap();
        assert!(text.contains("\"current_album_index\":1"));
    }
}

use std::path::PathBuf;

use common::Tag;
use serde::Serialize;

use crate::{Album, Playlist, Song};

/// Read-only view of a playlist for the admin interface.
#[derive(Clone, Debug, Serialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub tag: Option<Tag>,
    pub name: String,
    pub repeat: bool,
    pub current_album_index: Option<usize>,
    pub albums: Vec<AlbumSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AlbumSummary {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub current_song_index: Option<usize>,
    pub songs: Vec<Song>,
}

impl From<&Playlist> for PlaylistSummary {
    fn from(playlist: &Playlist) -> Self {
        Self {
            id: playlist.id().to_string(),
            tag: playlist.tag().cloned(),
            name: playlist.name().to_string(),
            repeat: playlist.repeat(),
            current_album_index: playlist.cursor(),
            albums: playlist.albums().iter().map(AlbumSummary::from).collect(),
        }
    }
}

impl From<&Album> for AlbumSummary {
    fn from(album: &Album) -> Self {
        Self {
            id: album.id().to_string(),
            name: album.name().to_string(),
            path: album.path().to_path_buf(),
            current_song_index: album.cursor(),
            songs: album.songs().to_vec(),
        }
    }
}

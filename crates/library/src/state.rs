use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::LibraryError;

pub const ALBUM_STATE_FILE: &str = "album.json";
pub const PLAYLIST_STATE_FILE: &str = "playlist.json";
pub const ALBUM_INDICATOR_FILE: &str = ".albumindicator";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AlbumState {
    pub idx: usize,
    pub position: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PlaylistState {
    pub idx: usize,
    pub repeat: bool,
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LibraryError> {
    let contents = fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Writes through a sibling temp file so readers never see half a document.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), LibraryError> {
    let bytes = serde_json::to_vec(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// True for files the catalog itself writes; the watcher ignores them.
pub fn is_state_file_name(name: &str) -> bool {
    name == ALBUM_STATE_FILE
        || name == PLAYLIST_STATE_FILE
        || name == crate::song::CACHE_FILE
        || name == ALBUM_INDICATOR_FILE
        || name.ends_with(".json.tmp")
}

use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_no: Option<u32>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads the primary tag of an audio file.
///
/// Fails when the file is not a readable audio file. A readable file without
/// any tag yields `Ok(None)`.
pub fn read_tags(path: &Path) -> Result<Option<TagInfo>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;

    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(None),
    };

    let album_artist = tag.get_string(&ItemKey::AlbumArtist).map(|v| v.to_string());
    let track_artist = tag.get_string(&ItemKey::TrackArtist).map(|v| v.to_string());

    Ok(Some(TagInfo {
        title: tag.get_string(&ItemKey::TrackTitle).map(|v| v.to_string()),
        artist: track_artist.or(album_artist),
        album: tag.get_string(&ItemKey::AlbumTitle).map(|v| v.to_string()),
        track_no: tag.get_string(&ItemKey::TrackNumber).and_then(parse_track_no),
    }))
}

/// `"3/12"` and `" 3 "` both mean track 3.
pub fn parse_track_no(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

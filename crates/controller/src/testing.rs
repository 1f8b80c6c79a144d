//! Catalog fixtures for behavior and controller tests.

use std::fs;
use std::path::Path;

use library::{MetadataError, TagInfo, TagReader};

/// Every file is untagged, so songs are named after their files.
pub struct NoTags;

impl TagReader for NoTags {
    fn read(&self, _path: &Path) -> Result<Option<TagInfo>, MetadataError> {
        Ok(None)
    }
}

/// Album directory with empty `01.mp3..` files.
pub fn touch_album(dir: &Path, songs: u32) {
    fs::create_dir_all(dir).unwrap();
    for n in 1..=songs {
        fs::write(dir.join(format!("{:02}.mp3", n)), b"").unwrap();
    }
}

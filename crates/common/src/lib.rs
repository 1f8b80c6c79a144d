mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use paths::{config_path_from_env, resolve_path, CONFIG_ENV};

/// Tags are the last twelve characters of a directory name and must be
/// uppercase hexadecimal.
pub const TAG_LEN: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// Accepts exactly twelve uppercase hex digits.
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() == TAG_LEN && value.bytes().all(is_upper_hex) {
            Some(Tag(value.to_string()))
        } else {
            None
        }
    }

    /// Lenient form used for reader and admin input: trims and uppercases first.
    pub fn normalize(value: &str) -> Option<Self> {
        Self::parse(&value.trim().to_ascii_uppercase())
    }

    /// Extracts the tag suffix of a directory name, if it has one.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let start = name.len().checked_sub(TAG_LEN)?;
        if !name.is_char_boundary(start) {
            return None;
        }
        Self::parse(&name[start..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = InvalidTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::normalize(s).ok_or_else(|| InvalidTag(s.to_string()))
    }
}

impl TryFrom<String> for Tag {
    type Error = InvalidTag;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTag(pub String);

impl fmt::Display for InvalidTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid tag: {:?}", self.0)
    }
}

impl std::error::Error for InvalidTag {}

fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

/// Directory name without its tag suffix, e.g. `"Band 0123456789AB"` -> `"Band"`.
pub fn strip_tag(name: &str) -> &str {
    match Tag::from_dir_name(name) {
        Some(_) => name[..name.len() - TAG_LEN].trim(),
        None => name.trim(),
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    Red,
    Green,
    Blue,
    Yellow,
    Power,
}

/// Everything the controller can be woken up by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The player finished or was stopped.
    SongStopped,
    PlayerError {
        message: String,
    },
    /// `None` means the tag was taken off the reader.
    RfidTag {
        tag: Option<Tag>,
    },
    Button {
        button: Button,
        millis: u64,
    },
    Rotation {
        x: f32,
        y: f32,
    },
    Interrupt,
    Power,
    Play {
        playlist_id: String,
        album_index: usize,
        track_index: usize,
    },
    LibraryChanged,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SongStopped => "song_stopped",
            Event::PlayerError { .. } => "player_error",
            Event::RfidTag { .. } => "rfid_tag",
            Event::Button { .. } => "button",
            Event::Rotation { .. } => "rotation",
            Event::Interrupt => "interrupt",
            Event::Power => "power",
            Event::Play { .. } => "play",
            Event::LibraryChanged => "library_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{stable_id, strip_tag, Button, Event, Tag};

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("/audio/Band/Album");
        let second = stable_id("/audio/Band/Album");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("/audio/Band/Album2"));
    }

    #[test]
    fn tag_from_dir_name_takes_suffix() {
        let tag = Tag::from_dir_name("Band 0123456789AB").unwrap();
        assert_eq!(tag.as_str(), "0123456789AB");
        assert!(Tag::from_dir_name("Band 0123456789ab").is_none());
        assert!(Tag::from_dir_name("Band").is_none());
        assert!(Tag::from_dir_name("Bänd 0123456789A").is_none());
    }

    #[test]
    fn strip_tag_removes_suffix() {
        assert_eq!(strip_tag("Band 0123456789AB"), "Band");
        assert_eq!(strip_tag("Band"), "Band");
    }

    #[test]
    fn normalize_uppercases_reader_input() {
        assert_eq!(
            Tag::normalize(" 0123456789ab\n").unwrap().as_str(),
            "0123456789AB"
        );
        assert!(Tag::normalize("0123").is_none());
    }

    #[test]
    fn event_wire_format() {
        let event = Event::RfidTag {
            tag: Tag::parse("0123456789AB"),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"type":"rfid_tag","tag":"0123456789AB"}"#);

        let button: Event =
            serde_json::from_str(r#"{"type":"button","button":"red","millis":120}"#).unwrap();
        assert_eq!(
            button,
            Event::Button {
                button: Button::Red,
                millis: 120
            }
        );

        let removed: Event = serde_json::from_str(r#"{"type":"rfid_tag","tag":null}"#).unwrap();
        assert_eq!(removed, Event::RfidTag { tag: None });
        assert!(serde_json::from_str::<Event>(r#"{"type":"rfid_tag","tag":"nothex"}"#).is_err());
    }
}

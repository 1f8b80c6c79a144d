//! Hardware the behaviors drive. Both sides are collaborators with fixed
//! command sets; behaviors only see the traits.

mod leds;
mod mpg123;

use std::path::Path;

pub use leds::LogLeds;
pub use mpg123::Mpg123Player;

pub const DEFAULT_PITCH: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

impl PlaybackState {
    /// A track is loaded and stopping it will report a `SongStopped`.
    pub fn is_active(self) -> bool {
        self != PlaybackState::Stopped
    }
}

pub trait Player: Send {
    /// Loads a track paused at its start.
    fn load(&mut self, path: &Path) -> Result<(), PlayerError>;
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self) -> Result<(), PlayerError>;
    fn stop(&mut self) -> Result<(), PlayerError>;
    fn state(&self) -> PlaybackState;
    fn position_ms(&self) -> u64;
    fn seek_ms(&mut self, position_ms: u64) -> Result<(), PlayerError>;
    fn volume(&self) -> u32;
    fn set_volume(&mut self, volume: u32) -> Result<(), PlayerError>;
    /// Playback speed in percent, 100 is normal.
    fn pitch(&self) -> u32;
    fn set_pitch(&mut self, pitch: u32) -> Result<(), PlayerError>;
    fn shutdown(&mut self) -> Result<(), PlayerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
    Orange,
    Purple,
}

pub trait Leds: Send {
    fn startup(&mut self);
    fn shutdown(&mut self);
    fn fade_up_and_down(&mut self, color: Color);
    /// Shows `index` of `count` songs.
    fn song(&mut self, index: usize, count: usize);
    /// Shows a position in one of the ten step value tables.
    fn level(&mut self, step: usize);
    fn brightness(&self) -> u32;
    fn set_brightness(&mut self, brightness: u32);
}

#[derive(Debug)]
pub enum PlayerError {
    Io(std::io::Error),
    /// The player process is gone.
    Closed,
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::Io(err) => write!(f, "io error: {}", err),
            PlayerError::Closed => write!(f, "player process closed"),
        }
    }
}

impl std::error::Error for PlayerError {}

impl From<std::io::Error> for PlayerError {
    fn from(err: std::io::Error) -> Self {
        PlayerError::Io(err)
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{Button, Event, Tag};
use library::{Library, Playlist};
use tracing::{debug, info, warn};

use super::{Behavior, Context, Outcome};
use crate::devices::{Color, PlaybackState, PlayerError};

pub const VOLUMES: [u32; 10] = [1, 2, 3, 5, 7, 9, 12, 15, 18, 22];
pub const PITCHES: [u32; 10] = [55, 70, 85, 100, 115, 130, 145, 160, 175, 190];
pub const BRIGHTNESSES: [u32; 10] = [0, 28, 56, 84, 112, 140, 168, 196, 224, 255];

pub const UNKNOWN_TAG_FILE: &str = "unknown_tag.txt";

const ROTATION_THRESHOLD: f32 = 45.0;
const REWIND_THRESHOLD_MS: u64 = 2000;

#[derive(Clone, Debug)]
pub struct MusicSettings {
    pub long_timeout: Duration,
    pub short_timeout: Duration,
    pub long_click_ms: u64,
}

impl Default for MusicSettings {
    fn default() -> Self {
        Self {
            long_timeout: Duration::from_secs(20 * 60),
            short_timeout: Duration::from_secs(5 * 60),
            long_click_ms: 1500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Axis {
    Volume,
    Pitch,
    Brightness,
}

/// The default behavior: tags pick playlists, buttons navigate them and
/// adjust whichever axis the last rotation selected.
pub struct MusicBehavior {
    settings: MusicSettings,
    unknown_marker: PathBuf,
    axis: Axis,
    /// Id of the playlist being played.
    current: Option<String>,
}

impl MusicBehavior {
    pub fn new(settings: MusicSettings, system_dir: &Path) -> Self {
        let behavior = Self {
            settings,
            unknown_marker: system_dir.join(UNKNOWN_TAG_FILE),
            axis: Axis::Volume,
            current: None,
        };
        behavior.clear_marker();
        behavior
    }

    fn playlist<'l>(&self, library: &'l mut Library) -> Option<&'l mut Playlist> {
        library.lookup_by_id_mut(self.current.as_deref()?)
    }

    fn timeout(&self) -> Outcome {
        if self.current.is_some() {
            Outcome::Timeout(self.settings.long_timeout)
        } else {
            Outcome::Timeout(self.settings.short_timeout)
        }
    }

    fn marker_holds(&self, tag: &Tag) -> bool {
        fs::read_to_string(&self.unknown_marker)
            .map(|text| text.trim() == tag.as_str())
            .unwrap_or(false)
    }

    fn write_marker(&self, tag: &Tag) {
        if let Err(err) = fs::write(&self.unknown_marker, tag.as_str()) {
            warn!("Failed to write {:?}: {}", self.unknown_marker, err);
        }
    }

    fn clear_marker(&self) {
        if self.unknown_marker.exists() {
            debug!("Removing {:?}", self.unknown_marker);
            if let Err(err) = fs::remove_file(&self.unknown_marker) {
                warn!("Failed to remove {:?}: {}", self.unknown_marker, err);
            }
        }
    }

    fn save_and_stop(&mut self, ctx: &mut Context<'_>) {
        if let Err(err) = ctx.player.pause() {
            warn!("Failed to pause: {}", err);
        }
        let position = ctx.player.position_ms();
        if let Some(playlist) = self.playlist(ctx.library) {
            debug!("Saving {} at {} ms", playlist.name(), position);
            if let Err(err) = playlist.save_state(position) {
                warn!("Failed to save state of {:?}: {}", playlist.path(), err);
            }
        }
        if let Err(err) = ctx.stop_player() {
            warn!("Failed to stop: {}", err);
        }
    }

    fn start(&mut self, ctx: &mut Context<'_>, path: &Path, position_ms: u64) -> Result<(), PlayerError> {
        ctx.stop_player()?;
        ctx.player.load(path)?;
        if position_ms > 0 {
            ctx.player.seek_ms(position_ms)?;
        }
        ctx.player.play()
    }

    fn play_current(&mut self, ctx: &mut Context<'_>, position_ms: u64) {
        let Some(song) = self.playlist(ctx.library).and_then(|p| p.current_song()) else {
            warn!("Nothing to play");
            self.show_progress(ctx);
            return;
        };
        info!("Playing {} ({:?})", song.title, song.path);
        if let Err(err) = self.start(ctx, &song.path, position_ms) {
            warn!("Failed to play {:?}: {}", song.path, err);
        }
        self.show_progress(ctx);
    }

    fn show_progress(&self, ctx: &mut Context<'_>) {
        let progress = self.current.as_deref().and_then(|id| {
            let playlist = ctx.library.lookup_by_id(id)?;
            Some((playlist.current_song_index(), playlist.count_songs()))
        });
        match progress {
            Some((_, 1)) => ctx.leds.fade_up_and_down(Color::Green),
            Some((Some(index), count)) => ctx.leds.song(index, count),
            _ => ctx.leds.fade_up_and_down(Color::Red),
        }
    }

    fn tag_presented(&mut self, ctx: &mut Context<'_>, tag: Tag) -> Outcome {
        let Some(id) = ctx.library.lookup(&tag).map(|p| p.id().to_string()) else {
            if self.marker_holds(&tag) {
                debug!("Unknown tag {} seen again, treating it as removed", tag);
                self.clear_marker();
                ctx.leds.fade_up_and_down(Color::Red);
            } else {
                info!("Unknown tag {}", tag);
                self.write_marker(&tag);
                ctx.leds.fade_up_and_down(Color::Orange);
            }
            return Outcome::Timeout(self.settings.short_timeout);
        };
        // The tag may have been given a playlist since it was marked.
        if self.marker_holds(&tag) {
            self.clear_marker();
        }

        if self.current.as_deref() == Some(id.as_str())
            && ctx.player.state() == PlaybackState::Playing
        {
            return Outcome::Timeout(self.settings.long_timeout);
        }
        if self.current.is_some() {
            self.save_and_stop(ctx);
        }

        self.current = Some(id);
        let position = match self.playlist(ctx.library) {
            Some(playlist) => {
                playlist.load_state();
                info!("Tag {}: {}", tag, playlist.name());
                playlist.current_album().map(|a| a.position_ms()).unwrap_or(0)
            }
            None => 0,
        };
        self.play_current(ctx, position);
        Outcome::Timeout(self.settings.long_timeout)
    }

    fn tag_removed(&mut self, ctx: &mut Context<'_>) -> Outcome {
        ctx.leds.fade_up_and_down(Color::Red);
        if self.current.is_none() {
            debug!("Tag removed without an active playlist");
            self.clear_marker();
        } else {
            debug!("Tag removed");
            self.save_and_stop(ctx);
            self.current = None;
        }
        Outcome::Timeout(self.settings.short_timeout)
    }

    fn song_stopped(&mut self, ctx: &mut Context<'_>) -> Outcome {
        let Some(playlist) = self.playlist(ctx.library) else {
            debug!("Song stopped without an active playlist");
            return Outcome::NoChange;
        };
        if playlist.next_song(false).is_some() {
            self.play_current(ctx, 0);
            return Outcome::NoChange;
        }

        info!("Reached the end of {}", playlist.name());
        playlist.restart();
        if let Err(err) = playlist.save_state(0) {
            warn!("Failed to save state of {:?}: {}", playlist.path(), err);
        }
        ctx.leds.fade_up_and_down(Color::Red);
        Outcome::Timeout(self.settings.short_timeout)
    }

    fn button(&mut self, ctx: &mut Context<'_>, button: Button, millis: u64) -> Outcome {
        match button {
            Button::Yellow | Button::Blue => {
                if self.current.is_none() {
                    debug!("No tag, ignoring {:?}", button);
                    return Outcome::Timeout(self.settings.short_timeout);
                }
                let forward = button == Button::Yellow;
                if millis > self.settings.long_click_ms {
                    self.change_album(ctx, forward);
                } else {
                    self.change_song(ctx, forward);
                }
            }
            Button::Red => self.adjust(ctx, true),
            Button::Green => self.adjust(ctx, false),
            Button::Power => {}
        }
        self.timeout()
    }

    fn change_album(&mut self, ctx: &mut Context<'_>, forward: bool) {
        let Some(playlist) = self.playlist(ctx.library) else {
            return;
        };
        let moved = if forward {
            playlist.next_album(false).is_some()
        } else {
            playlist.prev_album(false).is_some()
        };
        if moved {
            self.play_current(ctx, 0);
        } else {
            debug!("No album in that direction");
            self.show_progress(ctx);
        }
    }

    fn change_song(&mut self, ctx: &mut Context<'_>, forward: bool) {
        if !forward && ctx.player.position_ms() > REWIND_THRESHOLD_MS {
            if let Err(err) = ctx.player.seek_ms(0) {
                warn!("Failed to rewind: {}", err);
            }
            self.show_progress(ctx);
            return;
        }
        let Some(playlist) = self.playlist(ctx.library) else {
            return;
        };
        let moved = if forward {
            playlist.next_song(false).is_some()
        } else {
            playlist.prev_song(false);
            // At the very first song this restarts it.
            true
        };
        if moved {
            self.play_current(ctx, 0);
        } else {
            debug!("Already at the last song");
            self.show_progress(ctx);
        }
    }

    fn adjust(&mut self, ctx: &mut Context<'_>, raise: bool) {
        let (table, current) = match self.axis {
            Axis::Volume => (&VOLUMES, ctx.player.volume()),
            Axis::Pitch => (&PITCHES, ctx.player.pitch()),
            Axis::Brightness => (&BRIGHTNESSES, ctx.leds.brightness()),
        };
        let step = step_of(table, current);
        let next = if raise {
            Some(step + 1).filter(|next| *next < table.len())
        } else {
            step.checked_sub(1)
        };
        let Some(next) = next else {
            debug!("{:?} already at the limit", self.axis);
            ctx.leds.level(step);
            return;
        };

        ctx.leds.level(next);
        let value = table[next];
        debug!("{:?}: {} -> {}", self.axis, current, value);
        let result = match self.axis {
            Axis::Volume => ctx.player.set_volume(value),
            Axis::Pitch => ctx.player.set_pitch(value),
            Axis::Brightness => {
                ctx.leds.set_brightness(value);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!("Failed to set {:?}: {}", self.axis, err);
        }
    }

    fn rotation(&mut self, ctx: &mut Context<'_>, x: f32) -> Outcome {
        let (axis, color) = if x < -ROTATION_THRESHOLD {
            (Axis::Brightness, Color::Purple)
        } else if x > ROTATION_THRESHOLD {
            (Axis::Pitch, Color::Yellow)
        } else {
            (Axis::Volume, Color::Blue)
        };
        if axis != self.axis {
            debug!("Now controlling {:?}", axis);
            self.axis = axis;
            ctx.leds.fade_up_and_down(color);
        }
        Outcome::NoChange
    }

    fn play_request(
        &mut self,
        ctx: &mut Context<'_>,
        playlist_id: String,
        album_index: usize,
        track_index: usize,
    ) -> Outcome {
        let valid = ctx
            .library
            .lookup_by_id(&playlist_id)
            .and_then(|p| p.albums().get(album_index))
            .map(|album| track_index < album.songs().len())
            .unwrap_or(false);
        if !valid {
            warn!(
                "Cannot play {} album {} track {}",
                playlist_id, album_index, track_index
            );
            return Outcome::NoChange;
        }

        if self.current.is_some() {
            self.save_and_stop(ctx);
        }
        self.current = Some(playlist_id);
        if let Some(playlist) = self.playlist(ctx.library) {
            playlist.select(album_index, track_index);
        }
        self.play_current(ctx, 0);
        Outcome::Timeout(self.settings.long_timeout)
    }

    fn library_changed(&mut self, ctx: &mut Context<'_>) -> Outcome {
        let position = ctx.player.position_ms();
        if let Some(playlist) = self.playlist(ctx.library) {
            if let Err(err) = playlist.save_state(position) {
                warn!("Failed to save state of {:?}: {}", playlist.path(), err);
            }
        }

        match ctx.library.rescan() {
            Ok(stats) => info!(
                "Library rescanned: {} playlists, {} albums, {} songs",
                stats.playlists, stats.albums, stats.songs
            ),
            Err(err) => {
                warn!("Rescan failed, keeping the previous library: {}", err);
                return Outcome::NoChange;
            }
        }

        if self.current.is_some() {
            match self.playlist(ctx.library) {
                Some(playlist) => playlist.load_state(),
                None => {
                    info!("Active playlist is gone");
                    if let Err(err) = ctx.stop_player() {
                        warn!("Failed to stop: {}", err);
                    }
                    self.current = None;
                }
            }
        }
        Outcome::NoChange
    }
}

/// Index of `value` in an ascending table, or of the nearest entry above it.
fn step_of(table: &[u32], value: u32) -> usize {
    table
        .iter()
        .position(|entry| *entry >= value)
        .unwrap_or(table.len() - 1)
}

impl Behavior for MusicBehavior {
    fn name(&self) -> &str {
        "music"
    }

    fn initialize(&mut self, _ctx: &mut Context<'_>) -> Duration {
        debug!("Music behavior active");
        self.settings.short_timeout
    }

    fn on_event(&mut self, ctx: &mut Context<'_>, event: Event) -> Outcome {
        match event {
            Event::RfidTag { tag: Some(tag) } => self.tag_presented(ctx, tag),
            Event::RfidTag { tag: None } => self.tag_removed(ctx),
            Event::SongStopped => self.song_stopped(ctx),
            Event::Button { button, millis } => self.button(ctx, button, millis),
            Event::Rotation { x, .. } => self.rotation(ctx, x),
            Event::Play {
                playlist_id,
                album_index,
                track_index,
            } => self.play_request(ctx, playlist_id, album_index, track_index),
            Event::LibraryChanged => self.library_changed(ctx),
            Event::PlayerError { .. } | Event::Interrupt | Event::Power => Outcome::NoChange,
        }
    }

    fn uninitialize(&mut self, ctx: &mut Context<'_>) {
        debug!("Music behavior inactive");
        if self.current.is_some() {
            self.save_and_stop(ctx);
            self.current = None;
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use common::{Event, Tag};
use tracing::{debug, info, warn};

use super::{Behavior, Context, Outcome};
use crate::devices::{PlayerError, DEFAULT_PITCH};

/// Plays one file from `system/` while its tag is on the reader.
pub struct SystemSoundBehavior {
    tag: Tag,
    file: PathBuf,
    volume: u32,
    timeout: Duration,
    /// Player settings to restore when this behavior ends.
    saved: Option<(u32, u32)>,
}

impl SystemSoundBehavior {
    pub fn new(tag: Tag, file: PathBuf, volume: u32, timeout: Duration) -> Self {
        Self {
            tag,
            file,
            volume,
            timeout,
            saved: None,
        }
    }

    fn start(&mut self, ctx: &mut Context<'_>) -> Result<(), PlayerError> {
        self.saved = Some((ctx.player.volume(), ctx.player.pitch()));
        ctx.stop_player()?;
        ctx.player.set_volume(self.volume)?;
        ctx.player.set_pitch(DEFAULT_PITCH)?;
        ctx.player.load(&self.file)?;
        ctx.player.play()
    }
}

impl Behavior for SystemSoundBehavior {
    fn name(&self) -> &str {
        "system sound"
    }

    fn initialize(&mut self, ctx: &mut Context<'_>) -> Duration {
        info!("Playing system sound {:?} for {}", self.file, self.tag);
        if let Err(err) = self.start(ctx) {
            warn!("Failed to play {:?}: {}", self.file, err);
        }
        self.timeout
    }

    fn on_event(&mut self, ctx: &mut Context<'_>, event: Event) -> Outcome {
        match event {
            // Stops caused by a behavior never get here, so this is the sound ending.
            Event::SongStopped => Outcome::Done,
            Event::RfidTag { tag: None } => {
                if let Err(err) = ctx.stop_player() {
                    warn!("Failed to stop: {}", err);
                }
                Outcome::Done
            }
            Event::RfidTag { tag: Some(tag) } if tag == self.tag => Outcome::NoChange,
            other => {
                debug!("System sound ignores {}", other.kind());
                Outcome::NoChange
            }
        }
    }

    fn uninitialize(&mut self, ctx: &mut Context<'_>) {
        if let Some((volume, pitch)) = self.saved.take() {
            let restored = ctx
                .player
                .set_volume(volume)
                .and_then(|_| ctx.player.set_pitch(pitch));
            if let Err(err) = restored {
                warn!("Failed to restore player settings: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use common::{Event, Tag};
    use library::Library;

    use super::SystemSoundBehavior;
    use crate::behavior::{Behavior, Context, Outcome};
    use crate::devices::testing::{FakeLeds, FakePlayer};
    use crate::devices::PlaybackState;
    use crate::testing::NoTags;

    #[test]
    fn plays_at_system_volume_and_restores() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("system")).unwrap();
        let mut library = Library::load(root.path().to_path_buf(), Arc::new(NoTags)).unwrap();
        let (mut player, log) = FakePlayer::new();
        player.volume = 12;
        player.pitch = 130;
        let (mut leds, _) = FakeLeds::new();
        let mut expected_stops = 0;
        let mut ctx = Context {
            library: &mut library,
            player: &mut player,
            leds: &mut leds,
            expected_stops: &mut expected_stops,
        };

        let tag = Tag::parse("AABBCCDDEEFF").unwrap();
        let file = root.path().join("system").join("bell.mp3");
        let mut sound = SystemSoundBehavior::new(tag.clone(), file.clone(), 2, Duration::from_secs(30));

        assert_eq!(sound.initialize(&mut ctx), Duration::from_secs(30));
        assert_eq!(ctx.player.volume(), 2);
        assert_eq!(ctx.player.pitch(), 100);
        assert_eq!(ctx.player.state(), PlaybackState::Playing);

        assert_eq!(
            sound.on_event(&mut ctx, Event::RfidTag { tag: Some(tag) }),
            Outcome::NoChange
        );
        assert_eq!(sound.on_event(&mut ctx, Event::SongStopped), Outcome::Done);

        sound.uninitialize(&mut ctx);
        assert_eq!(ctx.player.volume(), 12);
        assert_eq!(ctx.player.pitch(), 130);
        assert_eq!(log.lock().loaded.as_deref(), Some(file.as_path()));
    }
}

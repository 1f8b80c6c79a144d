//! Pluggable units the controller dispatches events to. Exactly one is
//! active at a time; the registry owns every instance for the whole run.

pub mod music;
pub mod system_sound;

use std::collections::HashMap;
use std::time::Duration;

use common::{Event, Tag};
use library::Library;

use crate::devices::{Leds, Player, PlayerError};

pub use music::{MusicBehavior, MusicSettings};
pub use system_sound::SystemSoundBehavior;

/// Everything a behavior may touch while it handles one call.
pub struct Context<'a> {
    pub library: &'a mut Library,
    pub player: &'a mut dyn Player,
    pub leds: &'a mut dyn Leds,
    /// `SongStopped` events still owed for stops issued through
    /// [`Context::stop_player`]; the controller swallows them.
    pub expected_stops: &'a mut u32,
}

impl Context<'_> {
    /// Stops an active player. The resulting `SongStopped` never reaches a
    /// behavior, whichever one is active when it arrives.
    pub fn stop_player(&mut self) -> Result<(), PlayerError> {
        if self.player.state().is_active() {
            self.player.stop()?;
            *self.expected_stops += 1;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Keep the current deadline.
    NoChange,
    Timeout(Duration),
    /// Deactivate and hand control back to the default behavior.
    Done,
}

pub trait Behavior: Send {
    fn name(&self) -> &str;

    /// Called on activation; the result sets the first deadline.
    fn initialize(&mut self, ctx: &mut Context<'_>) -> Duration;

    fn on_event(&mut self, ctx: &mut Context<'_>, event: Event) -> Outcome;

    /// The deadline passed without an event.
    fn on_timeout(&mut self, _ctx: &mut Context<'_>) -> Outcome {
        Outcome::Done
    }

    /// Called on deactivation for any reason. Must leave the catalog and
    /// the devices consistent.
    fn uninitialize(&mut self, ctx: &mut Context<'_>);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    Default,
    Tag(Tag),
}

/// Tag-keyed behaviors, built once at startup.
pub struct Registry {
    default: Box<dyn Behavior>,
    special: HashMap<Tag, Box<dyn Behavior>>,
    active: HandlerKey,
}

impl Registry {
    pub fn new(default: Box<dyn Behavior>) -> Self {
        Self {
            default,
            special: HashMap::new(),
            active: HandlerKey::Default,
        }
    }

    pub fn register(&mut self, tag: Tag, behavior: Box<dyn Behavior>) {
        self.special.insert(tag, behavior);
    }

    /// Which behavior a presented tag belongs to. Tags without a special
    /// behavior are the default behavior's business.
    pub fn key_for(&self, tag: &Tag) -> HandlerKey {
        if self.special.contains_key(tag) {
            HandlerKey::Tag(tag.clone())
        } else {
            HandlerKey::Default
        }
    }

    pub fn active_key(&self) -> &HandlerKey {
        &self.active
    }

    pub fn is_default_active(&self) -> bool {
        self.active == HandlerKey::Default
    }

    /// Falls back to the default behavior for keys that were never registered.
    pub fn set_active(&mut self, key: HandlerKey) {
        self.active = match key {
            HandlerKey::Tag(tag) if self.special.contains_key(&tag) => HandlerKey::Tag(tag),
            _ => HandlerKey::Default,
        };
    }

    pub fn active_mut(&mut self) -> &mut dyn Behavior {
        match &self.active {
            HandlerKey::Tag(tag) => match self.special.get_mut(tag) {
                Some(behavior) => behavior.as_mut(),
                None => self.default.as_mut(),
            },
            HandlerKey::Default => self.default.as_mut(),
        }
    }

    pub fn len(&self) -> usize {
        self.special.len() + 1
    }
}

use std::time::Duration;

use channel::{EventReceiver, EventSource, Received};
use common::{Button, Event, Tag};
use library::Library;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::behavior::{Context, HandlerKey, Outcome, Registry};
use crate::devices::{Leds, Player};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The default behavior's deadline passed.
    Idle,
    Interrupt,
    InterruptTag,
    PlayerError(String),
    Power,
    /// Every producer is gone.
    Closed,
}

/// Owns the catalog, the devices and the behaviors, and is the only place
/// any of them is mutated.
pub struct Controller<S = EventReceiver> {
    library: Library,
    player: Box<dyn Player>,
    leds: Box<dyn Leds>,
    registry: Registry,
    events: S,
    interrupt_tag: Option<Tag>,
    /// Stops behaviors issued whose `SongStopped` has not arrived yet.
    expected_stops: u32,
}

pub struct Parts<S = EventReceiver> {
    pub library: Library,
    pub player: Box<dyn Player>,
    pub leds: Box<dyn Leds>,
    pub events: S,
    pub expected_stops: u32,
}

impl<S: EventSource> Controller<S> {
    pub fn new(
        library: Library,
        player: Box<dyn Player>,
        leds: Box<dyn Leds>,
        registry: Registry,
        events: S,
    ) -> Self {
        Self {
            library,
            player,
            leds,
            registry,
            events,
            interrupt_tag: None,
            expected_stops: 0,
        }
    }

    pub fn with_interrupt_tag(mut self, tag: Option<Tag>) -> Self {
        self.interrupt_tag = tag;
        self
    }

    pub fn into_parts(self) -> Parts<S> {
        Parts {
            library: self.library,
            player: self.player,
            leds: self.leds,
            events: self.events,
            expected_stops: self.expected_stops,
        }
    }

    pub async fn run(&mut self) -> ExitReason {
        let mut deadline = Instant::now() + self.initialize_active();

        let reason = loop {
            let now = Instant::now();
            if now >= deadline {
                if self.registry.is_default_active() {
                    info!("No activity, shutting down");
                    break ExitReason::Idle;
                }
                debug!("Timeout in {}", self.registry.active_mut().name());
                let outcome = self.with_active(|behavior, ctx| behavior.on_timeout(ctx));
                let outcome = match outcome {
                    Outcome::NoChange => Outcome::Done,
                    other => other,
                };
                deadline = self.apply(outcome, deadline);
                continue;
            }

            let event = match self.events.recv_timeout(deadline - now).await {
                Received::Event(event) => event,
                // Woken before the deadline; only the monotonic clock decides.
                Received::Empty => continue,
                Received::Closed => {
                    warn!("Event channel closed");
                    break ExitReason::Closed;
                }
            };
            debug!("Event: {:?}", event);

            if let Some(reason) = self.critical(&event) {
                break reason;
            }

            if event == Event::SongStopped && self.expected_stops > 0 {
                self.expected_stops -= 1;
                debug!("Stop was requested, {} more expected", self.expected_stops);
                continue;
            }

            if let Event::RfidTag { tag: Some(tag) } = &event {
                let key = self.registry.key_for(tag);
                if &key != self.registry.active_key() {
                    self.uninitialize_active();
                    self.registry.set_active(key);
                    deadline = Instant::now() + self.initialize_active();
                }
            }

            let outcome = self.with_active(|behavior, ctx| behavior.on_event(ctx, event));
            deadline = self.apply(outcome, deadline);
        };

        self.uninitialize_active();
        info!("Controller stopped: {:?}", reason);
        reason
    }

    fn critical(&self, event: &Event) -> Option<ExitReason> {
        match event {
            Event::Interrupt => {
                info!("Interrupt");
                Some(ExitReason::Interrupt)
            }
            Event::PlayerError { message } => {
                warn!("Player error: {}", message);
                Some(ExitReason::PlayerError(message.clone()))
            }
            Event::Button {
                button: Button::Power,
                ..
            }
            | Event::Power => {
                info!("Power off requested");
                Some(ExitReason::Power)
            }
            Event::RfidTag { tag: Some(tag) } if Some(tag) == self.interrupt_tag.as_ref() => {
                info!("Interrupt tag {}", tag);
                Some(ExitReason::InterruptTag)
            }
            _ => None,
        }
    }

    fn apply(&mut self, outcome: Outcome, deadline: Instant) -> Instant {
        match outcome {
            Outcome::NoChange => deadline,
            Outcome::Timeout(timeout) => Instant::now() + timeout,
            Outcome::Done => {
                debug!("{} is done", self.registry.active_mut().name());
                self.uninitialize_active();
                self.registry.set_active(HandlerKey::Default);
                Instant::now() + self.initialize_active()
            }
        }
    }

    fn initialize_active(&mut self) -> Duration {
        let timeout = self.with_active(|behavior, ctx| behavior.initialize(ctx));
        debug!(
            "Activated {} for {:?}",
            self.registry.active_mut().name(),
            timeout
        );
        timeout
    }

    fn uninitialize_active(&mut self) {
        self.with_active(|behavior, ctx| behavior.uninitialize(ctx));
    }

    fn with_active<T>(
        &mut self,
        f: impl FnOnce(&mut dyn crate::behavior::Behavior, &mut Context<'_>) -> T,
    ) -> T {
        let mut ctx = Context {
            library: &mut self.library,
            player: self.player.as_mut(),
            leds: self.leds.as_mut(),
            expected_stops: &mut self.expected_stops,
        };
        f(self.registry.active_mut(), &mut ctx)
    }
}

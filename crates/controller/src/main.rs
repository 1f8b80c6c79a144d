mod behavior;
mod config;
mod controller;
mod devices;
#[cfg(test)]
mod testing;
mod watch;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use behavior::{MusicBehavior, MusicSettings, Registry, SystemSoundBehavior};
use channel::{channel, Broker, EventReceiver, EventSink, Received, DEFAULT_CAPACITY};
use common::{config_path_from_env, resolve_path, Event};
use config::load_or_create_config;
use controller::{Controller, ExitReason, Parts};
use devices::{Leds, LogLeds, Mpg123Player, Player, DEFAULT_PITCH};
use library::{Library, LoftyReader};
use tracing::{info, warn};
use watch::watch_library;

const STARTUP_SOUND: &str = "startup.mp3";
const SHUTDOWN_SOUND: &str = "shutdown.mp3";
const SOUND_WAIT: Duration = Duration::from_secs(30);
const EXIT_DEBUG: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let audio_root = resolve_path(&config_path, &config.audio_root);
    let library = Library::load(audio_root.clone(), Arc::new(LoftyReader))?;
    let system_dir = library.system_dir();

    let (sender, mut events) = channel(DEFAULT_CAPACITY);
    let broker = Broker::bind(
        config.broker_addr.as_str(),
        config.broker_key.clone(),
        sender.clone(),
    )
    .await?;
    let sink: Arc<dyn EventSink> = Arc::new(sender);

    let mut player: Box<dyn Player> = Box::new(Mpg123Player::spawn(
        &config.player_command,
        Arc::clone(&sink),
        config.system_volume,
    )?);
    let mut leds: Box<dyn Leds> = Box::new(LogLeds::new());

    leds.startup();
    play_system_sound(
        player.as_mut(),
        &mut events,
        &system_dir.join(STARTUP_SOUND),
        config.system_volume,
        0,
    )
    .await;
    // Button presses and player chatter from the startup sound.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let dropped = events.drain();
    if dropped > 0 {
        info!("Discarded {} events queued during startup", dropped);
    }

    let watcher = if config.watch_library {
        match watch_library(audio_root.clone(), config.watch_debounce(), Arc::clone(&sink)) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!("Failed to start watcher: {}", err);
                None
            }
        }
    } else {
        info!("Watcher disabled (watch_library=false)");
        None
    };

    let signal_sink = Arc::clone(&sink);
    tokio::spawn(async move {
        shutdown_signal().await;
        if let Err(err) = signal_sink.send(Event::Interrupt) {
            warn!("Failed to deliver interrupt: {}", err);
        }
    });

    let settings = MusicSettings {
        long_timeout: config.long_timeout(),
        short_timeout: config.short_timeout(),
        long_click_ms: config.long_click_ms,
    };
    let mut registry = Registry::new(Box::new(MusicBehavior::new(settings, &system_dir)));
    for (tag, file) in &config.special_tags {
        if library.lookup(tag).is_some() {
            warn!("Tag {} has a special behavior and a playlist; the playlist is unreachable", tag);
        }
        registry.register(
            tag.clone(),
            Box::new(SystemSoundBehavior::new(
                tag.clone(),
                system_dir.join(file),
                config.system_volume,
                config.short_timeout(),
            )),
        );
    }
    info!("{} behaviors registered", registry.len());

    let mut controller = Controller::new(library, player, leds, registry, events)
        .with_interrupt_tag(config.interrupt_tag.clone());
    let reason = controller.run().await;

    drop(watcher);
    broker.shutdown();
    let mut parts = controller.into_parts();
    teardown(&mut parts, &system_dir, config.system_volume).await;

    info!("Exiting: {:?}", reason);
    if reason == ExitReason::InterruptTag {
        std::process::exit(EXIT_DEBUG);
    }
    Ok(())
}

/// Plays a sound from `system/` and waits for it to end. The first
/// `stale_stops` stops belong to earlier tracks.
async fn play_system_sound(
    player: &mut dyn Player,
    events: &mut EventReceiver,
    path: &Path,
    volume: u32,
    mut stale_stops: u32,
) {
    if !path.exists() {
        info!("No {:?}, skipping", path);
        return;
    }
    let started = player
        .set_volume(volume)
        .and_then(|_| player.set_pitch(DEFAULT_PITCH))
        .and_then(|_| player.load(path))
        .and_then(|_| player.play());
    if let Err(err) = started {
        warn!("Failed to play {:?}: {}", path, err);
        return;
    }

    let deadline = tokio::time::Instant::now() + SOUND_WAIT;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            warn!("{:?} did not finish in time", path);
            return;
        }
        match events.recv_timeout(deadline - now).await {
            Received::Event(Event::SongStopped) if stale_stops > 0 => stale_stops -= 1,
            Received::Event(Event::SongStopped) | Received::Closed => return,
            Received::Event(Event::PlayerError { message }) => {
                warn!("Player error during {:?}: {}", path, message);
                return;
            }
            Received::Event(_) | Received::Empty => {}
        }
    }
}

/// Every step runs even when an earlier one fails.
async fn teardown(parts: &mut Parts, system_dir: &Path, volume: u32) {
    info!("Terminating");
    play_system_sound(
        parts.player.as_mut(),
        &mut parts.events,
        &system_dir.join(SHUTDOWN_SOUND),
        volume,
        parts.expected_stops,
    )
    .await;

    parts.leds.shutdown();

    if let Err(err) = parts.player.shutdown() {
        warn!("Failed to shut the player down: {}", err);
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}

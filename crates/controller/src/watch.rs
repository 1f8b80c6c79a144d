use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use channel::EventSink;
use common::Event as ControlEvent;
use library::is_state_file_name;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::behavior::music::UNKNOWN_TAG_FILE;

/// Watches the audio root and enqueues `LibraryChanged` once the tree has
/// been quiet for `debounce`. The returned watcher must be kept alive.
pub fn watch_library(
    root: PathBuf,
    debounce: Duration,
    sink: Arc<dyn EventSink>,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(
        "Watching {} for changes (debounce {}s)",
        root.display(),
        debounce.as_secs()
    );

    tokio::spawn(async move {
        watch_loop(rx, debounce, sink).await;
    });

    Ok(watcher)
}

async fn watch_loop(
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
    sink: Arc<dyn EventSink>,
) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        let mut quiet_at = Instant::now() + debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(quiet_at) => {
                    debug!("Library changed on disk");
                    if let Err(err) = sink.send(ControlEvent::LibraryChanged) {
                        warn!("Failed to report library change: {}", err);
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) if is_relevant_event(&event) => {
                            quiet_at = Instant::now() + debounce;
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }
}

/// Content changes only; the files the catalog and the behaviors write
/// themselves would otherwise trigger endless rescans.
fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| !is_own_file(path))
}

fn is_own_file(path: &Path) -> bool {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => is_state_file_name(name) || name == UNKNOWN_TAG_FILE,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use channel::{channel, Received};
    use common::Event as ControlEvent;
    use notify::event::{CreateKind, ModifyKind};
    use notify::{Event, EventKind};

    use super::{is_relevant_event, watch_loop};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn ignores_state_files() {
        let modify = EventKind::Modify(ModifyKind::Any);
        assert!(!is_relevant_event(&event(modify, "/audio/Band/album.json")));
        assert!(!is_relevant_event(&event(modify, "/audio/Band/playlist.json.tmp")));
        assert!(!is_relevant_event(&event(modify, "/audio/Band/cache.json")));
        assert!(!is_relevant_event(&event(
            EventKind::Create(CreateKind::File),
            "/audio/system/unknown_tag.txt"
        )));
        assert!(is_relevant_event(&event(
            EventKind::Create(CreateKind::File),
            "/audio/Band/04.mp3"
        )));
        assert!(!is_relevant_event(&event(EventKind::Access(notify::event::AccessKind::Any), "/audio/Band/04.mp3")));
    }

    #[tokio::test(start_paused = true)]
    async fn own_writes_do_not_delay_a_rescan() {
        let (events_tx, mut events) = channel(8);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(watch_loop(rx, Duration::from_secs(2), Arc::new(events_tx)));

        let modify = EventKind::Modify(ModifyKind::Any);
        tx.send(event(modify, "/audio/Band/05.mp3")).unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(900)).await;
            tx.send(event(modify, "/audio/Band/album.json")).unwrap();
        }
        // 2.7s in: the state file writes did not push the deadline back.
        assert_eq!(events.drain(), 1);

        tx.send(event(modify, "/audio/Band/06.mp3")).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(event(modify, "/audio/Band/07.mp3")).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(events.drain(), 0);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).await,
            Received::Event(ControlEvent::LibraryChanged)
        );
    }
}

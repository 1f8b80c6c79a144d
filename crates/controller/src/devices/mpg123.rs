use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use channel::EventSink;
use common::Event;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{PlaybackState, Player, PlayerError, DEFAULT_PITCH};

/// Drives `mpg123 -R` over its remote-control protocol. A reader thread
/// turns the process output into position updates and channel events.
pub struct Mpg123Player {
    child: Child,
    stdin: ChildStdin,
    status: Arc<Mutex<Status>>,
    reader: Option<JoinHandle<()>>,
    volume: u32,
    pitch: u32,
}

#[derive(Debug, Default)]
struct Status {
    /// What callers see. Set when a command is written, then follows the
    /// process once every command has been answered.
    state: PlaybackState,
    /// Last state the process itself reported.
    reported: PlaybackState,
    /// Commands written whose `@P` answer has not arrived yet.
    pending: u32,
    /// Of those, how many were `STOP`.
    pending_stops: u32,
    position_ms: u64,
    closing: bool,
}

#[derive(Debug, PartialEq)]
enum Report {
    State(PlaybackState),
    Position(u64),
    Error(String),
}

impl Mpg123Player {
    pub fn spawn(
        command: &str,
        sink: Arc<dyn EventSink>,
        volume: u32,
    ) -> Result<Self, PlayerError> {
        let mut child = Command::new(command)
            .arg("-R")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take().ok_or(PlayerError::Closed)?;
        let stdout = child.stdout.take().ok_or(PlayerError::Closed)?;
        info!("Started {} (pid {})", command, child.id());

        let status = Arc::new(Mutex::new(Status::default()));
        let reader_status = Arc::clone(&status);
        let reader = std::thread::Builder::new()
            .name("mpg123-reader".to_string())
            .spawn(move || read_loop(stdout, reader_status, sink))?;

        let mut player = Self {
            child,
            stdin,
            status,
            reader: Some(reader),
            volume,
            pitch: DEFAULT_PITCH,
        };
        player.set_volume(volume)?;
        Ok(player)
    }

    fn command(&mut self, line: &str) -> Result<(), PlayerError> {
        debug!("mpg123 <- {}", line);
        writeln!(self.stdin, "{}", line).map_err(|err| match err.kind() {
            std::io::ErrorKind::BrokenPipe => PlayerError::Closed,
            _ => PlayerError::Io(err),
        })?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Writes a command that mpg123 answers with a `@P` line. The status is
    /// updated first so the reader never sees the answer before the command.
    fn transition(&mut self, line: &str, state: PlaybackState) -> Result<(), PlayerError> {
        {
            let mut status = self.status.lock();
            status.pending += 1;
            if state == PlaybackState::Stopped {
                status.pending_stops += 1;
            }
            status.state = state;
        }
        self.command(line)
    }
}

impl Player for Mpg123Player {
    fn load(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.status.lock().position_ms = 0;
        self.transition(&format!("LOADPAUSED {}", path.display()), PlaybackState::Paused)
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::Paused {
            self.transition("PAUSE", PlaybackState::Playing)?;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::Playing {
            self.transition("PAUSE", PlaybackState::Paused)?;
        }
        Ok(())
    }

    /// mpg123 ignores `STOP` when nothing is loaded, so neither do we send it.
    fn stop(&mut self) -> Result<(), PlayerError> {
        if self.state().is_active() {
            self.transition("STOP", PlaybackState::Stopped)?;
        }
        Ok(())
    }

    fn state(&self) -> PlaybackState {
        self.status.lock().state
    }

    fn position_ms(&self) -> u64 {
        self.status.lock().position_ms
    }

    fn seek_ms(&mut self, position_ms: u64) -> Result<(), PlayerError> {
        self.command(&format!("JUMP {:.3}s", position_ms as f64 / 1000.0))?;
        self.status.lock().position_ms = position_ms;
        Ok(())
    }

    fn volume(&self) -> u32 {
        self.volume
    }

    fn set_volume(&mut self, volume: u32) -> Result<(), PlayerError> {
        self.command(&format!("VOLUME {}", volume))?;
        self.volume = volume;
        Ok(())
    }

    fn pitch(&self) -> u32 {
        self.pitch
    }

    fn set_pitch(&mut self, pitch: u32) -> Result<(), PlayerError> {
        let offset = (pitch as f64 - DEFAULT_PITCH as f64) / 100.0;
        self.command(&format!("PITCH {:.2}", offset))?;
        self.pitch = pitch;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), PlayerError> {
        self.status.lock().closing = true;
        let quit = self.command("QUIT");
        match self.child.wait() {
            Ok(exit) => info!("mpg123 exited: {}", exit),
            Err(err) => warn!("Failed to wait for mpg123: {}", err),
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        quit
    }
}

impl Drop for Mpg123Player {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.status.lock().closing = true;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn read_loop(stdout: impl std::io::Read, status: Arc<Mutex<Status>>, sink: Arc<dyn EventSink>) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to read from mpg123: {}", err);
                break;
            }
        };
        let Some(report) = parse_line(&line) else {
            continue;
        };
        let event = apply(&mut status.lock(), report);
        if let Some(event) = event {
            if let Err(err) = sink.send(event) {
                warn!("Dropping player event: {}", err);
            }
        }
    }

    if !status.lock().closing {
        let _ = sink.send(Event::PlayerError {
            message: "mpg123 exited".to_string(),
        });
    }
}

fn apply(status: &mut Status, report: Report) -> Option<Event> {
    match report {
        Report::Position(position_ms) => {
            status.position_ms = position_ms;
            None
        }
        Report::State(state) => {
            let was_active = status.reported.is_active();
            status.reported = state;
            status.pending = status.pending.saturating_sub(1);
            if status.pending == 0 {
                status.state = state;
            }
            if state != PlaybackState::Stopped {
                return None;
            }
            // One `SongStopped` per `STOP` written, plus one per track that ran out.
            if status.pending_stops > 0 {
                status.pending_stops -= 1;
                Some(Event::SongStopped)
            } else if was_active {
                Some(Event::SongStopped)
            } else {
                None
            }
        }
        Report::Error(message) => {
            warn!("mpg123 error: {}", message);
            // A failed load is never answered with `@P`.
            status.pending = 0;
            status.state = status.reported;
            Some(Event::PlayerError { message })
        }
    }
}

fn parse_line(line: &str) -> Option<Report> {
    let line = line.trim();
    let (code, rest) = line.split_once(' ').unwrap_or((line, ""));
    match code {
        "@P" => match rest.trim() {
            "0" | "3" => Some(Report::State(PlaybackState::Stopped)),
            "1" => Some(Report::State(PlaybackState::Paused)),
            "2" => Some(Report::State(PlaybackState::Playing)),
            _ => None,
        },
        // @F <frame> <frames left> <seconds> <seconds left>
        "@F" => {
            let seconds: f64 = rest.split_whitespace().nth(2)?.parse().ok()?;
            Some(Report::Position((seconds * 1000.0).round() as u64))
        }
        "@E" => Some(Report::Error(rest.trim().to_string())),
        _ => None,
    }
}

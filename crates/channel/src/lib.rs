//! The event channel between producers and the controller.
//!
//! Producers only ever enqueue, through [`EventSink`]. In a single process
//! that is an [`EventSender`]; other processes reach the same queue through
//! the TCP [`Broker`] with a [`RemoteSender`].

mod broker;

use std::future::Future;
use std::time::Duration;

use common::Event;
use tokio::sync::mpsc::{self, error::TrySendError};

pub use broker::{Broker, RemoteSender};

pub const DEFAULT_CAPACITY: usize = 256;

/// Non-blocking enqueue, the only thing a producer may do.
pub trait EventSink: Send + Sync {
    fn send(&self, event: Event) -> Result<(), ChannelError>;
}

pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSink for EventSender {
    fn send(&self, event: Event) -> Result<(), ChannelError> {
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Closed(_) => ChannelError::Disconnected,
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum Received {
    Event(Event),
    /// Nothing arrived in time.
    Empty,
    /// Every sender is gone.
    Closed,
}

/// The consumer side as the controller sees it.
pub trait EventSource: Send {
    /// Waits for the next event. May return [`Received::Empty`] before
    /// `timeout` has passed.
    fn recv_timeout(&mut self, timeout: Duration) -> impl Future<Output = Received> + Send;
}

pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventSource for EventReceiver {
    fn recv_timeout(&mut self, timeout: Duration) -> impl Future<Output = Received> + Send {
        EventReceiver::recv_timeout(self, timeout)
    }
}

impl EventReceiver {
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Received {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Received::Event(event),
            Ok(None) => Received::Closed,
            Err(_) => Received::Empty,
        }
    }

    /// Throws away everything queued so far and returns how much that was.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[derive(Debug)]
pub enum ChannelError {
    Full,
    Disconnected,
    AddrInUse(String),
    AuthRejected(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Full => write!(f, "event queue full"),
            ChannelError::Disconnected => write!(f, "event queue disconnected"),
            ChannelError::AddrInUse(addr) => {
                write!(f, "a broker is already listening on {}", addr)
            }
            ChannelError::AuthRejected(message) => write!(f, "broker rejected key: {}", message),
            ChannelError::Io(err) => write!(f, "io error: {}", err),
            ChannelError::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io(err)
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Json(err)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::Event;

    use super::{channel, ChannelError, EventSink, Received};

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = channel(8);
        tx.send(Event::SongStopped).unwrap();
        tx.send(Event::Interrupt).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)).await,
            Received::Event(Event::SongStopped)
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(50)).await,
            Received::Event(Event::Interrupt)
        );
    }

    #[tokio::test]
    async fn empty_after_timeout() {
        let (_tx, mut rx) = channel(8);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Received::Empty
        );
    }

    #[tokio::test]
    async fn closed_when_senders_dropped() {
        let (tx, mut rx) = channel(8);
        drop(tx);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Received::Closed
        );
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (tx, mut rx) = channel(1);
        tx.send(Event::SongStopped).unwrap();
        assert!(matches!(tx.send(Event::SongStopped), Err(ChannelError::Full)));
        assert_eq!(rx.drain(), 1);
        tx.send(Event::SongStopped).unwrap();
    }
}

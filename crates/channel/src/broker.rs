use std::net::SocketAddr;

use common::Event;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ChannelError, EventSender, EventSink};

const MAX_LINE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Handshake {
    Auth { key: String },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Reply {
    AuthOk,
    Error { message: String },
}

/// Exposes the controller's queue on a local TCP port. Clients authenticate
/// with the shared key and then send one JSON event per line.
pub struct Broker {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Broker {
    pub async fn bind<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        key: String,
        sink: EventSender,
    ) -> Result<Self, ChannelError> {
        let label = addr.to_string();
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::AddrInUse {
                ChannelError::AddrInUse(label.clone())
            } else {
                ChannelError::Io(err)
            }
        })?;
        let local_addr = listener.local_addr()?;
        info!("Event broker listening on {}", local_addr);

        let accept_task = tokio::spawn(accept_loop(listener, key, sink));
        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, key: String, sink: EventSender) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Broker connection from {}", peer);
                let key = key.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_client(stream, &key, &sink).await {
                        warn!("Broker client {} failed: {}", peer, err);
                    } else {
                        debug!("Broker client {} disconnected", peer);
                    }
                });
            }
            Err(err) => {
                warn!("Broker accept failed: {}", err);
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    key: &str,
    sink: &EventSender,
) -> Result<(), ChannelError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    if read_bounded_line(&mut reader, &mut line).await? == 0 {
        return Ok(());
    }
    match serde_json::from_str::<Handshake>(line.trim()) {
        Ok(Handshake::Auth { key: offered }) if offered == key => {
            write_line(&mut write, &Reply::AuthOk).await?;
        }
        _ => {
            let reply = Reply::Error {
                message: "authentication failed".to_string(),
            };
            write_line(&mut write, &reply).await?;
            return Err(ChannelError::AuthRejected("bad handshake".to_string()));
        }
    }

    loop {
        if read_bounded_line(&mut reader, &mut line).await? == 0 {
            return Ok(());
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(text) {
            Ok(event) => {
                debug!("Remote event: {}", event.kind());
                if let Err(err) = sink.send(event) {
                    warn!("Dropping remote event: {}", err);
                }
            }
            Err(err) => warn!("Ignoring malformed event {:?}: {}", text, err),
        }
    }
}

/// Reads one line of at most `MAX_LINE` bytes into `line`, replacing its
/// contents. Anything longer is an error and ends the connection.
async fn read_bounded_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut String,
) -> Result<usize, ChannelError> {
    line.clear();
    let read = (&mut *reader)
        .take(MAX_LINE as u64 + 1)
        .read_line(line)
        .await?;
    if read > MAX_LINE {
        return Err(ChannelError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "line too long",
        )));
    }
    Ok(read)
}

async fn write_line<T: Serialize>(write: &mut OwnedWriteHalf, value: &T) -> Result<(), ChannelError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    write.write_all(&bytes).await?;
    Ok(())
}

/// Producer side for other processes. Sending never blocks; a background
/// task writes the events out. A lost connection is not re-established.
pub struct RemoteSender {
    tx: mpsc::UnboundedSender<Event>,
    writer: JoinHandle<()>,
}

impl RemoteSender {
    pub async fn connect<A: ToSocketAddrs>(addr: A, key: &str) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr).await?;
        let (read, mut write) = stream.into_split();

        let handshake = Handshake::Auth {
            key: key.to_string(),
        };
        write_line(&mut write, &handshake).await?;

        let mut reader = BufReader::new(read);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        match serde_json::from_str::<Reply>(line.trim()) {
            Ok(Reply::AuthOk) => {}
            Ok(Reply::Error { message }) => return Err(ChannelError::AuthRejected(message)),
            Err(_) => return Err(ChannelError::AuthRejected("no answer from broker".to_string())),
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let writer = tokio::spawn(async move {
            // Keeps the read half open for the lifetime of the connection.
            let _reader = reader;
            while let Some(event) = rx.recv().await {
                if let Err(err) = write_line(&mut write, &event).await {
                    warn!("Lost broker connection: {}", err);
                    break;
                }
            }
            let _ = write.shutdown().await;
        });

        Ok(Self { tx, writer })
    }

    /// Waits until everything sent so far has been written out.
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.writer.await;
    }
}

impl EventSink for RemoteSender {
    fn send(&self, event: Event) -> Result<(), ChannelError> {
        self.tx.send(event).map_err(|_| ChannelError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{Button, Event, Tag};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    use super::{Broker, RemoteSender, MAX_LINE};
    use crate::{channel, ChannelError, EventSink, Received};

    const KEY: &str = "secret";

    #[tokio::test]
    async fn forwards_remote_events() {
        let (tx, mut rx) = channel(8);
        let broker = Broker::bind("127.0.0.1:0", KEY.to_string(), tx).await.unwrap();

        let remote = RemoteSender::connect(broker.local_addr(), KEY).await.unwrap();
        remote
            .send(Event::RfidTag {
                tag: Tag::parse("0123456789AB"),
            })
            .unwrap();
        remote
            .send(Event::Button {
                button: Button::Yellow,
                millis: 80,
            })
            .unwrap();
        remote.close().await;

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).await,
            Received::Event(Event::RfidTag {
                tag: Tag::parse("0123456789AB")
            })
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).await,
            Received::Event(Event::Button {
                button: Button::Yellow,
                millis: 80
            })
        );
        broker.shutdown();
    }

    #[tokio::test]
    async fn rejects_wrong_key() {
        let (tx, _rx) = channel(8);
        let broker = Broker::bind("127.0.0.1:0", KEY.to_string(), tx).await.unwrap();
        let err = RemoteSender::connect(broker.local_addr(), "guess")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::AuthRejected(_)));
        broker.shutdown();
    }

    #[tokio::test]
    async fn only_one_broker_per_port() {
        let (tx, _rx) = channel(8);
        let first = Broker::bind("127.0.0.1:0", KEY.to_string(), tx.clone())
            .await
            .unwrap();
        let err = Broker::bind(first.local_addr().to_string(), KEY.to_string(), tx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChannelError::AddrInUse(_)));
        first.shutdown();
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let (tx, mut rx) = channel(8);
        let broker = Broker::bind("127.0.0.1:0", KEY.to_string(), tx).await.unwrap();

        let mut stream = TcpStream::connect(broker.local_addr()).await.unwrap();
        stream
            .write_all(b"{\"type\":\"auth\",\"key\":\"secret\"}\n{\"type\":\"bogus\"}\n\n{\"type\":\"interrupt\"}\n")
            .await
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).await,
            Received::Event(Event::Interrupt)
        );
        broker.shutdown();
    }

    /// Sends `payload` and returns what the broker answers until it hangs up.
    async fn exchange(broker: &Broker, payload: Vec<u8>) -> Vec<String> {
        let stream = TcpStream::connect(broker.local_addr()).await.unwrap();
        let (read, mut write) = stream.into_split();
        // The broker may hang up before everything is written.
        let _ = write.write_all(&payload).await;

        let mut reader = BufReader::new(read);
        let mut replies = Vec::new();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
                .await
                .unwrap();
            match read {
                Ok(0) | Err(_) => return replies,
                Ok(_) => replies.push(line.trim().to_string()),
            }
        }
    }

    #[tokio::test]
    async fn oversized_lines_close_the_connection() {
        let (tx, mut rx) = channel(8);
        let broker = Broker::bind("127.0.0.1:0", KEY.to_string(), tx).await.unwrap();

        let endless_handshake = vec![b'a'; MAX_LINE + 16];
        assert!(exchange(&broker, endless_handshake).await.is_empty());

        let mut payload = b"{\"type\":\"auth\",\"key\":\"secret\"}\n".to_vec();
        payload.extend(std::iter::repeat(b' ').take(MAX_LINE + 16));
        payload.extend_from_slice(b"{\"type\":\"interrupt\"}\n");
        let replies = exchange(&broker, payload).await;
        assert_eq!(replies, vec!["{\"type\":\"auth_ok\"}".to_string()]);

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(200)).await,
            Received::Empty
        );
        broker.shutdown();
    }
}

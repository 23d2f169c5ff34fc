//! TCP transport for the client.
//!
//! Owns the socket and two background tasks:
//!
//! - **reader**: connect (bounded by [`CONNECT_TIMEOUT`]) → hand the write
//!   half to the writer → post [`TransportEvent::Connected`] → feed received
//!   bytes to a [`PacketDecoder`] and post every framed packet → post
//!   [`TransportEvent::Disconnected`] → wait [`RECONNECT_DELAY`] and retry,
//!   unless reconnection is disabled.
//! - **writer**: owns the current write half and drains its own [`Looper`] of
//!   [`WriterMessage`]s, writing each encoded packet to the socket.
//!
//! Both tasks watch the same shutdown signal, so [`Transport::stop`] returns
//! even while a read or a write is blocked on the network.
//!
//! Nothing here touches the bus registry; all results reach the owner through
//! the [`Handler`] passed to [`Transport::start`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use obus_core::{PacketDecoder, RawPacket};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        lookup_host,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpSocket, TcpStream,
    },
    runtime::{Handle, TryCurrentError},
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tracing::{debug, error, info, warn};

use crate::infrastructure::looper::{Handler, Looper};

/// Upper bound on a single connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const RECV_BUFFER_SIZE: usize = 1024;

/// Messages posted by the transport to its owner, in socket order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket is connected and writable.
    Connected,
    /// The connection ended (EOF, error or shutdown).
    Disconnected,
    /// One framed packet, payload not yet interpreted.
    Packet(RawPacket),
}

/// Messages understood by the writer task.
#[derive(Debug)]
pub enum WriterMessage {
    /// Write this encoded packet to the current socket.
    Send(Vec<u8>),
    /// Exit the writer task.
    Stop,
}

/// Socket hand-over from the reader to the writer.
#[derive(Debug)]
enum SocketUpdate {
    Attached(OwnedWriteHalf),
    Closed,
}

struct Shared {
    addr: String,
    reconnect: AtomicBool,
}

/// A running transport.  Dropping it without [`Transport::stop`] leaves the
/// tasks to exit on their own once the runtime shuts down.
pub struct Transport {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    writer: Handler<WriterMessage>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Transport {
    /// Spawns the reader and writer tasks on the current tokio runtime.
    ///
    /// Fails only when called outside a runtime.
    pub fn start(
        addr: impl Into<String>,
        events: Handler<TransportEvent>,
        reconnect: bool,
    ) -> Result<Self, TryCurrentError> {
        let runtime = Handle::try_current()?;
        let shared = Arc::new(Shared {
            addr: addr.into(),
            reconnect: AtomicBool::new(reconnect),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let writer_looper = Looper::new();
        let writer = writer_looper.handler();

        info!(addr = %shared.addr, reconnect, "starting transport");
        let reader_task = runtime.spawn(run_reader(
            Arc::clone(&shared),
            events,
            socket_tx,
            shutdown_rx.clone(),
        ));
        let writer_task = runtime.spawn(run_writer(writer_looper, socket_rx, shutdown_rx));

        Ok(Self {
            shared,
            shutdown,
            writer,
            reader_task,
            writer_task,
        })
    }

    /// Handle for queueing encoded packets on the writer task.
    pub fn writer(&self) -> Handler<WriterMessage> {
        self.writer.clone()
    }

    /// Enables or disables reconnection after the current connection ends.
    pub fn set_reconnect(&self, enabled: bool) {
        self.shared.reconnect.store(enabled, Ordering::SeqCst);
    }

    pub fn reconnect(&self) -> bool {
        self.shared.reconnect.load(Ordering::SeqCst)
    }

    /// Stops both tasks and waits for them to exit.
    ///
    /// Both tasks observe the shutdown signal while connecting, reading,
    /// writing or sleeping between attempts.  The writer drops the write half
    /// and the reader the read half, which closes the socket.
    pub async fn stop(self) {
        info!(addr = %self.shared.addr, "stopping transport");
        let _ = self.shutdown.send(true);
        self.writer.post(WriterMessage::Stop);

        if let Err(e) = self.writer_task.await {
            error!(error = %e, "transport writer task failed");
        }
        if let Err(e) = self.reader_task.await {
            error!(error = %e, "transport reader task failed");
        }
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

async fn run_reader(
    shared: Arc<Shared>,
    events: Handler<TransportEvent>,
    sockets: mpsc::UnboundedSender<SocketUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let attempt = tokio::select! {
            res = time::timeout(CONNECT_TIMEOUT, connect(&shared.addr)) => res,
            _ = shutdown_requested(&mut shutdown) => break,
        };

        match attempt {
            Ok(Ok(stream)) => {
                info!(addr = %shared.addr, "connected");
                let (reader, writer) = stream.into_split();
                // the writer may already be gone during shutdown
                let _ = sockets.send(SocketUpdate::Attached(writer));
                events.post(TransportEvent::Connected);

                read_loop(reader, &events, &mut shutdown).await;

                let _ = sockets.send(SocketUpdate::Closed);
                info!(addr = %shared.addr, "disconnected");
                events.post(TransportEvent::Disconnected);
            }
            Ok(Err(e)) if is_transient(&e) => {
                debug!(addr = %shared.addr, error = %e, "connect failed");
            }
            Ok(Err(e)) => {
                warn!(addr = %shared.addr, error = %e, "connect failed");
            }
            Err(_) => {
                debug!(addr = %shared.addr, "connect timed out");
            }
        }

        if !shared.reconnect.load(Ordering::SeqCst) {
            debug!("reconnect disabled, reader exiting");
            break;
        }

        tokio::select! {
            _ = time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    events: &Handler<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut decoder = PacketDecoder::new();
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            res = reader.read(&mut buf) => res,
            _ = shutdown_requested(shutdown) => return,
        };
        match read {
            Ok(0) => {
                debug!("connection closed by peer");
                return;
            }
            Ok(n) => {
                for packet in decoder.feed(&buf[..n]) {
                    if !events.post(TransportEvent::Packet(packet)) {
                        return;
                    }
                }
            }
            Err(e) => {
                info!(error = %e, "recv failed");
                return;
            }
        }
    }
}

async fn connect(addr: &str) -> io::Result<TcpStream> {
    let target = lookup_host(addr).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{addr} did not resolve to any address"),
        )
    })?;
    let socket = if target.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Err(e) = socket.set_keepalive(true) {
        debug!(error = %e, "failed to enable keepalive");
    }
    let stream = socket.connect(target).await?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
    Ok(stream)
}

/// Connection failures expected while the server is down or unreachable.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotConnected
    )
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // a dropped sender also counts as shutdown
    let _ = rx.wait_for(|stop| *stop).await;
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// How a single packet write ended.
enum WriteOutcome {
    Done(io::Result<()>),
    Interrupted(Option<SocketUpdate>),
    Shutdown,
}

async fn run_writer(
    mut looper: Looper<WriterMessage>,
    mut sockets: mpsc::UnboundedReceiver<SocketUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut socket: Option<OwnedWriteHalf> = None;
    loop {
        // socket updates first: a CONREQ queued right after Connected must
        // find the new write half
        let msg = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            update = sockets.recv() => match update {
                Some(update) => {
                    socket = apply_socket_update(update);
                    continue;
                }
                None => break,
            },
            msg = looper.recv() => msg,
        };

        let bytes = match msg {
            Some(WriterMessage::Send(bytes)) => bytes,
            Some(WriterMessage::Stop) | None => break,
        };
        let Some(writer) = socket.as_mut() else {
            warn!(len = bytes.len(), "Tx packet lost");
            continue;
        };

        let outcome = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => WriteOutcome::Shutdown,
            update = sockets.recv() => WriteOutcome::Interrupted(update),
            res = writer.write_all(&bytes) => WriteOutcome::Done(res),
        };
        match outcome {
            WriteOutcome::Done(Ok(())) => {}
            WriteOutcome::Done(Err(e)) => debug!(error = %e, "send failed"),
            WriteOutcome::Interrupted(Some(update)) => {
                warn!(len = bytes.len(), "Tx packet interrupted by socket change");
                socket = apply_socket_update(update);
            }
            WriteOutcome::Interrupted(None) | WriteOutcome::Shutdown => break,
        }
    }
    // dropping the write half shuts down the sending side
    drop(socket);
    debug!("writer exiting");
}

fn apply_socket_update(update: SocketUpdate) -> Option<OwnedWriteHalf> {
    match update {
        SocketUpdate::Attached(writer) => Some(writer),
        SocketUpdate::Closed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obus_core::{CallAck, Packet};
    use obus_core::protocol::PacketType;
    use tokio::net::TcpListener;

    async fn next_event(looper: &mut Looper<TransportEvent>) -> TransportEvent {
        time::timeout(Duration::from_secs(5), looper.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("looper open")
    }

    #[tokio::test]
    async fn test_connect_receive_send_and_stop() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut looper = Looper::new();
        let transport = Transport::start(addr, looper.handler(), false).unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        // Act + Assert: connected, then one framed packet
        assert!(matches!(next_event(&mut looper).await, TransportEvent::Connected));
        let ack = Packet::Ack {
            handle: 3,
            ack: CallAck::Acked,
        }
        .encode()
        .unwrap();
        server.write_all(&ack).await.unwrap();
        match next_event(&mut looper).await {
            TransportEvent::Packet(raw) => assert_eq!(raw.packet_type(), PacketType::Ack),
            other => panic!("unexpected event {other:?}"),
        }

        // Act + Assert: outbound bytes reach the server
        assert!(transport.writer().post(WriterMessage::Send(vec![1, 2, 3])));
        let mut got = [0u8; 3];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(got, [1, 2, 3]);

        transport.stop().await;
        assert!(matches!(next_event(&mut looper).await, TransportEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_peer_close_posts_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut looper = Looper::new();
        let transport = Transport::start(addr, looper.handler(), false).unwrap();

        let (server, _) = listener.accept().await.unwrap();
        assert!(matches!(next_event(&mut looper).await, TransportEvent::Connected));
        drop(server);

        assert!(matches!(next_event(&mut looper).await, TransportEvent::Disconnected));
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_refused_without_reconnect_exits_quietly() {
        // Arrange – a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let mut looper = Looper::new();

        // Act
        let transport = Transport::start(addr, looper.handler(), false).unwrap();
        time::timeout(Duration::from_secs(5), transport.stop())
            .await
            .expect("stop must not hang");

        // Assert
        assert!(looper.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_stop_interrupts_reconnect_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let looper = Looper::new();
        let transport = Transport::start(addr, looper.handler(), true).unwrap();
        assert!(transport.reconnect());

        time::sleep(Duration::from_millis(50)).await;
        time::timeout(Duration::from_millis(500), transport.stop())
            .await
            .expect("stop must interrupt the backoff sleep");
    }

    #[tokio::test]
    async fn test_stop_returns_while_send_is_blocked() {
        // Arrange – a peer that accepts but never reads
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut looper = Looper::new();
        let transport = Transport::start(addr, looper.handler(), false).unwrap();
        let (_server, _) = listener.accept().await.unwrap();
        assert!(matches!(next_event(&mut looper).await, TransportEvent::Connected));

        let writer = transport.writer();
        for _ in 0..64 {
            assert!(writer.post(WriterMessage::Send(vec![0xAB; 1024 * 1024])));
        }
        // let the writer fill the socket buffers and block
        time::sleep(Duration::from_millis(200)).await;

        // Act
        let stopped = time::timeout(Duration::from_secs(5), transport.stop()).await;

        // Assert
        assert!(stopped.is_ok(), "stop must return with a blocked send");
        assert!(matches!(next_event(&mut looper).await, TransportEvent::Disconnected));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let looper = Looper::new();
        assert!(Transport::start("127.0.0.1:1", looper.handler(), false).is_err());
    }
}

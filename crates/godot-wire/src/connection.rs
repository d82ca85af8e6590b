use std::net::SocketAddr;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    command::Command,
    frame::{FrameSplitter, DEFAULT_MAX_FRAME_BYTES},
    types::{Result, WireError},
    variant::DEFAULT_MAX_DEPTH,
};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_frame_bytes: usize,
    pub max_variant_depth: usize,
    pub read_buffer_size: usize,
    /// Capacity of the inbound command channel. The reader stops pulling from
    /// the socket while it is full.
    pub inbound_channel_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_variant_depth: DEFAULT_MAX_DEPTH,
            read_buffer_size: 64 * 1024,
            inbound_channel_size: 256,
        }
    }
}

/// What the reader task reports, in stream order.
#[derive(Debug)]
pub enum ConnectionEvent {
    Command(Command),
    /// Always the last event. `error` is `None` for an orderly close or a
    /// local shutdown.
    Closed { error: Option<WireError> },
}

/// Handle to one engine connection.
///
/// A reader task splits and decodes inbound frames; a writer task drains a
/// single FIFO queue, so frames are written in the order they were queued.
/// `write_all` awaiting on a full socket is the backpressure: queued frames
/// wait behind it without being reordered.
#[derive(Debug, Clone)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
    peer: Option<SocketAddr>,
}

impl Connection {
    /// Splits `stream` and spawns its reader and writer tasks.
    pub fn spawn(
        stream: TcpStream,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_channel_size.max(1));
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(writer, outbound_rx, shutdown.clone()));
        tokio::spawn(read_loop(reader, inbound_tx, config, shutdown.clone()));

        tracing::debug!(target: "godot.wire", ?peer, "engine connection established");
        (
            Self {
                outbound,
                shutdown,
                peer,
            },
            inbound_rx,
        )
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queues `command` behind everything queued before it.
    pub fn send(&self, command: &Command) -> Result<()> {
        tracing::debug!(
            target: "godot.wire.socket",
            command = %command.name,
            params = command.parameters.len(),
            "tx"
        );
        self.send_frame(command.encode())
    }

    /// Queues an already framed buffer.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(WireError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| WireError::ConnectionClosed)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Cancelled when either side closes the connection.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let written = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = writer.write_all(&frame) => res,
        };
        if let Err(err) = written {
            tracing::warn!(target: "godot.wire", error = %err, "socket write failed");
            shutdown.cancel();
            break;
        }
        tracing::trace!(target: "godot.wire.socket", bytes = frame.len(), "frame flushed");
    }

    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::Sender<ConnectionEvent>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
) {
    let mut splitter = FrameSplitter::new(config.max_frame_bytes);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    let error = loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break None,
            res = reader.read(&mut buf) => res,
        };
        let n = match read {
            Ok(0) => break None,
            Ok(n) => n,
            Err(err) => break Some(WireError::Io(err)),
        };

        let payloads = match splitter.push(&buf[..n]) {
            Ok(payloads) => payloads,
            Err(err) => break Some(err),
        };

        let mut failed = None;
        for payload in payloads {
            match Command::decode(&payload, config.max_variant_depth) {
                Ok(command) => {
                    tracing::debug!(
                        target: "godot.wire.socket",
                        command = %command.name,
                        bytes = payload.len(),
                        "rx"
                    );
                    if inbound.send(ConnectionEvent::Command(command)).await.is_err() {
                        // Nobody is listening any more.
                        shutdown.cancel();
                        return;
                    }
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        if failed.is_some() {
            break failed;
        }
    };

    match &error {
        Some(err) => {
            tracing::error!(target: "godot.wire", error = %err, "engine connection failed")
        }
        None => tracing::debug!(target: "godot.wire", "engine connection closed"),
    }
    shutdown.cancel();
    let _ = inbound.send(ConnectionEvent::Closed { error }).await;
}

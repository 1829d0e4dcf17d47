//! Transport seam between the client pumps and the network.
//!
//! A [`Connection`] splits into a [`FrameReader`] owned by the inbound pump
//! and a [`FrameWriter`] owned by the outbound pump. The axum `WebSocket` is
//! the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;

use super::client::Frame;

/// A frame read from the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame, accepted when it holds UTF-8.
    Binary(Vec<u8>),
    /// Keepalive probe from the peer.
    Ping,
    /// Keepalive response from the peer.
    Pong,
    /// Peer started the close handshake.
    Close,
}

/// A frame written to the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// Serialized message.
    Text(Frame),
    /// Keepalive probe.
    Ping,
    /// Close handshake.
    Close,
}

/// Transport-level failures. Always fatal to the owning client.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the socket is gone.
    #[error("connection closed")]
    Closed,
    /// Inbound frame exceeded the configured size limit.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// Nothing was read within the read deadline.
    #[error("no frame received within {0:?}")]
    ReadTimeout(Duration),
    /// A write did not complete in time.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    /// Underlying socket error.
    #[error("socket error: {0}")]
    Socket(String),
}

/// Read half of a connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next frame, or `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<Incoming, TransportError>>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Queue a frame without flushing.
    async fn feed(&mut self, frame: Outgoing) -> Result<(), TransportError>;

    /// Flush queued frames to the peer.
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Write and flush a single frame.
    async fn send(&mut self, frame: Outgoing) -> Result<(), TransportError> {
        self.feed(frame).await?;
        self.flush().await
    }
}

/// A bidirectional, message-oriented connection.
pub trait Connection: Send + 'static {
    /// Read half.
    type Reader: FrameReader;
    /// Write half.
    type Writer: FrameWriter;

    /// Split into independently owned halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

// ── axum WebSocket ──────────────────────────────────────────────────────────

/// Read half of an axum `WebSocket`.
pub struct WsReader(SplitStream<WebSocket>);

/// Write half of an axum `WebSocket`.
pub struct WsWriter(SplitSink<WebSocket, Message>);

impl Connection for WebSocket {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn split(self) -> (WsReader, WsWriter) {
        let (sink, stream) = StreamExt::split(self);
        (WsReader(stream), WsWriter(sink))
    }
}

#[async_trait]
impl FrameReader for WsReader {
    async fn recv(&mut self) -> Option<Result<Incoming, TransportError>> {
        let msg = match self.0.next().await? {
            Ok(msg) => msg,
            Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
        };
        Some(Ok(match msg {
            Message::Text(text) => Incoming::Text(text.as_str().to_owned()),
            Message::Binary(data) => Incoming::Binary(data.to_vec()),
            Message::Ping(_) => Incoming::Ping,
            Message::Pong(_) => Incoming::Pong,
            Message::Close(_) => Incoming::Close,
        }))
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn feed(&mut self, frame: Outgoing) -> Result<(), TransportError> {
        let msg = match frame {
            Outgoing::Text(text) => Message::Text(String::from(&*text).into()),
            Outgoing::Ping => Message::Ping(Bytes::new()),
            Outgoing::Close => Message::Close(None),
        };
        SinkExt::feed(&mut self.0, msg)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        SinkExt::flush(&mut self.0)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }
}

// ── In-memory connection for tests ──────────────────────────────────────────

#[cfg(test)]
pub(crate) mod memory {
    use tokio::sync::mpsc;

    use super::{Connection, FrameReader, FrameWriter, Incoming, Outgoing, TransportError};

    /// Server side of an in-memory connection.
    pub(crate) struct MemoryConnection {
        incoming: mpsc::UnboundedReceiver<Incoming>,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        stall_writes: bool,
    }

    /// Test side: push frames in, observe frames written out.
    pub(crate) struct Peer {
        pub(crate) tx: mpsc::UnboundedSender<Incoming>,
        pub(crate) rx: mpsc::UnboundedReceiver<Outgoing>,
    }

    impl Peer {
        pub(crate) fn send_text(&self, text: &str) {
            let _ = self.tx.send(Incoming::Text(text.to_owned()));
        }

        /// Next text frame written to the peer, skipping pings.
        pub(crate) async fn next_text(&mut self) -> Option<String> {
            loop {
                match self.rx.recv().await? {
                    Outgoing::Text(frame) => return Some(frame.to_string()),
                    Outgoing::Ping => {}
                    Outgoing::Close => return None,
                }
            }
        }
    }

    pub(crate) fn pair() -> (MemoryConnection, Peer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            MemoryConnection {
                incoming: in_rx,
                outgoing: out_tx,
                stall_writes: false,
            },
            Peer {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }

    /// A connection whose writes never complete.
    pub(crate) fn stalled_pair() -> (MemoryConnection, Peer) {
        let (mut conn, peer) = pair();
        conn.stall_writes = true;
        (conn, peer)
    }

    pub(crate) struct MemoryReader(mpsc::UnboundedReceiver<Incoming>);

    pub(crate) struct MemoryWriter {
        tx: mpsc::UnboundedSender<Outgoing>,
        stall: bool,
    }

    impl Connection for MemoryConnection {
        type Reader = MemoryReader;
        type Writer = MemoryWriter;

        fn split(self) -> (MemoryReader, MemoryWriter) {
            (
                MemoryReader(self.incoming),
                MemoryWriter {
                    tx: self.outgoing,
                    stall: self.stall_writes,
                },
            )
        }
    }

    #[async_trait::async_trait]
    impl FrameReader for MemoryReader {
        async fn recv(&mut self) -> Option<Result<Incoming, TransportError>> {
            self.0.recv().await.map(Ok)
        }
    }

    #[async_trait::async_trait]
    impl FrameWriter for MemoryWriter {
        async fn feed(&mut self, frame: Outgoing) -> Result<(), TransportError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.tx.send(frame).map_err(|_| TransportError::Closed)
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }
}

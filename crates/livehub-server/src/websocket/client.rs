//! Per-connection state: identity, mailbox and the pump pair.

use std::sync::Arc;
use std::time::{Duration, Instant};

use livehub_core::{ChannelId, ConnectionId, ParticipantId, Role};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::hub::{Hub, HubError};
use super::pump::{self, PumpExit};
use super::transport::Connection;
use crate::config::ClientConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// A serialized message, shared across every mailbox it is delivered to.
pub type Frame = Arc<str>;

/// Authoritative identity of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Caller-supplied participant id.
    pub id: ParticipantId,
    /// Channel the connection is attached to.
    pub channel_id: ChannelId,
    /// Declared role.
    pub role: Role,
    /// Server-assigned id for this particular connection.
    pub connection_id: ConnectionId,
}

impl Participant {
    /// Identity for a newly accepted connection.
    pub fn new(id: ParticipantId, channel_id: ChannelId, role: Role) -> Self {
        Self {
            id,
            channel_id,
            role,
            connection_id: ConnectionId::new(),
        }
    }
}

/// Outcome of a non-blocking delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Frame is in the mailbox.
    Queued,
    /// Mailbox is at capacity.
    Full,
    /// The outbound pump has gone away.
    Closed,
}

/// Registry entry for a connected client.
///
/// Holds the sending half of the client's mailbox and the token its pumps run
/// on. Dropping the entry closes the mailbox; [`close`](Self::close) also
/// stops both pumps without waiting for the outbound backlog.
#[derive(Debug)]
pub struct ClientConnection {
    participant: Participant,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
}

impl ClientConnection {
    /// Create a registry entry and the mailbox it feeds, with its own token.
    pub fn new(participant: Participant, capacity: usize) -> (Self, Mailbox) {
        Self::with_cancel(participant, capacity, CancellationToken::new())
    }

    /// Create a registry entry whose [`close`](Self::close) cancels `cancel`.
    pub fn with_cancel(
        participant: Participant,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let entry = Self {
            participant,
            tx,
            cancel,
            connected_at: Instant::now(),
        };
        (entry, Mailbox { rx })
    }

    /// Identity of the client.
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Token the client's pumps stop on.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the client's pumps. Called by the hub whenever it drops the entry.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Try to enqueue a frame without waiting.
    pub fn try_deliver(&self, frame: Frame) -> Delivery {
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Receiving half of a client's outbound queue.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Frame>,
}

impl Mailbox {
    /// Wait for at least one frame, then take up to `limit` already queued.
    ///
    /// Returns 0 once the mailbox is closed and drained.
    pub async fn recv_many(&mut self, buffer: &mut Vec<Frame>, limit: usize) -> usize {
        self.rx.recv_many(buffer, limit).await
    }

    /// Take a frame if one is queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Whether the sending half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

/// A connection that has not been registered yet.
pub struct Client<C> {
    participant: Participant,
    connection: C,
    config: ClientConfig,
}

impl<C: Connection> Client<C> {
    /// Wrap an accepted connection.
    pub fn new(participant: Participant, connection: C, config: ClientConfig) -> Self {
        Self {
            participant,
            connection,
            config,
        }
    }

    /// Identity of the client.
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Register with the hub, then spawn the outbound and inbound pumps.
    ///
    /// The client is visible to [`Hub::channel_subscribers`] before either
    /// pump runs. The pumps stop when `shutdown` is cancelled or when the hub
    /// removes the client.
    pub async fn start(self, hub: &Hub, shutdown: &CancellationToken) -> Result<ClientTasks, HubError> {
        let Self {
            participant,
            connection,
            config,
        } = self;

        let cancel = shutdown.child_token();
        let (entry, mailbox) =
            ClientConnection::with_cancel(participant.clone(), config.mailbox_capacity, cancel.clone());
        hub.register(entry).await?;

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(
            participant_id = %participant.id,
            channel_id = %participant.channel_id,
            connection_id = %participant.connection_id,
            role = %participant.role,
            "client connected"
        );

        let (reader, writer) = connection.split();
        let outbound = tokio::spawn(pump::run_outbound(
            writer,
            mailbox,
            participant.connection_id.clone(),
            config,
            cancel.clone(),
        ));
        let inbound = tokio::spawn(pump::run_inbound(
            reader,
            participant,
            hub.clone(),
            config,
            cancel,
        ));

        Ok(ClientTasks { inbound, outbound })
    }
}

/// Handles to a running client's pumps.
pub struct ClientTasks {
    /// Inbound pump: reads, authorizes, broadcasts, unregisters on exit.
    pub inbound: JoinHandle<PumpExit>,
    /// Outbound pump: sole writer to the connection.
    pub outbound: JoinHandle<PumpExit>,
}

impl ClientTasks {
    /// Wait for both pumps; returns `(inbound, outbound)` exits.
    pub async fn join(self) -> (PumpExit, PumpExit) {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        (joined(inbound), joined(outbound))
    }
}

fn joined(result: Result<PumpExit, tokio::task::JoinError>) -> PumpExit {
    result.unwrap_or_else(|e| {
        warn!(error = %e, "client pump task failed");
        PumpExit::Cancelled
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use livehub_core::MessageType;
    use serde_json::Value;

    use super::*;
    use crate::config::HubConfig;
    use crate::websocket::transport::memory;

    fn participant(id: &str, channel: &str, role: Role) -> Participant {
        Participant::new(
            ParticipantId::from_raw(id),
            ChannelId::from_raw(channel),
            role,
        )
    }

    fn config() -> ClientConfig {
        ClientConfig {
            mailbox_capacity: 8,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn participants_get_distinct_connection_ids() {
        let a = participant("p1", "s1", Role::Subscriber);
        let b = participant("p1", "s1", Role::Subscriber);
        assert_ne!(a.connection_id, b.connection_id);
    }

    #[tokio::test]
    async fn try_deliver_queues() {
        let (entry, mut mailbox) = ClientConnection::new(participant("p1", "s1", Role::Subscriber), 4);
        assert_eq!(entry.try_deliver(Frame::from("hello")), Delivery::Queued);
        assert_eq!(mailbox.try_recv().as_deref(), Some("hello"));
    }

    #[test]
    fn try_deliver_full() {
        let (entry, _mailbox) = ClientConnection::new(participant("p1", "s1", Role::Subscriber), 1);
        assert_eq!(entry.try_deliver(Frame::from("a")), Delivery::Queued);
        assert_eq!(entry.try_deliver(Frame::from("b")), Delivery::Full);
    }

    #[test]
    fn try_deliver_closed() {
        let (entry, mailbox) = ClientConnection::new(participant("p1", "s1", Role::Subscriber), 4);
        drop(mailbox);
        assert_eq!(entry.try_deliver(Frame::from("a")), Delivery::Closed);
    }

    #[test]
    fn dropping_entry_closes_mailbox() {
        let (entry, mailbox) = ClientConnection::new(participant("p1", "s1", Role::Subscriber), 4);
        assert!(!mailbox.is_closed());
        drop(entry);
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn recv_many_takes_everything_queued() {
        let (entry, mut mailbox) = ClientConnection::new(participant("p1", "s1", Role::Subscriber), 8);
        for i in 0..3 {
            let _ = entry.try_deliver(Frame::from(format!("m{i}")));
        }
        let mut buf = Vec::new();
        assert_eq!(mailbox.recv_many(&mut buf, 8).await, 3);
        assert_eq!(buf.len(), 3);
        drop(entry);
        buf.clear();
        assert_eq!(mailbox.recv_many(&mut buf, 8).await, 0);
    }

    #[tokio::test]
    async fn start_registers_before_pumps_run() {
        let cancel = CancellationToken::new();
        let (hub, _loop) = Hub::start(HubConfig::default(), cancel.clone());
        let (conn, _peer) = memory::pair();
        let viewer = participant("v1", "s1", Role::Subscriber);

        let _tasks = Client::new(viewer, conn, config())
            .start(&hub, &cancel)
            .await
            .unwrap();

        let subs = hub.channel_subscribers(&ChannelId::from_raw("s1")).await;
        assert_eq!(subs.viewer_count, 1);
        assert_eq!(subs.viewer_ids[0].as_str(), "v1");
    }

    #[tokio::test]
    async fn subscriber_sees_own_join() {
        let cancel = CancellationToken::new();
        let (hub, _loop) = Hub::start(HubConfig::default(), cancel.clone());
        let (conn, mut peer) = memory::pair();

        let _tasks = Client::new(participant("v1", "s1", Role::Subscriber), conn, config())
            .start(&hub, &cancel)
            .await
            .unwrap();

        let text = tokio::time::timeout(Duration::from_secs(1), peer.next_text())
            .await
            .unwrap()
            .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], MessageType::ParticipantJoined.as_str());
        assert_eq!(v["sender_id"], "v1");
    }

    #[tokio::test]
    async fn peer_disconnect_unregisters() {
        let cancel = CancellationToken::new();
        let (hub, _loop) = Hub::start(HubConfig::default(), cancel.clone());
        let (conn, peer) = memory::pair();

        let tasks = Client::new(participant("p1", "s1", Role::Publisher), conn, config())
            .start(&hub, &cancel)
            .await
            .unwrap();
        drop(peer);

        let (inbound, _outbound) = tokio::time::timeout(Duration::from_secs(1), tasks.join())
            .await
            .unwrap();
        assert!(matches!(inbound, PumpExit::PeerClosed));
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn start_fails_when_hub_stopped() {
        let cancel = CancellationToken::new();
        let (hub, handle) = Hub::start(HubConfig::default(), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();

        let (conn, _peer) = memory::pair();
        let result = Client::new(participant("v1", "s1", Role::Subscriber), conn, config())
            .start(&hub, &cancel)
            .await;
        assert!(matches!(result, Err(HubError::Stopped)));
    }

    #[tokio::test]
    async fn evicted_client_stops_publishing() {
        let cancel = CancellationToken::new();
        let (hub, _loop) = Hub::start(HubConfig::default(), cancel.clone());
        let (watcher, mut watcher_mb) =
            ClientConnection::new(participant("w", "s1", Role::Publisher), 64);
        hub.register(watcher).await.unwrap();

        let (conn, peer) = memory::stalled_pair();
        let slow_config = ClientConfig {
            mailbox_capacity: 2,
            ..ClientConfig::default()
        };
        let tasks = Client::new(participant("slow", "s1", Role::Publisher), conn, slow_config)
            .start(&hub, &cancel)
            .await
            .unwrap();

        for i in 0..5 {
            hub.broadcast_to_channel(&ChannelId::from_raw("s1"), Frame::from(format!("f{i}")))
                .await;
        }
        assert_eq!(hub.connection_count().await, 1);

        let inbound = tokio::time::timeout(Duration::from_secs(1), tasks.inbound)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(inbound, PumpExit::Cancelled));

        while watcher_mb.try_recv().is_some() {}
        peer.send_text(r#"{"type":"chat","content":"after eviction"}"#);
        tokio::task::yield_now().await;
        hub.broadcast_to_channel(&ChannelId::from_raw("s1"), Frame::from("marker"))
            .await;
        assert_eq!(watcher_mb.try_recv().as_deref(), Some("marker"));
    }

    #[tokio::test]
    async fn replaced_client_stops_publishing() {
        let cancel = CancellationToken::new();
        let (hub, _loop) = Hub::start(HubConfig::default(), cancel.clone());
        let (watcher, mut watcher_mb) =
            ClientConnection::new(participant("w", "s1", Role::Publisher), 64);
        hub.register(watcher).await.unwrap();

        let (conn, old_peer) = memory::stalled_pair();
        let old = Client::new(participant("host", "s1", Role::Publisher), conn, config())
            .start(&hub, &cancel)
            .await
            .unwrap();

        let (replacement, _replacement_mb) =
            ClientConnection::new(participant("host", "s1", Role::Publisher), 8);
        hub.register(replacement).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(1), old.inbound)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(inbound, PumpExit::Cancelled));
        assert_eq!(hub.connection_count().await, 2);

        old_peer.send_text(r#"{"type":"chat","content":"from replaced"}"#);
        tokio::task::yield_now().await;
        hub.broadcast_to_channel(&ChannelId::from_raw("s1"), Frame::from("marker"))
            .await;
        assert_eq!(watcher_mb.try_recv().as_deref(), Some("marker"));
    }

    #[tokio::test]
    async fn shutdown_stops_both_pumps() {
        let cancel = CancellationToken::new();
        let (hub, _loop) = Hub::start(HubConfig::default(), CancellationToken::new());
        let (conn, _peer) = memory::pair();

        let tasks = Client::new(participant("p1", "s1", Role::Publisher), conn, config())
            .start(&hub, &cancel)
            .await
            .unwrap();
        cancel.cancel();

        let (inbound, outbound) = tokio::time::timeout(Duration::from_secs(1), tasks.join())
            .await
            .unwrap();
        assert!(matches!(inbound, PumpExit::Cancelled));
        assert!(matches!(outbound, PumpExit::Cancelled));
        assert_eq!(hub.connection_count().await, 0);
    }
}

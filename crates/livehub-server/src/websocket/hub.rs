//! Channel registry and serialized broadcast loop.
//!
//! [`Hub`] is a cheap, cloneable handle. Every registry mutation goes through
//! one bounded command queue drained by [`HubLoop`], so register, unregister
//! and broadcast are totally ordered. Queries take the registry read lock
//! directly.

use std::collections::HashMap;
use std::sync::Arc;

use livehub_core::{ChannelId, Message, ParticipantId, Role};
use metrics::{counter, gauge};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ClientConnection, Delivery, Frame, Participant};
use crate::config::HubConfig;
use crate::metrics::{
    HUB_BROADCASTS_TOTAL, HUB_CLIENTS_ACTIVE, HUB_DELIVERIES_TOTAL, HUB_EVICTIONS_TOTAL,
};

/// Errors surfaced to hub callers.
#[derive(Debug, Error)]
pub enum HubError {
    /// The processing loop has exited.
    #[error("hub loop is not running")]
    Stopped,
}

/// Snapshot of the subscribers attached to a channel.
#[derive(Clone, Debug, Serialize)]
pub struct ChannelSubscribers {
    /// Queried channel.
    pub channel_id: ChannelId,
    /// Number of subscribers.
    pub viewer_count: usize,
    /// Subscriber ids, in no particular order.
    pub viewer_ids: Vec<ParticipantId>,
}

enum HubCommand {
    Register {
        client: ClientConnection,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        participant: Participant,
        ack: oneshot::Sender<bool>,
    },
    Broadcast {
        channel_id: ChannelId,
        frame: Frame,
        ack: oneshot::Sender<()>,
    },
}

type Registry = Arc<RwLock<HashMap<ParticipantId, ClientConnection>>>;

/// Handle to the registry and its processing loop.
#[derive(Clone)]
pub struct Hub {
    registry: Registry,
    commands: mpsc::Sender<HubCommand>,
}

/// The serialized processing loop. Sole writer of the registry.
pub struct HubLoop {
    registry: Registry,
    commands: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Create a hub and the loop that must be run for it to make progress.
    pub fn new(config: HubConfig) -> (Self, HubLoop) {
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let hub = Self {
            registry: Arc::clone(&registry),
            commands: tx,
        };
        (hub, HubLoop { registry, commands: rx })
    }

    /// Create a hub and spawn its loop, stopped by `cancel`.
    pub fn start(config: HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (hub, hub_loop) = Self::new(config);
        let handle = tokio::spawn(hub_loop.run(cancel));
        (hub, handle)
    }

    /// Add a client, replacing any live connection with the same participant
    /// id. Returns once the loop has applied it.
    pub async fn register(&self, client: ClientConnection) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.submit(HubCommand::Register { client, ack }).await?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Remove the client if the registered entry belongs to the same
    /// connection. Returns `false` when nothing was removed.
    pub async fn unregister(&self, participant: &Participant) -> bool {
        let (ack, done) = oneshot::channel();
        let cmd = HubCommand::Unregister {
            participant: participant.clone(),
            ack,
        };
        if self.submit(cmd).await.is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Deliver a pre-serialized frame to every client on the channel.
    pub async fn broadcast_to_channel(&self, channel_id: &ChannelId, frame: Frame) {
        if self.try_broadcast(channel_id, frame).await.is_err() {
            debug!(%channel_id, "hub stopped, broadcast dropped");
        }
    }

    /// Serialize and broadcast a message to its channel.
    pub async fn broadcast_message(&self, message: &Message) {
        if self.publish(message).await.is_err() {
            debug!(channel_id = %message.channel_id(), "hub stopped, broadcast dropped");
        }
    }

    /// Like [`broadcast_message`](Self::broadcast_message), but fails with
    /// [`HubError::Stopped`] when the loop did not apply the broadcast.
    pub async fn publish(&self, message: &Message) -> Result<(), HubError> {
        match message.to_json() {
            Ok(json) => {
                self.try_broadcast(message.channel_id(), Frame::from(json))
                    .await
            }
            Err(e) => {
                warn!(message_type = %message.kind(), error = %e, "failed to serialize message");
                Ok(())
            }
        }
    }

    async fn try_broadcast(&self, channel_id: &ChannelId, frame: Frame) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        let cmd = HubCommand::Broadcast {
            channel_id: channel_id.clone(),
            frame,
            ack,
        };
        self.submit(cmd).await?;
        done.await.map_err(|_| HubError::Stopped)
    }

    /// Subscribers currently attached to `channel_id`.
    pub async fn channel_subscribers(&self, channel_id: &ChannelId) -> ChannelSubscribers {
        let registry = self.registry.read().await;
        let viewer_ids: Vec<ParticipantId> = registry
            .values()
            .map(ClientConnection::participant)
            .filter(|p| p.role == Role::Subscriber && &p.channel_id == channel_id)
            .map(|p| p.id.clone())
            .collect();
        ChannelSubscribers {
            channel_id: channel_id.clone(),
            viewer_count: viewer_ids.len(),
            viewer_ids,
        }
    }

    /// Number of registered clients across all channels.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Whether the loop is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn submit(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.commands.send(cmd).await.map_err(|_| HubError::Stopped)
    }
}

impl HubLoop {
    /// Process requests until `cancel` fires or every [`Hub`] handle is
    /// dropped. On exit the registry is cleared and every client is closed.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("hub loop started");
        loop {
            let cmd = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                cmd = self.commands.recv() => cmd,
            };
            let Some(cmd) = cmd else { break };
            self.apply(cmd).await;
        }

        self.commands.close();
        let drained = {
            let mut registry = self.registry.write().await;
            let n = registry.len();
            for (_, client) in registry.drain() {
                client.close();
            }
            n
        };
        gauge!(HUB_CLIENTS_ACTIVE).set(0.0);
        info!(drained, "hub loop stopped");
    }

    async fn apply(&self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { client, ack } => {
                self.register(client).await;
                let _ = ack.send(());
            }
            HubCommand::Unregister { participant, ack } => {
                let removed = self.unregister(&participant).await;
                let _ = ack.send(removed);
            }
            HubCommand::Broadcast {
                channel_id,
                frame,
                ack,
            } => {
                self.fan_out(&channel_id, &frame).await;
                let _ = ack.send(());
            }
        }
    }

    async fn register(&self, client: ClientConnection) {
        let participant = client.participant().clone();
        let (replaced, active) = {
            let mut registry = self.registry.write().await;
            let replaced = registry.insert(participant.id.clone(), client);
            (replaced, registry.len())
        };
        set_active(active);

        if let Some(old) = replaced {
            // Older connection is evicted silently.
            old.close();
            counter!(HUB_EVICTIONS_TOTAL, "reason" => "replaced").increment(1);
            info!(
                participant_id = %participant.id,
                connection_id = %participant.connection_id,
                replaced_connection_id = %old.participant().connection_id,
                "replaced existing connection for participant"
            );
        }
        debug!(
            participant_id = %participant.id,
            channel_id = %participant.channel_id,
            role = %participant.role,
            "client registered"
        );

        if participant.role == Role::Subscriber {
            self.announce(&Message::participant_joined(
                participant.channel_id.clone(),
                participant.id.clone(),
            ))
            .await;
        }
    }

    async fn unregister(&self, participant: &Participant) -> bool {
        let (removed, active) = {
            let mut registry = self.registry.write().await;
            let owned = registry
                .get(&participant.id)
                .is_some_and(|c| c.participant().connection_id == participant.connection_id);
            let removed = if owned {
                registry.remove(&participant.id)
            } else {
                None
            };
            (removed, registry.len())
        };
        let Some(entry) = removed else {
            return false;
        };
        set_active(active);
        debug!(
            participant_id = %participant.id,
            channel_id = %participant.channel_id,
            age_secs = entry.age().as_secs_f64(),
            "client unregistered"
        );
        entry.close();
        drop(entry);

        if participant.role == Role::Subscriber {
            self.announce(&Message::participant_left(
                participant.channel_id.clone(),
                participant.id.clone(),
            ))
            .await;
        }
        true
    }

    async fn announce(&self, message: &Message) {
        match message.to_json() {
            Ok(json) => self.fan_out(message.channel_id(), &Frame::from(json)).await,
            Err(e) => warn!(message_type = %message.kind(), error = %e, "failed to serialize event"),
        }
    }

    /// Non-blocking delivery to every client on the channel. Clients whose
    /// mailbox is full are evicted without a leave event.
    async fn fan_out(&self, channel_id: &ChannelId, frame: &Frame) {
        let mut to_remove = Vec::new();
        let mut delivered: u64 = 0;
        {
            let registry = self.registry.read().await;
            for (id, client) in registry
                .iter()
                .filter(|(_, c)| &c.participant().channel_id == channel_id)
            {
                match client.try_deliver(Arc::clone(frame)) {
                    Delivery::Queued => delivered += 1,
                    Delivery::Full => to_remove.push(id.clone()),
                    Delivery::Closed => {
                        debug!(participant_id = %id, "mailbox closed, skipping");
                    }
                }
            }
        }
        counter!(HUB_BROADCASTS_TOTAL).increment(1);
        counter!(HUB_DELIVERIES_TOTAL).increment(delivered);

        if to_remove.is_empty() {
            return;
        }
        let mut registry = self.registry.write().await;
        for id in to_remove {
            if let Some(client) = registry.remove(&id) {
                client.close();
                counter!(HUB_EVICTIONS_TOTAL, "reason" => "mailbox_full").increment(1);
                warn!(
                    participant_id = %id,
                    channel_id = %channel_id,
                    connection_id = %client.participant().connection_id,
                    "mailbox full, evicting client"
                );
            }
        }
        set_active(registry.len());
    }
}

#[allow(clippy::cast_precision_loss)]
fn set_active(count: usize) {
    gauge!(HUB_CLIENTS_ACTIVE).set(count as f64);
}

//! The two per-client pumps.
//!
//! The inbound pump owns the read half: it enforces the size limit and read
//! deadline, runs each frame through [`process_inbound`] and unregisters the
//! client when it stops. The outbound pump owns the write half: it drains
//! the mailbox in batches, sends keepalive pings and closes the connection
//! once the mailbox is closed.

use std::time::Duration;

use livehub_core::ConnectionId;
use metrics::{counter, gauge, histogram};
use tokio::time::{Instant, MissedTickBehavior, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::client::{Frame, Mailbox, Participant};
use super::handler::{Disposition, process_inbound};
use super::hub::Hub;
use super::transport::{FrameReader, FrameWriter, Incoming, Outgoing, TransportError};
use crate::config::ClientConfig;
use crate::metrics::{
    INBOUND_DROPPED_TOTAL, INBOUND_MESSAGES_TOTAL, OUTBOUND_FRAMES_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_CONNECTIONS_ACTIVE, WS_DISCONNECTIONS_TOTAL,
};

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// Peer closed the connection or sent a close frame.
    PeerClosed,
    /// Read, write, deadline or size failure.
    Transport(TransportError),
    /// The client's cancellation token fired.
    Cancelled,
    /// The mailbox was closed by unregister, eviction or hub shutdown.
    MailboxClosed,
}

/// Read frames until the connection fails, then unregister the client.
#[instrument(skip_all, fields(
    participant_id = %participant.id,
    channel_id = %participant.channel_id,
    connection_id = %participant.connection_id,
))]
pub async fn run_inbound<R: FrameReader>(
    mut reader: R,
    participant: Participant,
    hub: Hub,
    config: ClientConfig,
    cancel: CancellationToken,
) -> PumpExit {
    let started = Instant::now();
    let exit = read_loop(&mut reader, &participant, &hub, &config, &cancel).await;
    let removed = hub.unregister(&participant).await;

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(reason = ?exit, removed, "client disconnected");
    exit
}

async fn read_loop<R: FrameReader>(
    reader: &mut R,
    participant: &Participant,
    hub: &Hub,
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> PumpExit {
    let mut deadline = Instant::now() + config.read_deadline;
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return PumpExit::Cancelled,
            next = timeout_at(deadline, reader.recv()) => next,
        };
        let frame = match next {
            Err(_) => return PumpExit::Transport(TransportError::ReadTimeout(config.read_deadline)),
            Ok(None) => return PumpExit::PeerClosed,
            Ok(Some(Err(e))) => return PumpExit::Transport(e),
            Ok(Some(Ok(frame))) => frame,
        };
        deadline = Instant::now() + config.read_deadline;

        let size = match &frame {
            Incoming::Text(text) => text.len(),
            Incoming::Binary(bytes) => bytes.len(),
            Incoming::Ping | Incoming::Pong | Incoming::Close => 0,
        };
        if size > config.max_message_size {
            return PumpExit::Transport(TransportError::FrameTooLarge {
                size,
                limit: config.max_message_size,
            });
        }

        let text = match frame {
            Incoming::Text(text) => text,
            Incoming::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    debug!(len = e.as_bytes().len(), "dropping non-UTF-8 binary frame");
                    counter!(INBOUND_DROPPED_TOTAL, "reason" => "binary").increment(1);
                    continue;
                }
            },
            Incoming::Ping | Incoming::Pong => continue,
            Incoming::Close => return PumpExit::PeerClosed,
        };

        counter!(INBOUND_MESSAGES_TOTAL).increment(1);
        match process_inbound(&text, participant) {
            Disposition::Broadcast(message) => hub.broadcast_message(&message).await,
            Disposition::Dropped(reason) => {
                debug!(%reason, "inbound message dropped");
                counter!(INBOUND_DROPPED_TOTAL, "reason" => reason.label()).increment(1);
            }
        }
    }
}

/// Write mailbox frames and keepalive pings until the mailbox closes, a write
/// fails or `cancel` fires. Cancels `cancel` on exit so the inbound pump
/// stops too.
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_outbound<W: FrameWriter>(
    mut writer: W,
    mut mailbox: Mailbox,
    connection_id: ConnectionId,
    config: ClientConfig,
    cancel: CancellationToken,
) -> PumpExit {
    let exit = write_loop(&mut writer, &mut mailbox, &config, &cancel).await;
    cancel.cancel();
    debug!(reason = ?exit, "outbound pump stopped");
    exit
}

async fn write_loop<W: FrameWriter>(
    writer: &mut W,
    mailbox: &mut Mailbox,
    config: &ClientConfig,
    cancel: &CancellationToken,
) -> PumpExit {
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    let limit = config.mailbox_capacity.max(1);
    let mut batch: Vec<Frame> = Vec::with_capacity(limit);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = send_bounded(writer, Outgoing::Close, config.write_timeout).await;
                return PumpExit::Cancelled;
            }
            n = mailbox.recv_many(&mut batch, limit) => {
                if n == 0 {
                    let _ = send_bounded(writer, Outgoing::Close, config.write_timeout).await;
                    return PumpExit::MailboxClosed;
                }
                if let Err(e) = write_batch(writer, &mut batch, config.write_timeout).await {
                    return PumpExit::Transport(e);
                }
                counter!(OUTBOUND_FRAMES_TOTAL).increment(u64::try_from(n).unwrap_or(u64::MAX));
            }
            _ = ping.tick() => {
                if let Err(e) = send_bounded(writer, Outgoing::Ping, config.write_timeout).await {
                    return PumpExit::Transport(e);
                }
            }
        }
    }
}

async fn write_batch<W: FrameWriter>(
    writer: &mut W,
    batch: &mut Vec<Frame>,
    limit: Duration,
) -> Result<(), TransportError> {
    let write = async {
        for frame in batch.drain(..) {
            writer.feed(Outgoing::Text(frame)).await?;
        }
        writer.flush().await
    };
    timeout(limit, write)
        .await
        .unwrap_or(Err(TransportError::WriteTimeout(limit)))
}

async fn send_bounded<W: FrameWriter>(
    writer: &mut W,
    frame: Outgoing,
    limit: Duration,
) -> Result<(), TransportError> {
    timeout(limit, writer.send(frame))
        .await
        .unwrap_or(Err(TransportError::WriteTimeout(limit)))
}

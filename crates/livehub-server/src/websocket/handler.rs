//! Inbound message processing: decode, stamp identity, authorize by role.

use std::fmt;

use livehub_core::{InboundMessage, Message, MessageType, Role};

use super::client::Participant;

/// What to do with one inbound frame.
#[derive(Debug)]
pub enum Disposition {
    /// Broadcast to the sender's channel.
    Broadcast(Message),
    /// Drop locally; the sender is not told.
    Dropped(DropReason),
}

/// Why an inbound frame was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not a valid message envelope.
    Malformed(String),
    /// The sender's role may not originate this message type.
    Forbidden {
        /// Requested type.
        kind: MessageType,
        /// Sender's role.
        role: Role,
    },
}

impl DropReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Forbidden { .. } => "forbidden",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed message: {e}"),
            Self::Forbidden { kind, role } => write!(f, "{role} may not send {kind}"),
        }
    }
}

/// Decode a text frame from `participant` and decide its fate.
///
/// Identity and timestamp on the resulting message always come from the
/// server, never from the frame.
pub fn process_inbound(text: &str, participant: &Participant) -> Disposition {
    let inbound = match InboundMessage::decode(text) {
        Ok(m) => m,
        Err(e) => return Disposition::Dropped(DropReason::Malformed(e.to_string())),
    };

    if !inbound.kind.permits(participant.role) {
        return Disposition::Dropped(DropReason::Forbidden {
            kind: inbound.kind,
            role: participant.role,
        });
    }

    Disposition::Broadcast(inbound.stamp(&participant.id, &participant.channel_id, participant.role))
}

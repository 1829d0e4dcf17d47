//! The message envelope exchanged over a channel.
//!
//! Outbound [`Message`]s are always built on the server: the sender identity
//! comes from the connection that produced them and the timestamp is taken
//! at construction. Clients send [`InboundMessage`]s, which carry only the
//! type and body; anything else they put on the wire is ignored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{CoreError, Result};
use crate::ids::{ChannelId, ParticipantId};

/// Authorization tag attached to every participant.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs the stream: may showcase products and post offers.
    Publisher,
    /// Watches the stream: may signal purchase intent.
    Subscriber,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "publisher" => Ok(Self::Publisher),
            "subscriber" => Ok(Self::Subscriber),
            other => Err(CoreError::UnknownRole(other.to_owned())),
        }
    }
}

/// Message type tag (`type` on the wire).
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free-form chat, any role.
    Chat,
    /// Product presented by the publisher.
    ProductShowcase,
    /// A subscriber signalling interest in buying.
    PurchaseIntent,
    /// Time-limited offer from the publisher.
    SpecialOffer,
    /// Out-of-band announcement posted over HTTP.
    Announcement,
    /// A subscriber attached to the channel.
    ParticipantJoined,
    /// A subscriber detached from the channel.
    ParticipantLeft,
}

impl MessageType {
    /// Whether a client holding `role` may originate this message type.
    ///
    /// Server-originated types (announcements and presence events) are never
    /// accepted from a connection.
    pub fn permits(self, role: Role) -> bool {
        match self {
            Self::Chat => true,
            Self::ProductShowcase | Self::SpecialOffer => role == Role::Publisher,
            Self::PurchaseIntent => role == Role::Subscriber,
            Self::Announcement | Self::ParticipantJoined | Self::ParticipantLeft => false,
        }
    }

    /// Wire name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::ProductShowcase => "product_showcase",
            Self::PurchaseIntent => "purchase_intent",
            Self::SpecialOffer => "special_offer",
            Self::Announcement => "announcement",
            Self::ParticipantJoined => "participant_joined",
            Self::ParticipantLeft => "participant_left",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope delivered to every client on a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: MessageType,
    channel_id: ChannelId,
    sender_id: ParticipantId,
    sender_role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn new(
        kind: MessageType,
        channel_id: ChannelId,
        sender_id: ParticipantId,
        sender_role: Role,
    ) -> Self {
        Self {
            kind,
            channel_id,
            sender_id,
            sender_role,
            content: None,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach text content.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Presence event for a subscriber that attached to `channel_id`.
    pub fn participant_joined(channel_id: ChannelId, participant_id: ParticipantId) -> Self {
        Self::new(
            MessageType::ParticipantJoined,
            channel_id,
            participant_id,
            Role::Subscriber,
        )
    }

    /// Presence event for a subscriber that detached from `channel_id`.
    pub fn participant_left(channel_id: ChannelId, participant_id: ParticipantId) -> Self {
        Self::new(
            MessageType::ParticipantLeft,
            channel_id,
            participant_id,
            Role::Subscriber,
        )
    }

    /// Announcement posted by a publisher outside of a live connection.
    pub fn announcement(
        channel_id: ChannelId,
        sender_id: ParticipantId,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            MessageType::Announcement,
            channel_id,
            sender_id,
            Role::Publisher,
        )
        .with_content(content)
    }

    /// Message type.
    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Channel the message belongs to.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Participant that produced the message.
    pub fn sender_id(&self) -> &ParticipantId {
        &self.sender_id
    }

    /// Role of the sender.
    pub fn sender_role(&self) -> Role {
        self.sender_role
    }

    /// Optional text body.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Optional structured body.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Server-assigned creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(CoreError::Encode)
    }
}

/// What a connected client is allowed to put on the wire.
///
/// Identity and timestamp fields sent by the client are not part of this type
/// and are discarded during decoding.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct InboundMessage {
    /// Requested message type.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Optional text body.
    #[serde(default)]
    pub content: Option<String>,
    /// Optional structured body.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl InboundMessage {
    /// Decode one frame of client input.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(CoreError::Decode)
    }

    /// Turn client input into an outbound message carrying the sender's
    /// authoritative identity and the current time.
    pub fn stamp(self, sender_id: &ParticipantId, channel_id: &ChannelId, role: Role) -> Message {
        Message {
            kind: self.kind,
            channel_id: channel_id.clone(),
            sender_id: sender_id.clone(),
            sender_role: role,
            content: self.content,
            payload: self.payload,
            timestamp: Utc::now(),
        }
    }
}

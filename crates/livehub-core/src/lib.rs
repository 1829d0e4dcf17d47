//! # livehub-core
//!
//! Types shared across the livehub crates:
//!
//! - [`ids`]: participant, channel and connection identifiers
//! - [`messages`]: the wire envelope, message types, roles and the
//!   per-role authorization table
//! - [`errors`]: decode/encode failures

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod messages;

pub use errors::CoreError;
pub use ids::{ChannelId, ConnectionId, ParticipantId};
pub use messages::{InboundMessage, Message, MessageType, Role};

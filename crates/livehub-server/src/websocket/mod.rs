//! Channel registry, per-client pumps and the transport they run over.

pub mod client;
pub mod handler;
pub mod hub;
pub mod pump;
pub mod transport;

pub use client::{Client, ClientConnection, ClientTasks, Delivery, Frame, Mailbox, Participant};
pub use hub::{ChannelSubscribers, Hub, HubError, HubLoop};
pub use pump::PumpExit;
pub use transport::{Connection, FrameReader, FrameWriter, Incoming, Outgoing, TransportError};

//! # livehub-server
//!
//! Real-time channel fan-out over WebSocket.
//!
//! - [`websocket::hub`]: registry of connected clients and the serialized
//!   register/unregister/broadcast loop
//! - [`websocket::client`]: per-connection identity, mailbox and pump pair
//! - [`server`]: axum routes for upgrade, viewer queries, announcements,
//!   health and metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

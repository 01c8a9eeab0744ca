//! Realtime chat over a dumb broadcast relay.
//!
//! The relay knows nothing about conversations: every frame a client sends is
//! rebroadcast to every connected client, sender included. All chat semantics
//! (public room, per-peer private threads) live in each client's session.
//!
//! - [`event`] defines the `ChatEvent` payload and the two channel names.
//! - [`frame`] wraps a payload in the channel envelope carried over websocket.
//! - [`config`] holds relay settings (bind address, port, CORS origin).
//! - [`relay`] is the axum websocket server that fans frames out over a Tokio
//!   `broadcast` channel.
//! - [`conversation`] is the immutable conversation snapshot and its reducer.
//! - [`session`] drives a snapshot from user actions and relay frames through
//!   an injected outgoing channel.
//! - [`connection`] connects to a relay and bridges the socket to channels.
//! - [`cli`] and [`client`] provide the command line and the terminal client.

pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod event;
pub mod frame;
pub mod relay;
pub mod session;

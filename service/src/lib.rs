//! `roster-service`: the roster over a Unix domain socket.
//!
//! Serves the `RosterApi` surface as JSON-RPC-lite (one JSON object per
//! line) and provides [`client::SocketClient`], the matching client.

pub mod client;
pub mod ipc;
pub mod protocol;

/// Protocol version for the roster service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

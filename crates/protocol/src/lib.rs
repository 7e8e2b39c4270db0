//! SaltDock Protocol
//!
//! Shared types for the remote command channel between the console and the
//! master. These types are serialized as one JSON object per WebSocket text
//! frame.

pub mod client;
pub mod server;

pub use client::{CommandRequest, Mode};
pub use server::ServerEvent;

/// Server path the remote command channel is mounted at.
pub const REMOTE_COMMANDS_PATH: &str = "/rhn/websocket/minion/remote-commands";

/// WebSocket sub-protocol negotiated on open.
pub const SUBPROTOCOL: &str = "protocolOne";

pub const DEFAULT_TARGET: &str = "*";
pub const DEFAULT_COMMAND: &str = "ls -lha";

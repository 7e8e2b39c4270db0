//! SaltDock console
//!
//! Runs ad-hoc commands across the minions a target expression matches.
//! A command session previews the target, then runs the command, folding the
//! master's unordered per-minion events into one consistent state.

pub mod channel;
pub mod completion;
pub mod config;
pub mod error;
pub mod logging;
pub mod probe;
pub mod render;
pub mod session;
pub mod session_actor;
pub mod session_command;
pub mod store;
pub mod transition;

pub use channel::{Channel, ChannelConfig, ChannelEvent};
pub use error::{classify_status, classify_transport, ConsoleError, SessionError};
pub use session::{CommandSession, SessionNotice};
pub use session_actor::{SessionActorHandle, WaitOutcome};
pub use store::{MinionRecord, MinionState, MinionStore};
pub use transition::{Phase, SessionState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

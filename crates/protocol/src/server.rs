//! Server → Client messages

use serde::{Deserialize, Serialize};

/// Per-agent progress events streamed by the master.
///
/// Events for different minions arrive in no particular order. The only
/// ordering guarantee is the FIFO order of the channel itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Full set of minions the master began tracking for a request.
    AsyncJobStart {
        minions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<u64>,
    },
    /// A minion matched the target expression.
    Match {
        minion: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<u64>,
    },
    /// A minion finished executing the command.
    RunResult {
        minion: String,
        out: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<u64>,
    },
    /// A minion did not answer within the master's deadline.
    TimedOut {
        minion: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<u64>,
    },
    /// Any event type this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn session_id(&self) -> Option<u64> {
        match self {
            ServerEvent::AsyncJobStart { session_id, .. }
            | ServerEvent::Match { session_id, .. }
            | ServerEvent::RunResult { session_id, .. }
            | ServerEvent::TimedOut { session_id, .. } => *session_id,
            ServerEvent::Unknown => None,
        }
    }

    /// Wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::AsyncJobStart { .. } => "asyncJobStart",
            ServerEvent::Match { .. } => "match",
            ServerEvent::RunResult { .. } => "runResult",
            ServerEvent::TimedOut { .. } => "timedOut",
            ServerEvent::Unknown => "unknown",
        }
    }
}

//! Error types and the user-facing error classifier.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// User-facing error categories shown by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleError {
    CannotConnect,
    ConnectionClosed,
    SessionExpired,
    Authorization,
    ServerError,
    /// Aggregate warning once a session settles with timed-out minions.
    PartialResponse,
}

impl ConsoleError {
    pub fn message(self) -> &'static str {
        match self {
            ConsoleError::CannotConnect => "Error connecting to server.",
            ConsoleError::ConnectionClosed => "Connection to server closed",
            ConsoleError::SessionExpired => {
                "Session expired, please reload the page to run command on systems."
            }
            ConsoleError::Authorization => {
                "Authorization error, please reload the page or try to logout/login again."
            }
            ConsoleError::ServerError => "Server error, please check log files.",
            ConsoleError::PartialResponse => "Not all minions responded.",
        }
    }
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// How the channel failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Open { reason: String },
    Error { reason: String },
    Closed { reason: Option<String> },
}

/// Map a channel failure to what the operator sees.
pub fn classify_transport(failure: &TransportFailure) -> ConsoleError {
    match failure {
        TransportFailure::Open { .. } => ConsoleError::CannotConnect,
        TransportFailure::Error { .. } | TransportFailure::Closed { .. } => {
            ConsoleError::ConnectionClosed
        }
    }
}

/// Map an out-of-band HTTP status. Statuses outside the whitelist produce no
/// message.
pub fn classify_status(status: u16) -> Option<ConsoleError> {
    match status {
        401 => Some(ConsoleError::SessionExpired),
        403 => Some(ConsoleError::Authorization),
        s if s >= 500 => Some(ConsoleError::ServerError),
        _ => None,
    }
}

/// Errors from the remote command channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    pub fn to_transport_failure(&self) -> TransportFailure {
        match self {
            ChannelError::Connect { reason, .. } | ChannelError::InvalidEndpoint { reason, .. } => {
                TransportFailure::Open {
                    reason: reason.clone(),
                }
            }
            ChannelError::Json(e) => TransportFailure::Error {
                reason: e.to_string(),
            },
            ChannelError::Closed => TransportFailure::Closed { reason: None },
        }
    }
}

/// Errors returned synchronously when a session request is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Target expression is empty")]
    EmptyTarget,

    #[error("Command is empty")]
    EmptyCommand,

    #[error("Target {target:?} has not been previewed")]
    PreviewRequired { target: String },

    #[error("Connection to server lost")]
    Disconnected,

    #[error("Session actor is not running")]
    ActorGone,
}

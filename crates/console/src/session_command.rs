//! Commands sent to a session actor by its handle.

use tokio::sync::oneshot;

use crate::error::SessionError;

pub enum SessionCommand {
    StartPreview {
        target: String,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    StartRun {
        target: String,
        command: String,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    SetTarget {
        target: String,
    },
    /// Close the channel and stop the actor. Replies once the close frame
    /// has gone out (or the grace period expired).
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

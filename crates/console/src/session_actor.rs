//! Session actor. Owns a CommandSession and processes inputs sequentially.
//!
//! One tokio task is the only consumer of both the command mailbox and the
//! channel's event stream, so each message is applied as one atomic step.
//! Callers talk to it through `SessionActorHandle`; reads go through
//! `ArcSwap` without touching the actor.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent};
use crate::error::SessionError;
use crate::session::{CommandSession, SessionNotice};
use crate::session_command::SessionCommand;
use crate::transition::SessionState;

const COMMAND_BUFFER: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How a wait for a session to settle ended.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Settled(Arc<SessionState>),
    /// The channel went away before every minion reached a terminal state.
    Disconnected(Arc<SessionState>),
    /// A newer request replaced the one being waited on.
    Superseded(Arc<SessionState>),
    /// The master listed no minions for the request, so it can never settle.
    NoMatches(Arc<SessionState>),
    Expired(Arc<SessionState>),
}

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionState>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionActorHandle {
    /// Spawn the actor over an open channel.
    pub fn spawn(
        channel: Channel,
        events: mpsc::Receiver<ChannelEvent>,
        target: impl Into<String>,
    ) -> SessionActorHandle {
        let session = CommandSession::new(channel, target);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = SessionActorHandle {
            command_tx,
            snapshot: session.snapshot_arc(),
            notices: session.notices(),
        };

        tokio::spawn(actor_loop(session, command_rx, events));
        handle
    }

    /// Queue a preview. Resolves as soon as the request is on the channel.
    pub async fn start_preview(&self, target: &str) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::StartPreview {
            target: target.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    pub async fn start_run(&self, command: &str, target: &str) -> Result<u64, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::StartRun {
            target: target.to_string(),
            command: command.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::ActorGone)?
    }

    pub async fn set_target(&self, target: &str) -> Result<(), SessionError> {
        self.send(SessionCommand::SetTarget {
            target: target.to_string(),
        })
        .await
    }

    /// Close the channel and stop the actor. The last snapshot stays readable.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(SessionCommand::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Lock-free snapshot read.
    pub fn state(&self) -> Arc<SessionState> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Wait until request `session_id` settles, the channel drops, or `limit`
    /// elapses. The wait never changes session state.
    pub async fn wait_settled(&self, session_id: u64, limit: Duration) -> WaitOutcome {
        let mut rx = self.subscribe();
        let deadline = Instant::now() + limit;

        loop {
            let state = self.state();
            if let Some(outcome) = wait_outcome(&state, session_id) {
                return outcome;
            }
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => return WaitOutcome::Expired(self.state()),
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    let state = self.state();
                    return wait_outcome(&state, session_id)
                        .unwrap_or(WaitOutcome::Disconnected(state));
                }
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            }
        }
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.command_tx.send(cmd).await.map_err(|_| {
            warn!(
                component = "session_actor",
                event = "session_actor.mailbox_closed",
                "Actor channel closed, command dropped"
            );
            SessionError::ActorGone
        })
    }
}

fn wait_outcome(state: &Arc<SessionState>, session_id: u64) -> Option<WaitOutcome> {
    if state.session_id != session_id {
        return Some(WaitOutcome::Superseded(Arc::clone(state)));
    }
    if state.phase.is_settled() {
        return Some(WaitOutcome::Settled(Arc::clone(state)));
    }
    if !state.connected {
        return Some(WaitOutcome::Disconnected(Arc::clone(state)));
    }
    if state.job_started && state.minions.is_empty() {
        return Some(WaitOutcome::NoMatches(Arc::clone(state)));
    }
    None
}

async fn actor_loop(
    mut session: CommandSession,
    mut command_rx: mpsc::Receiver<SessionCommand>,
    events: mpsc::Receiver<ChannelEvent>,
) {
    let mut events = Some(events);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else { break };
                if let SessionCommand::Disconnect { reply } = cmd {
                    session.close_channel();
                    if let Some(rx) = events.take() {
                        drain_until_closed(rx).await;
                    }
                    let _ = reply.send(());
                    break;
                }
                handle_command(cmd, &mut session);
            }
            event = next_event(&mut events) => {
                let Some(event) = event else {
                    // Reader vanished without a terminal event.
                    session.handle_channel_event(ChannelEvent::Closed { reason: None });
                    events = None;
                    continue;
                };
                if !session.handle_channel_event(event) {
                    events = None;
                }
            }
        }
    }

    info!(
        component = "session_actor",
        event = "session_actor.stopped",
        session_id = session.state().session_id,
        "Session actor stopped"
    );
}

fn handle_command(cmd: SessionCommand, session: &mut CommandSession) {
    match cmd {
        SessionCommand::StartPreview { target, reply } => {
            let _ = reply.send(session.start_preview(&target));
        }
        SessionCommand::StartRun {
            target,
            command,
            reply,
        } => {
            let _ = reply.send(session.start_run(&command, &target));
        }
        SessionCommand::SetTarget { target } => session.set_target(&target),
        SessionCommand::Disconnect { reply } => {
            let _ = reply.send(());
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Discard traffic after a local disconnect until the close completes.
async fn drain_until_closed(mut events: mpsc::Receiver<ChannelEvent>) {
    let drained = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(event) = events.recv().await {
            if matches!(event, ChannelEvent::Closed { .. } | ChannelEvent::Error(_)) {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!(
            component = "session_actor",
            event = "session_actor.close_timeout",
            "Close handshake did not finish in time"
        );
    }
}

#[cfg(test)]
mod tests {
    use saltdock_protocol::{CommandRequest, ServerEvent};

    use super::*;
    use crate::channel::Outbound;
    use crate::error::ConsoleError;
    use crate::store::MinionState;
    use crate::transition::Phase;

    #[tokio::test]
    async fn actor_settles_preview_from_channel_events() {
        let mut mem = Channel::in_memory();
        let handle = SessionActorHandle::spawn(mem.channel, mem.events, "*");

        let id = handle.start_preview("*").await.unwrap();
        let Some(Outbound::Text(json)) = mem.outbound.recv().await else {
            panic!("expected request");
        };
        assert_eq!(
            serde_json::from_str::<CommandRequest>(&json).unwrap(),
            CommandRequest::preview("*", id)
        );

        let tx = mem.events_tx.clone();
        tokio::spawn(async move {
            for event in [
                ServerEvent::AsyncJobStart {
                    minions: vec!["m1".into(), "m2".into()],
                    session_id: Some(id),
                },
                ServerEvent::Match {
                    minion: "m1".into(),
                    session_id: Some(id),
                },
                ServerEvent::TimedOut {
                    minion: "m2".into(),
                    session_id: Some(id),
                },
            ] {
                tx.send(ChannelEvent::Message(event)).await.unwrap();
            }
        });

        let outcome = handle.wait_settled(id, Duration::from_secs(5)).await;
        let WaitOutcome::Settled(state) = outcome else {
            panic!("expected settled, got {outcome:?}");
        };
        assert_eq!(state.phase, Phase::PreviewSettled { partial: true });
        assert_eq!(state.errors, vec![ConsoleError::PartialResponse]);
        assert_eq!(
            state.minions.get("m1").map(|r| r.state),
            Some(MinionState::Matched)
        );
    }

    #[tokio::test]
    async fn close_before_any_match_leaves_preview_in_progress() {
        let mem = Channel::in_memory();
        let handle = SessionActorHandle::spawn(mem.channel, mem.events, "*");
        let mut notices = handle.subscribe();

        let id = handle.start_preview("*").await.unwrap();
        mem.events_tx
            .send(ChannelEvent::Message(ServerEvent::AsyncJobStart {
                minions: vec!["m1".into()],
                session_id: Some(id),
            }))
            .await
            .unwrap();
        mem.events_tx
            .send(ChannelEvent::Closed {
                reason: Some("server restart".into()),
            })
            .await
            .unwrap();

        let outcome = handle.wait_settled(id, Duration::from_secs(5)).await;
        let WaitOutcome::Disconnected(state) = outcome else {
            panic!("expected disconnected, got {outcome:?}");
        };
        assert_eq!(state.phase, Phase::PreviewInProgress);
        assert_eq!(state.errors, vec![ConsoleError::ConnectionClosed]);

        let mut saw_error = false;
        while let Ok(notice) = notices.try_recv() {
            saw_error |= notice == SessionNotice::Error(ConsoleError::ConnectionClosed);
        }
        assert!(saw_error);
        assert_eq!(
            handle.start_preview("*").await,
            Err(SessionError::Disconnected)
        );
    }

    #[tokio::test]
    async fn wait_expires_without_touching_state() {
        let mem = Channel::in_memory();
        let handle = SessionActorHandle::spawn(mem.channel, mem.events, "*");
        let id = handle.start_preview("*").await.unwrap();

        let outcome = handle.wait_settled(id, Duration::from_millis(20)).await;
        let WaitOutcome::Expired(state) = outcome else {
            panic!("expected expiry, got {outcome:?}");
        };
        assert_eq!(state.phase, Phase::PreviewRequested);
        assert!(state.connected);
        drop(mem.events_tx);
    }

    #[tokio::test]
    async fn empty_job_start_ends_wait_without_settling() {
        let mem = Channel::in_memory();
        let handle = SessionActorHandle::spawn(mem.channel, mem.events, "*");
        let id = handle.start_preview("mail*").await.unwrap();
        mem.events_tx
            .send(ChannelEvent::Message(ServerEvent::AsyncJobStart {
                minions: vec![],
                session_id: Some(id),
            }))
            .await
            .unwrap();

        let outcome = handle.wait_settled(id, Duration::from_secs(30)).await;
        let WaitOutcome::NoMatches(state) = outcome else {
            panic!("expected no matches, got {outcome:?}");
        };
        assert_eq!(state.phase, Phase::PreviewInProgress);
        assert!(!state.preview_complete);
        assert!(state.errors.is_empty());
        assert_eq!(handle.state().phase, Phase::PreviewInProgress);
    }

    #[tokio::test]
    async fn set_target_invalidates_run() {
        let mem = Channel::in_memory();
        let handle = SessionActorHandle::spawn(mem.channel, mem.events, "*");

        let id = handle.start_preview("*").await.unwrap();
        mem.events_tx
            .send(ChannelEvent::Message(ServerEvent::AsyncJobStart {
                minions: vec!["m1".into()],
                session_id: Some(id),
            }))
            .await
            .unwrap();
        mem.events_tx
            .send(ChannelEvent::Message(ServerEvent::Match {
                minion: "m1".into(),
                session_id: Some(id),
            }))
            .await
            .unwrap();
        assert!(matches!(
            handle.wait_settled(id, Duration::from_secs(5)).await,
            WaitOutcome::Settled(_)
        ));

        handle.set_target("db*").await.unwrap();
        assert!(matches!(
            handle.start_run("uptime", "db*").await,
            Err(SessionError::PreviewRequired { .. })
        ));
    }

    #[tokio::test]
    async fn disconnect_stops_actor() {
        let mem = Channel::in_memory();
        let handle = SessionActorHandle::spawn(mem.channel, mem.events, "*");
        let events_tx = mem.events_tx;
        tokio::spawn(async move {
            let _ = events_tx.send(ChannelEvent::Closed { reason: None }).await;
        });

        handle.disconnect().await;
        assert_eq!(
            handle.start_preview("*").await,
            Err(SessionError::ActorGone)
        );
    }
}

//! Command session
//!
//! Owns the channel and the current `SessionState`. Every input runs through
//! `transition()`; the resulting state replaces the old one wholesale and is
//! published as a lock-free snapshot before any observer is notified.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent};
use crate::error::{ConsoleError, SessionError, TransportFailure};
use crate::transition::{check, transition, Effect, Input, Phase, SessionState};

const NOTICE_BUFFER: usize = 256;

/// What observers hear about after each applied input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Updated { revision: u64 },
    Settled { session_id: u64, phase: Phase },
    Error(ConsoleError),
}

pub struct CommandSession {
    state: SessionState,
    channel: Channel,
    snapshot: Arc<ArcSwap<SessionState>>,
    notices: broadcast::Sender<SessionNotice>,
}

impl CommandSession {
    pub fn new(channel: Channel, target: impl Into<String>) -> Self {
        let state = SessionState::new(target);
        let snapshot = Arc::new(ArcSwap::from_pointee(state.clone()));
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            state,
            channel,
            snapshot,
            notices,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot_arc(&self) -> Arc<ArcSwap<SessionState>> {
        Arc::clone(&self.snapshot)
    }

    pub fn notices(&self) -> broadcast::Sender<SessionNotice> {
        self.notices.clone()
    }

    /// Begin a preview of `target`. Returns the new session tag as soon as
    /// the request is queued.
    pub fn start_preview(&mut self, target: &str) -> Result<u64, SessionError> {
        self.request(Input::StartPreview {
            target: target.to_string(),
        })
    }

    /// Run `command` on the minions of a settled preview of `target`.
    pub fn start_run(&mut self, command: &str, target: &str) -> Result<u64, SessionError> {
        self.request(Input::StartRun {
            target: target.to_string(),
            command: command.to_string(),
        })
    }

    pub fn set_target(&mut self, target: &str) {
        self.apply(Input::TargetChanged {
            target: target.to_string(),
        });
    }

    /// Feed one channel event through the transition. Returns `false` once
    /// the channel has reported its terminal event.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Message(event) => {
                self.apply(Input::Server(event));
                true
            }
            ChannelEvent::Malformed { error, .. } => {
                self.apply(Input::Malformed { error });
                true
            }
            ChannelEvent::Error(reason) => {
                self.apply(Input::ConnectionLost(TransportFailure::Error { reason }));
                false
            }
            ChannelEvent::Closed { reason } => {
                self.apply(Input::ConnectionLost(TransportFailure::Closed { reason }));
                false
            }
        }
    }

    pub fn close_channel(&self) {
        self.channel.close();
    }

    fn request(&mut self, input: Input) -> Result<u64, SessionError> {
        check(&self.state, &input)?;
        if self.apply(input) {
            Ok(self.state.session_id)
        } else {
            Err(SessionError::Disconnected)
        }
    }

    /// Apply one input and execute its effects. Returns `false` if an
    /// outbound request could not be queued.
    fn apply(&mut self, input: Input) -> bool {
        let current = std::mem::replace(&mut self.state, SessionState::new(""));
        let (next, effects) = transition(current, input);
        self.state = next;

        let mut send_failure = None;
        for effect in effects {
            match effect {
                Effect::Send(request) => {
                    if let Err(e) = self.channel.send(&request) {
                        send_failure = Some(e);
                    }
                }
                Effect::Notify(err) => {
                    warn!(
                        component = "session",
                        event = "session.error",
                        session_id = self.state.session_id,
                        error = %err,
                        "Session error surfaced"
                    );
                    let _ = self.notices.send(SessionNotice::Error(err));
                }
                Effect::Settled { phase } => {
                    let counts = self.state.minions.counts();
                    info!(
                        component = "session",
                        event = "session.settled",
                        session_id = self.state.session_id,
                        phase = ?phase,
                        minions = self.state.minions.len(),
                        timed_out = counts.timed_out,
                        "Session settled"
                    );
                    let _ = self.notices.send(SessionNotice::Settled {
                        session_id: self.state.session_id,
                        phase,
                    });
                }
                Effect::Anomaly(anomaly) => {
                    warn!(
                        component = "session",
                        event = "session.protocol_anomaly",
                        session_id = anomaly.session_id,
                        minion = ?anomaly.minion,
                        "Ignoring event: {anomaly}"
                    );
                }
                Effect::Stale { event, session_id } => {
                    debug!(
                        component = "session",
                        event = "session.stale_event",
                        kind = event,
                        event_session_id = ?session_id,
                        current_session_id = self.state.session_id,
                        "Dropped event for superseded request"
                    );
                }
            }
        }

        if let Some(e) = send_failure {
            warn!(
                component = "session",
                event = "session.send_failed",
                endpoint = %self.channel.endpoint(),
                error = %e,
                "Request not sent"
            );
            self.apply(Input::ConnectionLost(e.to_transport_failure()));
            return false;
        }

        self.publish();
        true
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(self.state.clone()));
        let _ = self.notices.send(SessionNotice::Updated {
            revision: self.state.revision,
        });
    }
}

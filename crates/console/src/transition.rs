//! Pure session transition function
//!
//! All command-session logic lives here as a pure, synchronous function:
//! `transition(state, input) -> (state, effects)`. No IO, no async, no
//! locking. The session actor feeds it one input at a time and executes the
//! returned effects.

use std::fmt;

use saltdock_protocol::{CommandRequest, Mode, ServerEvent};
use serde::Serialize;

use crate::completion::{has_timeouts, is_settled};
use crate::error::{classify_transport, ConsoleError, SessionError, TransportFailure};
use crate::store::{MinionState, MinionStore, Rejection, Update};

// ---------------------------------------------------------------------------
// Phase: session-level state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    PreviewRequested,
    PreviewInProgress,
    /// `partial` is set when at least one minion timed out.
    PreviewSettled { partial: bool },
    RunRequested,
    RunInProgress,
    RunSettled { partial: bool },
}

impl Phase {
    pub fn mode(self) -> Option<Mode> {
        match self {
            Phase::Idle => None,
            Phase::PreviewRequested | Phase::PreviewInProgress | Phase::PreviewSettled { .. } => {
                Some(Mode::Preview)
            }
            Phase::RunRequested | Phase::RunInProgress | Phase::RunSettled { .. } => Some(Mode::Run),
        }
    }

    pub fn is_settled(self) -> bool {
        matches!(self, Phase::PreviewSettled { .. } | Phase::RunSettled { .. })
    }

    fn in_progress(mode: Mode) -> Self {
        match mode {
            Mode::Preview => Phase::PreviewInProgress,
            Mode::Run => Phase::RunInProgress,
        }
    }

    fn settled(mode: Mode, partial: bool) -> Self {
        match mode {
            Mode::Preview => Phase::PreviewSettled { partial },
            Mode::Run => Phase::RunSettled { partial },
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol anomalies: recorded, logged, never fatal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    ResultForUnknownMinion,
    ResultInState(MinionState),
    ResultDuringPreview,
    DuplicateJobStart,
    UnknownEvent,
    Malformed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolAnomaly {
    pub session_id: u64,
    pub minion: Option<String>,
    pub kind: AnomalyKind,
}

impl fmt::Display for ProtocolAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minion = self.minion.as_deref().unwrap_or("-");
        match &self.kind {
            AnomalyKind::ResultForUnknownMinion => {
                write!(f, "result for unknown minion {minion}")
            }
            AnomalyKind::ResultInState(state) => {
                write!(f, "result for minion {minion} in state {}", state.label())
            }
            AnomalyKind::ResultDuringPreview => {
                write!(f, "result for minion {minion} during preview")
            }
            AnomalyKind::DuplicateJobStart => f.write_str("second asyncJobStart for one request"),
            AnomalyKind::UnknownEvent => f.write_str("unknown event type"),
            AnomalyKind::Malformed { error } => write!(f, "malformed message: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState: pure data snapshot of one client's command session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionState {
    /// Tag of the most recent request. Zero before the first request.
    pub session_id: u64,
    /// Bumped once per applied input.
    pub revision: u64,
    pub phase: Phase,
    pub target: String,
    pub command: Option<String>,
    pub minions: MinionStore,
    pub errors: Vec<ConsoleError>,
    pub anomalies: Vec<ProtocolAnomaly>,
    /// The current request's `asyncJobStart` has been applied. Nothing
    /// settles before it, since the full minion list is not known yet.
    pub job_started: bool,
    /// Target of the most recent preview request.
    pub previewed_target: Option<String>,
    /// Set when a preview of `target` settled; gates Run.
    pub preview_complete: bool,
    pub connected: bool,
}

impl SessionState {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            session_id: 0,
            revision: 0,
            phase: Phase::Idle,
            target: target.into(),
            command: None,
            minions: MinionStore::new(),
            errors: Vec::new(),
            anomalies: Vec::new(),
            job_started: false,
            previewed_target: None,
            preview_complete: false,
            connected: true,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        self.phase.mode()
    }
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    StartPreview { target: String },
    StartRun { target: String, command: String },
    TargetChanged { target: String },
    Server(ServerEvent),
    Malformed { error: String },
    ConnectionLost(TransportFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(CommandRequest),
    Notify(ConsoleError),
    Settled { phase: Phase },
    Anomaly(ProtocolAnomaly),
    /// An event that belongs to no live request was dropped.
    Stale {
        event: &'static str,
        session_id: Option<u64>,
    },
}

/// Validate a caller-issued input against the current state before it is
/// applied. Server and channel inputs are always accepted.
pub fn check(state: &SessionState, input: &Input) -> Result<(), SessionError> {
    match input {
        Input::StartPreview { target } => {
            if !state.connected {
                return Err(SessionError::Disconnected);
            }
            if target.trim().is_empty() {
                return Err(SessionError::EmptyTarget);
            }
            Ok(())
        }
        Input::StartRun { target, command } => {
            if !state.connected {
                return Err(SessionError::Disconnected);
            }
            if target.trim().is_empty() {
                return Err(SessionError::EmptyTarget);
            }
            if command.trim().is_empty() {
                return Err(SessionError::EmptyCommand);
            }
            let previewed = state.previewed_target.as_deref() == Some(target.as_str());
            if !state.preview_complete || !previewed || state.target != *target {
                return Err(SessionError::PreviewRequired {
                    target: target.clone(),
                });
            }
            Ok(())
        }
        Input::TargetChanged { .. }
        | Input::Server(_)
        | Input::Malformed { .. }
        | Input::ConnectionLost(_) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Exactly one arm runs per input. Returns the replacement state and the
/// effects (outbound requests, notifications) for the caller to execute.
pub fn transition(mut state: SessionState, input: Input) -> (SessionState, Vec<Effect>) {
    let mut effects = Vec::new();

    match input {
        Input::StartPreview { target } => {
            state.session_id += 1;
            state.target = target;
            state.command = None;
            state.preview_complete = false;
            state.previewed_target = Some(state.target.clone());
            reset_session(&mut state, Phase::PreviewRequested);
            effects.push(Effect::Send(CommandRequest::preview(
                state.target.clone(),
                state.session_id,
            )));
        }

        Input::StartRun { target, command } => {
            state.session_id += 1;
            state.target = target;
            state.command = Some(command.clone());
            reset_session(&mut state, Phase::RunRequested);
            effects.push(Effect::Send(CommandRequest::run(
                state.target.clone(),
                command,
                state.session_id,
            )));
        }

        Input::TargetChanged { target } => {
            if target != state.target {
                state.target = target;
                state.preview_complete = false;
            }
        }

        Input::Server(event) => {
            let Some(mode) = state.phase.mode() else {
                effects.push(Effect::Stale {
                    event: event.kind(),
                    session_id: event.session_id(),
                });
                return (state, effects);
            };
            if let Some(tag) = event.session_id() {
                if tag != state.session_id {
                    effects.push(Effect::Stale {
                        event: event.kind(),
                        session_id: Some(tag),
                    });
                    return (state, effects);
                }
            }

            if matches!(state.phase, Phase::PreviewRequested | Phase::RunRequested) {
                state.phase = Phase::in_progress(mode);
            }
            apply_event(&mut state, mode, event, &mut effects);
            settle_if_complete(&mut state, mode, &mut effects);
        }

        Input::Malformed { error } => {
            record_anomaly(&mut state, None, AnomalyKind::Malformed { error }, &mut effects);
        }

        Input::ConnectionLost(failure) => {
            if state.connected {
                state.connected = false;
                let err = classify_transport(&failure);
                state.errors.push(err);
                effects.push(Effect::Notify(err));
            }
        }
    }

    state.revision += 1;
    (state, effects)
}

/// Discard the previous request's minions and errors.
fn reset_session(state: &mut SessionState, phase: Phase) {
    state.phase = phase;
    state.job_started = false;
    state.minions = MinionStore::new();
    state.errors.clear();
    state.anomalies.clear();
}

fn apply_event(state: &mut SessionState, mode: Mode, event: ServerEvent, effects: &mut Vec<Effect>) {
    match event {
        ServerEvent::AsyncJobStart { minions, .. } => {
            if state.job_started {
                record_anomaly(state, None, AnomalyKind::DuplicateJobStart, effects);
                return;
            }
            state.job_started = true;
            for id in &minions {
                state.minions.discover(id);
            }
        }
        ServerEvent::Match { minion, .. } => {
            state.minions.mark_matched(&minion);
        }
        ServerEvent::RunResult { minion, out, .. } => {
            if mode == Mode::Preview {
                record_anomaly(state, Some(minion), AnomalyKind::ResultDuringPreview, effects);
                return;
            }
            if let Update::Rejected(rejection) = state.minions.complete(&minion, &out) {
                let kind = match rejection {
                    Rejection::UnknownMinion => AnomalyKind::ResultForUnknownMinion,
                    Rejection::InvalidState(s) => AnomalyKind::ResultInState(s),
                };
                record_anomaly(state, Some(minion), kind, effects);
            }
        }
        ServerEvent::TimedOut { minion, .. } => {
            state.minions.mark_timed_out(&minion);
        }
        ServerEvent::Unknown => {
            record_anomaly(state, None, AnomalyKind::UnknownEvent, effects);
        }
    }
}

/// Move into the settled phase the first time every minion of a started job
/// is terminal.
fn settle_if_complete(state: &mut SessionState, mode: Mode, effects: &mut Vec<Effect>) {
    if state.phase.is_settled() || !state.job_started || !is_settled(&state.minions, mode) {
        return;
    }

    let partial = has_timeouts(&state.minions);
    state.phase = Phase::settled(mode, partial);
    // A target changed while the preview was in flight stays unpreviewed.
    if mode == Mode::Preview && state.previewed_target.as_deref() == Some(state.target.as_str()) {
        state.preview_complete = true;
    }
    if partial {
        state.errors.push(ConsoleError::PartialResponse);
        effects.push(Effect::Notify(ConsoleError::PartialResponse));
    }
    effects.push(Effect::Settled { phase: state.phase });
}

fn record_anomaly(
    state: &mut SessionState,
    minion: Option<String>,
    kind: AnomalyKind,
    effects: &mut Vec<Effect>,
) {
    let anomaly = ProtocolAnomaly {
        session_id: state.session_id,
        minion,
        kind,
    };
    state.anomalies.push(anomaly.clone());
    effects.push(Effect::Anomaly(anomaly));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

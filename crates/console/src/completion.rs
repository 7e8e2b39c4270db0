//! Completion detection over the minion store.

use saltdock_protocol::Mode;

use crate::store::{MinionState, MinionStore};

/// Every tracked minion either matched or timed out. Never true for an
/// empty store.
pub fn is_preview_complete(store: &MinionStore) -> bool {
    is_settled(store, Mode::Preview)
}

/// Every tracked minion either returned output or timed out.
pub fn is_run_complete(store: &MinionStore) -> bool {
    is_settled(store, Mode::Run)
}

pub fn is_settled(store: &MinionStore, mode: Mode) -> bool {
    !store.is_empty() && store.iter().all(|r| r.state.is_terminal_for(mode))
}

pub fn has_timeouts(store: &MinionStore) -> bool {
    store.iter().any(|r| r.state == MinionState::TimedOut)
}

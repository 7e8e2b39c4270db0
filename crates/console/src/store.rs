//! Minion state store
//!
//! Insertion-ordered arena of per-minion progress for one command session.
//! Records are only ever added or moved forward along
//! `Pending → Matched → Completed` or `Pending → TimedOut`; nothing is removed
//! and terminal states are absorbing.

use std::collections::HashMap;

use saltdock_protocol::Mode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MinionState {
    Pending,
    Matched,
    TimedOut,
    Completed,
}

impl MinionState {
    /// Whether a minion in this state needs no further events for `mode`.
    pub fn is_terminal_for(self, mode: Mode) -> bool {
        match mode {
            Mode::Preview => matches!(self, MinionState::Matched | MinionState::TimedOut),
            Mode::Run => matches!(self, MinionState::Completed | MinionState::TimedOut),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MinionState::Pending => "pending",
            MinionState::Matched => "matched",
            MinionState::TimedOut => "timed out",
            MinionState::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinionRecord {
    pub id: String,
    pub state: MinionState,
    /// Command output, present only once `state` is `Completed`.
    pub output: Option<String>,
}

/// Why a store mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownMinion,
    InvalidState(MinionState),
}

/// Outcome of a single store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    Inserted(MinionState),
    Transitioned { from: MinionState, to: MinionState },
    Unchanged,
    Rejected(Rejection),
}

impl Update {
    pub fn changed(&self) -> bool {
        matches!(self, Update::Inserted(_) | Update::Transitioned { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub matched: usize,
    pub timed_out: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MinionStore {
    records: Vec<MinionRecord>,
    index: HashMap<String, usize>,
}

impl MinionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id` as `Pending`. Already-known ids are left alone.
    pub fn discover(&mut self, id: &str) -> Update {
        if self.index.contains_key(id) {
            return Update::Unchanged;
        }
        self.insert(id, MinionState::Pending);
        Update::Inserted(MinionState::Pending)
    }

    /// `Pending → Matched`. An id seen for the first time is recorded as
    /// matched directly.
    pub fn mark_matched(&mut self, id: &str) -> Update {
        let Some(record) = self.get_mut(id) else {
            self.insert(id, MinionState::Matched);
            return Update::Inserted(MinionState::Matched);
        };
        if record.state != MinionState::Pending {
            return Update::Unchanged;
        }
        record.state = MinionState::Matched;
        Update::Transitioned {
            from: MinionState::Pending,
            to: MinionState::Matched,
        }
    }

    /// `Pending → TimedOut`. A late timeout never overwrites a minion that
    /// already matched or completed.
    pub fn mark_timed_out(&mut self, id: &str) -> Update {
        let Some(record) = self.get_mut(id) else {
            self.insert(id, MinionState::TimedOut);
            return Update::Inserted(MinionState::TimedOut);
        };
        if record.state != MinionState::Pending {
            return Update::Unchanged;
        }
        record.state = MinionState::TimedOut;
        Update::Transitioned {
            from: MinionState::Pending,
            to: MinionState::TimedOut,
        }
    }

    /// `Matched → Completed`, storing the command output. Anything else is
    /// rejected and leaves the record untouched.
    pub fn complete(&mut self, id: &str, output: &str) -> Update {
        let Some(record) = self.get_mut(id) else {
            return Update::Rejected(Rejection::UnknownMinion);
        };
        if record.state != MinionState::Matched {
            return Update::Rejected(Rejection::InvalidState(record.state));
        }
        record.state = MinionState::Completed;
        record.output = Some(output.to_string());
        Update::Transitioned {
            from: MinionState::Matched,
            to: MinionState::Completed,
        }
    }

    pub fn get(&self, id: &str) -> Option<&MinionRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Records in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &MinionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in &self.records {
            match record.state {
                MinionState::Pending => counts.pending += 1,
                MinionState::Matched => counts.matched += 1,
                MinionState::TimedOut => counts.timed_out += 1,
                MinionState::Completed => counts.completed += 1,
            }
        }
        counts
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut MinionRecord> {
        let i = *self.index.get(id)?;
        self.records.get_mut(i)
    }

    fn insert(&mut self, id: &str, state: MinionState) {
        self.index.insert(id.to_string(), self.records.len());
        self.records.push(MinionRecord {
            id: id.to_string(),
            state,
            output: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(store: &MinionStore) -> Vec<&str> {
        store.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn discover_keeps_insertion_order_and_is_idempotent() {
        let mut store = MinionStore::new();
        assert_eq!(store.discover("web2"), Update::Inserted(MinionState::Pending));
        assert_eq!(store.discover("web1"), Update::Inserted(MinionState::Pending));
        assert_eq!(store.discover("web2"), Update::Unchanged);

        assert_eq!(ids(&store), vec!["web2", "web1"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn match_before_discovery_creates_record() {
        let mut store = MinionStore::new();
        assert_eq!(store.mark_matched("m1"), Update::Inserted(MinionState::Matched));
        assert_eq!(store.discover("m1"), Update::Unchanged);
        assert_eq!(store.get("m1").unwrap().state, MinionState::Matched);
    }

    #[test]
    fn duplicate_match_is_a_no_op() {
        let mut store = MinionStore::new();
        store.discover("m1");
        assert!(store.mark_matched("m1").changed());
        assert_eq!(store.mark_matched("m1"), Update::Unchanged);
        assert_eq!(store.get("m1").unwrap().state, MinionState::Matched);
    }

    #[test]
    fn late_timeout_does_not_overwrite_matched_or_completed() {
        let mut store = MinionStore::new();
        store.discover("m1");
        store.discover("m2");
        store.mark_matched("m1");
        store.mark_matched("m2");
        store.complete("m2", "ok");

        assert_eq!(store.mark_timed_out("m1"), Update::Unchanged);
        assert_eq!(store.mark_timed_out("m2"), Update::Unchanged);
        assert_eq!(store.get("m1").unwrap().state, MinionState::Matched);
        assert_eq!(store.get("m2").unwrap().state, MinionState::Completed);
    }

    #[test]
    fn timed_out_is_absorbing() {
        let mut store = MinionStore::new();
        store.discover("m1");
        store.mark_timed_out("m1");

        assert_eq!(store.mark_matched("m1"), Update::Unchanged);
        assert_eq!(
            store.complete("m1", "late"),
            Update::Rejected(Rejection::InvalidState(MinionState::TimedOut))
        );
        let record = store.get("m1").unwrap();
        assert_eq!(record.state, MinionState::TimedOut);
        assert_eq!(record.output, None);
    }

    #[test]
    fn complete_requires_matched() {
        let mut store = MinionStore::new();
        assert_eq!(
            store.complete("ghost", "out"),
            Update::Rejected(Rejection::UnknownMinion)
        );

        store.discover("m1");
        assert_eq!(
            store.complete("m1", "out"),
            Update::Rejected(Rejection::InvalidState(MinionState::Pending))
        );

        store.mark_matched("m1");
        assert!(store.complete("m1", "ok").changed());
        assert_eq!(
            store.complete("m1", "ok2"),
            Update::Rejected(Rejection::InvalidState(MinionState::Completed))
        );
        assert_eq!(store.get("m1").unwrap().output.as_deref(), Some("ok"));
    }

    #[test]
    fn counts_by_state() {
        let mut store = MinionStore::new();
        for id in ["a", "b", "c", "d"] {
            store.discover(id);
        }
        store.mark_matched("a");
        store.mark_matched("b");
        store.complete("b", "");
        store.mark_timed_out("c");

        assert_eq!(
            store.counts(),
            StateCounts {
                pending: 1,
                matched: 1,
                timed_out: 1,
                completed: 1,
            }
        );
    }

    #[test]
    fn terminal_states_depend_on_mode() {
        assert!(MinionState::Matched.is_terminal_for(Mode::Preview));
        assert!(!MinionState::Matched.is_terminal_for(Mode::Run));
        assert!(MinionState::TimedOut.is_terminal_for(Mode::Run));
        assert!(!MinionState::Pending.is_terminal_for(Mode::Preview));
    }
}

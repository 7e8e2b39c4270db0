//! Terminal rendering of session snapshots.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, ContentArrangement, Table};
use console::style;

use crate::store::{MinionRecord, MinionState};
use crate::transition::{Phase, SessionState};

pub fn empty_message(state: &SessionState) -> &'static str {
    if state.phase == Phase::Idle {
        "No target systems previewed"
    } else {
        "No target systems have been found"
    }
}

fn styled_state(record: &MinionRecord) -> String {
    let label = record.state.label();
    match record.state {
        MinionState::Pending => style(label).yellow().to_string(),
        MinionState::Matched => style(label).cyan().to_string(),
        MinionState::TimedOut => style(label).red().to_string(),
        MinionState::Completed => style(label).green().to_string(),
    }
}

/// One row per minion in discovery order.
pub fn minion_table(state: &SessionState) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Minion", "State"]);
    for record in state.minions.iter() {
        table.add_row(vec![Cell::new(&record.id), Cell::new(styled_state(record))]);
    }
    table
}

/// Heading with the target and number of systems, as shown above the list.
pub fn heading(state: &SessionState) -> String {
    let count = state.minions.len();
    if count == 0 {
        format!("Target systems @ {}", state.target)
    } else {
        format!("Target systems @ {} ({count})", state.target)
    }
}

pub fn errors(state: &SessionState) -> Vec<String> {
    state
        .errors
        .iter()
        .map(|e| style(e.message()).red().bold().to_string())
        .collect()
}

/// Snapshot as a table, or the empty-list message.
pub fn render_minions(state: &SessionState) -> String {
    let mut out = heading(state);
    out.push('\n');
    if state.minions.is_empty() {
        out.push_str(empty_message(state));
    } else {
        out.push_str(&minion_table(state).to_string());
    }
    out
}

/// Per-minion command output for a run.
pub fn render_outputs(state: &SessionState) -> String {
    let mut out = String::new();
    for record in state.minions.iter() {
        out.push_str(&format!("{} {}\n", style(&record.id).bold(), styled_state(record)));
        if let Some(output) = &record.output {
            for line in output.lines() {
                out.push_str("    ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

/// Machine-readable snapshot for `--json`.
pub fn json_view(state: &SessionState) -> serde_json::Value {
    serde_json::json!({
        "sessionId": state.session_id,
        "target": state.target,
        "command": state.command,
        "phase": state.phase,
        "previewComplete": state.preview_complete,
        "connected": state.connected,
        "minions": state.minions.iter().collect::<Vec<_>>(),
        "errors": state.errors,
        "messages": state.errors.iter().map(|e| e.message()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use saltdock_protocol::ServerEvent;

    use super::*;
    use crate::transition::{transition, Input};

    fn preview_state(ids: &[&str]) -> SessionState {
        let (state, _) = transition(
            SessionState::new("web*"),
            Input::StartPreview {
                target: "web*".into(),
            },
        );
        let (state, _) = transition(
            state,
            Input::Server(ServerEvent::AsyncJobStart {
                minions: ids.iter().map(|s| s.to_string()).collect(),
                session_id: None,
            }),
        );
        state
    }

    #[test]
    fn empty_message_depends_on_phase() {
        let idle = SessionState::new("*");
        assert_eq!(empty_message(&idle), "No target systems previewed");
        assert_eq!(empty_message(&preview_state(&[])), "No target systems have been found");
    }

    #[test]
    fn heading_counts_minions() {
        assert_eq!(heading(&preview_state(&[])), "Target systems @ web*");
        assert_eq!(
            heading(&preview_state(&["web1", "web2"])),
            "Target systems @ web* (2)"
        );
    }

    #[test]
    fn table_lists_minions_in_order() {
        let rendered = render_minions(&preview_state(&["web2", "web1"]));
        let web2 = rendered.find("web2").unwrap();
        let web1 = rendered.find("web1").unwrap();
        assert!(web2 < web1);
        assert!(rendered.contains("pending"));
    }

    #[test]
    fn json_view_lists_records() {
        let view = json_view(&preview_state(&["web1"]));
        assert_eq!(view["phase"]["phase"], "preview_in_progress");
        assert_eq!(view["minions"][0]["id"], "web1");
        assert_eq!(view["minions"][0]["state"], "pending");
        assert_eq!(view["minions"][0]["output"], serde_json::Value::Null);
    }

    #[test]
    fn outputs_are_indented() {
        let (state, _) = transition(
            preview_state(&["web1"]),
            Input::Server(ServerEvent::Match {
                minion: "web1".into(),
                session_id: None,
            }),
        );
        let (state, _) = transition(
            state,
            Input::StartRun {
                target: "web*".into(),
                command: "uname".into(),
            },
        );
        let (state, _) = transition(
            state,
            Input::Server(ServerEvent::Match {
                minion: "web1".into(),
                session_id: None,
            }),
        );
        let (state, _) = transition(
            state,
            Input::Server(ServerEvent::RunResult {
                minion: "web1".into(),
                out: "Linux\n".into(),
                session_id: None,
            }),
        );

        let rendered = render_outputs(&state);
        assert!(rendered.contains("    Linux\n"));
    }
}

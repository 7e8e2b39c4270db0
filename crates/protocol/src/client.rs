//! Client → Server messages

use serde::{Deserialize, Serialize};

/// Which phase of the remote command cycle a request drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Preview,
    Run,
}

/// Request sent from the console to the master.
///
/// A preview only resolves the target expression; a run also dispatches
/// `command` to every agent the target matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub preview: bool,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Monotonic tag echoed back on every event belonging to this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
}

impl CommandRequest {
    pub fn preview(target: impl Into<String>, session_id: u64) -> Self {
        Self {
            preview: true,
            target: target.into(),
            command: None,
            session_id: Some(session_id),
        }
    }

    pub fn run(target: impl Into<String>, command: impl Into<String>, session_id: u64) -> Self {
        Self {
            preview: false,
            target: target.into(),
            command: Some(command.into()),
            session_id: Some(session_id),
        }
    }

    pub fn mode(&self) -> Mode {
        if self.preview {
            Mode::Preview
        } else {
            Mode::Run
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandRequest, Mode};

    #[test]
    fn preview_request_omits_command() {
        let json = serde_json::to_value(CommandRequest::preview("web*", 3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "preview": true, "target": "web*", "sessionId": 3 })
        );
    }

    #[test]
    fn run_request_carries_command() {
        let json = serde_json::to_string(&CommandRequest::run("*", "uptime", 4)).unwrap();
        assert!(json.contains(r#""preview":false"#));
        assert!(json.contains(r#""command":"uptime""#));
        assert!(json.contains(r#""sessionId":4"#));
    }

    #[test]
    fn deserializes_untagged_legacy_request() {
        let json = r#"{"preview":false,"target":"*","command":"ls -lha"}"#;
        let request: CommandRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.mode(), Mode::Run);
        assert_eq!(request.session_id, None);
        assert_eq!(request.command.as_deref(), Some("ls -lha"));
    }
}

//! Fan a request out to the simulated fleet.
//!
//! Every request gets one `asyncJobStart` listing the matched minions, then
//! each minion reports on its own clock: responsive minions `match` after
//! their latency (and in run mode send a `runResult` one latency later),
//! unresponsive ones `timedOut` once the fleet deadline passes.

use std::sync::Arc;

use saltdock_protocol::{CommandRequest, Mode, ServerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::debug;

use crate::fleet::{Fleet, MinionSpec};

pub async fn fan_out(fleet: Arc<Fleet>, request: CommandRequest, outbound: mpsc::Sender<ServerEvent>) {
    let session_id = request.session_id;
    let matched: Vec<MinionSpec> = fleet
        .matching(&request.target)
        .into_iter()
        .cloned()
        .collect();

    debug!(
        component = "fanout",
        event = "fanout.started",
        mode = ?request.mode(),
        target = %request.target,
        session_id = ?session_id,
        matched = matched.len(),
    );

    let start = ServerEvent::AsyncJobStart {
        minions: matched.iter().map(|m| m.id.clone()).collect(),
        session_id,
    };
    if outbound.send(start).await.is_err() {
        return;
    }

    let command = request.command.clone().unwrap_or_default();
    let mode = request.mode();
    let mut replies = JoinSet::new();
    for minion in matched {
        let outbound = outbound.clone();
        let timeout = fleet.timeout();
        let command = command.clone();
        replies.spawn(async move {
            if !minion.responsive {
                sleep(timeout).await;
                let _ = outbound
                    .send(ServerEvent::TimedOut {
                        minion: minion.id,
                        session_id,
                    })
                    .await;
                return;
            }

            sleep(minion.latency()).await;
            let matched = ServerEvent::Match {
                minion: minion.id.clone(),
                session_id,
            };
            if outbound.send(matched).await.is_err() || mode == Mode::Preview {
                return;
            }

            sleep(minion.latency()).await;
            let _ = outbound
                .send(ServerEvent::RunResult {
                    out: minion.output_for(&command),
                    minion: minion.id,
                    session_id,
                })
                .await;
        });
    }
    while replies.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(fleet: Fleet, request: CommandRequest) -> Vec<ServerEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        fan_out(Arc::new(fleet), request, tx).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn preview_lists_then_matches() {
        let fleet = Fleet::new(
            50,
            vec![
                MinionSpec::new("web1", 5),
                MinionSpec::new("web2", 1),
                MinionSpec::new("db1", 1),
            ],
        );
        let events = collect(fleet, CommandRequest::preview("web*", 4)).await;

        assert_eq!(
            events[0],
            ServerEvent::AsyncJobStart {
                minions: vec!["web1".into(), "web2".into()],
                session_id: Some(4),
            }
        );
        assert_eq!(events.len(), 3);
        assert!(events[1..]
            .iter()
            .all(|e| e.kind() == "match" && e.session_id() == Some(4)));
    }

    #[tokio::test]
    async fn run_sends_results_and_timeouts() {
        let mut web1 = MinionSpec::new("web1", 1);
        web1.output = Some("up 3 days".into());
        let fleet = Fleet::new(20, vec![web1, MinionSpec::unresponsive("old1")]);

        let mut request = CommandRequest::run("*", "uptime", 1);
        request.session_id = None;
        let events = collect(fleet, request).await;

        assert!(events.contains(&ServerEvent::RunResult {
            minion: "web1".into(),
            out: "up 3 days".into(),
            session_id: None,
        }));
        assert!(events.contains(&ServerEvent::TimedOut {
            minion: "old1".into(),
            session_id: None,
        }));
        let match_at = events.iter().position(|e| e.kind() == "match").unwrap();
        let result_at = events.iter().position(|e| e.kind() == "runResult").unwrap();
        assert!(match_at < result_at);
    }

    #[tokio::test]
    async fn no_match_sends_empty_job_start() {
        let fleet = Fleet::new(10, vec![MinionSpec::new("web1", 1)]);
        let events = collect(fleet, CommandRequest::preview("db*", 2)).await;
        assert_eq!(
            events,
            vec![ServerEvent::AsyncJobStart {
                minions: vec![],
                session_id: Some(2),
            }]
        );
    }
}

//! `saltdock preview` and `saltdock run`.

use std::process::ExitCode;
use std::sync::Arc;

use saltdock::config::Config;
use saltdock::error::classify_transport;
use saltdock::{render, Channel, SessionActorHandle, SessionState, WaitOutcome};

/// Open the channel and spawn a session. Open failures are printed with the
/// operator-facing message.
pub async fn connect(config: &Config, target: &str) -> Option<SessionActorHandle> {
    match Channel::open(&config.channel_config()).await {
        Ok((channel, events)) => Some(SessionActorHandle::spawn(channel, events, target)),
        Err(e) => {
            tracing::error!(
                component = "cli",
                event = "cli.connect_failed",
                error = %e,
                "Could not open channel"
            );
            eprintln!("{}", classify_transport(&e.to_transport_failure()));
            eprintln!("  {e}");
            None
        }
    }
}

pub async fn preview(config: &Config, target: &str, json: bool) -> anyhow::Result<ExitCode> {
    let Some(session) = connect(config, target).await else {
        return Ok(ExitCode::FAILURE);
    };

    let outcome = preview_on(&session, config, target).await;
    let code = report(&outcome, json, false);
    session.disconnect().await;
    Ok(code)
}

pub async fn run(
    config: &Config,
    target: &str,
    command: &str,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let Some(session) = connect(config, target).await else {
        return Ok(ExitCode::FAILURE);
    };

    let outcome = preview_on(&session, config, target).await;
    let WaitOutcome::Settled(previewed) = &outcome else {
        let code = report(&outcome, json, false);
        session.disconnect().await;
        return Ok(code);
    };
    if !json {
        println!("{}", render::render_minions(previewed));
        println!();
    }

    let outcome = match session.start_run(command, target).await {
        Ok(id) => session.wait_settled(id, config.settle_timeout()).await,
        Err(e) => {
            eprintln!("{e}");
            session.disconnect().await;
            return Ok(ExitCode::FAILURE);
        }
    };
    let code = report(&outcome, json, true);
    session.disconnect().await;
    Ok(code)
}

pub async fn preview_on(session: &SessionActorHandle, config: &Config, target: &str) -> WaitOutcome {
    match session.start_preview(target).await {
        Ok(id) => session.wait_settled(id, config.settle_timeout()).await,
        Err(e) => {
            eprintln!("{e}");
            WaitOutcome::Disconnected(session.state())
        }
    }
}

/// Print the final snapshot and pick the exit code.
pub fn report(outcome: &WaitOutcome, json: bool, outputs: bool) -> ExitCode {
    let (state, code, note): (&Arc<SessionState>, _, _) = match outcome {
        WaitOutcome::Settled(state) | WaitOutcome::NoMatches(state) => {
            (state, ExitCode::SUCCESS, None)
        }
        WaitOutcome::Disconnected(state) => (state, ExitCode::FAILURE, None),
        WaitOutcome::Superseded(state) => (
            state,
            ExitCode::FAILURE,
            Some("Request was superseded by a newer one"),
        ),
        WaitOutcome::Expired(state) => (
            state,
            ExitCode::FAILURE,
            Some("Gave up waiting for all minions to answer"),
        ),
    };

    if json {
        println!("{}", render::json_view(state));
        return code;
    }

    if outputs {
        println!("{}", render::heading(state));
        if state.minions.is_empty() {
            println!("{}", render::empty_message(state));
        } else {
            print!("{}", render::render_outputs(state));
        }
    } else {
        println!("{}", render::render_minions(state));
    }
    for err in render::errors(state) {
        eprintln!("{err}");
    }
    if let Some(note) = note {
        eprintln!("{note}");
    }
    code
}

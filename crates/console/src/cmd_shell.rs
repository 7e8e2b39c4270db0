//! `saltdock shell`: interactive session over one channel.

use std::process::ExitCode;

use saltdock::config::Config;
use saltdock::{render, SessionActorHandle};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cmd_remote;

const HELP: &str = "\
  target <expr>     set the target expression (invalidates the preview)
  command <cmd>     set the command to run
  preview           preview the current target
  run               run the command on the previewed minions
  status            show the current session
  help              show this help
  quit              close the channel and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Target(String),
    Command(String),
    Preview,
    Run,
    Status,
    Help,
    Quit,
}

fn parse_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let cmd = match word {
        "target" if !rest.is_empty() => ShellCommand::Target(rest.to_string()),
        "command" if !rest.is_empty() => ShellCommand::Command(rest.to_string()),
        "target" | "command" => return Err(format!("usage: {word} <value>")),
        "preview" => ShellCommand::Preview,
        "run" => ShellCommand::Run,
        "status" => ShellCommand::Status,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Some(cmd))
}

pub async fn run(config: &Config) -> anyhow::Result<ExitCode> {
    let mut target = config.default_target.clone();
    let mut command = config.default_command.clone();

    let Some(session) = cmd_remote::connect(config, &target).await else {
        return Ok(ExitCode::FAILURE);
    };

    println!("Connected. Target: {target}  Command: {command}");
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let cmd = match parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };

        match cmd {
            ShellCommand::Target(expr) => {
                session.set_target(&expr).await?;
                target = expr;
            }
            ShellCommand::Command(cmd) => command = cmd,
            ShellCommand::Preview => {
                let outcome = cmd_remote::preview_on(&session, config, &target).await;
                let _ = cmd_remote::report(&outcome, false, false);
            }
            ShellCommand::Run => match session.start_run(&command, &target).await {
                Ok(id) => {
                    let outcome = session.wait_settled(id, config.settle_timeout()).await;
                    let _ = cmd_remote::report(&outcome, false, true);
                }
                Err(e) => eprintln!("{e}"),
            },
            ShellCommand::Status => print_status(&session, &command),
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Quit => break,
        }

        if !session.state().connected {
            eprintln!("Connection lost; restart the shell to reconnect.");
            return Ok(ExitCode::FAILURE);
        }
    }

    session.disconnect().await;
    Ok(ExitCode::SUCCESS)
}

fn print_status(session: &SessionActorHandle, command: &str) {
    let state = session.state();
    println!(
        "Session {} {:?}  command: {command}  run enabled: {}",
        state.session_id, state.phase, state.preview_complete
    );
    println!("{}", render::render_minions(&state));
    for err in render::errors(&state) {
        eprintln!("{err}");
    }
}

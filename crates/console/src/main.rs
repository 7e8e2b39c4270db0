//! SaltDock console
//!
//! Preview a target expression and run ad-hoc commands across the matched
//! minions over the master's remote command channel.

mod cmd_remote;
mod cmd_shell;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use saltdock::config::{self, Config};
use saltdock::logging::init_logging;
use saltdock::probe::probe;

#[derive(Parser)]
#[command(name = "saltdock", version = saltdock::VERSION, about = "Run remote commands on matched minions")]
struct Cli {
    /// Config file (defaults to <data-dir>/config.toml)
    #[arg(long, env = "SALTDOCK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data directory for config and logs
    #[arg(long, env = "SALTDOCK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Master base URL, e.g. wss://suma.example.com
    #[arg(long, env = "SALTDOCK_SERVER", global = true)]
    server: Option<String>,

    /// Cookie header sent with every request
    #[arg(long, env = "SALTDOCK_COOKIE", global = true, hide_env_values = true)]
    cookie: Option<String>,

    /// Seconds to wait for a request to settle
    #[arg(long, global = true)]
    settle_timeout: Option<u64>,

    /// Print the final session snapshot as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which minions match a target expression
    Preview {
        /// Target expression (defaults to the configured target)
        target: Option<String>,
    },
    /// Preview the target, then run a command on every matched minion
    Run {
        #[arg(short, long)]
        target: Option<String>,
        /// Shell command (defaults to the configured command)
        command: Option<String>,
    },
    /// Interactive preview/run loop over one connection
    Shell,
    /// Classify the HTTP status of an out-of-band request
    Probe { url: String },
    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(cookie) = &self.cookie {
            config.cookie = Some(cookie.clone());
        }
        if let Some(secs) = self.settle_timeout {
            config.settle_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "saltdock", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref());
    let _logging = init_logging(&data_dir)?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config::config_path(&data_dir));
    let mut config = Config::load(&config_path)?;
    cli.apply_overrides(&mut config);

    tracing::info!(
        component = "cli",
        event = "cli.started",
        version = saltdock::VERSION,
        config_path = %config_path.display(),
        endpoint = %config.channel_config().endpoint(),
    );

    match cli.command {
        Command::Preview { target } => {
            let target = target.unwrap_or_else(|| config.default_target.clone());
            cmd_remote::preview(&config, &target, cli.json).await
        }
        Command::Run { target, command } => {
            let target = target.unwrap_or_else(|| config.default_target.clone());
            let command = command.unwrap_or_else(|| config.default_command.clone());
            cmd_remote::run(&config, &target, &command, cli.json).await
        }
        Command::Shell => cmd_shell::run(&config).await,
        Command::Probe { url } => {
            let client = reqwest::Client::new();
            let outcome = probe(&client, &url, config.cookie.as_deref()).await?;
            match outcome.error {
                Some(err) => {
                    eprintln!("{err}");
                    Ok(ExitCode::FAILURE)
                }
                None => {
                    println!("HTTP {}", outcome.status);
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
        Command::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}

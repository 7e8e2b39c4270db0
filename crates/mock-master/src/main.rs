//! saltdock-mock-master
//!
//! Serves the remote command endpoint against a simulated fleet for local
//! development of the console.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use saltdock_mock_master::{router, serve, Fleet};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "saltdock-mock-master", about = "Simulated master for the remote command channel")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8088")]
    bind: SocketAddr,

    /// Fleet description (TOML). A small demo fleet is used when omitted.
    #[arg(long)]
    fleet: Option<PathBuf>,

    /// Require this token as the JSESSIONID cookie or a bearer token
    #[arg(long, env = "SALTDOCK_MOCK_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let fleet = match &args.fleet {
        Some(path) => Fleet::load(path)?,
        None => Fleet::demo(),
    };

    info!(
        component = "master",
        event = "master.starting",
        minions = fleet.minions.len(),
        timeout_ms = fleet.timeout_ms,
        auth = args.auth_token.is_some(),
        "Starting mock master"
    );

    let listener = TcpListener::bind(args.bind).await?;
    serve(listener, router(fleet, args.auth_token)).await?;
    Ok(())
}

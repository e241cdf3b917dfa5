//! Server entry point: CLI parsing, logging setup, and bootstrap.

use chessd::server::{self, Server};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// chessd — a multiplayer chess server over TCP.
///
/// Speaks newline-delimited JSON: accounts, challenges, Elo matchmaking,
/// rule-enforced games, and match replays.
#[derive(Parser, Debug)]
#[command(name = "chessd")]
#[command(about = "Multiplayer chess server over TCP")]
#[command(version)]
struct Cli {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8888)]
    port: u16,

    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory for persistent state (users.json and matches/).
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let server = match Server::open(&cli.data_dir) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to open data directory {}: {e}", cli.data_dir.display());
            return ExitCode::FAILURE;
        }
    };

    log::info!("Data directory: {}", cli.data_dir.display());

    match server::run(server, &cli.host, cli.port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Server failed to start: {e}");
            ExitCode::FAILURE
        }
    }
}

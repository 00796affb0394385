//! Paperjet - ephemeral document transformation service with HTTP API.
//!
//! Usage:
//!   paperjet serve [--port 4000]

use clap::{Parser, Subcommand};

use paperjet::config::Config;
use paperjet::http_server;
use paperjet::state::AppState;
use paperjet::workspace::Workspaces;

#[derive(Parser, Debug)]
#[command(name = "paperjet")]
#[command(about = "Ephemeral document transformation service")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "4000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env();

    match args.command {
        Commands::Serve { port } => {
            let workspaces = match Workspaces::open(&config.work_root, config.ttl()) {
                Ok(workspaces) => workspaces,
                Err(e) => {
                    eprintln!("Error: cannot open work root: {}", e);
                    std::process::exit(1);
                }
            };
            let state = AppState::new(config, workspaces);
            http_server::run_server(port, state).await;
        }
    }
}

//! Crisis chat WebSocket server.
//!
//! Hosts ephemeral crisis rooms: the person in crisis opens their own room,
//! volunteers and admins join to assist, and subscribed admins receive
//! emergency escalations. Nothing is persisted; stale empty rooms are swept
//! periodically.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 3000
//! ```

use std::time::Duration;

use clap::Parser;

use crisis_chat_rs::common::logger::setup_logger;
use crisis_chat_rs::server::state::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Ephemeral crisis-support chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Minutes of inactivity before an empty room is swept
    #[arg(long, default_value = "30")]
    max_inactive_minutes: u64,

    /// Seconds between room sweep runs
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let config = ServerConfig {
        max_inactive: Duration::from_secs(args.max_inactive_minutes * 60),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        ..ServerConfig::default()
    };

    if let Err(e) = crisis_chat_rs::server::run_server(args.host, args.port, config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

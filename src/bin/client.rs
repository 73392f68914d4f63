//! Interactive crisis chat client.
//!
//! Connects with an identity claim (participant id, case id, role, display
//! name) passed as WebSocket query parameters. Messages are kept only in
//! memory, retried with exponential backoff on failure, and wiped on exit.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin client -- --participant-id alice --case-id case-001 --role user
//! cargo run --bin client -- -i vol-1 -c case-001 -r volunteer -n "Volunteer One"
//! ```

use clap::Parser;

use crisis_chat_rs::client::{run_client, ClientOptions};
use crisis_chat_rs::common::logger::setup_logger;
use crisis_chat_rs::protocol::Role;

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Interactive crisis chat client", long_about = None)]
struct Args {
    /// Participant ID (must be unique per connection)
    #[arg(short = 'i', long)]
    participant_id: String,

    /// Crisis case ID this participant belongs to
    #[arg(short = 'c', long)]
    case_id: String,

    /// Role: user, volunteer or admin
    #[arg(short = 'r', long, default_value = "user")]
    role: String,

    /// Display name shown to other participants (defaults to the participant ID)
    #[arg(short = 'n', long)]
    display_name: Option<String>,

    /// WebSocket server URL
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let Some(role) = Role::parse(&args.role) else {
        eprintln!(
            "Invalid role '{}': expected user, volunteer or admin",
            args.role
        );
        std::process::exit(1);
    };

    let options = ClientOptions {
        url: args.url,
        display_name: args
            .display_name
            .unwrap_or_else(|| args.participant_id.clone()),
        participant_id: args.participant_id,
        case_id: args.case_id,
        role,
    };

    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}

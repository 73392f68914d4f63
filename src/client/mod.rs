//! Crisis chat client: session controller and interactive CLI.

pub mod error;
pub mod formatter;
pub mod retention;
mod runner;
pub mod session;
pub mod transport;

pub use runner::{run_client, ClientOptions};

//! Crisis chat WebSocket server implementation.

pub mod auth;
mod handler;
pub mod registry;
pub mod router;
mod runner;
mod signal;
pub mod state;

pub use runner::{build_router, run_server};

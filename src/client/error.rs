//! Error types for the crisis chat client.

use thiserror::Error;

/// Transport-level delivery failures; recoverable, drive retry and backoff
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("not connected")]
    NotConnected,

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send: {0}")]
    Send(String),
}

/// Session controller failures, surfaced alongside a human-readable error
/// string on the session state
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    SessionClosed,

    #[error("message text cannot be empty")]
    EmptyMessage,

    #[error("message '{0}' not found in unsent queue")]
    UnknownMessage(String),

    #[error("failed to resend message '{message_id}' after {attempts} attempts")]
    RetriesExhausted { message_id: String, attempts: u32 },

    #[error("unable to reconnect after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },
}

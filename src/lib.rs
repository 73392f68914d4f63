//! Real-time crisis-support chat library.
//!
//! This library provides the signaling and session layer for an ephemeral
//! crisis-support chat: a WebSocket server that authenticates participants,
//! groups them into crisis rooms and routes chat, typing, and emergency
//! events between them, and a client-side session controller that tracks
//! message delivery state, reconnects with backoff, and securely wipes
//! session content on close. Messages are never persisted server-side.

pub mod client;
pub mod common;
pub mod protocol;
pub mod server;

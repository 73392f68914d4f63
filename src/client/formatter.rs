//! Message formatting utilities for client display.

use crate::common::time::timestamp_to_rfc3339;
use crate::protocol::{MessageStatus, ServerEvent, WireMessage};

use super::session::ConnectionStatus;

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format one server event for the terminal.
    ///
    /// Returns `None` for events that need no visible output (typing stop,
    /// successful send acks).
    pub fn format_event(event: &ServerEvent, current_participant_id: &str) -> Option<String> {
        match event {
            ServerEvent::RoomJoined {
                room_key, message, ..
            } => Some(Self::format_room_joined(room_key, message.as_deref())),
            ServerEvent::HelperJoined {
                volunteer_name,
                timestamp,
                ..
            } => Some(Self::format_helper_joined(volunteer_name, *timestamp)),
            ServerEvent::PresenceOnline {
                user_id,
                user_name,
                timestamp,
                ..
            } => {
                if user_id == current_participant_id {
                    None
                } else {
                    Some(format!(
                        "\n+ {} is online ({})\n",
                        user_name,
                        timestamp_to_rfc3339(*timestamp)
                    ))
                }
            }
            ServerEvent::PresenceOffline {
                user_name,
                timestamp,
                ..
            } => Some(format!(
                "\n- {} went offline ({})\n",
                user_name,
                timestamp_to_rfc3339(*timestamp)
            )),
            ServerEvent::MessageReceive(message) => {
                // Own broadcast echoes are already displayed on send
                if message.user_id == current_participant_id {
                    None
                } else {
                    Some(Self::format_chat_message(message))
                }
            }
            ServerEvent::MessageAck { message_id, status } => {
                if *status == MessageStatus::Failed {
                    Some(format!("\n! Message '{}' was not delivered\n", message_id))
                } else {
                    None
                }
            }
            ServerEvent::TypingStart { user_name, .. } => {
                Some(format!("\n... {} is typing\n", user_name))
            }
            ServerEvent::TypingStop { .. } => None,
            ServerEvent::EmergencyAlert {
                user_name,
                severity,
                description,
                room_key,
                timestamp,
                ..
            } => Some(Self::format_emergency_alert(
                user_name,
                severity,
                description,
                room_key,
                *timestamp,
            )),
            ServerEvent::EmergencyTriggered {
                message, severity, ..
            } => Some(format!("\n{} (severity: {})\n", message, severity)),
            ServerEvent::EmergencyAck {
                success,
                emergency_id,
            } => {
                if *success {
                    Some(format!(
                        "\nEmergency escalated (id: {})\n",
                        emergency_id.as_deref().unwrap_or("unknown")
                    ))
                } else {
                    Some("\n! Emergency escalation failed\n".to_string())
                }
            }
            ServerEvent::AdminSubscribed {
                success,
                active_admins,
            } => {
                if *success {
                    Some(format!(
                        "\nSubscribed to emergency alerts ({} admin(s) active)\n",
                        active_admins
                    ))
                } else {
                    Some("\n! Emergency subscription rejected\n".to_string())
                }
            }
            ServerEvent::AdminUnsubscribed { .. } => {
                Some("\nUnsubscribed from emergency alerts\n".to_string())
            }
            ServerEvent::AuthError { code, message } => Some(format!(
                "\n! Authentication failed [{}]: {}\n",
                code, message
            )),
            ServerEvent::ErrorMessage { code, message } => {
                Some(format!("\n! [{}] {}\n", code, message))
            }
        }
    }

    /// Format the room-joined confirmation
    pub fn format_room_joined(room_key: &str, message: Option<&str>) -> String {
        let mut output = String::new();
        output.push_str("\n============================================================\n");
        output.push_str(&format!("Joined room: {}\n", room_key));
        if let Some(message) = message {
            output.push_str(&format!("{}\n", message));
        }
        output.push_str("============================================================\n");
        output
    }

    /// Format a helper-arrived notification
    pub fn format_helper_joined(volunteer_name: &str, timestamp: i64) -> String {
        format!(
            "\n+ {} joined to assist ({})\n",
            volunteer_name,
            timestamp_to_rfc3339(timestamp)
        )
    }

    /// Format a chat message received from the room
    pub fn format_chat_message(message: &WireMessage) -> String {
        format!(
            "\n------------------------------------------------------------\n\
             @{}: {}\n\
             sent at {}\n\
             ------------------------------------------------------------\n",
            message.user_id,
            message.text,
            timestamp_to_rfc3339(message.timestamp)
        )
    }

    /// Format an emergency alert as fanned out to subscribed admins
    pub fn format_emergency_alert(
        user_name: &str,
        severity: &str,
        description: &str,
        room_key: &str,
        timestamp: i64,
    ) -> String {
        format!(
            "\n############################################################\n\
             EMERGENCY [{}] from {}\n\
             {}\n\
             room: {}\n\
             at {}\n\
             ############################################################\n",
            severity,
            user_name,
            description,
            room_key,
            timestamp_to_rfc3339(timestamp)
        )
    }

    /// Format a confirmation line after sending a message
    pub fn format_sent_confirmation(sent_at: i64) -> String {
        format!("sent at {}\n", timestamp_to_rfc3339(sent_at))
    }

    /// Format a connection status change
    pub fn format_connection_status(status: ConnectionStatus, error: Option<&str>) -> String {
        let label = match status {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::ReconnectFailed => "reconnect failed",
        };
        match error {
            Some(error) => format!("\n[{}] {}\n", label, error),
            None => format!("\n[{}]\n", label),
        }
    }

    /// Format a raw text frame (when parsing fails)
    pub fn format_raw_message(text: &str) -> String {
        format!("\n<- Received: {}\n", text)
    }
}

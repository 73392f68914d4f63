//! Wire protocol shared by the server and the client.
//!
//! All WebSocket frames carry a single JSON object tagged by a `type`
//! field. Client-originated events and server-originated events are kept
//! in separate closed enums so that routing is an exhaustive match and
//! forgetting a role or an event is a compile-time error.

use serde::{Deserialize, Serialize};

/// Sender id used for messages synthesized by the server itself
pub const SYSTEM_USER_ID: &str = "SYSTEM";

/// Participant role within a crisis session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// The person in crisis that owns a room
    User,
    /// A volunteer joining rooms to assist
    Volunteer,
    /// An administrator (may assist and may subscribe to emergencies)
    Admin,
}

impl Role {
    /// Parse a role from its wire representation
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "user" => Some(Role::User),
            "volunteer" => Some(Role::Volunteer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Wire representation of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Volunteer => "volunteer",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of a message sender as rendered to participants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SenderClass {
    /// Sent by the person in crisis
    User,
    /// Sent by a helper (volunteer or admin) or by the system
    Support,
}

impl SenderClass {
    /// Map a participant role to the sender class shown in the room
    pub fn from_role(role: Role) -> SenderClass {
        match role {
            Role::User => SenderClass::User,
            Role::Volunteer | Role::Admin => SenderClass::Support,
        }
    }
}

/// Delivery status of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
}

/// A chat message as it travels through a broadcast fan-out.
///
/// Never persisted by the server; it exists only for the duration of the
/// broadcast to the current room members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub case_id: String,
    pub user_id: String,
    pub text: String,
    pub sender: SenderClass,
    /// Unix timestamp in milliseconds (UTC)
    pub timestamp: i64,
    pub status: MessageStatus,
}

/// Events a connected participant may send to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Person in crisis joins their own room
    JoinOwnRoom,
    /// Volunteer or admin joins an existing crisis room to assist
    JoinAsHelper { target_user_id: String },
    /// Send a chat message to a room (own room unless a target is given)
    SendMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<String>,
    },
    TypingStart,
    TypingStop,
    /// Panic button
    EmergencyTrigger {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Admin opts into emergency broadcasts
    AdminSubscribe,
    AdminUnsubscribe,
}

/// Events the server may send to a connected participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledgment for a room join request
    RoomJoined {
        success: bool,
        room_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A helper arrived in the room
    HelperJoined {
        volunteer_id: String,
        volunteer_name: String,
        timestamp: i64,
    },
    /// A participant came online in the room
    PresenceOnline {
        user_id: String,
        user_name: String,
        role: Role,
        timestamp: i64,
    },
    /// A participant went offline in the room
    PresenceOffline {
        user_id: String,
        user_name: String,
        timestamp: i64,
    },
    /// A chat message delivered to room members
    MessageReceive(WireMessage),
    /// Acknowledgment for a send-message request
    MessageAck {
        message_id: String,
        status: MessageStatus,
    },
    TypingStart {
        user_id: String,
        user_name: String,
        timestamp: i64,
    },
    TypingStop {
        user_id: String,
        timestamp: i64,
    },
    /// Emergency escalation, fanned out to subscribed admins
    EmergencyAlert {
        id: String,
        user_id: String,
        user_name: String,
        severity: String,
        description: String,
        timestamp: i64,
        room_key: String,
    },
    /// In-room notice that an emergency was escalated
    EmergencyTriggered {
        message: String,
        severity: String,
        timestamp: i64,
    },
    /// Acknowledgment for an emergency trigger
    EmergencyAck {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emergency_id: Option<String>,
    },
    /// Acknowledgment for an admin emergency subscription
    AdminSubscribed {
        success: bool,
        active_admins: usize,
    },
    AdminUnsubscribed {
        success: bool,
    },
    /// Connection-level authentication failure, sent once before close
    AuthError {
        code: String,
        message: String,
    },
    /// Structured failure acknowledgment for a rejected event
    ErrorMessage {
        code: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_accepts_known_roles() {
        // given / when / then:
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("volunteer"), Some(Role::Volunteer));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("moderator"), None);
    }

    #[test]
    fn test_sender_class_maps_only_user_role_to_user() {
        // given / when / then:
        assert_eq!(SenderClass::from_role(Role::User), SenderClass::User);
        assert_eq!(SenderClass::from_role(Role::Volunteer), SenderClass::Support);
        assert_eq!(SenderClass::from_role(Role::Admin), SenderClass::Support);
    }

    #[test]
    fn test_client_event_deserializes_from_tagged_json() {
        // given:
        let json = r#"{"type":"send-message","text":"Hola"}"#;

        // when:
        let event: ClientEvent = serde_json::from_str(json).unwrap();

        // then:
        assert_eq!(
            event,
            ClientEvent::SendMessage {
                text: "Hola".to_string(),
                target_user_id: None,
            }
        );
    }

    #[test]
    fn test_server_event_message_receive_is_flat_on_the_wire() {
        // given:
        let event = ServerEvent::MessageReceive(WireMessage {
            id: "m1".to_string(),
            case_id: "crisis-alice".to_string(),
            user_id: "alice".to_string(),
            text: "Hola".to_string(),
            sender: SenderClass::User,
            timestamp: 1000,
            status: MessageStatus::Sent,
        });

        // when:
        let json = serde_json::to_value(&event).unwrap();

        // then: the tag and the message fields live in one object
        assert_eq!(json["type"], "message-receive");
        assert_eq!(json["text"], "Hola");
        assert_eq!(json["sender"], "user");

        let back: ServerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}

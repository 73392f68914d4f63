//! Chat event router: turns authenticated per-connection events into
//! registry updates and broadcasts.
//!
//! Every event is handled inside one registry critical section; failures
//! are answered to the originating connection only and never tear down the
//! process or other connections.

use uuid::Uuid;

use crate::protocol::{
    ClientEvent, MessageStatus, Role, SenderClass, ServerEvent, WireMessage, SYSTEM_USER_ID,
};
use crate::server::auth::ValidatedIdentity;
use crate::server::registry::{crisis_room_key, EventError, RoomRegistry};
use crate::server::state::AppState;

/// In-room system notice injected when an emergency is escalated
const EMERGENCY_SYSTEM_TEXT: &str =
    "🚨 Pánico activado - Se ha notificado a los administradores";
/// In-room banner sent alongside the emergency system notice
const EMERGENCY_ROOM_NOTICE: &str = "🚨 EMERGENCY - Administrators have been notified";
/// In-room system notice injected when a member's connection drops
const CONNECTION_LOST_TEXT: &str = "La conexión se ha perdido. Intentando reestablecer...";

/// Handle one authenticated client event.
///
/// The registry lock is taken once per event, so each mutation plus the
/// member snapshot used for its broadcasts is atomic.
pub async fn handle_event(state: &AppState, conn_id: Uuid, event: ClientEvent) {
    let mut registry = state.registry.lock().await;

    let Some(identity) = registry.identity(conn_id).cloned() else {
        tracing::warn!("Event from unregistered connection '{}' dropped", conn_id);
        return;
    };

    let now = state.clock.now_millis();
    if let Err(e) = dispatch(&mut registry, conn_id, &identity, &event, now) {
        tracing::warn!(
            "Event rejected for '{}' (role {}): {}",
            identity.participant_id,
            identity.role,
            e
        );
        registry.send_to(
            conn_id,
            &ServerEvent::ErrorMessage {
                code: e.code().to_string(),
                message: e.to_string(),
            },
        );
    }
}

fn dispatch(
    registry: &mut RoomRegistry,
    conn_id: Uuid,
    identity: &ValidatedIdentity,
    event: &ClientEvent,
    now: i64,
) -> Result<(), EventError> {
    match event {
        ClientEvent::JoinOwnRoom => join_own_room(registry, conn_id, identity, now),
        ClientEvent::JoinAsHelper { target_user_id } => {
            join_as_helper(registry, conn_id, identity, target_user_id, now)
        }
        ClientEvent::SendMessage {
            text,
            target_user_id,
        } => send_message(registry, conn_id, identity, text, target_user_id.as_deref(), now),
        ClientEvent::TypingStart => {
            let room_key = crisis_room_key(&identity.participant_id);
            registry.broadcast_to_room(
                &room_key,
                &ServerEvent::TypingStart {
                    user_id: identity.participant_id.clone(),
                    user_name: identity.display_name.clone(),
                    timestamp: now,
                },
                Some(conn_id),
            );
            Ok(())
        }
        ClientEvent::TypingStop => {
            let room_key = crisis_room_key(&identity.participant_id);
            registry.broadcast_to_room(
                &room_key,
                &ServerEvent::TypingStop {
                    user_id: identity.participant_id.clone(),
                    timestamp: now,
                },
                Some(conn_id),
            );
            Ok(())
        }
        ClientEvent::EmergencyTrigger {
            severity,
            description,
        } => {
            emergency_trigger(
                registry,
                conn_id,
                identity,
                severity.as_deref(),
                description.as_deref(),
                now,
            );
            Ok(())
        }
        ClientEvent::AdminSubscribe => {
            let active_admins = registry.subscribe_admin(conn_id)?;
            tracing::info!(
                "Admin '{}' subscribed to emergency alerts ({} active)",
                identity.participant_id,
                active_admins
            );
            registry.send_to(
                conn_id,
                &ServerEvent::AdminSubscribed {
                    success: true,
                    active_admins,
                },
            );
            Ok(())
        }
        ClientEvent::AdminUnsubscribe => {
            registry.unsubscribe_admin(conn_id);
            tracing::info!(
                "Admin '{}' unsubscribed from emergency alerts ({} active)",
                identity.participant_id,
                registry.admin_subscriber_count()
            );
            registry.send_to(conn_id, &ServerEvent::AdminUnsubscribed { success: true });
            Ok(())
        }
    }
}

fn join_own_room(
    registry: &mut RoomRegistry,
    conn_id: Uuid,
    identity: &ValidatedIdentity,
    now: i64,
) -> Result<(), EventError> {
    if identity.role != Role::User {
        return Err(EventError::OwnerOnly);
    }

    registry.ensure_room(&identity.participant_id, now);
    registry.join_as_owner(&identity.participant_id, conn_id)?;
    let room_key = crisis_room_key(&identity.participant_id);

    tracing::info!(
        "User '{}' joined crisis room '{}'",
        identity.participant_id,
        room_key
    );

    registry.send_to(
        conn_id,
        &ServerEvent::RoomJoined {
            success: true,
            room_key: room_key.clone(),
            message: Some(format!("Crisis session started. Room: {}", room_key)),
        },
    );

    registry.broadcast_to_room(
        &room_key,
        &ServerEvent::PresenceOnline {
            user_id: identity.participant_id.clone(),
            user_name: identity.display_name.clone(),
            role: Role::User,
            timestamp: now,
        },
        Some(conn_id),
    );

    Ok(())
}

fn join_as_helper(
    registry: &mut RoomRegistry,
    conn_id: Uuid,
    identity: &ValidatedIdentity,
    target_user_id: &str,
    now: i64,
) -> Result<(), EventError> {
    if target_user_id.trim().is_empty() {
        return Err(EventError::MissingTarget);
    }

    registry.join_as_helper(target_user_id, conn_id, now)?;
    let room_key = crisis_room_key(target_user_id);

    tracing::info!(
        "Helper '{}' joined crisis room '{}'",
        identity.participant_id,
        room_key
    );

    registry.send_to(
        conn_id,
        &ServerEvent::RoomJoined {
            success: true,
            room_key: room_key.clone(),
            message: Some(format!(
                "You have joined the crisis session for user {}",
                target_user_id
            )),
        },
    );

    // The whole room, joiner included, learns that a helper arrived
    registry.broadcast_to_room(
        &room_key,
        &ServerEvent::HelperJoined {
            volunteer_id: identity.participant_id.clone(),
            volunteer_name: identity.display_name.clone(),
            timestamp: now,
        },
        None,
    );

    Ok(())
}

fn send_message(
    registry: &mut RoomRegistry,
    conn_id: Uuid,
    identity: &ValidatedIdentity,
    text: &str,
    target_user_id: Option<&str>,
    now: i64,
) -> Result<(), EventError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        tracing::warn!("Empty message attempted by '{}'", identity.participant_id);
        registry.send_to(
            conn_id,
            &ServerEvent::MessageAck {
                message_id: String::new(),
                status: MessageStatus::Failed,
            },
        );
        return Ok(());
    }

    let message_id = Uuid::new_v4().to_string();
    let message = WireMessage {
        id: message_id.clone(),
        case_id: identity.case_id.clone(),
        user_id: identity.participant_id.clone(),
        text: trimmed.to_string(),
        sender: SenderClass::from_role(identity.role),
        timestamp: now,
        status: MessageStatus::Sent,
    };

    // Broadcast only; the router never writes message content anywhere
    let room_key = crisis_room_key(target_user_id.unwrap_or(&identity.participant_id));
    registry.broadcast_to_room(&room_key, &ServerEvent::MessageReceive(message), None);

    tracing::debug!(
        "Message '{}' from '{}' fanned out to room '{}'",
        message_id,
        identity.participant_id,
        room_key
    );

    registry.send_to(
        conn_id,
        &ServerEvent::MessageAck {
            message_id,
            status: MessageStatus::Sent,
        },
    );

    Ok(())
}

fn emergency_trigger(
    registry: &mut RoomRegistry,
    conn_id: Uuid,
    identity: &ValidatedIdentity,
    severity: Option<&str>,
    description: Option<&str>,
    now: i64,
) {
    let emergency_id = Uuid::new_v4().to_string();
    let room_key = crisis_room_key(&identity.participant_id);
    let severity = severity.unwrap_or("high").to_string();
    let description = description.unwrap_or("Emergency triggered").to_string();

    tracing::error!(
        "EMERGENCY ALERT '{}' from '{}' (severity: {}, {} subscribed admins)",
        emergency_id,
        identity.participant_id,
        severity,
        registry.admin_subscriber_count()
    );

    // (a) every subscribed admin, regardless of room; fire-and-forget fan-out
    registry.broadcast_to_admin_subscribers(&ServerEvent::EmergencyAlert {
        id: emergency_id.clone(),
        user_id: identity.participant_id.clone(),
        user_name: identity.display_name.clone(),
        severity: severity.clone(),
        description,
        timestamp: now,
        room_key: room_key.clone(),
    });

    // (b) in-room alert
    registry.broadcast_to_room(
        &room_key,
        &ServerEvent::EmergencyTriggered {
            message: EMERGENCY_ROOM_NOTICE.to_string(),
            severity,
            timestamp: now,
        },
        None,
    );

    // (c) synthesized system message into the room
    registry.broadcast_to_room(
        &room_key,
        &ServerEvent::MessageReceive(system_message(&room_key, EMERGENCY_SYSTEM_TEXT, now)),
        None,
    );

    registry.send_to(
        conn_id,
        &ServerEvent::EmergencyAck {
            success: true,
            emergency_id: Some(emergency_id),
        },
    );
}

/// Handle a transport-level disconnect.
///
/// Clears registry membership synchronously before returning, notifying
/// each affected room.
pub async fn handle_disconnect(state: &AppState, conn_id: Uuid) {
    let mut registry = state.registry.lock().await;

    let Some(identity) = registry.identity(conn_id).cloned() else {
        tracing::debug!("Disconnect for unregistered connection '{}'", conn_id);
        return;
    };

    let now = state.clock.now_millis();
    let affected = registry.leave(conn_id);

    tracing::info!(
        "Connection '{}' ('{}') disconnected, {} affected room(s)",
        conn_id,
        identity.participant_id,
        affected.len()
    );

    for room_key in &affected {
        registry.broadcast_to_room(
            room_key,
            &ServerEvent::MessageReceive(system_message(room_key, CONNECTION_LOST_TEXT, now)),
            None,
        );
        registry.broadcast_to_room(
            room_key,
            &ServerEvent::PresenceOffline {
                user_id: identity.participant_id.clone(),
                user_name: identity.display_name.clone(),
                timestamp: now,
            },
            None,
        );
    }

    // Keep the person-in-crisis room alive long enough for a reconnect
    if identity.role == Role::User {
        registry.touch_room(&identity.participant_id, now);
    }

    registry.unregister(conn_id);
}

fn system_message(room_key: &str, text: &str, now: i64) -> WireMessage {
    WireMessage {
        id: Uuid::new_v4().to_string(),
        case_id: room_key.to_string(),
        user_id: SYSTEM_USER_ID.to_string(),
        text: text.to_string(),
        sender: SenderClass::Support,
        timestamp: now,
        status: MessageStatus::Sent,
    }
}

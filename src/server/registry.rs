//! Room registry: process-wide table of crisis rooms, members, and admin
//! emergency subscriptions.
//!
//! Every mutation runs under one `tokio::sync::Mutex` held by the
//! application state, so check-then-act sequences ("room doesn't exist,
//! create it") never race. Fan-out goes through per-connection unbounded
//! channels, so no send awaits while the lock is held.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{Role, ServerEvent};

use super::auth::ValidatedIdentity;

/// Derive the room key for a crisis case from its owner's participant id
pub fn crisis_room_key(owner_id: &str) -> String {
    format!("crisis-{}", owner_id)
}

/// Event-scoped failures; the connection stays alive
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("only volunteers and admins can join crisis rooms")]
    ForbiddenRole,

    #[error("only the person in crisis can open their own crisis room")]
    OwnerOnly,

    #[error("only admins can subscribe to emergency alerts")]
    AdminOnly,

    #[error("target_user_id is required")]
    MissingTarget,

    #[error("connection {0} is not registered")]
    UnknownConnection(Uuid),

    #[error("connection {0} is already registered")]
    DuplicateConnection(Uuid),
}

impl EventError {
    /// Machine-checkable code carried on the wire alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            EventError::ForbiddenRole | EventError::OwnerOnly | EventError::AdminOnly => {
                "FORBIDDEN_ROLE"
            }
            EventError::MissingTarget => "MISSING_TARGET",
            EventError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
            EventError::DuplicateConnection(_) => "DUPLICATE_CONNECTION",
        }
    }
}

/// One live connection: validated identity plus its outbound channel
pub struct ConnectionEntry {
    pub identity: ValidatedIdentity,
    /// Outbound channel consumed by the connection's write task
    pub sender: mpsc::UnboundedSender<String>,
    /// Unix timestamp when the connection registered (milliseconds)
    pub connected_at: i64,
}

/// Metadata for one crisis room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMeta {
    /// Participant id of the person in crisis that owns the room
    pub owner_id: String,
    pub created_at: i64,
    /// Lifetime arrival counter of helpers, never decremented
    pub volunteer_count: u32,
    pub last_activity: i64,
}

/// Snapshot of one room for the operational status surface
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_key: String,
    pub owner_id: String,
    pub created_at: i64,
    pub volunteer_count: u32,
    pub total_members: usize,
    pub last_activity: i64,
    pub is_active: bool,
}

/// Registry of rooms, room members, connections, and admin subscriptions
#[derive(Default)]
pub struct RoomRegistry {
    connections: HashMap<Uuid, ConnectionEntry>,
    rooms: HashMap<String, RoomMeta>,
    members: HashMap<String, HashSet<Uuid>>,
    admin_subscriptions: HashSet<Uuid>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------- connection lifecycle ----------------

    /// Attach a validated identity to a connection, exactly once.
    pub fn register(
        &mut self,
        conn_id: Uuid,
        identity: ValidatedIdentity,
        sender: mpsc::UnboundedSender<String>,
        now: i64,
    ) -> Result<(), EventError> {
        if self.connections.contains_key(&conn_id) {
            return Err(EventError::DuplicateConnection(conn_id));
        }
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                identity,
                sender,
                connected_at: now,
            },
        );
        Ok(())
    }

    /// Drop a connection entry; membership must be cleared via `leave` first
    pub fn unregister(&mut self, conn_id: Uuid) -> Option<ConnectionEntry> {
        self.admin_subscriptions.remove(&conn_id);
        self.connections.remove(&conn_id)
    }

    /// The identity attached to a connection, if registered
    pub fn identity(&self, conn_id: Uuid) -> Option<&ValidatedIdentity> {
        self.connections.get(&conn_id).map(|entry| &entry.identity)
    }

    // ---------------- room transitions ----------------

    /// Create the room for `owner_id` if absent; idempotent.
    pub fn ensure_room(&mut self, owner_id: &str, now: i64) -> RoomMeta {
        let room_key = crisis_room_key(owner_id);
        let meta = self.rooms.entry(room_key.clone()).or_insert_with(|| RoomMeta {
            owner_id: owner_id.to_string(),
            created_at: now,
            volunteer_count: 0,
            last_activity: now,
        });
        let snapshot = meta.clone();
        self.members.entry(room_key).or_default();
        snapshot
    }

    /// Add the room owner's connection to the member set.
    ///
    /// Does not change the volunteer count.
    pub fn join_as_owner(&mut self, owner_id: &str, conn_id: Uuid) -> Result<(), EventError> {
        if !self.connections.contains_key(&conn_id) {
            return Err(EventError::UnknownConnection(conn_id));
        }
        let room_key = crisis_room_key(owner_id);
        self.members.entry(room_key).or_default().insert(conn_id);
        Ok(())
    }

    /// Add a helper connection to an existing (or lazily created) room.
    ///
    /// Increments the room's volunteer arrival counter and refreshes its
    /// last-activity time. Fails with `ForbiddenRole` when a person in
    /// crisis attempts to help another room.
    pub fn join_as_helper(
        &mut self,
        target_user_id: &str,
        conn_id: Uuid,
        now: i64,
    ) -> Result<RoomMeta, EventError> {
        let identity = self
            .connections
            .get(&conn_id)
            .map(|entry| &entry.identity)
            .ok_or(EventError::UnknownConnection(conn_id))?;

        match identity.role {
            Role::Volunteer | Role::Admin => {}
            Role::User => return Err(EventError::ForbiddenRole),
        }

        self.ensure_room(target_user_id, now);
        let room_key = crisis_room_key(target_user_id);
        let meta = self
            .rooms
            .get_mut(&room_key)
            .ok_or(EventError::UnknownConnection(conn_id))?;
        meta.volunteer_count += 1;
        meta.last_activity = now;
        let snapshot = meta.clone();

        self.members.entry(room_key).or_default().insert(conn_id);
        Ok(snapshot)
    }

    /// Remove a connection from every room member set it belongs to.
    ///
    /// Returns the keys of the affected rooms. The volunteer count is a
    /// lifetime arrival counter and is intentionally not decremented.
    pub fn leave(&mut self, conn_id: Uuid) -> Vec<String> {
        let mut affected = Vec::new();
        for (room_key, members) in self.members.iter_mut() {
            if members.remove(&conn_id) {
                affected.push(room_key.clone());
            }
        }
        affected.sort();
        affected
    }

    /// Refresh a room's last-activity timestamp
    pub fn touch_room(&mut self, owner_id: &str, now: i64) {
        let room_key = crisis_room_key(owner_id);
        if let Some(meta) = self.rooms.get_mut(&room_key) {
            meta.last_activity = now;
        }
    }

    /// Remove every room that is both empty and inactive past the threshold.
    ///
    /// Never removes an occupied room regardless of age. Returns the number
    /// of rooms removed.
    pub fn sweep_stale(&mut self, max_inactive_millis: i64, now: i64) -> usize {
        let stale_keys: Vec<String> = self
            .rooms
            .iter()
            .filter(|(room_key, meta)| {
                let inactive = now - meta.last_activity > max_inactive_millis;
                let empty = self
                    .members
                    .get(*room_key)
                    .map(|members| members.is_empty())
                    .unwrap_or(true);
                inactive && empty
            })
            .map(|(room_key, _)| room_key.clone())
            .collect();

        for room_key in &stale_keys {
            self.rooms.remove(room_key);
            self.members.remove(room_key);
            tracing::debug!("Stale room '{}' cleaned up", room_key);
        }

        stale_keys.len()
    }

    // ---------------- admin emergency subscriptions ----------------

    /// Subscribe an admin connection to emergency broadcasts.
    ///
    /// Returns the current subscriber count on success.
    pub fn subscribe_admin(&mut self, conn_id: Uuid) -> Result<usize, EventError> {
        let identity = self
            .connections
            .get(&conn_id)
            .map(|entry| &entry.identity)
            .ok_or(EventError::UnknownConnection(conn_id))?;
        if identity.role != Role::Admin {
            return Err(EventError::AdminOnly);
        }
        self.admin_subscriptions.insert(conn_id);
        Ok(self.admin_subscriptions.len())
    }

    /// Drop an emergency subscription; a no-op when none exists
    pub fn unsubscribe_admin(&mut self, conn_id: Uuid) {
        self.admin_subscriptions.remove(&conn_id);
    }

    pub fn admin_subscriber_count(&self) -> usize {
        self.admin_subscriptions.len()
    }

    // ---------------- fan-out ----------------

    /// Send an event to a single connection
    pub fn send_to(&self, conn_id: Uuid, event: &ServerEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            tracing::error!("Failed to serialize server event");
            return;
        };
        match self.connections.get(&conn_id) {
            Some(entry) => {
                if entry.sender.send(json).is_err() {
                    tracing::warn!("Failed to send event to connection '{}'", conn_id);
                }
            }
            None => tracing::warn!("send_to: connection '{}' is not registered", conn_id),
        }
    }

    /// Deliver an event to every current member of a room.
    ///
    /// The member snapshot is taken under the registry lock, so every member
    /// present when the triggering mutation ran receives the event.
    pub fn broadcast_to_room(&self, room_key: &str, event: &ServerEvent, exclude: Option<Uuid>) {
        let Some(members) = self.members.get(room_key) else {
            tracing::debug!("broadcast to unknown room '{}' skipped", room_key);
            return;
        };
        let Ok(json) = serde_json::to_string(event) else {
            tracing::error!("Failed to serialize server event");
            return;
        };
        for conn_id in members {
            if Some(*conn_id) == exclude {
                continue;
            }
            if let Some(entry) = self.connections.get(conn_id) {
                if entry.sender.send(json.clone()).is_err() {
                    tracing::warn!("Failed to send event to connection '{}'", conn_id);
                }
            }
        }
    }

    /// Deliver an event to every admin-subscribed connection, regardless of
    /// room membership (emergency fan-out, not round-robin).
    pub fn broadcast_to_admin_subscribers(&self, event: &ServerEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            tracing::error!("Failed to serialize server event");
            return;
        };
        for conn_id in &self.admin_subscriptions {
            if let Some(entry) = self.connections.get(conn_id) {
                if entry.sender.send(json.clone()).is_err() {
                    tracing::warn!("Failed to send emergency alert to '{}'", conn_id);
                }
            }
        }
    }

    // ---------------- status surface ----------------

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Metadata snapshot for one room, if it exists
    pub fn room(&self, owner_id: &str) -> Option<RoomMeta> {
        self.rooms.get(&crisis_room_key(owner_id)).cloned()
    }

    /// Number of connections currently joined to a room
    pub fn member_count(&self, room_key: &str) -> usize {
        self.members.get(room_key).map(|m| m.len()).unwrap_or(0)
    }

    /// Snapshots of every active room, for the admin dashboard
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        let mut summaries: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(room_key, meta)| {
                let total_members = self.member_count(room_key);
                RoomSummary {
                    room_key: room_key.clone(),
                    owner_id: meta.owner_id.clone(),
                    created_at: meta.created_at,
                    volunteer_count: meta.volunteer_count,
                    total_members,
                    last_activity: meta.last_activity,
                    is_active: total_members > 0,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.room_key.cmp(&b.room_key));
        summaries
    }
}

//! Server state and configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::common::time::{Clock, SystemClock};
use crate::protocol::Role;

use super::registry::RoomRegistry;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Roles this listening endpoint accepts
    pub allowed_roles: Vec<Role>,
    /// How often the janitor sweeps for stale rooms
    pub sweep_interval: Duration,
    /// Inactivity threshold past which an empty room is removed
    pub max_inactive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allowed_roles: vec![Role::User, Role::Volunteer, Role::Admin],
            sweep_interval: Duration::from_secs(60),
            max_inactive: Duration::from_secs(30 * 60),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Single critical section for all registry mutations
    pub registry: Mutex<RoomRegistry>,
    pub clock: Arc<dyn Clock>,
    pub config: ServerConfig,
}

impl AppState {
    /// Create application state backed by the system clock
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create application state with an injected clock (used by tests)
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(RoomRegistry::new()),
            clock,
            config,
        })
    }
}

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use super::address::Address;
use crate::transport::Transport;

/// A connection's reachability, independent of whether it currently holds a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    Available,
    Busy,
    Dnd,
    Away,
}

/// The callee's dispatch discipline (spec §9: tagged variant, not inheritance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyMode {
    Single,
    Broadcast { max_listeners: Option<u32> },
    Parallel { max_sessions: u32 },
}

impl Default for ConcurrencyMode {
    fn default() -> Self {
        ConcurrencyMode::Single
    }
}

/// How a wake-configured connection should be revived after going to sleep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WakeHandler {
    Webhook { url: String, timeout_seconds: u32 },
    Spawn { command: Vec<String>, timeout_seconds: u32 },
}

impl WakeHandler {
    pub fn timeout_seconds(&self) -> u32 {
        match self {
            WakeHandler::Webhook { timeout_seconds, .. } => *timeout_seconds,
            WakeHandler::Spawn { timeout_seconds, .. } => *timeout_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeMode {
    None,
    WakeOnRing,
}

/// Idle-to-sleep configuration, armed via STATUS (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSleep {
    pub idle_timeout_seconds: u32,
    pub wake_on_ring: bool,
}

/// One per transport session (spec §3).
pub struct Connection {
    pub session_id: Uuid,
    pub address: Option<Address>,
    pub status: ConnectionStatus,
    /// Explicit client-set status override, distinct from the derived "busy
    /// because of an active call" state (spec invariant: "status = busy iff
    /// activeCallIds non-empty OR the client explicitly set busy").
    pub explicit_status: Option<ConnectionStatus>,
    pub metadata: Value,
    pub concurrency: ConcurrencyMode,
    pub active_call_ids: HashSet<Uuid>,
    pub auto_sleep: Option<AutoSleep>,
    pub wake_mode: WakeMode,
    pub wake_handler: Option<WakeHandler>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(session_id: Uuid, transport: Box<dyn Transport>, now: DateTime<Utc>) -> Self {
        Connection {
            session_id,
            address: None,
            status: ConnectionStatus::Available,
            explicit_status: None,
            metadata: Value::Null,
            concurrency: ConcurrencyMode::Single,
            active_call_ids: HashSet::new(),
            auto_sleep: None,
            wake_mode: WakeMode::None,
            wake_handler: None,
            last_heartbeat_at: now,
            transport,
        }
    }

    /// Recompute `status` per the busy invariant in spec §3.
    pub fn refresh_derived_status(&mut self) {
        if let Some(explicit) = self.explicit_status {
            self.status = explicit;
        } else if !self.active_call_ids.is_empty() {
            self.status = ConnectionStatus::Busy;
        } else {
            self.status = ConnectionStatus::Available;
        }
    }

    pub fn is_wake_configured(&self) -> bool {
        matches!(self.wake_mode, WakeMode::WakeOnRing) && self.wake_handler.is_some()
    }

    pub fn admits_new_call(&self) -> bool {
        match &self.concurrency {
            ConcurrencyMode::Single => self.active_call_ids.is_empty(),
            ConcurrencyMode::Parallel { max_sessions } => {
                (self.active_call_ids.len() as u32) < *max_sessions
            }
            // Broadcast admission is handled by the broadcast table, not here.
            ConcurrencyMode::Broadcast { .. } => true,
        }
    }
}

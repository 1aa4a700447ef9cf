use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::address::Address;

/// `ringing -> connected -> ended`, no back-transitions (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Connected,
    Ended,
}

/// A point-to-point call between two connections.
pub struct Call {
    pub call_id: Uuid,
    pub caller_session: Uuid,
    pub caller_address: Address,
    pub callee_session: Uuid,
    pub callee_address: Address,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

impl Call {
    pub fn other_session(&self, session_id: Uuid) -> Option<Uuid> {
        if session_id == self.caller_session {
            Some(self.callee_session)
        } else if session_id == self.callee_session {
            Some(self.caller_session)
        } else {
            None
        }
    }

    pub fn is_participant(&self, session_id: Uuid) -> bool {
        session_id == self.caller_session || session_id == self.callee_session
    }
}

/// A shared call fanning one broadcaster to many listeners (spec §4.4).
pub struct BroadcastSession {
    pub call_id: Uuid,
    pub broadcaster_session: Uuid,
    pub broadcaster_address: Address,
    pub listeners: HashSet<Uuid>,
    pub metadata: Option<Value>,
    pub max_listeners: Option<u32>,
}

impl BroadcastSession {
    pub fn is_full(&self) -> bool {
        match self.max_listeners {
            Some(max) => self.listeners.len() as u32 >= max,
            None => false,
        }
    }
}

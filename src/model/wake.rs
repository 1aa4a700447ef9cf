use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::address::Address;
use super::connection::WakeHandler;

/// Persisted between a connection's sleep and its next registration (spec §4.5).
///
/// Lives in a process-wide side map keyed by address rather than on the
/// (destroyed) connection, per spec §9's "side map not a field" note.
///
/// `Serialize` because this is exactly the `{address, handler}` body the
/// webhook `WakeExecutor` POSTs (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct WakeProfile {
    pub address: Address,
    pub handler: WakeHandler,
}

/// A queued DIAL awaiting its callee's return from sleep.
pub struct PendingWakeCall {
    pub call_id: Uuid,
    pub caller_session: Uuid,
    pub caller_address: Address,
    pub callee_address: Address,
    pub metadata: Option<Value>,
    pub wake_profile: WakeProfile,
}

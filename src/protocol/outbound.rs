use serde::Serialize;
use serde_json::Value;
use strum::Display;
use uuid::Uuid;

/// Frames the router emits (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    Registered { address: String, session_id: Uuid },
    RegisterFailed { reason: RegisterFailedReason },
    HeartbeatAck { timestamp: chrono::DateTime<chrono::Utc> },
    Ring {
        from: String,
        call_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Connected { call_id: Uuid, to: String },
    Busy {
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        reason: BusyReason,
    },
    Hangup {
        call_id: Uuid,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Msg {
        call_id: Uuid,
        from: String,
        data: Value,
        content_type: String,
    },
    SleepPending { reason: String, seconds_until_sleep: u32 },
    PresenceResult { addresses: Vec<PresenceAddress> },
    Error {
        reason: ErrorReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    RegisteredPbx { domain: String, routes: Vec<String> },
    RegisterPbxFailed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceAddress {
    pub address: String,
    pub status: crate::model::ConnectionStatus,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegisterFailedReason {
    AddressInUse,
    InvalidAddress,
    AuthFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BusyReason {
    NoSuchAddress,
    AlreadyInCall,
    Dnd,
    Away,
    Busy,
    MaxListenersReached,
    MaxSessionsReached,
    Timeout,
    WakeFailed,
    CallerUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorReason {
    InvalidPayload,
    NotRegistered,
    RateLimited,
}

impl OutboundFrame {
    pub fn error(reason: ErrorReason, context: impl Into<String>, detail: Option<String>) -> Self {
        OutboundFrame::Error {
            reason,
            context: Some(context.into()),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_serializes_without_to_when_absent() {
        let frame = OutboundFrame::Busy { to: None, reason: BusyReason::Timeout };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "BUSY");
        assert_eq!(json["reason"], "timeout");
        assert!(json.get("to").is_none());
    }

    #[test]
    fn register_failed_reason_is_snake_case() {
        let frame = OutboundFrame::RegisterFailed { reason: RegisterFailedReason::AddressInUse };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["reason"], "address_in_use");
    }

    #[test]
    fn ring_includes_call_id_and_from() {
        let call_id = Uuid::new_v4();
        let frame = OutboundFrame::Ring { from: "a@x.com".into(), call_id, metadata: None };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["from"], "a@x.com");
        assert_eq!(json["call_id"], call_id.to_string());
    }
}

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

/// Frames the router accepts (spec §6). Unknown `type` values fail to parse
/// and the caller maps that to `ERROR{invalid_payload, context: UNKNOWN}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    Register(RegisterFrame),
    Unregister,
    Status(StatusFrame),
    Heartbeat,
    Dial(DialFrame),
    Answer(AnswerFrame),
    Hangup(HangupFrame),
    Msg(MsgFrame),
    Presence(PresenceFrame),
    SleepAck,
    RegisterPbx(RegisterPbxFrame),
}

/// The `type` discriminants this protocol recognizes, used only to tell
/// "valid JSON, unrecognized `type`" apart from "valid JSON, known `type`,
/// but a field is missing or the wrong shape" when a frame fails to parse
/// (spec §6: the former is `context: UNKNOWN`, the latter carries the
/// frame's own type as context).
const KNOWN_FRAME_TYPES: &[&str] = &[
    "REGISTER", "UNREGISTER", "STATUS", "HEARTBEAT", "DIAL", "ANSWER", "HANGUP", "MSG", "PRESENCE",
    "SLEEP_ACK", "REGISTER_PBX",
];

/// Result of decoding one transport message, distinguishing the transport's
/// own "malformed JSON closes the connection" case (spec §6) from a
/// structurally-valid-but-rejected frame that gets an `ERROR` reply instead.
pub enum ParseOutcome {
    Frame(InboundFrame),
    /// Not valid JSON at all; the router never sees it (spec §6).
    MalformedJson,
    /// Valid JSON, but not a frame this protocol accepts. `context` is the
    /// frame's own `type` if it's one of [`KNOWN_FRAME_TYPES`] with a
    /// shape violation, or `"UNKNOWN"` if the type itself is unrecognized.
    InvalidPayload { context: String, detail: String },
}

/// Classifies a raw transport message per spec §6: malformed JSON, a
/// rejected-but-recognizable frame, or a successfully parsed frame.
pub fn parse_frame(text: &str) -> ParseOutcome {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return ParseOutcome::MalformedJson,
    };

    match serde_json::from_value::<InboundFrame>(value.clone()) {
        Ok(frame) => ParseOutcome::Frame(frame),
        Err(err) => {
            let context = value
                .get("type")
                .and_then(Value::as_str)
                .filter(|t| KNOWN_FRAME_TYPES.contains(t))
                .unwrap_or("UNKNOWN")
                .to_string();
            ParseOutcome::InvalidPayload { context, detail: err.to_string() }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RegisterFrame {
    pub address: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub concurrency: Option<String>,
    #[serde(default)]
    pub max_listeners: Option<i64>,
    #[serde(default)]
    pub max_sessions: Option<i64>,
    #[serde(default)]
    pub pool_size: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub wake_handler: Option<WakeHandlerPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WakeHandlerPayload {
    Webhook {
        url: String,
        timeout_seconds: i64,
    },
    Spawn {
        command: Vec<String>,
        timeout_seconds: i64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusFrame {
    pub status: String,
    #[serde(default)]
    pub auto_sleep: Option<AutoSleepPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoSleepPayload {
    pub idle_timeout_seconds: i64,
    pub wake_on_ring: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialFrame {
    pub to: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerFrame {
    pub call_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HangupFrame {
    pub call_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MsgFrame {
    pub call_id: Uuid,
    pub data: Value,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PresenceFrame {
    #[serde(default)]
    pub query: Option<PresenceQueryPayload>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PresenceQueryPayload {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub near: Option<NearPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NearPayload {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPbxFrame {
    pub domain: String,
    #[serde(default)]
    pub routes: Vec<String>,
    pub endpoint: String,
    #[serde(default)]
    pub auth: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dial() {
        let raw = r#"{"type":"DIAL","to":"b@x.com"}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        match frame {
            InboundFrame::Dial(d) => assert_eq!(d.to, "b@x.com"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_register_pbx() {
        let raw = r#"{"type":"REGISTER_PBX","domain":"peer","routes":["*@sub.tld"],"endpoint":"internal"}"#;
        let frame: InboundFrame = serde_json::from_str(raw).unwrap();
        assert!(matches!(frame, InboundFrame::RegisterPbx(_)));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"NONSENSE"}"#;
        let result: Result<InboundFrame, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn parse_frame_rejects_malformed_json() {
        assert!(matches!(parse_frame("{not json"), ParseOutcome::MalformedJson));
    }

    #[test]
    fn parse_frame_reports_unknown_as_context() {
        match parse_frame(r#"{"type":"NONSENSE"}"#) {
            ParseOutcome::InvalidPayload { context, .. } => assert_eq!(context, "UNKNOWN"),
            _ => panic!("expected InvalidPayload"),
        }
    }

    #[test]
    fn parse_frame_reports_known_type_as_context_on_shape_violation() {
        match parse_frame(r#"{"type":"DIAL"}"#) {
            ParseOutcome::InvalidPayload { context, .. } => assert_eq!(context, "DIAL"),
            _ => panic!("expected InvalidPayload"),
        }
    }

    #[test]
    fn parse_frame_succeeds_for_a_valid_frame() {
        assert!(matches!(parse_frame(r#"{"type":"HEARTBEAT"}"#), ParseOutcome::Frame(InboundFrame::Heartbeat)));
    }

    #[test]
    fn heartbeat_and_sleep_ack_need_no_fields() {
        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"HEARTBEAT"}"#).unwrap(),
            InboundFrame::Heartbeat
        ));
        assert!(matches!(
            serde_json::from_str::<InboundFrame>(r#"{"type":"SLEEP_ACK"}"#).unwrap(),
            InboundFrame::SleepAck
        ));
    }
}

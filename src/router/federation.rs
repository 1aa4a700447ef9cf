//! Router-side half of §4.11 FederationPeer: `REGISTER_PBX` bookkeeping and
//! route-pattern lookup for DIAL forwarding. The outbound link itself (the
//! websocket client, reconnect/backoff, synthetic connection creation) lives
//! in the top-level `crate::federation` module; everything here runs inside
//! the serialized dispatch loop like any other frame handler.

use uuid::Uuid;

use crate::model::Address;
use crate::protocol::inbound::{DialFrame, RegisterPbxFrame};
use crate::protocol::outbound::OutboundFrame;

use super::RouterCore;

impl RouterCore {
    /// `REGISTER_PBX` (spec §4.11 step 1): installs the sender's announced
    /// route patterns and acknowledges. Any live connection can send this,
    /// not only the synthetic ones `crate::federation::run` creates — a
    /// real inbound peer link would announce the exact same way.
    pub(crate) fn handle_register_pbx(&mut self, session_id: Uuid, frame: RegisterPbxFrame) {
        if self.registry.get(session_id).is_none() {
            return;
        }
        self.federation_routes.insert(session_id, frame.routes.clone());
        self.send_to(
            session_id,
            OutboundFrame::RegisteredPbx { domain: frame.domain, routes: frame.routes },
        );
    }

    /// The first live federation connection whose announced routes match
    /// `address` (spec §4.11: "if a matching peer connection exists, forward
    /// rather than reject").
    pub(crate) fn federation_route_for(&self, address: &Address) -> Option<Uuid> {
        self.federation_routes
            .iter()
            .find(|(session_id, patterns)| {
                self.registry.get(**session_id).is_some()
                    && patterns.iter().any(|p| crate::federation::route_matches(p, address.as_str()))
            })
            .map(|(session_id, _)| *session_id)
    }

    /// Pass-through forwarding of an unresolved local DIAL across a
    /// federation link (spec §9: no invented `DIAL_FORWARD`, ordinary
    /// frames only). The caller sees no immediate reply, same as a wake
    /// attempt — the remote side's eventual response arrives as ordinary
    /// frames over the same link and is itself pass-through (spec's final
    /// Open Question: match current behaviour, don't correlate further).
    pub(crate) fn forward_federated_dial(&mut self, target_session: Uuid, caller_address: &Address, frame: &DialFrame) {
        let Some(conn) = self.registry.get(target_session) else { return };
        let value = serde_json::json!({
            "type": "DIAL",
            "to": frame.to,
            "metadata": frame.metadata,
            "from": caller_address.to_string(),
        });
        conn.transport.send_raw(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::{ChannelTransport, TransportEvent};
    use crate::wake_executor::WakeExecutor;

    fn test_config() -> Config {
        Config {
            server_host: "127.0.0.1".into(),
            server_port: 0,
            tls_cert_path: None,
            tls_key_path: None,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            call_ringing_timeout_ms: 30_000,
            dial_rate_max_attempts: 100,
            dial_rate_window_ms: 60_000,
            federation: Default::default(),
            log_level: "info".into(),
        }
    }

    #[tokio::test]
    async fn register_pbx_installs_routes_and_acks() {
        let handle = super::super::RouterCore::spawn(test_config(), WakeExecutor::Noop);
        let (transport, mut rx) = ChannelTransport::new();
        let session_id = Uuid::new_v4();
        handle.submit(super::super::RouterEvent::Connect { session_id, transport: Box::new(transport) });
        handle.submit(super::super::RouterEvent::Inbound {
            session_id,
            frame: crate::protocol::InboundFrame::RegisterPbx(RegisterPbxFrame {
                domain: "peer.tld".into(),
                routes: vec!["*@sub.tld".into()],
                endpoint: "wss://peer".into(),
                auth: None,
            }),
        });

        let evt = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        match evt {
            TransportEvent::Frame(OutboundFrame::RegisteredPbx { domain, routes }) => {
                assert_eq!(domain, "peer.tld");
                assert_eq!(routes, vec!["*@sub.tld".to_string()]);
            }
            other => panic!("expected REGISTERED_PBX, got {other:?}"),
        }
    }
}

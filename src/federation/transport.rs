//! The synthetic connection's transport (spec §4.11, design note 9): every
//! `OutboundFrame` the local router sends to the peer's session id is
//! serialized and written to the socket, except `REGISTERED_PBX` and
//! `ERROR`, which are dropped here to prevent a feedback loop across the
//! federation boundary.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::outbound::OutboundFrame;
use crate::transport::Transport;

pub struct FederationTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl FederationTransport {
    /// Returns the transport plus a second sender clone for the caller's own
    /// direct writes (the REGISTER_PBX announce and periodic HEARTBEAT,
    /// neither of which is triggered by the local router) and the receiver
    /// that drains onto the socket.
    pub fn new() -> (Self, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FederationTransport { tx: tx.clone() }, tx, rx)
    }
}

impl Transport for FederationTransport {
    fn send(&self, frame: OutboundFrame) {
        if matches!(frame, OutboundFrame::RegisteredPbx { .. } | OutboundFrame::Error { .. }) {
            return;
        }
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = self.tx.send(text);
        }
    }

    fn close(&self, _code: u16, _reason: &str) {
        // The socket itself is owned by `federation::run`'s reconnect loop,
        // not by this synthetic connection; router-initiated teardown of the
        // connection record doesn't need to do anything here.
    }

    fn send_raw(&self, value: Value) {
        if let Ok(text) = serde_json::to_string(&value) {
            let _ = self.tx.send(text);
        }
    }
}

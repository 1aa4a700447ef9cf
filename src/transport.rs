//! The duplex frame transport is a collaborator, not part of the router core
//! (spec §1). This trait is the thin seam: the router only ever needs to push
//! an outbound frame at a connection or close it. Everything about framing,
//! JSON encoding, WebSocket upgrade and TLS termination lives on the other
//! side of this trait, per the teacher's own split between
//! `ConnectionManager` (bookkeeping) and the axum WS handler (wire format).

use serde_json::Value;

use crate::protocol::outbound::OutboundFrame;

/// A handle to one connection's outbound half.
///
/// Implementations must be cheap to hold inside a `Connection` and must not
/// block; a failed send is logged and ignored by the caller (spec §7 —
/// "transport send failures are logged and ignored").
pub trait Transport: Send {
    fn send(&self, frame: OutboundFrame);

    /// Close the transport with a 4000-range status code and a reason string
    /// (spec §4.9 step 6).
    fn close(&self, code: u16, reason: &str);

    /// Forward an already-shaped frame verbatim, bypassing the typed
    /// `OutboundFrame` enum. Only the federation transport overrides this —
    /// it's how an unresolved local DIAL gets passed upstream across a peer
    /// link without inventing a `DIAL_FORWARD` frame type (spec §4.11, §9).
    /// Every other transport no-ops.
    fn send_raw(&self, _value: Value) {}
}

/// A transport that discards everything. Used for connections created purely
/// for unit-testing model invariants, and as the synthetic pre-dial state.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _frame: OutboundFrame) {}
    fn close(&self, _code: u16, _reason: &str) {}
}

/// An in-memory transport double that records every frame sent to it.
///
/// Grounded in the teacher's `mpsc::UnboundedSender<String>` per-connection
/// channel; here the channel carries typed frames instead of pre-serialized
/// strings, since tests assert on frame contents directly.
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Debug)]
pub enum TransportEvent {
    Frame(OutboundFrame),
    Raw(Value),
    Close { code: u16, reason: String },
}

impl ChannelTransport {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (ChannelTransport { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: OutboundFrame) {
        let _ = self.tx.send(TransportEvent::Frame(frame));
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(TransportEvent::Close {
            code,
            reason: reason.to_owned(),
        });
    }

    fn send_raw(&self, value: Value) {
        let _ = self.tx.send(TransportEvent::Raw(value));
    }
}

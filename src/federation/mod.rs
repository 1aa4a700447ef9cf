//! §4.11 FederationPeer: maintains an outbound link to a parent router,
//! splices it into the local router as a synthetic connection, and relays
//! frames across the boundary.
//!
//! Grounded in the magic-wormhole rendezvous client's reconnect/backoff
//! shape (`other_examples/`) for the connect loop, and in design note 9
//! ("federation as a synthetic connection") for treating the link as an
//! ordinary `Connection` whose transport happens to write to a remote
//! socket instead of a local client.

mod routes;
mod transport;

pub use routes::matches as route_matches;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::config::FederationConfig;
use crate::protocol::inbound::{InboundFrame, RegisterPbxFrame};
use crate::router::{RouterEvent, RouterHandle};

use transport::FederationTransport;

/// Frame types the peer's replies are only ever consumed for feedback-loop
/// avoidance, never forwarded into the local router (spec §4.11).
const IGNORED_INBOUND_TYPES: [&str; 4] =
    ["REGISTERED_PBX", "REGISTER_PBX_FAILED", "REGISTER_FAILED", "HEARTBEAT_ACK"];

/// Runs for the lifetime of the process: connect, splice in, relay, and on
/// any drop reconnect after the configured delay. Never returns except by
/// being aborted by the caller (main.rs cancels this task on shutdown).
pub async fn run(config: FederationConfig, handle: RouterHandle) {
    let Some(peer_url) = config.peer_url.clone() else {
        tracing::warn!("federation enabled but no peer_url configured; not starting");
        return;
    };
    let local_domain = config.local_domain.clone().unwrap_or_default();
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms.max(1));

    loop {
        tracing::info!(url = %peer_url, "federation: connecting to parent router");
        match tokio_tungstenite::connect_async(&peer_url).await {
            Ok((stream, _response)) => {
                tracing::info!("federation: connected");
                run_session(stream, &config, &local_domain, &handle).await;
                tracing::info!("federation: link closed, will reconnect");
            }
            Err(err) => {
                tracing::warn!(error = %err, "federation: connect failed");
            }
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn run_session<S>(stream: S, config: &FederationConfig, local_domain: &str, handle: &RouterHandle)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut ws_sink, mut ws_stream) = stream.split();
    let (transport, raw_tx, mut outbound_rx) = FederationTransport::new();
    let session_id = Uuid::new_v4();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    handle.submit(RouterEvent::Connect { session_id, transport: Box::new(transport) });

    // Step 1 (spec §4.11): synthetic inbound REGISTER_PBX so the local
    // router treats this link as a downstream announcing its routes.
    handle.submit(RouterEvent::Inbound {
        session_id,
        frame: InboundFrame::RegisterPbx(RegisterPbxFrame {
            domain: local_domain.to_string(),
            routes: config.announce_routes.clone(),
            endpoint: config.peer_url.clone().unwrap_or_default(),
            auth: config.auth_token.clone(),
        }),
    });

    // Step 2: announce ourselves to the parent, over the wire this time.
    let announce = serde_json::json!({
        "type": "REGISTER_PBX",
        "domain": local_domain,
        "routes": config.announce_routes,
        "endpoint": "internal",
        "auth": config.auth_token,
    });
    if raw_tx.send(announce.to_string()).is_err() {
        writer.abort();
        handle.submit(RouterEvent::Disconnected { session_id, reason: "peer_disconnected".into() });
        return;
    }

    // Step 3: periodic HEARTBEAT to the parent. Also re-submitted as a
    // local inbound HEARTBEAT so the heartbeat sweep (spec §4.8) doesn't
    // evict this synthetic connection as stale.
    let heartbeat_interval = Duration::from_millis(config.heartbeat_interval_ms.max(1_000));
    let heartbeat_tx = raw_tx.clone();
    let heartbeat_handle = handle.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; skip it, we just connected
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(serde_json::json!({"type": "HEARTBEAT"}).to_string()).is_err() {
                break;
            }
            heartbeat_handle.submit(RouterEvent::Inbound { session_id, frame: InboundFrame::Heartbeat });
        }
    });

    while let Some(message) = ws_stream.next().await {
        let Ok(message) = message else { break };
        let Message::Text(text) = message else { continue };
        dispatch_inbound(&text, session_id, handle);
    }

    heartbeat_task.abort();
    writer.abort();
    handle.submit(RouterEvent::Disconnected { session_id, reason: "peer_disconnected".into() });
}

/// Parses one wire message from the parent and, unless its `type` is in the
/// feedback-loop ignore list, forwards it into the local router bound to the
/// synthetic connection (spec §4.11: "otherwise forward the parsed frame").
fn dispatch_inbound(text: &str, session_id: Uuid, handle: &RouterHandle) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("federation: dropping non-JSON frame from parent");
        return;
    };
    let frame_type = value.get("type").and_then(Value::as_str).unwrap_or("");
    if IGNORED_INBOUND_TYPES.contains(&frame_type) {
        return;
    }

    match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => handle.submit(RouterEvent::Inbound { session_id, frame }),
        Err(err) => tracing::debug!(%frame_type, error = %err, "federation: dropping unrecognized frame from parent"),
    }
}

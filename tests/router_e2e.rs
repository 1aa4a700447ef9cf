//! End-to-end frame sequences against a live `RouterCore` dispatch loop, each
//! driven through a channel-backed `ChannelTransport` standing in for a real
//! WebSocket connection. Grounded in the teacher's integration-test harness
//! shape (one helper per connection, assert on the frames it receives).

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use uuid::Uuid;

use systemx_router::config::{Config, FederationConfig};
use systemx_router::protocol::inbound::InboundFrame;
use systemx_router::protocol::outbound::{BusyReason, ErrorReason, OutboundFrame};
use systemx_router::router::{RouterCore, RouterEvent, RouterHandle};
use systemx_router::transport::{ChannelTransport, TransportEvent};
use systemx_router::wake_executor::WakeExecutor;

const STEP: Duration = Duration::from_millis(500);

fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".into(),
        server_port: 0,
        tls_cert_path: None,
        tls_key_path: None,
        heartbeat_interval_ms: 10_000,
        heartbeat_timeout_ms: 30_000,
        call_ringing_timeout_ms: 50,
        dial_rate_max_attempts: 100,
        dial_rate_window_ms: 60_000,
        federation: FederationConfig::default(),
        log_level: "info".into(),
    }
}

async fn next_frame(rx: &mut UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(STEP, rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("transport channel closed")
}

async fn expect_frame(rx: &mut UnboundedReceiver<TransportEvent>) -> OutboundFrame {
    match next_frame(rx).await {
        TransportEvent::Frame(frame) => frame,
        other => panic!("expected a typed frame, got {other:?}"),
    }
}

/// Connects a fresh session and registers it at `address`, returning its
/// session id and transport receiver. Panics if registration fails.
async fn register(handle: &RouterHandle, address: &str) -> (Uuid, UnboundedReceiver<TransportEvent>) {
    let (transport, mut rx) = ChannelTransport::new();
    let session_id = handle.new_session_id();
    handle.submit(RouterEvent::Connect { session_id, transport: Box::new(transport) });
    handle.submit(RouterEvent::Inbound {
        session_id,
        frame: serde_json::from_value(json!({"type": "REGISTER", "address": address})).unwrap(),
    });

    match expect_frame(&mut rx).await {
        OutboundFrame::Registered { session_id: sid, .. } => assert_eq!(sid, session_id),
        other => panic!("expected REGISTERED, got {other:?}"),
    }

    (session_id, rx)
}

async fn register_with(
    handle: &RouterHandle,
    body: serde_json::Value,
) -> (Uuid, UnboundedReceiver<TransportEvent>) {
    let (transport, mut rx) = ChannelTransport::new();
    let session_id = handle.new_session_id();
    handle.submit(RouterEvent::Connect { session_id, transport: Box::new(transport) });
    let frame: InboundFrame = serde_json::from_value(body).unwrap();
    handle.submit(RouterEvent::Inbound { session_id, frame });

    match expect_frame(&mut rx).await {
        OutboundFrame::Registered { session_id: sid, .. } => assert_eq!(sid, session_id),
        other => panic!("expected REGISTERED, got {other:?}"),
    }

    (session_id, rx)
}

fn dial(handle: &RouterHandle, session_id: Uuid, to: &str) {
    handle.submit(RouterEvent::Inbound {
        session_id,
        frame: serde_json::from_value(json!({"type": "DIAL", "to": to})).unwrap(),
    });
}

#[tokio::test]
async fn point_to_point_round_trip() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (a, mut a_rx) = register(&handle, "a@x.com").await;
    let (b, mut b_rx) = register(&handle, "b@x.com").await;

    dial(&handle, a, "b@x.com");

    let call_id = match expect_frame(&mut b_rx).await {
        OutboundFrame::Ring { from, call_id, .. } => {
            assert_eq!(from, "a@x.com");
            call_id
        }
        other => panic!("expected RING, got {other:?}"),
    };

    handle.submit(RouterEvent::Inbound {
        session_id: b,
        frame: serde_json::from_value(json!({"type": "ANSWER", "call_id": call_id})).unwrap(),
    });

    match expect_frame(&mut a_rx).await {
        OutboundFrame::Connected { call_id: c, to } => {
            assert_eq!(c, call_id);
            assert_eq!(to, "b@x.com");
        }
        other => panic!("expected CONNECTED, got {other:?}"),
    }

    handle.submit(RouterEvent::Inbound {
        session_id: a,
        frame: serde_json::from_value(json!({"type": "MSG", "call_id": call_id, "data": "hi"})).unwrap(),
    });
    match expect_frame(&mut b_rx).await {
        OutboundFrame::Msg { from, data, .. } => {
            assert_eq!(from, "a@x.com");
            assert_eq!(data, json!("hi"));
        }
        other => panic!("expected MSG, got {other:?}"),
    }

    handle.submit(RouterEvent::Inbound {
        session_id: a,
        frame: serde_json::from_value(json!({"type": "HANGUP", "call_id": call_id})).unwrap(),
    });
    match expect_frame(&mut b_rx).await {
        OutboundFrame::Hangup { call_id: c, reason, .. } => {
            assert_eq!(c, call_id);
            assert_eq!(reason, "normal");
        }
        other => panic!("expected HANGUP, got {other:?}"),
    }
}

#[tokio::test]
async fn dial_to_unregistered_address_is_busy_no_such_address() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (a, mut a_rx) = register(&handle, "a@x.com").await;

    dial(&handle, a, "nobody@x.com");

    match expect_frame(&mut a_rx).await {
        OutboundFrame::Busy { to, reason } => {
            assert_eq!(to.as_deref(), Some("nobody@x.com"));
            assert_eq!(reason, BusyReason::NoSuchAddress);
        }
        other => panic!("expected BUSY, got {other:?}"),
    }
}

#[tokio::test]
async fn single_concurrency_callee_already_in_call_is_busy() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (a, _a_rx) = register(&handle, "a@x.com").await;
    let (b, mut b_rx) = register(&handle, "b@x.com").await;
    let (c, mut c_rx) = register(&handle, "c@x.com").await;

    dial(&handle, a, "b@x.com");
    let _first_ring = expect_frame(&mut b_rx).await;

    dial(&handle, c, "b@x.com");
    match expect_frame(&mut c_rx).await {
        OutboundFrame::Busy { reason, .. } => assert_eq!(reason, BusyReason::AlreadyInCall),
        other => panic!("expected BUSY, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_fan_out_with_cap() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (_clock, mut clock_rx) = register_with(
        &handle,
        json!({"type": "REGISTER", "address": "clock@t", "concurrency": "broadcast", "max_listeners": 2}),
    )
    .await;

    let (l1, mut l1_rx) = register(&handle, "l1@t").await;
    let (l2, mut l2_rx) = register(&handle, "l2@t").await;
    let (l3, mut l3_rx) = register(&handle, "l3@t").await;

    dial(&handle, l1, "clock@t");
    let call_id = match expect_frame(&mut l1_rx).await {
        OutboundFrame::Connected { call_id, to } => {
            assert_eq!(to, "clock@t");
            call_id
        }
        other => panic!("expected CONNECTED, got {other:?}"),
    };
    let _ring1 = expect_frame(&mut clock_rx).await;

    dial(&handle, l2, "clock@t");
    match expect_frame(&mut l2_rx).await {
        OutboundFrame::Connected { call_id: c, .. } => assert_eq!(c, call_id),
        other => panic!("expected CONNECTED, got {other:?}"),
    }
    let _ring2 = expect_frame(&mut clock_rx).await;

    dial(&handle, l3, "clock@t");
    match expect_frame(&mut l3_rx).await {
        OutboundFrame::Busy { reason, .. } => assert_eq!(reason, BusyReason::MaxListenersReached),
        other => panic!("expected BUSY, got {other:?}"),
    }

    handle.submit(RouterEvent::Inbound {
        session_id: _clock,
        frame: serde_json::from_value(json!({"type": "MSG", "call_id": call_id, "data": "tick"})).unwrap(),
    });

    for rx in [&mut l1_rx, &mut l2_rx] {
        match expect_frame(rx).await {
            OutboundFrame::Msg { from, data, .. } => {
                assert_eq!(from, "clock@t");
                assert_eq!(data, json!("tick"));
            }
            other => panic!("expected MSG, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn ring_timeout_busies_caller_and_hangs_up_callee() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (a, mut a_rx) = register(&handle, "a@x.com").await;
    let (_b, mut b_rx) = register(&handle, "b@x.com").await;

    dial(&handle, a, "b@x.com");
    let call_id = match expect_frame(&mut b_rx).await {
        OutboundFrame::Ring { call_id, .. } => call_id,
        other => panic!("expected RING, got {other:?}"),
    };

    match timeout(Duration::from_millis(500), a_rx.recv()).await.unwrap().unwrap() {
        TransportEvent::Frame(OutboundFrame::Busy { to, reason }) => {
            assert!(to.is_none());
            assert_eq!(reason, BusyReason::Timeout);
        }
        other => panic!("expected BUSY{{timeout}}, got {other:?}"),
    }

    match expect_frame(&mut b_rx).await {
        OutboundFrame::Hangup { call_id: c, reason, .. } => {
            assert_eq!(c, call_id);
            assert_eq!(reason, "timeout");
        }
        other => panic!("expected HANGUP, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnect_during_call_notifies_the_other_party() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (a, mut a_rx) = register(&handle, "a@x.com").await;
    let (b, mut b_rx) = register(&handle, "b@x.com").await;

    dial(&handle, a, "b@x.com");
    let call_id = match expect_frame(&mut b_rx).await {
        OutboundFrame::Ring { call_id, .. } => call_id,
        other => panic!("expected RING, got {other:?}"),
    };
    handle.submit(RouterEvent::Inbound {
        session_id: b,
        frame: serde_json::from_value(json!({"type": "ANSWER", "call_id": call_id})).unwrap(),
    });
    let _connected = expect_frame(&mut a_rx).await;

    handle.submit(RouterEvent::Disconnected { session_id: a, reason: "peer_disconnected".into() });

    match expect_frame(&mut b_rx).await {
        OutboundFrame::Hangup { call_id: c, .. } => assert_eq!(c, call_id),
        other => panic!("expected HANGUP, got {other:?}"),
    }
}

/// Spec §8 scenario 5: a sleeping wake-on-ring address is dialed, the caller
/// gets no immediate reply, and the agent's subsequent REGISTER drains the
/// pending call into a real RING/CONNECTED pair with the same `call_id`.
#[tokio::test]
async fn wake_on_ring_success_drains_on_reregister() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (bot, mut bot_rx) = register_with(
        &handle,
        json!({
            "type": "REGISTER",
            "address": "bot@x.com",
            "mode": "wake_on_ring",
            "wake_handler": {"kind": "webhook", "url": "http://example.com/wake", "timeout_seconds": 1},
        }),
    )
    .await;

    handle.submit(RouterEvent::Inbound { session_id: bot, frame: serde_json::from_value(json!({"type": "SLEEP_ACK"})).unwrap() });
    match next_frame(&mut bot_rx).await {
        TransportEvent::Close { reason, .. } => assert_eq!(reason, "sleep"),
        other => panic!("expected the sleeping connection to close, got {other:?}"),
    }

    let (caller, mut caller_rx) = register(&handle, "caller@x.com").await;
    dial(&handle, caller, "bot@x.com");

    // No immediate reply while the callee is still asleep (spec §4.5).
    assert!(timeout(Duration::from_millis(100), caller_rx.recv()).await.is_err());

    let (bot2, mut bot2_rx) = register(&handle, "bot@x.com").await;
    let call_id = match expect_frame(&mut bot2_rx).await {
        OutboundFrame::Ring { from, call_id, .. } => {
            assert_eq!(from, "caller@x.com");
            call_id
        }
        other => panic!("expected RING, got {other:?}"),
    };

    handle.submit(RouterEvent::Inbound {
        session_id: bot2,
        frame: serde_json::from_value(json!({"type": "ANSWER", "call_id": call_id})).unwrap(),
    });
    match expect_frame(&mut caller_rx).await {
        OutboundFrame::Connected { call_id: c, to } => {
            assert_eq!(c, call_id);
            assert_eq!(to, "bot@x.com");
        }
        other => panic!("expected CONNECTED, got {other:?}"),
    }
}

#[tokio::test]
async fn presence_filters_by_domain_and_capability() {
    let handle = RouterCore::spawn(test_config(), WakeExecutor::Noop);
    let (a, mut a_rx) = register(&handle, "a@x.com").await;
    let (_b, _b_rx) = register_with(
        &handle,
        json!({"type": "REGISTER", "address": "b@x.com", "metadata": {"capabilities": ["video"]}}),
    )
    .await;
    let (_c, _c_rx) = register(&handle, "c@other.com").await;

    handle.submit(RouterEvent::Inbound {
        session_id: a,
        frame: serde_json::from_value(
            json!({"type": "PRESENCE", "query": {"domain": "x.com", "capabilities": ["video"]}}),
        )
        .unwrap(),
    });

    match expect_frame(&mut a_rx).await {
        OutboundFrame::PresenceResult { addresses } => {
            assert_eq!(addresses.len(), 1);
            assert_eq!(addresses[0].address, "b@x.com");
        }
        other => panic!("expected PRESENCE_RESULT, got {other:?}"),
    }
}

#[tokio::test]
async fn dial_rate_limit_rejects_excess_attempts() {
    let mut config = test_config();
    config.dial_rate_max_attempts = 1;
    let handle = RouterCore::spawn(config, WakeExecutor::Noop);
    let (a, mut a_rx) = register(&handle, "a@x.com").await;

    dial(&handle, a, "nobody@x.com");
    match expect_frame(&mut a_rx).await {
        OutboundFrame::Busy { reason, .. } => assert_eq!(reason, BusyReason::NoSuchAddress),
        other => panic!("expected BUSY, got {other:?}"),
    }

    dial(&handle, a, "nobody@x.com");
    match expect_frame(&mut a_rx).await {
        OutboundFrame::Error { reason, context, .. } => {
            assert_eq!(reason, ErrorReason::RateLimited);
            assert_eq!(context.as_deref(), Some("DIAL"));
        }
        other => panic!("expected ERROR, got {other:?}"),
    }
}

use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use systemx_router::config::Config;
use systemx_router::protocol::inbound::{parse_frame, ParseOutcome};
use systemx_router::protocol::outbound::{ErrorReason, OutboundFrame};
use systemx_router::router::{RouterCore, RouterEvent, RouterHandle};
use systemx_router::transport::Transport;
use systemx_router::wake_executor::WakeExecutor;

#[derive(Clone)]
struct AppState {
    handle: RouterHandle,
    started_at: Instant,
}

/// The concrete `Transport` for a browser/agent connection (spec §1 names
/// the WebSocket upgrade, JSON framing, and TLS termination as out-of-scope
/// collaborators — this is that collaborator, generalized from the
/// teacher's own `ConnectionManager` per-connection channel).
struct AxumTransport {
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl Transport for AxumTransport {
    fn send(&self, frame: OutboundFrame) {
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = self.tx.send(WsMessage::Text(text));
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.to_owned().into(),
        })));
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "systemx_router=info,axum=info".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env().expect("failed to load configuration");
    info!(addr = %config.server_addr(), "SystemX router starting");

    let wake_executor = WakeExecutor::live();
    let handle = RouterCore::spawn(config.clone(), wake_executor);

    spawn_heartbeat_sweeper(handle.clone(), config.heartbeat_interval());

    if config.federation.enabled {
        let federation_config = config.federation.clone();
        let federation_handle = handle.clone();
        tokio::spawn(async move {
            systemx_router::federation::run(federation_config, federation_handle).await;
        });
        info!("federation peer link enabled");
    }

    let state = AppState { handle, started_at: Instant::now() };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.server_addr())
        .await
        .expect("failed to bind listen address");
    info!("listening on {}", config.server_addr());

    axum::serve(listener, app).await.expect("server failed");
}

fn spawn_heartbeat_sweeper(handle: RouterHandle, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            handle.submit(RouterEvent::HeartbeatSweep);
        }
    });
}

/// Ambient operability route (SPEC_FULL.md §B), not a spec feature: reports
/// live connection count and process uptime.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "connections": state.handle.connection_count(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let session_id = state.handle.new_session_id();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let is_close = matches!(message, WsMessage::Close(_));
            if ws_sink.send(message).await.is_err() || is_close {
                break;
            }
        }
    });

    state.handle.submit(RouterEvent::Connect {
        session_id,
        transport: Box::new(AxumTransport { tx: tx.clone() }),
    });

    let mut disconnect_reason = "peer_disconnected";

    while let Some(message) = ws_stream.next().await {
        let Ok(message) = message else { break };
        match message {
            WsMessage::Text(text) => match parse_frame(&text) {
                ParseOutcome::Frame(frame) => state.handle.submit(RouterEvent::Inbound { session_id, frame }),
                ParseOutcome::InvalidPayload { context, detail } => {
                    // Spec §6: valid JSON with an unrecognized `type`, or a
                    // known type with a field-shape violation, gets an
                    // ERROR reply — the connection stays open.
                    let frame = OutboundFrame::error(ErrorReason::InvalidPayload, context, Some(detail));
                    if let Ok(text) = serde_json::to_string(&frame) {
                        let _ = tx.send(WsMessage::Text(text));
                    }
                }
                ParseOutcome::MalformedJson => {
                    // Spec §6: malformed JSON closes the transport with a
                    // protocol-error code; the router never sees the frame.
                    tracing::debug!(%session_id, "malformed frame, closing connection");
                    let _ = tx.send(WsMessage::Close(Some(CloseFrame {
                        code: 1007,
                        reason: "malformed frame".into(),
                    })));
                    disconnect_reason = "protocol_error";
                    break;
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.handle.submit(RouterEvent::Disconnected {
        session_id,
        reason: disconnect_reason.to_string(),
    });
    writer.abort();
}

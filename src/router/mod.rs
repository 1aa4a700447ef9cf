//! The router core (spec §4.2-§4.4, §9 "Router core" in the component table).
//!
//! Everything that mutates shared state — the registry, call table,
//! broadcast table, wake queue, rate limiter — runs inside one
//! [`RouterCore::run`] loop pulling [`RouterEvent`]s off a single mailbox, per
//! spec §5's "funnel state mutation through one queue". Inbound frames,
//! timer fires, and wake-executor results are all just events on that
//! mailbox; nothing here ever `.await`s mid-handler on anything but sending
//! to the mailbox itself, so no two handlers can observe an intermediate
//! state (the suspension-point guarantee spec §5 asks for).

pub mod broadcast;
pub mod dial;
pub mod federation;
pub mod presence;
pub mod rate_limit;
pub mod register;
pub mod timers;
pub mod wake;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::model::{Address, BroadcastSession, Call, PendingWakeCall, WakeProfile};
use crate::protocol::InboundFrame;
use crate::registry::ConnectionRegistry;
use crate::transport::Transport;
use crate::wake_executor::WakeExecutor;

use rate_limit::DialRateLimiter;

/// Everything that can happen to the router: an inbound frame, a connection
/// lifecycle event, or one of the timer fires enumerated in spec §5.
pub enum RouterEvent {
    Connect {
        session_id: Uuid,
        transport: Box<dyn Transport>,
    },
    Inbound {
        session_id: Uuid,
        frame: InboundFrame,
    },
    /// Transport-initiated close (peer drop) or any other external reason.
    Disconnected { session_id: Uuid, reason: String },
    RingTimeout { call_id: Uuid, generation: u64 },
    WakeTimeout { address: Address, call_id: Uuid, generation: u64 },
    WakeOutcome { address: Address, call_id: Uuid, outcome: Result<(), String> },
    IdleTimerFired { session_id: Uuid, generation: u64 },
    SleepPendingFired { session_id: Uuid, generation: u64 },
    HeartbeatSweep,
}

/// A cheap, cloneable handle to the router's mailbox. This is what
/// transports, timers, and the federation peer hold to push events in.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterEvent>,
    /// Live connection count, maintained by the dispatch loop and read from
    /// the `/healthz` route (SPEC_FULL.md §B) — the one piece of router
    /// state a collaborator is allowed to peek at without going through the
    /// mailbox, since it's a monotonically-consistent counter, not anything
    /// that needs serialised mutation.
    connection_count: Arc<AtomicUsize>,
}

impl RouterHandle {
    pub fn submit(&self, event: RouterEvent) {
        // The receiver only ever goes away on full router shutdown; a failed
        // send past that point is inert, matching spec §7's "never crash"
        // posture for anything outside active request handling.
        let _ = self.tx.send(event);
    }

    pub fn new_session_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }
}

pub struct RouterCore {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) calls: HashMap<Uuid, Call>,
    pub(crate) broadcasts: HashMap<Uuid, BroadcastSession>,
    pub(crate) broadcast_by_address: HashMap<Address, Uuid>,
    pub(crate) wake_profiles: HashMap<Address, WakeProfile>,
    pub(crate) pending_wakes: HashMap<Address, VecDeque<PendingWakeCall>>,
    pub(crate) rate_limiter: DialRateLimiter,
    pub(crate) ring_generation: HashMap<Uuid, u64>,
    pub(crate) idle_generation: HashMap<Uuid, u64>,
    pub(crate) wake_generation: HashMap<Uuid, u64>,
    pub(crate) config: Config,
    pub(crate) wake_executor: WakeExecutor,
    pub(crate) handle: RouterHandle,
    /// Federation route patterns installed by REGISTER_PBX, keyed by the
    /// synthetic connection's session id (spec §4.11).
    pub(crate) federation_routes: HashMap<Uuid, Vec<String>>,
    pub(crate) connection_count: Arc<AtomicUsize>,
}

impl RouterCore {
    pub fn spawn(config: Config, wake_executor: WakeExecutor) -> RouterHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_count = Arc::new(AtomicUsize::new(0));
        let handle = RouterHandle { tx, connection_count: connection_count.clone() };
        let core = RouterCore {
            registry: ConnectionRegistry::new(),
            calls: HashMap::new(),
            broadcasts: HashMap::new(),
            broadcast_by_address: HashMap::new(),
            wake_profiles: HashMap::new(),
            pending_wakes: HashMap::new(),
            rate_limiter: DialRateLimiter::new(config.dial_rate_max_attempts, config.dial_rate_window_ms),
            ring_generation: HashMap::new(),
            idle_generation: HashMap::new(),
            wake_generation: HashMap::new(),
            config,
            wake_executor,
            handle: handle.clone(),
            federation_routes: HashMap::new(),
            connection_count,
        };
        tokio::spawn(core.run(rx));
        handle
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RouterEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event);
        }
        tracing::info!("router mailbox closed, dispatch loop exiting");
    }

    fn dispatch(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Connect { session_id, transport } => {
                self.registry.insert(crate::model::Connection::new(session_id, transport, Utc::now()));
                self.connection_count.fetch_add(1, Ordering::Relaxed);
            }
            RouterEvent::Inbound { session_id, frame } => self.handle_inbound(session_id, frame),
            RouterEvent::Disconnected { session_id, reason } => self.disconnect(session_id, &reason),
            RouterEvent::RingTimeout { call_id, generation } => self.on_ring_timeout(call_id, generation),
            RouterEvent::WakeTimeout { address, call_id, generation } => {
                self.on_wake_timeout(address, call_id, generation)
            }
            RouterEvent::WakeOutcome { address, call_id, outcome } => {
                self.on_wake_outcome(address, call_id, outcome)
            }
            RouterEvent::IdleTimerFired { session_id, generation } => {
                self.on_idle_timer_fired(session_id, generation)
            }
            RouterEvent::SleepPendingFired { session_id, generation } => {
                self.on_sleep_pending_fired(session_id, generation)
            }
            RouterEvent::HeartbeatSweep => self.sweep_heartbeats(),
        }
    }

    fn handle_inbound(&mut self, session_id: Uuid, frame: InboundFrame) {
        use crate::protocol::inbound::InboundFrame as F;
        match frame {
            F::Register(f) => self.handle_register(session_id, f),
            F::Unregister => self.handle_unregister(session_id),
            F::Status(f) => self.handle_status(session_id, f),
            F::Heartbeat => self.handle_heartbeat(session_id),
            F::Dial(f) => self.handle_dial(session_id, f),
            F::Answer(f) => self.handle_answer(session_id, f),
            F::Hangup(f) => self.handle_hangup(session_id, f),
            F::Msg(f) => self.handle_msg(session_id, f),
            F::Presence(f) => self.handle_presence(session_id, f),
            F::SleepAck => self.handle_sleep_ack(session_id),
            F::RegisterPbx(f) => self.handle_register_pbx(session_id, f),
        }
    }

    pub(crate) fn send_to(&self, session_id: Uuid, frame: crate::protocol::OutboundFrame) {
        if let Some(conn) = self.registry.get(session_id) {
            conn.transport.send(frame);
        }
    }

    pub(crate) fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.config.heartbeat_timeout_ms as i64)
    }
}

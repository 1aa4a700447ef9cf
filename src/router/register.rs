//! §4.2 Router — Address Lifecycle: REGISTER, STATUS, UNREGISTER, HEARTBEAT,
//! SLEEP_ACK, and the shared disconnect path (§4.9).

use chrono::Utc;
use uuid::Uuid;

use crate::model::{
    Address, AutoSleep, ConcurrencyMode, ConnectionStatus, WakeHandler, WakeMode, WakeProfile,
};
use crate::protocol::inbound::{AutoSleepPayload, RegisterFrame, StatusFrame, WakeHandlerPayload};
use crate::protocol::outbound::{ErrorReason, OutboundFrame, RegisterFailedReason};
use crate::registry::BindError;

use super::timers::{arm_idle_timer, arm_sleep_pending_timer};
use super::RouterCore;

fn parse_concurrency(frame: &RegisterFrame) -> Result<ConcurrencyMode, String> {
    let mode = frame.concurrency.as_deref().unwrap_or("single");
    match mode {
        "single" => {
            if frame.max_listeners.is_some() {
                return Err("max_listeners is only valid with concurrency=broadcast".into());
            }
            if frame.max_sessions.is_some() {
                return Err("max_sessions is only valid with concurrency=parallel".into());
            }
            Ok(ConcurrencyMode::Single)
        }
        "broadcast" => {
            if frame.max_sessions.is_some() {
                return Err("max_sessions is only valid with concurrency=parallel".into());
            }
            let max_listeners = match frame.max_listeners {
                Some(n) if n > 0 => Some(n as u32),
                Some(_) => return Err("max_listeners must be a positive integer".into()),
                None => None,
            };
            Ok(ConcurrencyMode::Broadcast { max_listeners })
        }
        "parallel" => {
            if frame.max_listeners.is_some() {
                return Err("max_listeners is only valid with concurrency=broadcast".into());
            }
            let max_sessions = match frame.max_sessions {
                Some(n) if n > 0 => n as u32,
                _ => return Err("parallel concurrency requires a positive max_sessions".into()),
            };
            Ok(ConcurrencyMode::Parallel { max_sessions })
        }
        other => Err(format!("unknown concurrency value: {other}")),
    }
}

fn parse_wake_handler(payload: &WakeHandlerPayload) -> Result<WakeHandler, String> {
    match payload {
        WakeHandlerPayload::Webhook { url, timeout_seconds } => {
            if url.is_empty() {
                return Err("webhook wake handler requires a non-empty url".into());
            }
            if url::Url::parse(url).is_err() {
                return Err("webhook wake handler url is not a valid URL".into());
            }
            if *timeout_seconds <= 0 {
                return Err("wake handler timeout_seconds must be positive".into());
            }
            Ok(WakeHandler::Webhook { url: url.clone(), timeout_seconds: *timeout_seconds as u32 })
        }
        WakeHandlerPayload::Spawn { command, timeout_seconds } => {
            if command.is_empty() || command[0].is_empty() {
                return Err("spawn wake handler requires a non-empty command".into());
            }
            if *timeout_seconds <= 0 {
                return Err("wake handler timeout_seconds must be positive".into());
            }
            Ok(WakeHandler::Spawn { command: command.clone(), timeout_seconds: *timeout_seconds as u32 })
        }
    }
}

impl RouterCore {
    pub(crate) fn handle_register(&mut self, session_id: Uuid, frame: RegisterFrame) {
        let address = match Address::parse(&frame.address) {
            Ok(a) => a,
            Err(_) => {
                self.send_to(
                    session_id,
                    OutboundFrame::RegisterFailed { reason: RegisterFailedReason::InvalidAddress },
                );
                return;
            }
        };

        let concurrency = match parse_concurrency(&frame) {
            Ok(c) => c,
            Err(detail) => {
                self.send_to(
                    session_id,
                    OutboundFrame::error(ErrorReason::InvalidPayload, "REGISTER", Some(detail)),
                );
                return;
            }
        };

        // Reinstate a stored wake profile only when this REGISTER itself
        // supplies no handler (spec §4.2); either way, a stored profile is
        // cleared the moment its address is re-bound (spec §4.5).
        let mut wake_mode = WakeMode::None;
        let mut wake_handler = None;
        if let Some(payload) = &frame.wake_handler {
            match parse_wake_handler(payload) {
                Ok(handler) => {
                    if frame.mode.as_deref() == Some("wake_on_ring") {
                        wake_mode = WakeMode::WakeOnRing;
                    }
                    wake_handler = Some(handler);
                }
                Err(detail) => {
                    self.send_to(
                        session_id,
                        OutboundFrame::error(ErrorReason::InvalidPayload, "REGISTER", Some(detail)),
                    );
                    return;
                }
            }
            self.wake_profiles.remove(&address);
        } else if let Some(profile) = self.wake_profiles.remove(&address) {
            wake_mode = WakeMode::WakeOnRing;
            wake_handler = Some(profile.handler);
        }

        match self.registry.bind_address(session_id, address.clone()) {
            Ok(()) => {}
            Err(BindError::AddressInUse) => {
                self.send_to(
                    session_id,
                    OutboundFrame::RegisterFailed { reason: RegisterFailedReason::AddressInUse },
                );
                return;
            }
        }

        let leaves_broadcast_mode = !matches!(concurrency, ConcurrencyMode::Broadcast { .. });

        if let Some(conn) = self.registry.get_mut(session_id) {
            conn.metadata = frame.metadata.unwrap_or(serde_json::Value::Null);
            conn.concurrency = concurrency;
            conn.wake_mode = wake_mode;
            conn.wake_handler = wake_handler;
        }

        // A broadcaster re-registering with a non-broadcast concurrency tears
        // down its existing session (spec §4.4 final bullet).
        if leaves_broadcast_mode {
            self.teardown_broadcast_for_address(&address, "re_registered");
        }

        self.send_to(
            session_id,
            OutboundFrame::Registered { address: address.to_string(), session_id },
        );

        self.drain_pending_wakes(&address);
    }

    pub(crate) fn handle_unregister(&mut self, session_id: Uuid) {
        self.persist_wake_profile_if_configured(session_id);
        self.disconnect(session_id, "client_requested");
    }

    pub(crate) fn handle_status(&mut self, session_id: Uuid, frame: StatusFrame) {
        let status = match frame.status.as_str() {
            "available" => ConnectionStatus::Available,
            "busy" => ConnectionStatus::Busy,
            "dnd" => ConnectionStatus::Dnd,
            "away" => ConnectionStatus::Away,
            _ => {
                self.send_to(
                    session_id,
                    OutboundFrame::error(ErrorReason::InvalidPayload, "STATUS", Some(format!("unknown status: {}", frame.status))),
                );
                return;
            }
        };

        if let Some(a) = &frame.auto_sleep {
            if a.idle_timeout_seconds < 0 {
                self.send_to(
                    session_id,
                    OutboundFrame::error(
                        ErrorReason::InvalidPayload,
                        "STATUS",
                        Some("auto_sleep.idle_timeout_seconds must be >= 0".into()),
                    ),
                );
                return;
            }
        }

        let auto_sleep = frame.auto_sleep.as_ref().map(|a: &AutoSleepPayload| AutoSleep {
            idle_timeout_seconds: a.idle_timeout_seconds as u32,
            wake_on_ring: a.wake_on_ring,
        });

        let wake_on_ring = auto_sleep.map(|a| a.wake_on_ring).unwrap_or(false);

        if let Some(conn) = self.registry.get_mut(session_id) {
            conn.explicit_status = Some(status);
            conn.auto_sleep = auto_sleep;
            conn.refresh_derived_status();
        } else {
            return;
        }

        if wake_on_ring {
            self.rearm_idle_timer(session_id);
        } else {
            self.idle_generation.remove(&session_id);
        }
    }

    pub(crate) fn handle_heartbeat(&mut self, session_id: Uuid) {
        let now = Utc::now();
        let has_conn = if let Some(conn) = self.registry.get_mut(session_id) {
            conn.last_heartbeat_at = now;
            true
        } else {
            false
        };
        if !has_conn {
            return;
        }
        self.rearm_idle_timer(session_id);
        self.send_to(session_id, OutboundFrame::HeartbeatAck { timestamp: now });
    }

    pub(crate) fn handle_sleep_ack(&mut self, session_id: Uuid) {
        let configured = self.registry.get(session_id).map(|c| c.is_wake_configured()).unwrap_or(false);
        if !configured {
            self.send_to(
                session_id,
                OutboundFrame::error(ErrorReason::InvalidPayload, "SLEEP_ACK", Some("wake_on_ring is not configured".into())),
            );
            return;
        }
        self.persist_wake_profile_if_configured(session_id);
        self.disconnect(session_id, "sleep");
    }

    pub(crate) fn persist_wake_profile_if_configured(&mut self, session_id: Uuid) {
        if let Some(conn) = self.registry.get(session_id) {
            if conn.is_wake_configured() {
                if let (Some(address), Some(handler)) = (conn.address.clone(), conn.wake_handler.clone()) {
                    self.wake_profiles.insert(address.clone(), WakeProfile { address, handler });
                }
            }
        }
    }

    pub(crate) fn rearm_idle_timer(&mut self, session_id: Uuid) {
        let wants_idle = self
            .registry
            .get(session_id)
            .and_then(|c| c.auto_sleep)
            .filter(|a| a.wake_on_ring)
            .filter(|_| self.registry.get(session_id).map(|c| c.active_call_ids.is_empty()).unwrap_or(false));

        let Some(auto_sleep) = wants_idle else { return };
        let generation = self.idle_generation.entry(session_id).or_insert(0);
        *generation += 1;
        let gen = *generation;
        arm_idle_timer(
            &self.handle,
            session_id,
            gen,
            std::time::Duration::from_secs(auto_sleep.idle_timeout_seconds as u64),
        );
    }

    /// Bumps `idle_generation` so any outstanding idle/sleep-pending timer
    /// for this session becomes a stale no-op. Called whenever a connection
    /// gains an active call, since involvement in a call resets the idle
    /// timer (spec §4.6) and there's no other cancellation primitive (spec
    /// §5, `timers.rs`).
    pub(crate) fn cancel_idle_timer(&mut self, session_id: Uuid) {
        self.idle_generation.entry(session_id).and_modify(|g| *g += 1);
    }

    pub(crate) fn on_idle_timer_fired(&mut self, session_id: Uuid, generation: u64) {
        if self.idle_generation.get(&session_id) != Some(&generation) {
            return;
        }
        let Some(conn) = self.registry.get(session_id) else { return };
        let Some(auto_sleep) = conn.auto_sleep else { return };
        if !auto_sleep.wake_on_ring {
            return;
        }
        // Involvement in a call resets the timer (spec §4.6); a stale fire
        // that raced a call starting is a no-op rather than a teardown.
        if !conn.active_call_ids.is_empty() {
            return;
        }

        let window = super::timers::sleep_pending_window(auto_sleep.idle_timeout_seconds);

        self.send_to(
            session_id,
            OutboundFrame::SleepPending {
                reason: "idle_timeout".into(),
                seconds_until_sleep: window.as_secs_f64().ceil() as u32,
            },
        );

        let gen = self.idle_generation.entry(session_id).or_insert(0);
        *gen += 1;
        let gen = *gen;
        arm_sleep_pending_timer(&self.handle, session_id, gen, window);
    }

    pub(crate) fn on_sleep_pending_fired(&mut self, session_id: Uuid, generation: u64) {
        if self.idle_generation.get(&session_id) != Some(&generation) {
            return;
        }
        // Same race as `on_idle_timer_fired`: a call that started during the
        // pending-sleep window must not be torn down by a stale fire.
        if self.registry.get(session_id).map(|c| !c.active_call_ids.is_empty()).unwrap_or(true) {
            return;
        }
        self.persist_wake_profile_if_configured(session_id);
        self.disconnect(session_id, "sleep");
    }

    /// §4.9 Disconnect Semantics, steps 1-6.
    pub(crate) fn disconnect(&mut self, session_id: Uuid, reason: &str) {
        self.idle_generation.remove(&session_id);

        if reason == "timeout" {
            self.persist_wake_profile_if_configured(session_id);
        }

        let Some(conn) = self.registry.remove(session_id) else { return };
        self.connection_count.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        self.rate_limiter.clear(session_id);

        for call_id in conn.active_call_ids.iter().copied().collect::<Vec<_>>() {
            if self.calls.contains_key(&call_id) {
                self.end_call_for_disconnect(call_id, session_id, reason);
            } else if self.broadcasts.contains_key(&call_id) {
                if let Some(address) = conn.address.as_ref() {
                    self.leave_or_teardown_broadcast(call_id, session_id, address, reason);
                }
            }
        }

        self.fail_pending_wakes_for_caller(session_id, reason);
        self.federation_routes.remove(&session_id);

        conn.transport.close(4000, reason);
    }

    pub(crate) fn sweep_heartbeats(&mut self) {
        let timeout = self.heartbeat_timeout();
        let now = Utc::now();
        let stale: Vec<Uuid> = self
            .registry
            .iter()
            .filter(|c| now.signed_duration_since(c.last_heartbeat_at) > timeout)
            .map(|c| c.session_id)
            .collect();
        for session_id in stale {
            tracing::info!(%session_id, "heartbeat sweep evicting stale connection");
            self.disconnect(session_id, "timeout");
        }
    }
}

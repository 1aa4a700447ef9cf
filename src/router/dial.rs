//! §4.3 Router — Call State Machine: DIAL, ANSWER, HANGUP, MSG, and ring
//! timeout. Point-to-point only; broadcast sessions are handled in
//! `broadcast.rs` per spec §9's "two tables" design note — ANSWER/HANGUP/MSG
//! check the point-to-point table first, then fall through to broadcast.

use std::time::Duration;

use uuid::Uuid;

use crate::model::{Address, Call, CallState, ConcurrencyMode, ConnectionStatus};
use crate::protocol::inbound::{AnswerFrame, DialFrame, HangupFrame, MsgFrame};
use crate::protocol::outbound::{BusyReason, ErrorReason, OutboundFrame};

use super::timers::arm_ring_timeout;
use super::RouterCore;

impl RouterCore {
    pub(crate) fn handle_dial(&mut self, session_id: Uuid, frame: DialFrame) {
        if !self.rate_limiter.try_attempt(session_id) {
            self.send_to(
                session_id,
                OutboundFrame::error(ErrorReason::RateLimited, "DIAL", None),
            );
            return;
        }

        let Some(caller_address) = self.registry.get(session_id).and_then(|c| c.address.clone()) else {
            self.send_to(session_id, OutboundFrame::error(ErrorReason::NotRegistered, "DIAL", None));
            return;
        };

        let callee_address = match Address::parse(&frame.to) {
            Ok(a) => a,
            Err(_) => {
                self.send_to(
                    session_id,
                    OutboundFrame::error(ErrorReason::InvalidPayload, "DIAL", Some("invalid `to` address".into())),
                );
                return;
            }
        };

        if callee_address == caller_address {
            self.send_to(session_id, busy(&callee_address, BusyReason::AlreadyInCall));
            return;
        }

        let Some(callee_session) = self.registry.session_for_address(&callee_address) else {
            if self.attempt_wake(session_id, &caller_address, &callee_address, frame.metadata.clone()) {
                return;
            }
            if let Some(target) = self.federation_route_for(&callee_address) {
                self.forward_federated_dial(target, &caller_address, &frame);
                return;
            }
            self.send_to(session_id, busy(&callee_address, BusyReason::NoSuchAddress));
            return;
        };

        self.dial_existing_callee(session_id, &caller_address, callee_session, &callee_address, frame.metadata);
    }

    fn dial_existing_callee(
        &mut self,
        caller_session: Uuid,
        caller_address: &Address,
        callee_session: Uuid,
        callee_address: &Address,
        metadata: Option<serde_json::Value>,
    ) {
        let Some(callee) = self.registry.get(callee_session) else {
            self.send_to(caller_session, busy(callee_address, BusyReason::NoSuchAddress));
            return;
        };

        match callee.explicit_status {
            Some(ConnectionStatus::Dnd) => {
                self.send_to(caller_session, busy(callee_address, BusyReason::Dnd));
                return;
            }
            Some(ConnectionStatus::Away) => {
                self.send_to(caller_session, busy(callee_address, BusyReason::Away));
                return;
            }
            Some(ConnectionStatus::Busy) => {
                self.send_to(caller_session, busy(callee_address, BusyReason::Busy));
                return;
            }
            _ => {}
        }

        match callee.concurrency.clone() {
            ConcurrencyMode::Single => {
                if !callee.active_call_ids.is_empty() {
                    self.send_to(caller_session, busy(callee_address, BusyReason::AlreadyInCall));
                    return;
                }
                self.start_point_to_point_call(caller_session, caller_address.clone(), callee_session, callee_address.clone(), metadata, None);
            }
            ConcurrencyMode::Parallel { max_sessions } => {
                if callee.active_call_ids.len() as u32 >= max_sessions {
                    self.send_to(caller_session, busy(callee_address, BusyReason::MaxSessionsReached));
                    return;
                }
                self.start_point_to_point_call(caller_session, caller_address.clone(), callee_session, callee_address.clone(), metadata, None);
            }
            ConcurrencyMode::Broadcast { .. } => {
                self.join_broadcast(caller_session, caller_address.clone(), callee_session, callee_address.clone(), metadata);
            }
        }
    }

    /// Shared "start call" primitive (spec §9): used both for a direct DIAL
    /// and for draining a pending wake call, which is why `reuse_call_id` can
    /// carry the wake call's already-issued id forward.
    pub(crate) fn start_point_to_point_call(
        &mut self,
        caller_session: Uuid,
        caller_address: Address,
        callee_session: Uuid,
        callee_address: Address,
        metadata: Option<serde_json::Value>,
        reuse_call_id: Option<Uuid>,
    ) -> Uuid {
        let call_id = reuse_call_id.unwrap_or_else(Uuid::new_v4);
        let call = Call {
            call_id,
            caller_session,
            caller_address,
            callee_session,
            callee_address,
            state: CallState::Ringing,
            started_at: chrono::Utc::now(),
            ended_at: None,
            metadata: metadata.clone(),
        };
        let from = call.caller_address.to_string();
        self.calls.insert(call_id, call);

        for sid in [caller_session, callee_session] {
            if let Some(conn) = self.registry.get_mut(sid) {
                conn.active_call_ids.insert(call_id);
                conn.refresh_derived_status();
            }
            self.cancel_idle_timer(sid);
        }

        self.send_to(callee_session, OutboundFrame::Ring { from, call_id, metadata });

        let generation = self.ring_generation.entry(call_id).or_insert(0);
        *generation += 1;
        let generation = *generation;
        arm_ring_timeout(&self.handle, call_id, generation, self.config.call_ringing_timeout());

        call_id
    }

    pub(crate) fn handle_answer(&mut self, session_id: Uuid, frame: AnswerFrame) {
        let Some(call) = self.calls.get_mut(&frame.call_id) else { return };
        if call.callee_session != session_id || call.state != CallState::Ringing {
            return;
        }
        call.state = CallState::Connected;
        let caller_session = call.caller_session;
        let call_id = call.call_id;
        let to = call.callee_address.to_string();

        self.ring_generation.entry(call_id).and_modify(|g| *g += 1);

        self.send_to(caller_session, OutboundFrame::Connected { call_id, to });
    }

    pub(crate) fn handle_hangup(&mut self, session_id: Uuid, frame: HangupFrame) {
        if self.broadcasts.contains_key(&frame.call_id) {
            self.handle_broadcast_hangup(session_id, frame.call_id, frame.reason.unwrap_or_else(|| "normal".into()));
            return;
        }

        let Some(call) = self.calls.get(&frame.call_id) else { return };
        if call.state == CallState::Ended || !call.is_participant(session_id) {
            return;
        }
        let reason = frame.reason.unwrap_or_else(|| "normal".into());
        let other = call.other_session(session_id).unwrap();
        self.ring_generation.entry(frame.call_id).and_modify(|g| *g += 1);
        self.finish_point_to_point_call(frame.call_id);
        self.send_to(other, OutboundFrame::Hangup { call_id: frame.call_id, reason, from: None });
    }

    pub(crate) fn handle_msg(&mut self, session_id: Uuid, frame: MsgFrame) {
        let content_type = match frame.content_type.as_deref().unwrap_or("text") {
            "text" => "text",
            "json" => "json",
            "binary" => "binary",
            _ => {
                self.send_to(
                    session_id,
                    OutboundFrame::error(ErrorReason::InvalidPayload, "MSG", Some("unknown content_type".into())),
                );
                return;
            }
        }
        .to_string();

        if self.broadcasts.contains_key(&frame.call_id) {
            self.relay_broadcast_msg(session_id, frame.call_id, frame.data, content_type);
            return;
        }

        let Some(call) = self.calls.get(&frame.call_id) else { return };
        if call.state != CallState::Connected || !call.is_participant(session_id) {
            return;
        }
        let other = call.other_session(session_id).unwrap();
        let from = if session_id == call.caller_session {
            call.caller_address.to_string()
        } else {
            call.callee_address.to_string()
        };
        self.send_to(
            other,
            OutboundFrame::Msg { call_id: frame.call_id, from, data: frame.data, content_type },
        );
    }

    pub(crate) fn on_ring_timeout(&mut self, call_id: Uuid, generation: u64) {
        if self.ring_generation.get(&call_id) != Some(&generation) {
            return;
        }
        let Some(call) = self.calls.get(&call_id) else { return };
        if call.state != CallState::Ringing {
            return;
        }
        let caller_session = call.caller_session;
        let callee_session = call.callee_session;
        self.finish_point_to_point_call(call_id);
        self.send_to(caller_session, OutboundFrame::Busy { to: None, reason: BusyReason::Timeout });
        self.send_to(callee_session, OutboundFrame::Hangup { call_id, reason: "timeout".into(), from: None });
    }

    /// Called when one participant of an active call disconnects (spec §4.9
    /// step 4, point-to-point branch).
    pub(crate) fn end_call_for_disconnect(&mut self, call_id: Uuid, leaving_session: Uuid, reason: &str) {
        let Some(call) = self.calls.get(&call_id) else { return };
        if call.state == CallState::Ended {
            return;
        }
        let Some(other) = call.other_session(leaving_session) else { return };
        self.ring_generation.entry(call_id).and_modify(|g| *g += 1);
        self.finish_point_to_point_call(call_id);
        self.send_to(other, OutboundFrame::Hangup { call_id, reason: reason.to_string(), from: None });
    }

    /// Removes the call record and restores both participants to an
    /// available/idle admission state. Does not itself emit any frame.
    fn finish_point_to_point_call(&mut self, call_id: Uuid) {
        let Some(mut call) = self.calls.remove(&call_id) else { return };
        call.state = CallState::Ended;
        call.ended_at = Some(chrono::Utc::now());

        for sid in [call.caller_session, call.callee_session] {
            if let Some(conn) = self.registry.get_mut(sid) {
                conn.active_call_ids.remove(&call_id);
                conn.refresh_derived_status();
            }
        }

        // The ring timer never outlives its call (spec §5); drop the
        // generation entry instead of leaving it to grow the map forever.
        self.ring_generation.remove(&call_id);
    }
}

fn busy(to: &Address, reason: BusyReason) -> OutboundFrame {
    OutboundFrame::Busy { to: Some(to.to_string()), reason }
}

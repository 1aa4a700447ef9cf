//! §4.5 Wake-on-Ring: the process-wide `WakeProfile` side map, the
//! per-address FIFO of `PendingWakeCall`s, and the `WakeExecutor` dispatch.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::model::{Address, PendingWakeCall, WakeProfile};
use crate::protocol::outbound::{BusyReason, OutboundFrame};
use crate::wake_executor::WakeOutcomeSender;

use super::timers::{arm_wake_timeout, wake_deadline};
use super::RouterCore;

impl RouterCore {
    /// On DIAL to an unknown address: if a `WakeProfile` exists, enqueue a
    /// `PendingWakeCall` and invoke the executor instead of failing the dial.
    /// Returns `true` if a wake was attempted (the caller sees no immediate
    /// reply), `false` if there's no profile to wake.
    pub(crate) fn attempt_wake(
        &mut self,
        caller_session: Uuid,
        caller_address: &Address,
        callee_address: &Address,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let Some(profile) = self.wake_profiles.get(callee_address).cloned() else {
            return false;
        };

        let call_id = Uuid::new_v4();
        let deadline_duration = wake_deadline(profile.handler.timeout_seconds());

        if let Some(conn) = self.registry.get_mut(caller_session) {
            conn.active_call_ids.insert(call_id);
            conn.refresh_derived_status();
        }
        self.cancel_idle_timer(caller_session);

        self.pending_wakes.entry(callee_address.clone()).or_insert_with(VecDeque::new).push_back(PendingWakeCall {
            call_id,
            caller_session,
            caller_address: caller_address.clone(),
            callee_address: callee_address.clone(),
            metadata,
            wake_profile: profile.clone(),
        });

        let generation = self.wake_generation.entry(call_id).or_insert(0);
        *generation += 1;
        let generation = *generation;
        arm_wake_timeout(&self.handle, callee_address.clone(), call_id, generation, deadline_duration);

        let sender = WakeOutcomeSender::new(self.handle.clone(), callee_address.clone(), call_id);
        self.wake_executor.dispatch(profile, sender);

        true
    }

    pub(crate) fn on_wake_timeout(&mut self, address: Address, call_id: Uuid, generation: u64) {
        if self.wake_generation.get(&call_id) != Some(&generation) {
            return;
        }
        self.fail_pending_wake(&address, call_id, BusyReason::Timeout);
    }

    pub(crate) fn on_wake_outcome(&mut self, address: Address, call_id: Uuid, outcome: Result<(), String>) {
        // Success does nothing on its own (spec §4.5/§5): only the woken
        // agent's subsequent REGISTER completes the call. Failure fails the
        // pending call immediately rather than waiting out the timeout.
        if let Err(_detail) = outcome {
            self.wake_generation.entry(call_id).and_modify(|g| *g += 1);
            self.fail_pending_wake(&address, call_id, BusyReason::WakeFailed);
        }
    }

    fn fail_pending_wake(&mut self, address: &Address, call_id: Uuid, reason: BusyReason) {
        let Some(queue) = self.pending_wakes.get_mut(address) else { return };
        let Some(pos) = queue.iter().position(|p| p.call_id == call_id) else { return };
        let pending = queue.remove(pos).unwrap();
        if queue.is_empty() {
            self.pending_wakes.remove(address);
        }
        self.wake_generation.remove(&call_id);
        self.release_pending_caller(&pending);
        self.send_to(pending.caller_session, OutboundFrame::Busy { to: Some(address.to_string()), reason });
    }

    /// Fail any PendingWakeCalls whose caller is this disconnecting
    /// connection (spec §4.9 step 5).
    pub(crate) fn fail_pending_wakes_for_caller(&mut self, caller_session: Uuid, reason: &str) {
        let mut resolved_call_ids = Vec::new();
        for queue in self.pending_wakes.values_mut() {
            queue.retain(|p| {
                let keep = p.caller_session != caller_session;
                if !keep {
                    resolved_call_ids.push(p.call_id);
                }
                keep
            });
        }
        self.pending_wakes.retain(|_, q| !q.is_empty());
        for call_id in resolved_call_ids {
            self.wake_generation.remove(&call_id);
        }
        let _ = reason; // the caller itself is gone; nothing to notify
    }

    fn release_pending_caller(&mut self, pending: &PendingWakeCall) {
        if let Some(conn) = self.registry.get_mut(pending.caller_session) {
            conn.active_call_ids.remove(&pending.call_id);
            conn.refresh_derived_status();
        }
    }

    /// Drain the pending-wake queue for `address` after a successful REGISTER
    /// reinstates (or freshly binds) that address. Dequeues FIFO, skipping
    /// callers that disconnected meanwhile, until the queue empties or the
    /// connection stops accepting (spec §4.2, §4.5).
    pub(crate) fn drain_pending_wakes(&mut self, address: &Address) {
        let Some(session_id) = self.registry.session_for_address(address) else { return };

        loop {
            let Some(queue) = self.pending_wakes.get_mut(address) else { return };
            let Some(pending) = queue.pop_front() else {
                self.pending_wakes.remove(address);
                return;
            };
            if queue.is_empty() {
                self.pending_wakes.remove(address);
            }

            if self.registry.get(pending.caller_session).is_none() {
                self.wake_generation.remove(&pending.call_id);
                self.release_pending_caller(&pending);
                self.send_to(
                    pending.caller_session,
                    OutboundFrame::Busy { to: Some(address.to_string()), reason: BusyReason::CallerUnavailable },
                );
                continue;
            }

            if !self.registry.get(session_id).map(|c| c.admits_new_call()).unwrap_or(false) {
                // Re-queue and stop; this connection no longer accepts.
                self.pending_wakes.entry(address.clone()).or_insert_with(VecDeque::new).push_front(pending);
                return;
            }

            self.release_pending_caller(&pending);
            self.wake_generation.remove(&pending.call_id);
            self.start_point_to_point_call(
                pending.caller_session,
                pending.caller_address.clone(),
                session_id,
                pending.callee_address.clone(),
                pending.metadata.clone(),
                Some(pending.call_id),
            );
        }
    }
}

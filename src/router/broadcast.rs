//! §4.4 Broadcast Sessions: one broadcaster fanning out to many listeners
//! over a shared `callId`. Grounded in the teacher's `ConnectionManager`
//! fan-out helpers (`broadcast_to_users`), generalized from "every member of
//! a server" to "every listener of one broadcaster's session".
//!
//! Lookups from `dial.rs`/`register.rs` check the point-to-point `calls`
//! table first and fall through to `broadcasts` here, per spec §9's
//! "two tables" design note.

use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

use crate::model::{Address, BroadcastSession, ConcurrencyMode};
use crate::protocol::outbound::{BusyReason, OutboundFrame};

use super::RouterCore;

impl RouterCore {
    /// A DIAL against a broadcast-registered callee (spec §4.4 "Join").
    pub(crate) fn join_broadcast(
        &mut self,
        caller_session: Uuid,
        caller_address: Address,
        broadcaster_session: Uuid,
        broadcaster_address: Address,
        metadata: Option<Value>,
    ) {
        let call_id = match self.broadcast_by_address.get(&broadcaster_address) {
            Some(&existing) => existing,
            None => self.create_broadcast_session(broadcaster_session, broadcaster_address.clone(), metadata.clone()),
        };

        let Some(session) = self.broadcasts.get_mut(&call_id) else { return };

        // Duplicate joins by the same session are idempotent: re-emit
        // CONNECTED without inserting a second time.
        if session.listeners.contains(&caller_session) {
            self.send_to(
                caller_session,
                OutboundFrame::Connected { call_id, to: broadcaster_address.to_string() },
            );
            return;
        }

        if session.is_full() {
            self.send_to(
                caller_session,
                OutboundFrame::Busy {
                    to: Some(broadcaster_address.to_string()),
                    reason: BusyReason::MaxListenersReached,
                },
            );
            return;
        }

        session.listeners.insert(caller_session);

        if let Some(conn) = self.registry.get_mut(caller_session) {
            conn.active_call_ids.insert(call_id);
            conn.refresh_derived_status();
        }
        self.cancel_idle_timer(caller_session);

        self.send_to(
            caller_session,
            OutboundFrame::Connected { call_id, to: broadcaster_address.to_string() },
        );
        self.send_to(
            broadcaster_session,
            OutboundFrame::Ring { from: caller_address.to_string(), call_id, metadata },
        );
    }

    fn create_broadcast_session(
        &mut self,
        broadcaster_session: Uuid,
        broadcaster_address: Address,
        metadata: Option<Value>,
    ) -> Uuid {
        let max_listeners = match self.registry.get(broadcaster_session).map(|c| &c.concurrency) {
            Some(ConcurrencyMode::Broadcast { max_listeners }) => *max_listeners,
            _ => None,
        };
        let call_id = Uuid::new_v4();
        self.broadcasts.insert(
            call_id,
            BroadcastSession {
                call_id,
                broadcaster_session,
                broadcaster_address: broadcaster_address.clone(),
                listeners: HashSet::new(),
                metadata,
                max_listeners,
            },
        );
        self.broadcast_by_address.insert(broadcaster_address, call_id);
        if let Some(conn) = self.registry.get_mut(broadcaster_session) {
            conn.active_call_ids.insert(call_id);
            conn.refresh_derived_status();
        }
        self.cancel_idle_timer(broadcaster_session);
        call_id
    }

    /// Broadcaster MSG fans out to every listener; listener MSG is
    /// party-line-blind and goes only to the broadcaster (spec §4.4).
    pub(crate) fn relay_broadcast_msg(&mut self, session_id: Uuid, call_id: Uuid, data: Value, content_type: String) {
        let Some(session) = self.broadcasts.get(&call_id) else { return };

        if session.broadcaster_session == session_id {
            let from = session.broadcaster_address.to_string();
            // Best-effort: a send failure on one listener must not stop
            // delivery to the rest (spec §4.4), so we iterate to completion
            // regardless of any individual `send_to` outcome.
            let listeners: Vec<Uuid> = session.listeners.iter().copied().collect();
            for listener in listeners {
                self.send_to(
                    listener,
                    OutboundFrame::Msg { call_id, from: from.clone(), data: data.clone(), content_type: content_type.clone() },
                );
            }
        } else if session.listeners.contains(&session_id) {
            let broadcaster_session = session.broadcaster_session;
            let Some(from) = self.registry.get(session_id).and_then(|c| c.address.clone()) else { return };
            self.send_to(
                broadcaster_session,
                OutboundFrame::Msg { call_id, from: from.to_string(), data, content_type },
            );
        }
    }

    /// HANGUP against a `callId` that resolved to a broadcast session (spec
    /// §4.4): dispatches to the broadcaster- or listener-leaving branch.
    pub(crate) fn handle_broadcast_hangup(&mut self, session_id: Uuid, call_id: Uuid, reason: String) {
        let Some(address) = self.registry.get(session_id).and_then(|c| c.address.clone()) else { return };
        self.leave_or_teardown_broadcast(call_id, session_id, &address, &reason);
    }

    /// Shared exit path for both an explicit HANGUP and a disconnect (spec
    /// §4.4 and §4.9 step 4, broadcast branch). `address` is the leaving
    /// connection's bound address, captured by the caller before any
    /// registry removal so it survives a disconnect-triggered call.
    pub(crate) fn leave_or_teardown_broadcast(&mut self, call_id: Uuid, session_id: Uuid, address: &Address, reason: &str) {
        let Some(session) = self.broadcasts.get(&call_id) else { return };
        if session.broadcaster_session == session_id {
            self.teardown_broadcast(call_id, reason);
        } else if session.listeners.contains(&session_id) {
            self.remove_listener(call_id, session_id, address, reason);
        }
    }

    /// Broadcaster HANGUP/disconnect/re-register-away-from-broadcast (spec
    /// §4.4): notify every listener, clear their `activeCallIds`, destroy
    /// the session. Reason propagates as-is.
    pub(crate) fn teardown_broadcast(&mut self, call_id: Uuid, reason: &str) {
        let Some(session) = self.broadcasts.remove(&call_id) else { return };
        self.broadcast_by_address.remove(&session.broadcaster_address);

        for listener in session.listeners {
            self.send_to(listener, OutboundFrame::Hangup { call_id, reason: reason.to_string(), from: None });
            if let Some(conn) = self.registry.get_mut(listener) {
                conn.active_call_ids.remove(&call_id);
                conn.refresh_derived_status();
            }
        }

        if let Some(conn) = self.registry.get_mut(session.broadcaster_session) {
            conn.active_call_ids.remove(&call_id);
            conn.refresh_derived_status();
        }
    }

    /// Tears down a broadcast session whose broadcaster has re-registered
    /// with a non-broadcast concurrency mode (spec §4.4 final bullet).
    pub(crate) fn teardown_broadcast_for_address(&mut self, address: &Address, reason: &str) {
        if let Some(&call_id) = self.broadcast_by_address.get(address) {
            self.teardown_broadcast(call_id, reason);
        }
    }

    fn remove_listener(&mut self, call_id: Uuid, listener_session: Uuid, listener_address: &Address, reason: &str) {
        let broadcaster_session = {
            let Some(session) = self.broadcasts.get_mut(&call_id) else { return };
            session.listeners.remove(&listener_session);
            session.broadcaster_session
        };

        self.send_to(listener_session, OutboundFrame::Hangup { call_id, reason: reason.to_string(), from: None });
        if let Some(conn) = self.registry.get_mut(listener_session) {
            conn.active_call_ids.remove(&call_id);
            conn.refresh_derived_status();
        }
        self.send_to(
            broadcaster_session,
            OutboundFrame::Hangup { call_id, reason: reason.to_string(), from: Some(listener_address.to_string()) },
        );

        let now_empty = self.broadcasts.get(&call_id).map(|s| s.listeners.is_empty()).unwrap_or(false);
        if now_empty {
            if let Some(session) = self.broadcasts.remove(&call_id) {
                self.broadcast_by_address.remove(&session.broadcaster_address);
                if let Some(conn) = self.registry.get_mut(session.broadcaster_session) {
                    conn.active_call_ids.remove(&call_id);
                    conn.refresh_derived_status();
                }
            }
        }
    }
}

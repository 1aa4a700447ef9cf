//! Timer cancellation without a dedicated cancellation primitive: every armed
//! timer is stamped with a generation counter recorded on the router. A timer
//! fire is only acted on if its generation still matches the current one for
//! that key; re-arming or cancelling just bumps the counter, so stale fires
//! become silent no-ops (spec §5: "All cancellable on relevant state
//! transitions; none outlive their call/connection").

use std::time::Duration;

use uuid::Uuid;

use crate::model::Address;

use super::{RouterEvent, RouterHandle};

pub fn arm_ring_timeout(handle: &RouterHandle, call_id: Uuid, generation: u64, duration: Duration) {
    let handle = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        handle.submit(RouterEvent::RingTimeout { call_id, generation });
    });
}

pub fn arm_wake_timeout(
    handle: &RouterHandle,
    address: Address,
    call_id: Uuid,
    generation: u64,
    duration: Duration,
) {
    let handle = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        handle.submit(RouterEvent::WakeTimeout { address, call_id, generation });
    });
}

pub fn arm_idle_timer(handle: &RouterHandle, session_id: Uuid, generation: u64, duration: Duration) {
    let handle = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        handle.submit(RouterEvent::IdleTimerFired { session_id, generation });
    });
}

pub fn arm_sleep_pending_timer(handle: &RouterHandle, session_id: Uuid, generation: u64, duration: Duration) {
    let handle = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        handle.submit(RouterEvent::SleepPendingFired { session_id, generation });
    });
}

/// 200ms..5s, proportional to the configured idle timeout (spec §4.6).
pub fn sleep_pending_window(idle_timeout_seconds: u32) -> Duration {
    let proportional = (idle_timeout_seconds as u64 * 50).clamp(200, 5_000);
    Duration::from_millis(proportional)
}

/// Wake attempt deadlines floor at 100ms (spec §4.5).
pub fn wake_deadline(timeout_seconds: u32) -> Duration {
    Duration::from_millis((timeout_seconds as u64 * 1000).max(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_pending_window_is_clamped() {
        assert_eq!(sleep_pending_window(0), Duration::from_millis(200));
        assert_eq!(sleep_pending_window(1000), Duration::from_millis(5_000));
        assert_eq!(sleep_pending_window(10), Duration::from_millis(500));
    }

    #[test]
    fn wake_deadline_floors_at_100ms() {
        assert_eq!(wake_deadline(0), Duration::from_millis(100));
        assert_eq!(wake_deadline(1), Duration::from_millis(1000));
    }
}

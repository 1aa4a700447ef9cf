//! §6 `WakeExecutor` collaborator: a single fire-and-forget async operation
//! invoked from a frame handler. Represented as a tagged variant rather than
//! a trait object (spec §9 design note), since there are exactly two live
//! implementations plus a test no-op — the same shape as `ConcurrencyMode`.

mod spawn;
mod webhook;

use crate::model::{Address, WakeHandler, WakeProfile};
use crate::router::{RouterEvent, RouterHandle};

use uuid::Uuid;

/// Posts the outcome of a wake attempt back onto the router's mailbox as an
/// internal event (spec §5: "completion/failure posted back as an internal
/// event").
pub struct WakeOutcomeSender {
    handle: RouterHandle,
    address: Address,
    call_id: Uuid,
}

impl WakeOutcomeSender {
    pub fn new(handle: RouterHandle, address: Address, call_id: Uuid) -> Self {
        WakeOutcomeSender { handle, address, call_id }
    }

    pub fn send(self, outcome: Result<(), String>) {
        self.handle.submit(RouterEvent::WakeOutcome {
            address: self.address,
            call_id: self.call_id,
            outcome,
        });
    }
}

#[derive(Clone)]
pub enum WakeExecutor {
    /// Dispatches to the handler kind declared on the profile: an HTTP POST
    /// for `Webhook`, a subprocess for `Spawn`.
    Live { http_client: reqwest::Client },
    /// Logs and reports success without attempting anything. Used in tests
    /// and for deployments that never configure wake-on-ring agents.
    Noop,
}

impl WakeExecutor {
    pub fn live() -> Self {
        WakeExecutor::Live { http_client: reqwest::Client::new() }
    }

    /// Fire-and-forget: spawns the attempt and returns immediately. The
    /// caller's `RouterHandle`-backed `sender` carries the eventual result
    /// back onto the dispatch mailbox.
    pub fn dispatch(&self, profile: WakeProfile, sender: WakeOutcomeSender) {
        match self {
            WakeExecutor::Noop => {
                tracing::info!(address = %profile.address, "wake executor (noop) invoked");
                tokio::spawn(async move { sender.send(Ok(())) });
            }
            WakeExecutor::Live { http_client } => {
                let client = http_client.clone();
                tokio::spawn(async move {
                    let deadline = std::time::Duration::from_secs(profile.handler.timeout_seconds().max(1) as u64);
                    let result = match &profile.handler {
                        WakeHandler::Webhook { url, .. } => {
                            webhook::wake_webhook(&client, url, &profile, deadline).await
                        }
                        WakeHandler::Spawn { command, .. } => spawn::wake_spawn(command, deadline).await,
                    };
                    sender.send(result.map_err(|e| e.to_string()));
                });
            }
        }
    }
}
